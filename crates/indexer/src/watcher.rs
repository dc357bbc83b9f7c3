use crate::error::{IndexerError, Result};
use crate::pipeline::IndexingPipeline;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{self, Instant};

/// Capacity of the change-event channel. Bounded so a storm of OS events
/// backpressures at the notifier instead of growing without limit.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// File-system change as consumed by the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    Created(PathBuf),
    Modified(PathBuf),
    Removed(PathBuf),
}

impl ChangeEvent {
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            Self::Created(path) | Self::Modified(path) | Self::Removed(path) => path,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct WatcherConfig {
    /// Quiet period after the last event before a batch is applied.
    pub debounce: Duration,
    /// Ceiling on how long a busy stream can defer application.
    pub max_batch_wait: Duration,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(750),
            max_batch_wait: Duration::from_secs(3),
        }
    }
}

/// Bridges OS notifications onto a bounded channel of `ChangeEvent`s.
/// Dropping the watcher stops the feed.
pub struct ChangeWatcher {
    _watcher: RecommendedWatcher,
}

impl ChangeWatcher {
    /// Watch `directories` recursively, sending translated events to `tx`.
    pub fn start(
        directories: &[PathBuf],
        tx: mpsc::Sender<ChangeEvent>,
    ) -> Result<Self> {
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let Ok(event) = res else {
                return;
            };
            for change in translate(&event) {
                // blocking_send backpressures the notify thread if the
                // consumer falls behind; events are never silently dropped.
                let _ = tx.blocking_send(change);
            }
        })
        .map_err(|e| IndexerError::Watcher(format!("watcher init failed: {e}")))?;

        for dir in directories {
            watcher
                .watch(dir, RecursiveMode::Recursive)
                .map_err(|e| IndexerError::Watcher(format!("failed to watch {}: {e}", dir.display())))?;
        }

        Ok(Self { _watcher: watcher })
    }

    /// The channel pair this watcher is meant to feed.
    #[must_use]
    pub fn channel() -> (mpsc::Sender<ChangeEvent>, mpsc::Receiver<ChangeEvent>) {
        mpsc::channel(EVENT_CHANNEL_CAPACITY)
    }
}

fn translate(event: &Event) -> Vec<ChangeEvent> {
    let mut out = Vec::new();
    match event.kind {
        EventKind::Create(_) => {
            for path in &event.paths {
                out.push(ChangeEvent::Created(path.clone()));
            }
        }
        EventKind::Modify(_) => {
            for path in &event.paths {
                out.push(ChangeEvent::Modified(path.clone()));
            }
        }
        EventKind::Remove(_) => {
            for path in &event.paths {
                out.push(ChangeEvent::Removed(path.clone()));
            }
        }
        _ => {}
    }
    out
}

/// Debounce bookkeeping: per-path latest event wins, and application fires
/// either after a quiet period or at the max-batch ceiling.
struct DebounceState {
    pending: HashMap<PathBuf, ChangeEvent>,
    last_event: Option<Instant>,
    first_event: Option<Instant>,
    config: WatcherConfig,
}

impl DebounceState {
    fn new(config: WatcherConfig) -> Self {
        Self {
            pending: HashMap::new(),
            last_event: None,
            first_event: None,
            config,
        }
    }

    fn record(&mut self, event: ChangeEvent) {
        let now = Instant::now();
        self.pending.insert(event.path().to_path_buf(), event);
        self.last_event = Some(now);
        self.first_event.get_or_insert(now);
    }

    fn deadline(&self) -> Option<Instant> {
        let last = self.last_event?;
        let quiet = last + self.config.debounce;
        let forced = self.first_event.map(|first| first + self.config.max_batch_wait);
        Some(forced.map_or(quiet, |forced| quiet.min(forced)))
    }

    fn drain(&mut self) -> Vec<ChangeEvent> {
        self.last_event = None;
        self.first_event = None;
        self.pending.drain().map(|(_, event)| event).collect()
    }
}

/// Consume change events until the channel closes, driving the pipeline.
///
/// Single consumer by design: OS notification quirks (duplicate modifies,
/// create+modify bursts) collapse in the debounce map before any indexing
/// work starts.
pub async fn drive_pipeline(
    pipeline: IndexingPipeline,
    mut rx: mpsc::Receiver<ChangeEvent>,
    config: WatcherConfig,
) {
    let mut state = DebounceState::new(config);

    loop {
        let deadline = state.deadline();
        tokio::select! {
            event = rx.recv() => {
                match event {
                    Some(event) => state.record(event),
                    None => break,
                }
            }
            () = async {
                if let Some(deadline) = deadline {
                    time::sleep_until(deadline).await;
                }
            }, if deadline.is_some() => {
                apply_batch(&pipeline, state.drain()).await;
            }
        }
    }

    // Flush whatever is left once the feed closes.
    apply_batch(&pipeline, state.drain()).await;
}

async fn apply_batch(pipeline: &IndexingPipeline, mut batch: Vec<ChangeEvent>) {
    if batch.is_empty() {
        return;
    }
    batch.sort_by(|a, b| a.path().cmp(b.path()));
    log::debug!("Applying {} debounced change events", batch.len());

    for event in batch {
        let result = match &event {
            ChangeEvent::Created(path) | ChangeEvent::Modified(path) => {
                pipeline.index_file(path).await.map(|_| ())
            }
            ChangeEvent::Removed(path) => pipeline.remove_file(path).await.map(|_| ()),
        };
        if let Err(e) = result {
            log::warn!("Change event for {} failed: {e}", event.path().display());
        }
    }
}
