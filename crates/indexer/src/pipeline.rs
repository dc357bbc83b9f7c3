use crate::chunker;
use crate::error::{IndexerError, Result};
use crate::extract::ContentExtractor;
use crate::scanner::{FileKind, FileScanner, ScanConfig};
use crate::stats::IndexOutcome;
use semfind_metadata_store::{FileRecord, IndexingState, MetadataStore, NewFileRecord};
use semfind_protocol::IndexStatus;
use semfind_vector_store::{
    ApproximateIndex, EmbeddingProvider, ProviderResult, VectorStore, VectorStoreError,
};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime};
use tokio::sync::{watch, Semaphore};

/// Tunables for the indexing pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Concurrent per-file workers. Defaults to the CPU core count.
    pub worker_count: usize,
    /// Words per text chunk fed to the embedding input builder.
    pub chunk_size_words: usize,
    /// Embedding model context budget in tokens.
    pub max_context_tokens: usize,
    /// Attempts per embedding request (transient failures only).
    pub retry_attempts: u32,
    /// First backoff delay; doubles per attempt.
    pub retry_base_delay: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            worker_count: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            chunk_size_words: 512,
            max_context_tokens: 1500,
            retry_attempts: 3,
            retry_base_delay: Duration::from_millis(200),
        }
    }
}

/// What happened to one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    ContentIndexed,
    MetadataOnly,
    Failed(String),
    /// Unchanged content hash, or another worker already had the path.
    Skipped,
}

struct PipelineInner {
    vectors: VectorStore,
    metadata: MetadataStore,
    provider: Arc<EmbeddingProvider>,
    extractor: Arc<dyn ContentExtractor>,
    approximate: ApproximateIndex,
    scan_config: ScanConfig,
    config: PipelineConfig,
    workers: Arc<Semaphore>,
    in_flight: Mutex<HashSet<PathBuf>>,
    directory_run: AtomicBool,
    progress_tx: watch::Sender<IndexStatus>,
}

/// Orchestrates extraction → embedding → storage per file, incrementally.
///
/// Per-file failures are isolated: a file that cannot be extracted or
/// embedded degrades to metadata-only (with the reason recorded) and the
/// batch continues. The one deliberate exception is a vector dimension
/// mismatch, which means the embedding model changed under an existing
/// index; continuing would poison every record, so the run aborts.
#[derive(Clone)]
pub struct IndexingPipeline {
    inner: Arc<PipelineInner>,
}

impl IndexingPipeline {
    pub fn new(
        vectors: VectorStore,
        metadata: MetadataStore,
        provider: Arc<EmbeddingProvider>,
        extractor: Arc<dyn ContentExtractor>,
        approximate: ApproximateIndex,
        scan_config: ScanConfig,
        config: PipelineConfig,
    ) -> Self {
        let (progress_tx, _) = watch::channel(IndexStatus::default());
        let workers = Arc::new(Semaphore::new(config.worker_count.max(1)));
        Self {
            inner: Arc::new(PipelineInner {
                vectors,
                metadata,
                provider,
                extractor,
                approximate,
                scan_config,
                config,
                workers,
                in_flight: Mutex::new(HashSet::new()),
                directory_run: AtomicBool::new(false),
                progress_tx,
            }),
        }
    }

    /// Live progress feed for status surfaces.
    #[must_use]
    pub fn subscribe_progress(&self) -> watch::Receiver<IndexStatus> {
        self.inner.progress_tx.subscribe()
    }

    #[must_use]
    pub fn vectors(&self) -> &VectorStore {
        &self.inner.vectors
    }

    #[must_use]
    pub fn metadata(&self) -> &MetadataStore {
        &self.inner.metadata
    }

    #[must_use]
    pub fn approximate(&self) -> &ApproximateIndex {
        &self.inner.approximate
    }

    /// Index every eligible file under `directory`. Only one directory run
    /// at a time; single-file (watch event) indexing stays allowed.
    pub async fn index_directory(&self, directory: impl AsRef<Path>) -> Result<IndexOutcome> {
        let directory = directory.as_ref().to_path_buf();
        if !directory.is_dir() {
            return Err(IndexerError::InvalidPath(format!(
                "not a directory: {}",
                directory.display()
            )));
        }
        if self.inner.directory_run.swap(true, Ordering::SeqCst) {
            return Err(IndexerError::AlreadyRunning);
        }

        let result = self.index_directory_inner(directory).await;
        self.inner.directory_run.store(false, Ordering::SeqCst);
        self.inner.progress_tx.send_replace(IndexStatus::default());
        result
    }

    async fn index_directory_inner(&self, directory: PathBuf) -> Result<IndexOutcome> {
        let started = Instant::now();

        let scan_config = self.inner.scan_config.clone();
        let scan_root = directory.clone();
        let files =
            tokio::task::spawn_blocking(move || FileScanner::new(scan_root, scan_config).scan())
                .await?;

        let total = files.len();
        log::info!(
            "Indexing {} files under {}",
            total,
            directory.display()
        );
        self.inner.progress_tx.send_replace(IndexStatus {
            is_indexing: true,
            current: 0,
            total,
            current_file: String::new(),
        });

        let completed = Arc::new(AtomicUsize::new(0));
        let mut tasks = Vec::with_capacity(total);
        for (path, kind) in files {
            let pipeline = self.clone();
            let completed = completed.clone();
            tasks.push(tokio::spawn(async move {
                let _permit = match pipeline.inner.workers.clone().acquire_owned().await {
                    Ok(permit) => permit,
                    // The semaphore only closes on shutdown.
                    Err(_) => return (path, Ok(FileOutcome::Skipped)),
                };
                pipeline.publish_progress(&completed, Some(&path));
                let result = pipeline.process_path(&path, kind).await;
                completed.fetch_add(1, Ordering::Relaxed);
                pipeline.publish_progress(&completed, None);
                (path, result)
            }));
        }

        let mut outcome = IndexOutcome::new();
        for task in tasks {
            match task.await {
                Ok((path, Ok(file_outcome))) => match file_outcome {
                    FileOutcome::ContentIndexed => outcome.content_indexed += 1,
                    FileOutcome::MetadataOnly => outcome.metadata_only += 1,
                    FileOutcome::Failed(reason) => {
                        outcome.failed += 1;
                        outcome.errors.push(format!("{}: {reason}", path.display()));
                    }
                    FileOutcome::Skipped => outcome.skipped_unchanged += 1,
                },
                Ok((path, Err(e))) => {
                    // Dimension mismatch is a configuration error; carrying
                    // on would fail every remaining file the same way.
                    if matches!(
                        e,
                        IndexerError::VectorStore(VectorStoreError::DimensionMismatch { .. })
                    ) {
                        return Err(e);
                    }
                    outcome.failed += 1;
                    outcome.errors.push(format!("{}: {e}", path.display()));
                }
                Err(join_err) => {
                    outcome.failed += 1;
                    outcome.errors.push(format!("worker panicked: {join_err}"));
                }
            }
        }

        outcome.time_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        log::info!(
            "Indexing run finished: {} content, {} metadata-only, {} failed, {} skipped in {}ms",
            outcome.content_indexed,
            outcome.metadata_only,
            outcome.failed,
            outcome.skipped_unchanged,
            outcome.time_ms
        );
        Ok(outcome)
    }

    /// Index a single file (watch-event path). Routing comes from the scan
    /// config; unroutable files are skipped.
    pub async fn index_file(&self, path: impl AsRef<Path>) -> Result<FileOutcome> {
        let path = path.as_ref();
        if !path.is_file() {
            // A rename or delete can race the event; treat as removal.
            self.remove_file(path).await?;
            return Ok(FileOutcome::Skipped);
        }
        match self.inner.scan_config.classify(path) {
            Some(kind) => self.process_path(path, kind).await,
            None => Ok(FileOutcome::Skipped),
        }
    }

    /// Purge a file from both stores. Returns whether anything was removed.
    pub async fn remove_file(&self, path: impl AsRef<Path>) -> Result<bool> {
        let path = path.as_ref();
        let Some(_guard) = self.lock_path(path) else {
            return Ok(false);
        };

        let path_str = path.to_string_lossy().to_string();
        let Some(removed) = self.inner.metadata.remove_by_path(&path_str).await? else {
            return Ok(false);
        };

        if let Some(embedding_id) = removed.embedding_id {
            self.remove_vector(embedding_id).await?;
        }
        self.inner.approximate.mark_stale();
        log::info!("Removed {} from the index", path.display());
        Ok(true)
    }

    async fn process_path(&self, path: &Path, kind: FileKind) -> Result<FileOutcome> {
        let Some(_guard) = self.lock_path(path) else {
            log::debug!(
                "Skipping {}: another pipeline operation is in flight",
                path.display()
            );
            return Ok(FileOutcome::Skipped);
        };

        let path_str = path.to_string_lossy().to_string();
        let meta = match tokio::fs::metadata(path).await {
            Ok(meta) => meta,
            Err(e) => return Ok(FileOutcome::Failed(format!("stat failed: {e}"))),
        };
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) => return Ok(FileOutcome::Failed(format!("read failed: {e}"))),
        };
        let content_hash = hex_sha256(&bytes);
        drop(bytes);

        let existing = self.inner.metadata.find_by_path(&path_str).await?;
        if let Some(existing) = &existing {
            let settled = matches!(
                existing.indexing_state,
                IndexingState::ContentIndexed | IndexingState::MetadataOnly
            );
            if settled && existing.content_hash == content_hash {
                log::debug!("Skipping {}: content unchanged", path.display());
                return Ok(FileOutcome::Skipped);
            }
        }

        let record = NewFileRecord {
            absolute_path: path_str,
            file_name: file_name_of(path),
            size_bytes: i64::try_from(meta.len()).unwrap_or(i64::MAX),
            modified_time: unix_seconds(meta.modified().ok()),
            file_type: file_type_of(path),
            content_hash,
            indexing_state: IndexingState::Pending,
            state_reason: None,
            embedding_id: None,
            last_indexed_at: unix_seconds(Some(SystemTime::now())),
        };

        match kind {
            FileKind::MetadataOnly => {
                self.commit_metadata_only(record, existing.as_ref(), None)
                    .await
            }
            FileKind::Content => self.index_content(path, record, existing.as_ref()).await,
        }
    }

    async fn index_content(
        &self,
        path: &Path,
        record: NewFileRecord,
        existing: Option<&FileRecord>,
    ) -> Result<FileOutcome> {
        let extractor = self.inner.extractor.clone();
        let extract_path = path.to_path_buf();
        let extracted =
            tokio::task::spawn_blocking(move || extractor.extract(&extract_path)).await?;

        let text = match extracted {
            Ok(text) => text,
            Err(e) => {
                log::warn!(
                    "Extraction failed for {}: {e}; indexing metadata only",
                    path.display()
                );
                return self
                    .commit_metadata_only(record, existing, Some(format!("extraction failed: {e}")))
                    .await;
            }
        };

        let chunks = chunker::chunk_text(&text, self.inner.config.chunk_size_words);
        let input = chunker::embedding_input(&chunks, self.inner.config.max_context_tokens);

        let vector = match self.embed_with_retry(&input).await {
            Ok(vector) => vector,
            Err(e) => {
                log::warn!(
                    "Embedding failed for {}: {e}; indexing metadata only",
                    path.display()
                );
                return self
                    .commit_metadata_only(record, existing, Some(format!("embedding failed: {e}")))
                    .await;
            }
        };

        // The vector append is durable before the metadata row references
        // it; a crash in between leaves an orphan vector, never a dangling
        // embedding_id.
        let vectors = self.inner.vectors.clone();
        let appended =
            tokio::task::spawn_blocking(move || vectors.append(&vector)).await?;
        let embedding_id = match appended {
            Ok(id) => id,
            Err(e @ VectorStoreError::DimensionMismatch { .. }) => {
                return Err(e.into());
            }
            Err(e) => {
                return Ok(FileOutcome::Failed(format!("vector append failed: {e}")));
            }
        };

        let mut record = record;
        record.indexing_state = IndexingState::ContentIndexed;
        record.embedding_id = Some(embedding_id);
        self.inner.metadata.upsert(record).await?;

        if let Some(previous) = existing.and_then(|e| e.embedding_id) {
            if previous != embedding_id {
                self.remove_vector(previous).await?;
            }
        }
        self.inner.approximate.mark_stale();
        Ok(FileOutcome::ContentIndexed)
    }

    async fn commit_metadata_only(
        &self,
        mut record: NewFileRecord,
        existing: Option<&FileRecord>,
        reason: Option<String>,
    ) -> Result<FileOutcome> {
        record.indexing_state = IndexingState::MetadataOnly;
        record.state_reason = reason;
        record.embedding_id = None;
        self.inner.metadata.upsert(record).await?;

        // A previously content-indexed file lost its vector; tombstone it
        // so the pair never goes out of sync.
        if let Some(previous) = existing.and_then(|e| e.embedding_id) {
            self.remove_vector(previous).await?;
            self.inner.approximate.mark_stale();
        }
        Ok(FileOutcome::MetadataOnly)
    }

    async fn remove_vector(&self, embedding_id: i64) -> Result<()> {
        let vectors = self.inner.vectors.clone();
        let removed =
            tokio::task::spawn_blocking(move || vectors.remove(embedding_id)).await?;
        match removed {
            Ok(()) | Err(VectorStoreError::NotFound(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn embed_with_retry(&self, text: &str) -> ProviderResult<Vec<f32>> {
        let provider = self.inner.provider.clone();
        with_retry(
            self.inner.config.retry_attempts,
            self.inner.config.retry_base_delay,
            || {
                let provider = provider.clone();
                let text = text.to_string();
                async move { provider.embed(&text).await }
            },
        )
        .await
    }

    fn publish_progress(&self, completed: &AtomicUsize, current_file: Option<&Path>) {
        let current = completed.load(Ordering::Relaxed);
        self.inner.progress_tx.send_modify(|status| {
            status.current = current;
            if let Some(path) = current_file {
                status.current_file = path.to_string_lossy().to_string();
            }
        });
    }

    fn lock_path(&self, path: &Path) -> Option<PathGuard> {
        let mut set = self
            .inner
            .in_flight
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if !set.insert(path.to_path_buf()) {
            return None;
        }
        Some(PathGuard {
            pipeline: self.clone(),
            path: path.to_path_buf(),
        })
    }
}

/// Releases the per-path lock when the operation finishes, panicking or not.
struct PathGuard {
    pipeline: IndexingPipeline,
    path: PathBuf,
}

impl Drop for PathGuard {
    fn drop(&mut self) {
        let mut set = self
            .pipeline
            .inner
            .in_flight
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        set.remove(&self.path);
    }
}

/// Retry `op` on transient provider errors with doubling backoff. Permanent
/// errors and the final transient failure propagate immediately.
pub async fn with_retry<T, F, Fut>(
    attempts: u32,
    base_delay: Duration,
    mut op: F,
) -> ProviderResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ProviderResult<T>>,
{
    let attempts = attempts.max(1);
    let mut delay = base_delay;
    for attempt in 1..=attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < attempts => {
                log::warn!("Embedding attempt {attempt}/{attempts} failed: {e}; retrying in {delay:?}");
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
            Err(e) => return Err(e),
        }
    }
    unreachable!("loop returns on the final attempt");
}

fn unix_seconds(time: Option<SystemTime>) -> i64 {
    time.and_then(|t| t.duration_since(SystemTime::UNIX_EPOCH).ok())
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

fn hex_sha256(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unknown")
        .to_string()
}

fn file_type_of(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .unwrap_or("unknown")
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use semfind_vector_store::ProviderError;
    use std::cell::Cell;

    #[tokio::test(start_paused = true)]
    async fn with_retry_retries_transient_then_succeeds() {
        let calls = Cell::new(0u32);
        let result = with_retry(3, Duration::from_millis(10), || {
            calls.set(calls.get() + 1);
            let attempt = calls.get();
            async move {
                if attempt < 3 {
                    Err(ProviderError::Http("503".to_string()))
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.get(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn with_retry_gives_up_after_bounded_attempts() {
        let calls = Cell::new(0u32);
        let result: ProviderResult<()> = with_retry(3, Duration::from_millis(10), || {
            calls.set(calls.get() + 1);
            async { Err(ProviderError::Http("down".to_string())) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.get(), 3);
    }

    #[tokio::test]
    async fn with_retry_does_not_retry_permanent_errors() {
        let calls = Cell::new(0u32);
        let result: ProviderResult<()> = with_retry(3, Duration::from_millis(10), || {
            calls.set(calls.get() + 1);
            async { Err(ProviderError::InvalidResponse("bad dims".to_string())) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn sha256_hex_is_stable() {
        assert_eq!(
            hex_sha256(b"hello"),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn file_helpers_normalize() {
        assert_eq!(file_name_of(Path::new("/a/b/Report.PDF")), "Report.PDF");
        assert_eq!(file_type_of(Path::new("/a/b/Report.PDF")), "pdf");
        assert_eq!(file_type_of(Path::new("/a/b/noext")), "unknown");
    }
}
