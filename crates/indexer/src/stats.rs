use serde::{Deserialize, Serialize};

/// Per-run indexing report. Indexing is never all-or-nothing: each file
/// lands in exactly one bucket and failures carry their reason.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexOutcome {
    /// Files embedded and fully searchable.
    pub content_indexed: usize,

    /// Files findable by name only (extraction or embedding unavailable).
    pub metadata_only: usize,

    /// Files that could not be recorded at all.
    pub failed: usize,

    /// Files whose content hash was unchanged since the last run.
    pub skipped_unchanged: usize,

    /// Human-readable failure reasons, one per affected file.
    pub errors: Vec<String>,

    /// Wall-clock duration of the run.
    pub time_ms: u64,
}

impl IndexOutcome {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn total_processed(&self) -> usize {
        self.content_indexed + self.metadata_only + self.failed + self.skipped_unchanged
    }

    pub fn absorb(&mut self, other: &Self) {
        self.content_indexed += other.content_indexed;
        self.metadata_only += other.metadata_only;
        self.failed += other.failed;
        self.skipped_unchanged += other.skipped_unchanged;
        self.errors.extend(other.errors.iter().cloned());
    }
}
