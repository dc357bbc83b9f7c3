//! Shared wire types for the semfind engine.
//!
//! Everything the search/index layers expose upward (CLI, IPC, future UI)
//! lives here so the component crates never depend on each other's
//! internals for plain data.

use serde::{Deserialize, Serialize};

mod filters;

pub use filters::{DateRange, FilterOptions};

/// A single ranked search result as returned to callers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchHit {
    pub file_id: i64,
    pub file_path: String,
    pub file_name: String,
    /// Raw cosine similarity from the retrieval path, before re-ranking.
    pub similarity: f32,
    pub lexical_score: f32,
    pub final_score: f32,
    /// Names of the structured filters this hit satisfied.
    #[serde(default)]
    pub matched_filters: Vec<String>,
    /// Content excerpt around the match, when the UI layer asks for one.
    #[serde(default)]
    pub matched_snippet: Option<String>,
}

/// A natural-language query after filter extraction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParsedQuery {
    /// Residual query text with filter phrases removed.
    pub query: String,
    pub filters: FilterOptions,
}

/// Snapshot of indexing progress for status surfaces.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct IndexStatus {
    pub is_indexing: bool,
    pub current: usize,
    pub total: usize,
    pub current_file: String,
}
