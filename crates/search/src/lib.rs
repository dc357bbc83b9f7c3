//! # Semfind Search
//!
//! Query-side engine: parallel exact scan, approximate-path selection,
//! hybrid re-ranking and structured filters.
//!
//! ```text
//! query text
//!     │
//!     ├──> QueryParser ──> clean query + filters
//!     ├──> EmbeddingProvider ──> query vector (timeout-bounded)
//!     │
//!     ├──> ExactSearchEngine ─┐   (small stores, or graph unavailable)
//!     ├──> ApproximateIndex ──┤   (large stores, Ready/Stale graph)
//!     │                       └─> candidates (id, cosine similarity)
//!     │
//!     └──> MetadataStore join ──> filters ──> HybridScorer ──> top-k
//! ```

mod coordinator;
mod error;
mod exact;
mod query_parser;
mod scorer;

pub use coordinator::{SearchConfig, SearchCoordinator};
pub use error::{Result, SearchError};
pub use exact::ExactSearchEngine;
pub use query_parser::QueryParser;
pub use scorer::{filename_similarity, HybridScorer, ScorerConfig};
