//! # Semfind Vector Store
//!
//! Durable storage and retrieval primitives for embedding vectors.
//!
//! ```text
//! EmbeddingProvider (HTTP / stub)
//!     └─> Vec<f32>
//!           │
//!           ├──> VectorStore (append-only binary file, tombstones)
//!           │       └─> VectorSnapshot (stable reads for scans)
//!           │
//!           └──> ApproximateIndex (HNSW graph, build-and-swap)
//! ```
//!
//! The store pins one vector dimension at creation; a dimension change
//! (new embedding model) is a configuration error that requires a full
//! re-index.

mod embeddings;
mod error;
mod hnsw_index;
mod store;

pub use embeddings::{
    cosine_similarity, EmbeddingProvider, ProviderError, ProviderKind, ProviderResult,
};
pub use error::{Result, VectorStoreError};
pub use hnsw_index::{ApproximateIndex, ApproximateIndexState};
pub use store::{SnapshotSlot, VectorSnapshot, VectorStore, DEFAULT_COMPACTION_THRESHOLD};
