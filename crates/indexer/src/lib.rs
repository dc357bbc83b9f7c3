//! # Semfind Indexer
//!
//! Incremental indexing pipeline: discovery → extraction → embedding →
//! storage, with change-event driven updates.
//!
//! ```text
//! Directory / ChangeEvent
//!     │
//!     ├──> FileScanner (gitignore-aware, extension routing)
//!     │      └─> content files / metadata-only files
//!     │
//!     ├──> ContentExtractor ──> chunker ──> EmbeddingProvider
//!     │
//!     └──> VectorStore + MetadataStore (vector durable before row commit)
//! ```

mod chunker;
mod error;
mod extract;
mod pipeline;
mod scanner;
mod stats;
mod watcher;

pub use chunker::{chunk_text, embedding_input};
pub use error::{IndexerError, Result};
pub use extract::{ContentExtractor, ExtractionError, PlainTextExtractor};
pub use pipeline::{with_retry, FileOutcome, IndexingPipeline, PipelineConfig};
pub use scanner::{FileKind, FileScanner, ScanConfig};
pub use stats::IndexOutcome;
pub use watcher::{drive_pipeline, ChangeEvent, ChangeWatcher, WatcherConfig};
