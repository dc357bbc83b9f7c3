use thiserror::Error;

pub type Result<T> = std::result::Result<T, IndexerError>;

#[derive(Error, Debug)]
pub enum IndexerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Vector store error: {0}")]
    VectorStore(#[from] semfind_vector_store::VectorStoreError),

    #[error("Metadata store error: {0}")]
    Metadata(#[from] semfind_metadata_store::MetadataStoreError),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Indexing already in progress")]
    AlreadyRunning,

    #[error("Watcher error: {0}")]
    Watcher(String),

    #[error("Blocking task failed: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
}
