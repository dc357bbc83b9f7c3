use thiserror::Error;

pub type Result<T> = std::result::Result<T, SearchError>;

#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Embedding provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Vector store error: {0}")]
    VectorStore(#[from] semfind_vector_store::VectorStoreError),

    #[error("Metadata store error: {0}")]
    Metadata(#[from] semfind_metadata_store::MetadataStoreError),

    #[error("Empty query")]
    EmptyQuery,

    #[error("Blocking task failed: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
}
