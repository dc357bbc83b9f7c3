use thiserror::Error;

pub type Result<T> = std::result::Result<T, MetadataStoreError>;

#[derive(Error, Debug)]
pub enum MetadataStoreError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Blocking task failed: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),

    #[error("Unknown indexing state '{0}'")]
    UnknownState(String),
}
