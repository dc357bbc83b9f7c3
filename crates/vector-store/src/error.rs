use thiserror::Error;

pub type Result<T> = std::result::Result<T, VectorStoreError>;

#[derive(Error, Debug)]
pub enum VectorStoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Vector store is corrupt: {0}")]
    Corrupt(String),

    #[error("Invalid vector dimension: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Vector {0} not found")]
    NotFound(i64),

    #[error("Approximate index is not ready")]
    IndexNotReady,
}
