use thiserror::Error;

#[derive(Debug, Error)]
pub enum FileCacheError {
    /// A bandwidth or quota limiter ran out mid-stream
    #[error("attachment limit reached")]
    LimitReached,
    #[error("attachment exceeds the per-file size limit")]
    TooLarge,
    #[error("attachment cache is full")]
    CacheFull,
    #[error("invalid attachment id: {0}")]
    InvalidId(String),
    #[error("attachment not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
