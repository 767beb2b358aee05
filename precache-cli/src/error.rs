use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Worker error: {0}")]
    Worker(#[from] precache_engine::WorkerError),

    #[error("Cache error: {0}")]
    Cache(#[from] precache_engine::CacheError),

    #[error("Network error: {0}")]
    Network(#[from] precache_engine::NetworkError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

pub type Result<T> = std::result::Result<T, AppError>;
