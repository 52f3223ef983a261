use thiserror::Error;

/// Errors surfaced by the memory index, its store, and its worker.
#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The embedding provider could not be constructed.
    #[error("embedding provider unavailable: {0}")]
    ProviderInit(String),

    /// The provider was constructed but failed to embed.
    #[error("embedding failed: {0}")]
    Embedding(String),

    #[error("invalid memory config: {0}")]
    Config(String),

    /// The worker host failed before reporting ready.
    #[error("memory worker failed to start: {0}")]
    WorkerInit(String),

    #[error("memory worker is closed")]
    WorkerClosed,

    /// An operation failed inside the worker host.
    #[error("{0}")]
    Worker(String),

    /// A sync pass completed but some files could not be indexed. Their
    /// previous index state was kept.
    #[error("sync incomplete: {failed} file(s) failed, first: {first}")]
    PartialSync { failed: usize, first: String },
}

pub type MemoryResult<T> = std::result::Result<T, MemoryError>;

impl From<anyhow::Error> for MemoryError {
    fn from(err: anyhow::Error) -> Self {
        MemoryError::Config(format!("{err:#}"))
    }
}
