use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Bad or incompatible configuration. Never retried.
    #[error("Setup failed: {0}")]
    Setup(String),

    /// Backend unreachable or timed out.
    #[error("Connection failed: {0}")]
    Connection(String),

    /// Backend rejected a specific data-plane call.
    #[error("Operation failed: {0}")]
    Operation(String),

    #[error("Optimize failed: {0}")]
    Optimize(String),

    #[error("Optimize did not complete within {0}s")]
    OptimizeTimeout(u64),

    /// Malformed caller input. Indicates a harness bug, not a backend fault.
    #[error("Invariant violated: {0}")]
    Invariant(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),

    #[error(transparent)]
    SerdeYaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error(transparent)]
    Arrow(#[from] arrow::error::ArrowError),
}

impl Error {
    /// Errors that must never be absorbed by the Load-phase retry policy.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Setup(_) | Error::Invariant(_))
    }
}
