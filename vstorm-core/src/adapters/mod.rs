pub mod mem;

#[cfg(feature = "elasticsearch")]
pub mod elastic;

#[cfg(feature = "qdrant")]
pub mod qdrant;

#[cfg(feature = "pgvector")]
pub mod pgvector;

pub use mem::MemAdapter;

#[cfg(feature = "elasticsearch")]
pub use elastic::ElasticAdapter;

#[cfg(feature = "qdrant")]
pub use qdrant::QdrantAdapter;

#[cfg(feature = "pgvector")]
pub use pgvector::PgvectorAdapter;

use crate::adapter::VectorAdapter;
use crate::config::{AdapterConfig, BackendKind, CaseConfig};
use crate::error::Result;

/// Construct the configured backend adapter. Runs once per benchmark case,
/// outside the timed phases; with `drop_old` the backend's benchmark
/// collection is deleted and recreated from the case's index descriptor.
pub async fn build(
    config: &AdapterConfig,
    dim: usize,
    case: &CaseConfig,
    drop_old: bool,
) -> Result<Box<dyn VectorAdapter>> {
    match config.backend {
        BackendKind::Mem => Ok(Box::new(
            MemAdapter::connect(dim, &config.connection, case, drop_old).await?,
        )),
        #[cfg(feature = "elasticsearch")]
        BackendKind::Elasticsearch => Ok(Box::new(
            ElasticAdapter::connect(dim, &config.connection, case, drop_old).await?,
        )),
        #[cfg(feature = "qdrant")]
        BackendKind::Qdrant => Ok(Box::new(
            QdrantAdapter::connect(dim, &config.connection, case, drop_old).await?,
        )),
        #[cfg(feature = "pgvector")]
        BackendKind::Pgvector => Ok(Box::new(
            PgvectorAdapter::connect(dim, &config.connection, case, drop_old).await?,
        )),
    }
}
