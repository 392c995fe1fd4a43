pub mod adapter;
pub mod adapters;
pub mod config;
pub mod dataset;
pub mod error;
pub mod metrics;
pub mod runner;
pub mod types;

// re-exports
pub use adapter::{AdapterSession, BENCH_COLLECTION, VectorAdapter};
pub use config::{AdapterConfig, BackendKind, CaseConfig, Config, ConnectionConfig, RunConfig};
pub use dataset::{Dataset, Query};
pub use error::{Error, Result};
pub use metrics::{LatencyStats, RunMetrics};
pub use runner::{BenchmarkRunner, RunRecord};
pub use types::{IndexType, MetricType, RunStatus, SearchFilter, SearchSample};
