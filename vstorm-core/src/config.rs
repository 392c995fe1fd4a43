use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::Result;
use crate::types::{IndexType, MetricType};

/// Top-level configuration for one benchmark case
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Which backend to drive and how to reach it
    pub adapter: AdapterConfig,
    /// Index family and its build/search parameters
    pub case: CaseConfig,
    /// Engine execution settings
    #[serde(default)]
    pub run: RunConfig,
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    pub fn from_str(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }
}

/// Backend selection plus the connection settings it needs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterConfig {
    pub backend: BackendKind,
    #[serde(default)]
    pub connection: ConnectionConfig,
}

/// Which backend implementation to construct
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// In-process exhaustive reference backend
    Mem,
    #[cfg(feature = "elasticsearch")]
    Elasticsearch,
    #[cfg(feature = "qdrant")]
    Qdrant,
    #[cfg(feature = "pgvector")]
    Pgvector,
}

/// Backend-agnostic connection settings. Constructed once per run and never
/// mutated; adapters consume it through `to_map` or the url helpers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Backend-specific extras (e.g. `database` for pgvector)
    #[serde(flatten)]
    pub extra: BTreeMap<String, String>,
}

fn default_host() -> String {
    "localhost".to_string()
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: 0,
            username: None,
            password: None,
            extra: BTreeMap::new(),
        }
    }
}

impl ConnectionConfig {
    /// Render as the plain key-value mapping the adapter connection routine
    /// consumes. Pure and deterministic.
    pub fn to_map(&self) -> BTreeMap<String, String> {
        let mut map = self.extra.clone();
        map.insert("host".to_string(), self.host.clone());
        map.insert("port".to_string(), self.port.to_string());
        if let Some(user) = &self.username {
            map.insert("username".to_string(), user.clone());
        }
        if let Some(pass) = &self.password {
            map.insert("password".to_string(), pass.clone());
        }
        map
    }

    pub fn http_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// PostgreSQL connection string, injecting credentials when present
    pub fn postgres_url(&self) -> String {
        let database = self
            .extra
            .get("database")
            .map(String::as_str)
            .unwrap_or("postgres");
        match (&self.username, &self.password) {
            (Some(user), Some(pass)) => format!(
                "postgresql://{}:{}@{}:{}/{}",
                user, pass, self.host, self.port, database
            ),
            (Some(user), None) => {
                format!("postgresql://{}@{}:{}/{}", user, self.host, self.port, database)
            }
            _ => format!("postgresql://{}:{}/{}", self.host, self.port, database),
        }
    }
}

/// Per-index-type case configuration, discriminated by `index_type`. Each
/// variant carries exactly the parameters its index family understands, so a
/// flat case cannot smuggle graph parameters and vice versa.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "index_type", rename_all = "snake_case")]
pub enum CaseConfig {
    Flat(FlatCase),
    Hnsw(HnswCase),
    NativeHnsw(NativeHnswCase),
}

/// Exhaustive-scan case. Exact by construction, no build parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlatCase {
    pub metric: MetricType,
}

/// Graph case expressed through the dense-vector mapping family
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HnswCase {
    pub metric: MetricType,
    /// Graph degree
    #[serde(default = "default_m")]
    pub m: usize,
    /// Construction-time candidate breadth
    #[serde(default = "default_ef_construction")]
    pub ef_construction: usize,
    /// Search-time candidate breadth
    #[serde(default = "default_ef")]
    pub ef: usize,
}

/// Graph case expressed through a native `{metric_type, index_type, params}`
/// parameter map
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NativeHnswCase {
    pub metric: MetricType,
    #[serde(default = "default_m")]
    pub m: usize,
    #[serde(default = "default_ef_construction")]
    pub ef_construction: usize,
    #[serde(default = "default_ef")]
    pub ef: usize,
}

fn default_m() -> usize {
    16
}
fn default_ef_construction() -> usize {
    200
}
fn default_ef() -> usize {
    100
}

impl CaseConfig {
    pub fn index_type(&self) -> IndexType {
        match self {
            CaseConfig::Flat(_) => IndexType::Flat,
            CaseConfig::Hnsw(_) => IndexType::Hnsw,
            CaseConfig::NativeHnsw(_) => IndexType::NativeHnsw,
        }
    }

    pub fn metric(&self) -> MetricType {
        match self {
            CaseConfig::Flat(c) => c.metric,
            CaseConfig::Hnsw(c) => c.metric,
            CaseConfig::NativeHnsw(c) => c.metric,
        }
    }

    /// Backend-native shape used at index-creation time. Pure function of
    /// the case fields and metric.
    pub fn index_descriptor(&self) -> Value {
        match self {
            CaseConfig::Flat(c) => json!({
                "type": "dense_vector",
                "index": true,
                "element_type": "float",
                "similarity": c.metric.similarity(),
                "index_options": { "type": "flat" },
            }),
            CaseConfig::Hnsw(c) => json!({
                "type": "dense_vector",
                "index": true,
                "element_type": "float",
                "similarity": c.metric.similarity(),
                "index_options": {
                    "type": "hnsw",
                    "m": c.m,
                    "ef_construction": c.ef_construction,
                },
            }),
            CaseConfig::NativeHnsw(c) => json!({
                "metric_type": c.metric.native_name(),
                "index_type": "HNSW",
                "params": { "M": c.m, "efConstruction": c.ef_construction },
            }),
        }
    }

    /// Backend-native shape used at query time. Pure function of the case
    /// fields and metric.
    pub fn search_descriptor(&self) -> Value {
        match self {
            CaseConfig::Flat(_) => json!({}),
            CaseConfig::Hnsw(c) => json!({ "num_candidates": c.ef }),
            CaseConfig::NativeHnsw(c) => json!({
                "metric_type": c.metric.native_name(),
                "params": { "ef": c.ef },
            }),
        }
    }
}

/// Engine execution settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Records per insert batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Load-phase worker pool size
    #[serde(default = "default_load_concurrency")]
    pub load_concurrency: usize,
    /// Retries per failed batch before it counts as lost
    #[serde(default = "default_load_retries")]
    pub load_retries: usize,
    /// Fixed delay between batch retries, in milliseconds
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Optimize phase budget, in seconds
    #[serde(default = "default_optimize_timeout_secs")]
    pub optimize_timeout_secs: u64,
    /// Search-phase worker pool size
    #[serde(default = "default_search_concurrency")]
    pub search_concurrency: usize,
    /// Neighbors requested per query
    #[serde(default = "default_k")]
    pub k: usize,
    /// Search phase duration budget in seconds; absent means one full pass
    /// over the query set
    #[serde(default)]
    pub search_duration_secs: Option<u64>,
}

fn default_batch_size() -> usize {
    1000
}
fn default_load_concurrency() -> usize {
    available_parallelism()
}
fn default_load_retries() -> usize {
    3
}
fn default_retry_delay_ms() -> u64 {
    1000
}
fn default_optimize_timeout_secs() -> u64 {
    1800
}
fn default_search_concurrency() -> usize {
    2 * available_parallelism()
}
fn default_k() -> usize {
    100
}

fn available_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            load_concurrency: default_load_concurrency(),
            load_retries: default_load_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            optimize_timeout_secs: default_optimize_timeout_secs(),
            search_concurrency: default_search_concurrency(),
            k: default_k(),
            search_duration_secs: None,
        }
    }
}

impl RunConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn optimize_timeout(&self) -> Duration {
        Duration::from_secs(self.optimize_timeout_secs)
    }

    pub fn search_duration(&self) -> Option<Duration> {
        self.search_duration_secs.map(Duration::from_secs)
    }
}
