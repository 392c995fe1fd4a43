use serde::{Deserialize, Serialize};

/// Distance metric a benchmark case is scored under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricType {
    L2,
    #[serde(rename = "ip")]
    InnerProduct,
    Cosine,
}

impl MetricType {
    /// Similarity name used by the HTTP dense-vector mapping family
    pub fn similarity(&self) -> &'static str {
        match self {
            MetricType::L2 => "l2_norm",
            MetricType::InnerProduct => "dot_product",
            MetricType::Cosine => "cosine",
        }
    }

    /// Metric name used by native index parameter maps
    pub fn native_name(&self) -> &'static str {
        match self {
            MetricType::L2 => "L2",
            MetricType::InnerProduct => "IP",
            MetricType::Cosine => "COSINE",
        }
    }
}

/// Index algorithm family for a benchmark case
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexType {
    /// Exhaustive scan, exact by construction
    Flat,
    /// Graph index configured through the dense-vector mapping
    Hnsw,
    /// Graph index configured through a native parameter map
    NativeHnsw,
}

/// Outcome of a phase or of a whole run. Ordered so that `max` picks the
/// worst status when phases are merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    PartialFailure,
    Fatal,
}

/// Optional predicate applied by the backend during search
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchFilter {
    /// Only candidates with identifier >= this value match
    #[serde(default)]
    pub id_gte: Option<i64>,
}

/// One completed search call: wall-clock latency from dispatch to result,
/// and the recall of the returned identifiers against ground truth.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SearchSample {
    pub latency_us: u64,
    pub recall: f64,
}
