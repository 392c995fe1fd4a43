use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::runner::RunRecord;
use crate::types::{IndexType, MetricType, RunStatus, SearchSample};

/// Latency percentiles over the raw search samples, in microseconds.
/// Computed by exact sort over every sample; nothing is discarded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatencyStats {
    pub min_us: u64,
    pub max_us: u64,
    pub mean_us: f64,
    pub p50_us: u64,
    pub p95_us: u64,
    pub p99_us: u64,
}

/// Summary record for one benchmark run, intended for an external reporter.
/// Fields derived from a phase that produced no data are `None`, never zero.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetrics {
    pub backend: String,
    pub index_type: IndexType,
    pub metric: MetricType,
    pub status: RunStatus,
    /// Per-phase statuses; a phase never entered stays `None`
    pub load_status: Option<RunStatus>,
    pub optimize_status: Option<RunStatus>,
    pub search_status: Option<RunStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Records that durably landed during Load
    pub inserted: usize,
    /// Insert throughput in records per second across Load wall time
    pub load_qps: Option<f64>,
    pub optimize_duration_ms: Option<u64>,
    /// Queries per second across Search wall time
    pub search_qps: Option<f64>,
    pub latency: Option<LatencyStats>,
    /// Mean recall across all completed search samples
    pub recall: Option<f64>,
}

impl RunMetrics {
    /// Reduce a finalized run record to its summary. Pure function; calling
    /// it twice on the same record yields identical output.
    pub fn from_record(backend: &str, record: &RunRecord) -> Self {
        let load = record.load.as_ref();
        let search = record.search.as_ref();

        let inserted = load.map(|l| l.inserted).unwrap_or(0);
        let load_qps = load.and_then(|l| {
            (l.duration_ms > 0).then(|| inserted as f64 / (l.duration_ms as f64 / 1000.0))
        });
        let search_qps = search.and_then(|s| {
            (s.duration_ms > 0).then(|| s.samples.len() as f64 / (s.duration_ms as f64 / 1000.0))
        });
        let samples = search.map(|s| s.samples.as_slice()).unwrap_or(&[]);

        Self {
            backend: backend.to_string(),
            index_type: record.case.index_type(),
            metric: record.case.metric(),
            status: record.status,
            load_status: load.map(|l| l.status),
            optimize_status: record.optimize.as_ref().map(|o| o.status),
            search_status: search.map(|s| s.status),
            error: record.error.clone(),
            inserted,
            load_qps,
            optimize_duration_ms: record.optimize.as_ref().map(|o| o.duration_ms),
            search_qps,
            latency: latency_stats(samples),
            recall: mean_recall(samples),
        }
    }
}

/// Exact-sort latency percentiles, nearest-rank. `None` when there are no
/// samples; zero latency is a measurement, absence of samples is not.
pub fn latency_stats(samples: &[SearchSample]) -> Option<LatencyStats> {
    if samples.is_empty() {
        return None;
    }

    let mut sorted: Vec<u64> = samples.iter().map(|s| s.latency_us).collect();
    sorted.sort_unstable();

    let percentile = |p: f64| -> u64 {
        let idx = ((p / 100.0) * (sorted.len() - 1) as f64).round() as usize;
        sorted[idx]
    };

    Some(LatencyStats {
        min_us: sorted[0],
        max_us: sorted[sorted.len() - 1],
        mean_us: sorted.iter().sum::<u64>() as f64 / sorted.len() as f64,
        p50_us: percentile(50.0),
        p95_us: percentile(95.0),
        p99_us: percentile(99.0),
    })
}

pub fn mean_recall(samples: &[SearchSample]) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }
    Some(samples.iter().map(|s| s.recall).sum::<f64>() / samples.len() as f64)
}

/// Fraction of the true top-k neighbors present in the returned ids
pub fn recall_at_k(returned: &[i64], truth: &[i64], k: usize) -> f64 {
    if k == 0 {
        return 0.0;
    }
    let truth_set: HashSet<i64> = truth.iter().take(k).copied().collect();
    let hits = returned
        .iter()
        .take(k)
        .filter(|id| truth_set.contains(id))
        .count();
    hits as f64 / k as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn samples(latencies_ms: &[u64]) -> Vec<SearchSample> {
        latencies_ms
            .iter()
            .map(|ms| SearchSample {
                latency_us: ms * 1000,
                recall: 1.0,
            })
            .collect()
    }

    #[test]
    fn nearest_rank_percentiles() {
        let stats = latency_stats(&samples(&[10, 20, 30, 40, 100])).unwrap();
        assert_eq!(stats.p50_us, 30_000);
        assert_eq!(stats.p95_us, 100_000);
        assert_eq!(stats.p99_us, 100_000);
        assert_eq!(stats.min_us, 10_000);
        assert_eq!(stats.max_us, 100_000);
    }

    #[test]
    fn percentiles_are_order_independent() {
        let reference = latency_stats(&samples(&[10, 20, 30, 40, 100])).unwrap();
        for permutation in [
            [100, 40, 30, 20, 10],
            [30, 10, 100, 20, 40],
            [40, 100, 10, 30, 20],
        ] {
            let stats = latency_stats(&samples(&permutation)).unwrap();
            assert_eq!(stats.p50_us, reference.p50_us);
            assert_eq!(stats.p95_us, reference.p95_us);
            assert_eq!(stats.p99_us, reference.p99_us);
        }
    }

    #[test]
    fn no_samples_means_undefined_not_zero() {
        assert!(latency_stats(&[]).is_none());
        assert!(mean_recall(&[]).is_none());
    }

    #[test]
    fn recall_counts_true_neighbors_only() {
        assert_eq!(recall_at_k(&[1, 2, 3], &[1, 2, 3], 3), 1.0);
        assert_eq!(recall_at_k(&[1, 9, 8], &[1, 2, 3], 3), 1.0 / 3.0);
        assert_eq!(recall_at_k(&[9, 8, 7], &[1, 2, 3], 3), 0.0);
    }

    #[test]
    fn recall_ignores_results_beyond_k() {
        // Only the first k returned ids are scored.
        assert_eq!(recall_at_k(&[9, 8, 1, 2], &[1, 2], 2), 0.0);
    }
}
