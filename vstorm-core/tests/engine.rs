use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use vstorm_core::adapter::{AdapterSession, VectorAdapter, validate_insert};
use vstorm_core::adapters::MemAdapter;
use vstorm_core::config::{CaseConfig, ConnectionConfig, FlatCase, RunConfig};
use vstorm_core::dataset::{Dataset, Query};
use vstorm_core::error::{Error, Result};
use vstorm_core::metrics::RunMetrics;
use vstorm_core::runner::BenchmarkRunner;
use vstorm_core::types::{MetricType, RunStatus, SearchFilter};

#[derive(Clone, Copy)]
enum InsertBehavior {
    Ok,
    /// Nothing lands, backend error every time
    Fail,
    /// Half the batch lands, paired with an error
    Partial,
    /// Malformed-input failure, must never be retried
    Invariant,
}

#[derive(Clone, Copy)]
enum OptimizeBehavior {
    Ok,
    Hang,
    Fail,
}

#[derive(Clone, Copy)]
enum SearchBehavior {
    /// Always returns ids 0, 1, 2
    Fixed,
    /// Two seconds per query, then ids 0, 1, 2
    Slow,
    Fail,
}

/// Scripted backend for driving the engine through failure paths
struct ScriptedAdapter {
    insert: InsertBehavior,
    optimize: OptimizeBehavior,
    search: SearchBehavior,
    insert_calls: Arc<AtomicUsize>,
    optimize_calls: Arc<AtomicUsize>,
}

impl ScriptedAdapter {
    fn new(insert: InsertBehavior, optimize: OptimizeBehavior, search: SearchBehavior) -> Self {
        Self {
            insert,
            optimize,
            search,
            insert_calls: Arc::new(AtomicUsize::new(0)),
            optimize_calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl VectorAdapter for ScriptedAdapter {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn session(&self) -> Result<Box<dyn AdapterSession>> {
        Ok(Box::new(ScriptedSession {
            insert: self.insert,
            optimize: self.optimize,
            search: self.search,
            insert_calls: self.insert_calls.clone(),
            optimize_calls: self.optimize_calls.clone(),
        }))
    }
}

struct ScriptedSession {
    insert: InsertBehavior,
    optimize: OptimizeBehavior,
    search: SearchBehavior,
    insert_calls: Arc<AtomicUsize>,
    optimize_calls: Arc<AtomicUsize>,
}

#[async_trait]
impl AdapterSession for ScriptedSession {
    async fn insert(&self, vectors: &[Vec<f32>], ids: &[i64]) -> (usize, Option<Error>) {
        self.insert_calls.fetch_add(1, Ordering::Relaxed);
        if let Err(e) = validate_insert(vectors, ids) {
            return (0, Some(e));
        }
        match self.insert {
            InsertBehavior::Ok => (vectors.len(), None),
            InsertBehavior::Fail => (0, Some(Error::Operation("insert rejected".into()))),
            InsertBehavior::Partial => (
                vectors.len() / 2,
                Some(Error::Operation("half the batch rejected".into())),
            ),
            InsertBehavior::Invariant => {
                (0, Some(Error::Invariant("malformed batch".into())))
            }
        }
    }

    async fn search(
        &self,
        _query: &[f32],
        _k: usize,
        _filter: Option<&SearchFilter>,
    ) -> Result<Vec<i64>> {
        match self.search {
            SearchBehavior::Fixed => Ok(vec![0, 1, 2]),
            SearchBehavior::Slow => {
                tokio::time::sleep(Duration::from_secs(2)).await;
                Ok(vec![0, 1, 2])
            }
            SearchBehavior::Fail => Err(Error::Operation("search rejected".into())),
        }
    }

    async fn optimize(&self) -> Result<()> {
        self.optimize_calls.fetch_add(1, Ordering::Relaxed);
        match self.optimize {
            OptimizeBehavior::Ok => Ok(()),
            OptimizeBehavior::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            }
            OptimizeBehavior::Fail => Err(Error::Operation("merge rejected".into())),
        }
    }
}

fn flat_case() -> CaseConfig {
    CaseConfig::Flat(FlatCase {
        metric: MetricType::L2,
    })
}

fn run_config() -> RunConfig {
    RunConfig {
        batch_size: 5,
        load_concurrency: 2,
        load_retries: 3,
        retry_delay_ms: 0,
        optimize_timeout_secs: 5,
        search_concurrency: 2,
        k: 3,
        search_duration_secs: None,
    }
}

fn brute_force_neighbors(train: &[Vec<f32>], ids: &[i64], query: &[f32], k: usize) -> Vec<i64> {
    let mut scored: Vec<(f32, i64)> = train
        .iter()
        .zip(ids)
        .map(|(vector, id)| {
            let dist: f32 = vector
                .iter()
                .zip(query)
                .map(|(a, b)| (a - b) * (a - b))
                .sum();
            (dist, *id)
        })
        .collect();
    scored.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
    scored.into_iter().take(k).map(|(_, id)| id).collect()
}

/// Points on a line with exact ground truth computed the hard way
fn line_dataset(n: usize, k: usize) -> Dataset {
    let train: Vec<Vec<f32>> = (0..n).map(|i| vec![i as f32, 0.0]).collect();
    let ids: Vec<i64> = (0..n as i64).collect();
    let queries = train
        .iter()
        .map(|vector| Query {
            vector: vector.clone(),
            neighbors: brute_force_neighbors(&train, &ids, vector, k),
        })
        .collect();
    Dataset::new(train, ids, queries).unwrap()
}

/// Ground truth matching the scripted adapter's fixed answer
fn scripted_dataset(n: usize) -> Dataset {
    let train: Vec<Vec<f32>> = (0..n).map(|i| vec![i as f32, 0.0]).collect();
    let ids: Vec<i64> = (0..n as i64).collect();
    let queries = vec![
        Query {
            vector: vec![0.0, 0.0],
            neighbors: vec![0, 1, 2],
        };
        4
    ];
    Dataset::new(train, ids, queries).unwrap()
}

async fn mem_runner(dataset: &Dataset) -> BenchmarkRunner {
    let adapter = MemAdapter::connect(
        dataset.dim().unwrap(),
        &ConnectionConfig::default(),
        &flat_case(),
        true,
    )
    .await
    .unwrap();
    BenchmarkRunner::new(Box::new(adapter), flat_case(), run_config())
}

#[tokio::test]
async fn flat_case_reaches_perfect_recall() {
    let dataset = line_dataset(20, 3);
    let runner = mem_runner(&dataset).await;

    let record = runner.run(&dataset).await;
    assert_eq!(record.status, RunStatus::Success);

    let load = record.load.as_ref().unwrap();
    assert_eq!(load.status, RunStatus::Success);
    assert_eq!(load.inserted, 20);
    assert_eq!(load.batches, 4);
    assert_eq!(load.lost_batches, 0);

    let search = record.search.as_ref().unwrap();
    assert_eq!(search.samples.len(), 20);
    // Exhaustive search against exact ground truth: every query is perfect.
    for sample in &search.samples {
        assert_eq!(sample.recall, 1.0);
    }

    let metrics = RunMetrics::from_record("mem", &record);
    assert_eq!(metrics.recall, Some(1.0));
    assert_eq!(metrics.inserted, 20);
    assert!(metrics.latency.is_some());
}

#[tokio::test]
async fn inserted_records_round_trip_through_exhaustive_search() {
    let n = 10;
    let adapter = MemAdapter::connect(2, &ConnectionConfig::default(), &flat_case(), true)
        .await
        .unwrap();
    let session = adapter.session().await.unwrap();

    let vectors: Vec<Vec<f32>> = (0..n).map(|i| vec![i as f32, 1.0]).collect();
    let ids: Vec<i64> = (0..n as i64).collect();
    let (count, error) = session.insert(&vectors, &ids).await;
    assert_eq!(count, n);
    assert!(error.is_none());

    let filter = SearchFilter { id_gte: Some(0) };
    let returned = session
        .search(&[0.0, 1.0], n, Some(&filter))
        .await
        .unwrap();

    let mut sorted = returned.clone();
    sorted.sort_unstable();
    sorted.dedup();
    assert_eq!(sorted.len(), n, "duplicates or omissions in {returned:?}");
    assert_eq!(sorted, ids);
}

#[tokio::test]
async fn exhausted_retries_leave_load_partial_and_skip_optimize() {
    let adapter = ScriptedAdapter::new(InsertBehavior::Fail, OptimizeBehavior::Ok, SearchBehavior::Fixed);
    let insert_calls = adapter.insert_calls.clone();
    let optimize_calls = adapter.optimize_calls.clone();
    let runner = BenchmarkRunner::new(Box::new(adapter), flat_case(), run_config());

    let dataset = scripted_dataset(10);
    let record = runner.run(&dataset).await;

    let load = record.load.as_ref().unwrap();
    assert_eq!(load.status, RunStatus::PartialFailure);
    assert_eq!(load.inserted, 0);
    assert_eq!(load.lost_batches, 2);

    // Two batches, each tried once plus three retries.
    assert_eq!(insert_calls.load(Ordering::Relaxed), 8);

    // Nothing landed, so the run never reaches Optimize.
    assert!(record.optimize.is_none());
    assert_eq!(optimize_calls.load(Ordering::Relaxed), 0);
    assert_eq!(record.status, RunStatus::Fatal);

    let metrics = RunMetrics::from_record("scripted", &record);
    assert!(metrics.recall.is_none());
    assert!(metrics.latency.is_none());
    assert!(metrics.search_qps.is_none());
}

#[tokio::test]
async fn partial_batches_degrade_status_but_run_continues() {
    let adapter = ScriptedAdapter::new(
        InsertBehavior::Partial,
        OptimizeBehavior::Ok,
        SearchBehavior::Fixed,
    );
    let insert_calls = adapter.insert_calls.clone();
    let runner = BenchmarkRunner::new(Box::new(adapter), flat_case(), run_config());

    let dataset = scripted_dataset(10);
    let record = runner.run(&dataset).await;

    let load = record.load.as_ref().unwrap();
    assert_eq!(load.status, RunStatus::PartialFailure);
    assert_eq!(load.inserted, 4);
    // A half-landed batch is never retried.
    assert_eq!(insert_calls.load(Ordering::Relaxed), 2);

    assert!(record.optimize.is_some());
    assert_eq!(record.search.as_ref().unwrap().status, RunStatus::Success);
    // Worst phase status wins.
    assert_eq!(record.status, RunStatus::PartialFailure);

    let metrics = RunMetrics::from_record("scripted", &record);
    assert_eq!(metrics.recall, Some(1.0));
}

#[tokio::test]
async fn invariant_failures_abort_without_retry() {
    let adapter = ScriptedAdapter::new(
        InsertBehavior::Invariant,
        OptimizeBehavior::Ok,
        SearchBehavior::Fixed,
    );
    let insert_calls = adapter.insert_calls.clone();
    let runner = BenchmarkRunner::new(Box::new(adapter), flat_case(), run_config());

    let record = runner.run(&scripted_dataset(4)).await;

    assert_eq!(record.status, RunStatus::Fatal);
    assert_eq!(insert_calls.load(Ordering::Relaxed), 1);
    assert!(record.error.as_ref().unwrap().contains("Invariant"));
}

#[tokio::test(start_paused = true)]
async fn hung_optimize_times_out() {
    let adapter = ScriptedAdapter::new(InsertBehavior::Ok, OptimizeBehavior::Hang, SearchBehavior::Fixed);
    let runner = BenchmarkRunner::new(Box::new(adapter), flat_case(), run_config());

    let record = runner.run(&scripted_dataset(10)).await;

    assert_eq!(record.status, RunStatus::Fatal);
    let optimize = record.optimize.as_ref().unwrap();
    assert_eq!(optimize.status, RunStatus::Fatal);
    assert!(record.search.is_none());
    assert!(record.error.as_ref().unwrap().contains("did not complete"));
}

#[tokio::test]
async fn optimize_errors_are_fatal() {
    let adapter = ScriptedAdapter::new(InsertBehavior::Ok, OptimizeBehavior::Fail, SearchBehavior::Fixed);
    let runner = BenchmarkRunner::new(Box::new(adapter), flat_case(), run_config());

    let record = runner.run(&scripted_dataset(10)).await;

    assert_eq!(record.status, RunStatus::Fatal);
    assert_eq!(record.optimize.as_ref().unwrap().status, RunStatus::Fatal);
    assert!(record.search.is_none());
}

#[tokio::test(start_paused = true)]
async fn search_budget_stops_dispatch_but_drains_in_flight() {
    let adapter = ScriptedAdapter::new(InsertBehavior::Ok, OptimizeBehavior::Ok, SearchBehavior::Slow);
    let mut config = run_config();
    config.search_concurrency = 1;
    config.search_duration_secs = Some(3);
    let runner = BenchmarkRunner::new(Box::new(adapter), flat_case(), config);

    // Four queries at two seconds each against a three second budget: the
    // second query is dispatched in flight at the deadline and still counts,
    // the third is never dispatched.
    let record = runner.run(&scripted_dataset(10)).await;

    assert_eq!(record.status, RunStatus::Success);
    let search = record.search.as_ref().unwrap();
    assert_eq!(search.samples.len(), 2);
    for sample in &search.samples {
        assert!(sample.latency_us >= 2_000_000);
    }
}

#[tokio::test]
async fn zero_budget_produces_undefined_metrics_not_zeros() {
    let adapter = ScriptedAdapter::new(InsertBehavior::Ok, OptimizeBehavior::Ok, SearchBehavior::Fixed);
    let mut config = run_config();
    config.search_duration_secs = Some(0);
    let runner = BenchmarkRunner::new(Box::new(adapter), flat_case(), config);

    let record = runner.run(&scripted_dataset(10)).await;

    assert_eq!(record.status, RunStatus::Success);
    assert!(record.search.as_ref().unwrap().samples.is_empty());

    let metrics = RunMetrics::from_record("scripted", &record);
    assert!(metrics.recall.is_none());
    assert!(metrics.latency.is_none());
}

#[tokio::test]
async fn search_errors_are_fatal_but_keep_the_record() {
    let adapter = ScriptedAdapter::new(InsertBehavior::Ok, OptimizeBehavior::Ok, SearchBehavior::Fail);
    let runner = BenchmarkRunner::new(Box::new(adapter), flat_case(), run_config());

    let record = runner.run(&scripted_dataset(10)).await;

    assert_eq!(record.status, RunStatus::Fatal);
    let search = record.search.as_ref().unwrap();
    assert_eq!(search.status, RunStatus::Fatal);
    assert!(record.error.is_some());

    // Even a fatal run yields a consumable record.
    let metrics = RunMetrics::from_record("scripted", &record);
    assert_eq!(metrics.status, RunStatus::Fatal);
    assert_eq!(metrics.inserted, 10);
}
