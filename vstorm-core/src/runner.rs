use std::ops::Range;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use tokio::time::Instant;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::adapter::{AdapterSession, VectorAdapter};
use crate::config::{CaseConfig, RunConfig};
use crate::dataset::Dataset;
use crate::error::{Error, Result};
use crate::metrics::recall_at_k;
use crate::types::{RunStatus, SearchSample};

/// Everything observed during one benchmark run. Created at run start,
/// written only by the engine, frozen once the run finalizes. A phase that
/// was never entered stays `None`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub case: CaseConfig,
    pub started_at: DateTime<Utc>,
    pub load: Option<LoadReport>,
    pub optimize: Option<OptimizeReport>,
    pub search: Option<SearchReport>,
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadReport {
    pub status: RunStatus,
    /// Records the backend acknowledged, including partial batches
    pub inserted: usize,
    /// Batches the dataset was partitioned into
    pub batches: usize,
    /// Batches that never landed after exhausting retries
    pub lost_batches: usize,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizeReport {
    pub status: RunStatus,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchReport {
    pub status: RunStatus,
    pub duration_ms: u64,
    /// One sample per completed query, merged from the worker buffers after
    /// the pool drained
    pub samples: Vec<SearchSample>,
}

impl RunRecord {
    fn new(case: CaseConfig) -> Self {
        Self {
            case,
            started_at: Utc::now(),
            load: None,
            optimize: None,
            search: None,
            status: RunStatus::Success,
            error: None,
        }
    }

    fn worst_phase_status(&self) -> RunStatus {
        [
            self.load.as_ref().map(|p| p.status),
            self.optimize.as_ref().map(|p| p.status),
            self.search.as_ref().map(|p| p.status),
        ]
        .into_iter()
        .flatten()
        .max()
        .unwrap_or(RunStatus::Success)
    }

    fn fail(mut self, error: Error) -> Self {
        warn!(error = %error, "Benchmark run failed");
        self.error = Some(error.to_string());
        self.status = RunStatus::Fatal;
        self
    }

    fn finalize(mut self) -> Self {
        self.status = self.worst_phase_status();
        self
    }
}

/// Drives one adapter through Load, Optimize and Search, collecting raw
/// measurements into a run record. Phase policy: Load absorbs batch
/// failures up to the retry bound, Optimize and Search abort on the first
/// error. The run always yields a record, even on fatal failure.
pub struct BenchmarkRunner {
    adapter: Box<dyn VectorAdapter>,
    case: CaseConfig,
    config: RunConfig,
}

enum BatchOutcome {
    Full(usize),
    Partial(usize),
    Lost,
    Fatal(Error),
}

impl BenchmarkRunner {
    pub fn new(adapter: Box<dyn VectorAdapter>, case: CaseConfig, config: RunConfig) -> Self {
        Self {
            adapter,
            case,
            config,
        }
    }

    pub fn adapter_name(&self) -> &str {
        self.adapter.name()
    }

    pub async fn run(&self, dataset: &Dataset) -> RunRecord {
        let mut record = RunRecord::new(self.case.clone());
        info!(
            backend = self.adapter.name(),
            index_type = ?self.case.index_type(),
            metric = ?self.case.metric(),
            "Benchmark run starting"
        );

        let (load, error) = self.run_load(dataset).await;
        let inserted = load.inserted;
        record.load = Some(load);
        if let Some(e) = error {
            return record.fail(e);
        }
        if inserted == 0 {
            // Searching would measure an empty index.
            return record.fail(Error::Operation(
                "no records inserted during load".into(),
            ));
        }

        let (optimize, error) = self.run_optimize().await;
        record.optimize = Some(optimize);
        if let Some(e) = error {
            return record.fail(e);
        }

        let (search, error) = self.run_search(dataset).await;
        record.search = Some(search);
        if let Some(e) = error {
            return record.fail(e);
        }

        record.finalize()
    }

    /// Sessions for one phase: a single shared session when the adapter
    /// declares itself safe for that, otherwise one per worker.
    async fn open_sessions(&self, workers: usize) -> Result<Vec<Box<dyn AdapterSession>>> {
        let count = if self.adapter.concurrent_safe() {
            1
        } else {
            workers
        };
        let mut sessions = Vec::with_capacity(count);
        for _ in 0..count {
            match self.adapter.session().await {
                Ok(session) => sessions.push(session),
                Err(e) => {
                    close_sessions(sessions).await;
                    return Err(e);
                }
            }
        }
        Ok(sessions)
    }

    async fn run_load(&self, dataset: &Dataset) -> (LoadReport, Option<Error>) {
        let mut report = LoadReport {
            status: RunStatus::Fatal,
            inserted: 0,
            batches: 0,
            lost_batches: 0,
            duration_ms: 0,
        };

        if let Err(e) = self.adapter.ready_to_load().await {
            return (report, Some(e));
        }

        let workers = self.config.load_concurrency.max(1);
        let sessions = match self.open_sessions(workers).await {
            Ok(sessions) => sessions,
            Err(e) => return (report, Some(e)),
        };

        let batch_size = self.config.batch_size.max(1);
        let batches: Vec<Range<usize>> = (0..dataset.train.len())
            .step_by(batch_size)
            .map(|start| start..(start + batch_size).min(dataset.train.len()))
            .collect();
        report.batches = batches.len();
        info!(
            records = dataset.train.len(),
            batches = batches.len(),
            workers,
            "Load phase starting"
        );

        let start = Instant::now();
        let inserted = AtomicUsize::new(0);
        let lost = AtomicUsize::new(0);
        let partial = AtomicBool::new(false);
        let cursor = AtomicUsize::new(0);
        let stop = AtomicBool::new(false);

        let outcomes = {
            let batches = &batches;
            let sessions = &sessions;
            let inserted = &inserted;
            let lost = &lost;
            let partial = &partial;
            let cursor = &cursor;
            let stop = &stop;
            let retries = self.config.load_retries;
            let delay = self.config.retry_delay();

            join_all((0..workers).map(|worker| async move {
                let session = sessions[worker % sessions.len()].as_ref();
                loop {
                    if stop.load(Ordering::Acquire) {
                        return None;
                    }
                    let next = cursor.fetch_add(1, Ordering::Relaxed);
                    let Some(range) = batches.get(next) else {
                        return None;
                    };
                    let vectors = &dataset.train[range.clone()];
                    let ids = &dataset.ids[range.clone()];
                    match insert_with_retry(session, vectors, ids, retries, delay).await {
                        BatchOutcome::Full(count) => {
                            inserted.fetch_add(count, Ordering::Relaxed);
                        }
                        BatchOutcome::Partial(count) => {
                            inserted.fetch_add(count, Ordering::Relaxed);
                            partial.store(true, Ordering::Relaxed);
                        }
                        BatchOutcome::Lost => {
                            lost.fetch_add(1, Ordering::Relaxed);
                        }
                        BatchOutcome::Fatal(e) => {
                            stop.store(true, Ordering::Release);
                            return Some(e);
                        }
                    }
                }
            }))
            .await
        };

        close_sessions(sessions).await;

        report.duration_ms = start.elapsed().as_millis() as u64;
        report.inserted = inserted.load(Ordering::Relaxed);
        report.lost_batches = lost.load(Ordering::Relaxed);

        if let Some(error) = outcomes.into_iter().flatten().next() {
            return (report, Some(error));
        }

        report.status = if report.lost_batches > 0 || partial.load(Ordering::Relaxed) {
            RunStatus::PartialFailure
        } else {
            RunStatus::Success
        };
        info!(
            inserted = report.inserted,
            lost_batches = report.lost_batches,
            duration_ms = report.duration_ms,
            "Load phase complete"
        );
        (report, None)
    }

    async fn run_optimize(&self) -> (OptimizeReport, Option<Error>) {
        let mut report = OptimizeReport {
            status: RunStatus::Fatal,
            duration_ms: 0,
        };

        let mut session = match self.adapter.session().await {
            Ok(session) => session,
            Err(e) => return (report, Some(e)),
        };

        info!(
            timeout_secs = self.config.optimize_timeout_secs,
            "Optimize phase starting"
        );
        let start = Instant::now();
        let outcome = tokio::time::timeout(self.config.optimize_timeout(), session.optimize()).await;
        report.duration_ms = start.elapsed().as_millis() as u64;

        // The session is released whether optimize returned, errored or was
        // cut off by the timeout.
        if let Err(e) = session.close().await {
            warn!(error = %e, "Session close failed");
        }

        match outcome {
            Err(_) => (
                report,
                Some(Error::OptimizeTimeout(self.config.optimize_timeout_secs)),
            ),
            Ok(Err(e)) => {
                let e = match e {
                    Error::Connection(_) | Error::Optimize(_) | Error::OptimizeTimeout(_) => e,
                    other => Error::Optimize(other.to_string()),
                };
                (report, Some(e))
            }
            Ok(Ok(())) => {
                report.status = RunStatus::Success;
                info!(duration_ms = report.duration_ms, "Optimize phase complete");
                (report, None)
            }
        }
    }

    async fn run_search(&self, dataset: &Dataset) -> (SearchReport, Option<Error>) {
        let mut report = SearchReport {
            status: RunStatus::Fatal,
            duration_ms: 0,
            samples: Vec::new(),
        };

        if dataset.queries.is_empty() {
            return (report, Some(Error::Setup("dataset has no queries".into())));
        }

        let workers = self.config.search_concurrency.max(1);
        let sessions = match self.open_sessions(workers).await {
            Ok(sessions) => sessions,
            Err(e) => return (report, Some(e)),
        };

        let k = self.config.k;
        let deadline = self.config.search_duration().map(|budget| Instant::now() + budget);
        info!(
            queries = dataset.queries.len(),
            workers, k, "Search phase starting"
        );

        let start = Instant::now();
        let cursor = AtomicUsize::new(0);
        let stop = AtomicBool::new(false);

        let results = {
            let sessions = &sessions;
            let cursor = &cursor;
            let stop = &stop;

            join_all((0..workers).map(|worker| async move {
                let session = sessions[worker % sessions.len()].as_ref();
                let mut samples = Vec::new();
                loop {
                    if stop.load(Ordering::Acquire) {
                        return (samples, None);
                    }
                    // Budget elapsed: stop dispatching, but whatever is
                    // already in flight on other workers drains normally.
                    if let Some(deadline) = deadline {
                        if Instant::now() >= deadline {
                            return (samples, None);
                        }
                    }
                    let next = cursor.fetch_add(1, Ordering::Relaxed);
                    let Some(query) = dataset.queries.get(next) else {
                        return (samples, None);
                    };

                    // Taken immediately before the call so engine-side queue
                    // wait is not billed to the backend.
                    let dispatched = Instant::now();
                    match session.search(&query.vector, k, None).await {
                        Ok(ids) => {
                            samples.push(SearchSample {
                                latency_us: dispatched.elapsed().as_micros() as u64,
                                recall: recall_at_k(&ids, &query.neighbors, k),
                            });
                        }
                        Err(e) => {
                            debug!(error = %e, query = next, "Search query failed");
                            stop.store(true, Ordering::Release);
                            return (samples, Some(e));
                        }
                    }
                }
            }))
            .await
        };

        close_sessions(sessions).await;
        report.duration_ms = start.elapsed().as_millis() as u64;

        let mut error = None;
        for (samples, worker_error) in results {
            report.samples.extend(samples);
            if error.is_none() {
                error = worker_error;
            }
        }
        if error.is_some() {
            // Keep the samples collected before the failure; the record is
            // still finalized.
            return (report, error);
        }

        report.status = RunStatus::Success;
        info!(
            queries = report.samples.len(),
            duration_ms = report.duration_ms,
            "Search phase complete"
        );
        (report, None)
    }
}

async fn insert_with_retry(
    session: &dyn AdapterSession,
    vectors: &[Vec<f32>],
    ids: &[i64],
    retries: usize,
    delay: Duration,
) -> BatchOutcome {
    let mut attempt = 0;
    loop {
        let (count, error) = session.insert(vectors, ids).await;
        match error {
            None => return BatchOutcome::Full(count),
            Some(e) if e.is_fatal() => return BatchOutcome::Fatal(e),
            Some(e) if count > 0 => {
                // Retrying a half-landed batch would duplicate records.
                warn!(error = %e, landed = count, "Partial batch insert");
                return BatchOutcome::Partial(count);
            }
            Some(e) => {
                if attempt == retries {
                    warn!(error = %e, attempts = attempt + 1, "Batch insert failed, giving up");
                    return BatchOutcome::Lost;
                }
                debug!(error = %e, attempt = attempt + 1, "Batch insert failed, retrying");
                attempt += 1;
                tokio::time::sleep(delay).await;
            }
        }
    }
}

async fn close_sessions(sessions: Vec<Box<dyn AdapterSession>>) {
    for mut session in sessions {
        if let Err(e) = session.close().await {
            warn!(error = %e, "Session close failed");
        }
    }
}
