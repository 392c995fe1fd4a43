use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::types::SearchFilter;

/// Reserved name every adapter uses for its benchmark collection, index or
/// table. `drop_old` only ever deletes data under this name.
pub const BENCH_COLLECTION: &str = "vstorm_bench";

/// Check the insert precondition: one identifier per vector. Adapters call
/// this before touching the backend; a mismatch is a harness bug.
pub fn validate_insert(vectors: &[Vec<f32>], ids: &[i64]) -> Result<()> {
    if vectors.len() != ids.len() {
        return Err(Error::Invariant(format!(
            "insert called with {} vectors but {} identifiers",
            vectors.len(),
            ids.len()
        )));
    }
    Ok(())
}

/// Capability contract every backend implementation satisfies. Constructed
/// once per run, outside the timed phases, with the vector dimension, the
/// connection config and the case config; construction with `drop_old`
/// deletes and recreates the benchmark collection from the case's index
/// descriptor.
#[async_trait]
pub trait VectorAdapter: Send + Sync {
    /// Human-readable backend name
    fn name(&self) -> &str;

    /// Whether one session may be shared across concurrent search workers.
    /// When false the engine opens one session per worker instead.
    fn concurrent_safe(&self) -> bool {
        true
    }

    /// Hook invoked once immediately before the Load phase (e.g. to disable
    /// auto-merge). Backends with no such requirement keep this no-op.
    async fn ready_to_load(&self) -> Result<()> {
        Ok(())
    }

    /// Open a scoped connection for one benchmark phase. The engine never
    /// performs data-plane operations outside a session, and releases it on
    /// every exit path.
    async fn session(&self) -> Result<Box<dyn AdapterSession>>;
}

/// A live backend connection, valid for the duration of one phase
#[async_trait]
pub trait AdapterSession: Send + Sync {
    /// Durably add a batch of vectors under the given identifiers. Returns
    /// how many records actually landed; a partial count may be paired with
    /// an error describing the failure. Mismatched input lengths fail with
    /// `Error::Invariant` before any backend call.
    async fn insert(&self, vectors: &[Vec<f32>], ids: &[i64]) -> (usize, Option<Error>);

    /// Return the identifiers of the k nearest vectors under the case's
    /// metric, best first. Identifiers only; score scales are not comparable
    /// across backends.
    async fn search(
        &self,
        query: &[f32],
        k: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<i64>>;

    /// Run the backend-specific post-load step (merge, compaction, index
    /// materialization) and block until the backend reports it complete.
    /// Transient not-ready states are polled internally; the engine bounds
    /// the whole call with a phase timeout.
    async fn optimize(&self) -> Result<()>;

    /// Explicit release. Dropping the session also tears the connection
    /// down, so cleanup happens even when close is never reached.
    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mismatched_insert_lengths_violate_invariant() {
        let vectors = vec![vec![0.0_f32; 4]; 3];
        let ids = vec![1_i64, 2];
        match validate_insert(&vectors, &ids) {
            Err(Error::Invariant(msg)) => {
                assert!(msg.contains("3 vectors"));
                assert!(msg.contains("2 identifiers"));
            }
            other => panic!("expected invariant error, got {other:?}"),
        }
    }

    #[test]
    fn matched_insert_lengths_pass() {
        let vectors = vec![vec![0.0_f32; 4]; 2];
        let ids = vec![1_i64, 2];
        assert!(validate_insert(&vectors, &ids).is_ok());
    }
}
