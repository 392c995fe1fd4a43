use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tracing::debug;

use crate::adapter::{AdapterSession, VectorAdapter, validate_insert};
use crate::config::{CaseConfig, ConnectionConfig};
use crate::error::{Error, Result};
use crate::types::{MetricType, SearchFilter};

type Store = Arc<RwLock<HashMap<i64, Vec<f32>>>>;

/// In-process reference backend: exhaustive scan over an owned store.
/// Exact for every case config, so a Flat case scored against exact ground
/// truth must report recall 1.0.
pub struct MemAdapter {
    metric: MetricType,
    dim: usize,
    store: Store,
}

impl MemAdapter {
    pub async fn connect(
        dim: usize,
        _connection: &ConnectionConfig,
        case: &CaseConfig,
        drop_old: bool,
    ) -> Result<Self> {
        if dim == 0 {
            return Err(Error::Setup("vector dimension must be positive".into()));
        }
        debug!(dim, drop_old, "Creating in-memory store");
        Ok(Self {
            metric: case.metric(),
            dim,
            store: Arc::new(RwLock::new(HashMap::new())),
        })
    }
}

#[async_trait]
impl VectorAdapter for MemAdapter {
    fn name(&self) -> &str {
        "mem"
    }

    async fn session(&self) -> Result<Box<dyn AdapterSession>> {
        Ok(Box::new(MemSession {
            metric: self.metric,
            dim: self.dim,
            store: self.store.clone(),
        }))
    }
}

struct MemSession {
    metric: MetricType,
    dim: usize,
    store: Store,
}

#[async_trait]
impl AdapterSession for MemSession {
    async fn insert(&self, vectors: &[Vec<f32>], ids: &[i64]) -> (usize, Option<Error>) {
        if let Err(e) = validate_insert(vectors, ids) {
            return (0, Some(e));
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dim) {
            return (
                0,
                Some(Error::Invariant(format!(
                    "vector of dimension {} inserted into a store of dimension {}",
                    bad.len(),
                    self.dim
                ))),
            );
        }

        let mut store = write_lock(&self.store);
        for (id, vector) in ids.iter().zip(vectors) {
            store.insert(*id, vector.clone());
        }
        (vectors.len(), None)
    }

    async fn search(
        &self,
        query: &[f32],
        k: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<i64>> {
        if query.len() != self.dim {
            return Err(Error::Invariant(format!(
                "query of dimension {} against a store of dimension {}",
                query.len(),
                self.dim
            )));
        }
        let id_gte = filter.and_then(|f| f.id_gte);

        let store = read_lock(&self.store);
        let mut scored: Vec<(f32, i64)> = store
            .iter()
            .filter(|(id, _)| id_gte.is_none_or(|bound| **id >= bound))
            .map(|(id, vector)| (distance(self.metric, query, vector), *id))
            .collect();
        scored.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        scored.truncate(k);
        Ok(scored.into_iter().map(|(_, id)| id).collect())
    }

    async fn optimize(&self) -> Result<()> {
        // Nothing to merge or materialize.
        Ok(())
    }
}

/// Lower is better for every metric
fn distance(metric: MetricType, a: &[f32], b: &[f32]) -> f32 {
    match metric {
        MetricType::L2 => a
            .iter()
            .zip(b)
            .map(|(x, y)| (x - y) * (x - y))
            .sum::<f32>(),
        MetricType::InnerProduct => -dot(a, b),
        MetricType::Cosine => {
            let norms = norm(a) * norm(b);
            if norms == 0.0 {
                1.0
            } else {
                1.0 - dot(a, b) / norms
            }
        }
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn norm(a: &[f32]) -> f32 {
    dot(a, a).sqrt()
}

fn write_lock(store: &Store) -> std::sync::RwLockWriteGuard<'_, HashMap<i64, Vec<f32>>> {
    store.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn read_lock(store: &Store) -> std::sync::RwLockReadGuard<'_, HashMap<i64, Vec<f32>>> {
    store.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}
