use std::time::Duration;

use async_trait::async_trait;
use qdrant_client::qdrant::{
    CollectionStatus, Condition, CreateCollectionBuilder, Distance, Filter,
    HnswConfigDiffBuilder, PointId, PointStruct, Range, SearchParamsBuilder, SearchPointsBuilder,
    UpsertPointsBuilder, VectorParamsBuilder, point_id::PointIdOptions,
};
use qdrant_client::{Payload, Qdrant};
use serde_json::json;
use tokio::time::sleep;
use tracing::{debug, info};

use crate::adapter::{AdapterSession, BENCH_COLLECTION, VectorAdapter, validate_insert};
use crate::config::{CaseConfig, ConnectionConfig, HnswCase};
use crate::error::{Error, Result};
use crate::types::{MetricType, SearchFilter};

/// Qdrant adapter. Points carry their identifier both as point id and as an
/// `id` payload field so range filters can reach it.
pub struct QdrantAdapter {
    connection: ConnectionConfig,
    case: CaseConfig,
}

impl QdrantAdapter {
    pub async fn connect(
        dim: usize,
        connection: &ConnectionConfig,
        case: &CaseConfig,
        drop_old: bool,
    ) -> Result<Self> {
        if matches!(case, CaseConfig::NativeHnsw(_)) {
            return Err(Error::Setup(
                "qdrant does not accept native index parameter maps".into(),
            ));
        }

        let client = build_client(connection)?;
        if drop_old {
            let exists = client
                .collection_exists(BENCH_COLLECTION)
                .await
                .map_err(|e| Error::Connection(e.to_string()))?;
            if exists {
                client
                    .delete_collection(BENCH_COLLECTION)
                    .await
                    .map_err(|e| Error::Setup(e.to_string()))?;
                info!(collection = BENCH_COLLECTION, "Deleted old collection");
            }

            let distance = match case.metric() {
                MetricType::L2 => Distance::Euclid,
                MetricType::InnerProduct => Distance::Dot,
                MetricType::Cosine => Distance::Cosine,
            };
            let mut create = CreateCollectionBuilder::new(BENCH_COLLECTION)
                .vectors_config(VectorParamsBuilder::new(dim as u64, distance));
            if let CaseConfig::Hnsw(HnswCase {
                m, ef_construction, ..
            }) = case
            {
                create = create.hnsw_config(
                    HnswConfigDiffBuilder::default()
                        .m(*m as u64)
                        .ef_construct(*ef_construction as u64),
                );
            }
            client
                .create_collection(create)
                .await
                .map_err(|e| Error::Setup(e.to_string()))?;
            info!(collection = BENCH_COLLECTION, "Created collection");
        }

        Ok(Self {
            connection: connection.clone(),
            case: case.clone(),
        })
    }
}

#[async_trait]
impl VectorAdapter for QdrantAdapter {
    fn name(&self) -> &str {
        "qdrant"
    }

    async fn session(&self) -> Result<Box<dyn AdapterSession>> {
        Ok(Box::new(QdrantSession {
            client: build_client(&self.connection)?,
            case: self.case.clone(),
        }))
    }
}

fn build_client(connection: &ConnectionConfig) -> Result<Qdrant> {
    let mut builder = Qdrant::from_url(&connection.http_url());
    // API keys ride in the password slot of the shared connection config.
    if let Some(key) = &connection.password {
        builder = builder.api_key(key.clone());
    }
    builder.build().map_err(|e| Error::Connection(e.to_string()))
}

struct QdrantSession {
    client: Qdrant,
    case: CaseConfig,
}

#[async_trait]
impl AdapterSession for QdrantSession {
    async fn insert(&self, vectors: &[Vec<f32>], ids: &[i64]) -> (usize, Option<Error>) {
        if let Err(e) = validate_insert(vectors, ids) {
            return (0, Some(e));
        }
        if let Some(id) = ids.iter().find(|id| **id < 0) {
            return (
                0,
                Some(Error::Invariant(format!(
                    "qdrant point ids must be non-negative, got {id}"
                ))),
            );
        }

        let mut points = Vec::with_capacity(vectors.len());
        for (id, vector) in ids.iter().zip(vectors) {
            let payload = match Payload::try_from(json!({ "id": id })) {
                Ok(payload) => payload,
                Err(e) => return (0, Some(Error::Operation(e.to_string()))),
            };
            points.push(PointStruct::new(*id as u64, vector.clone(), payload));
        }

        match self
            .client
            .upsert_points(UpsertPointsBuilder::new(BENCH_COLLECTION, points).wait(true))
            .await
        {
            Ok(_) => (vectors.len(), None),
            Err(e) => (0, Some(Error::Operation(e.to_string()))),
        }
    }

    async fn search(
        &self,
        query: &[f32],
        k: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<i64>> {
        let params = match &self.case {
            CaseConfig::Flat(_) => SearchParamsBuilder::default().exact(true),
            CaseConfig::Hnsw(case) => SearchParamsBuilder::default().hnsw_ef(case.ef as u64),
            CaseConfig::NativeHnsw(_) => {
                return Err(Error::Setup(
                    "qdrant does not accept native index parameter maps".into(),
                ));
            }
        };

        let mut request =
            SearchPointsBuilder::new(BENCH_COLLECTION, query.to_vec(), k as u64).params(params);
        if let Some(bound) = filter.and_then(|f| f.id_gte) {
            request = request.filter(Filter::must([Condition::range(
                "id",
                Range {
                    gte: Some(bound as f64),
                    ..Default::default()
                },
            )]));
        }

        let response = self
            .client
            .search_points(request)
            .await
            .map_err(|e| Error::Operation(e.to_string()))?;

        Ok(response
            .result
            .into_iter()
            .filter_map(|point| match point.id {
                Some(PointId {
                    point_id_options: Some(PointIdOptions::Num(id)),
                }) => Some(id as i64),
                _ => None,
            })
            .collect())
    }

    /// Wait for background indexing to settle; the engine bounds the wait
    /// with the phase timeout.
    async fn optimize(&self) -> Result<()> {
        loop {
            let info = self
                .client
                .collection_info(BENCH_COLLECTION)
                .await
                .map_err(|e| Error::Optimize(e.to_string()))?;
            let status = info.result.map(|r| r.status).unwrap_or_default();
            if status == CollectionStatus::Green as i32 {
                return Ok(());
            }
            debug!(status, "Collection not settled yet");
            sleep(Duration::from_secs(1)).await;
        }
    }
}
