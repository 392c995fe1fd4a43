use async_trait::async_trait;
use pgvector::Vector;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::{debug, info};

use crate::adapter::{AdapterSession, BENCH_COLLECTION, VectorAdapter, validate_insert};
use crate::config::{CaseConfig, ConnectionConfig, HnswCase};
use crate::error::{Error, Result};
use crate::types::{MetricType, SearchFilter};

/// pgvector (PostgreSQL) adapter. One row per vector in the benchmark
/// table; batches are wrapped in a transaction so a batch lands whole or
/// not at all.
pub struct PgvectorAdapter {
    connection: ConnectionConfig,
    case: CaseConfig,
}

impl PgvectorAdapter {
    pub async fn connect(
        dim: usize,
        connection: &ConnectionConfig,
        case: &CaseConfig,
        drop_old: bool,
    ) -> Result<Self> {
        if matches!(case, CaseConfig::NativeHnsw(_)) {
            return Err(Error::Setup(
                "pgvector does not accept native index parameter maps".into(),
            ));
        }

        let pool = connect_pool(connection, 1).await?;
        sqlx::query("CREATE EXTENSION IF NOT EXISTS vector")
            .execute(&pool)
            .await
            .map_err(|e| Error::Setup(e.to_string()))?;

        if drop_old {
            sqlx::query(&format!("DROP TABLE IF EXISTS {BENCH_COLLECTION}"))
                .execute(&pool)
                .await
                .map_err(|e| Error::Setup(e.to_string()))?;
            sqlx::query(&format!(
                "CREATE TABLE {BENCH_COLLECTION} (id bigint PRIMARY KEY, embedding vector({dim}))"
            ))
            .execute(&pool)
            .await
            .map_err(|e| Error::Setup(e.to_string()))?;
            info!(table = BENCH_COLLECTION, "Created table");

            if let CaseConfig::Hnsw(HnswCase {
                metric,
                m,
                ef_construction,
                ..
            }) = case
            {
                let opclass = operator_class(*metric);
                sqlx::query(&format!(
                    "CREATE INDEX {BENCH_COLLECTION}_embedding_idx ON {BENCH_COLLECTION} \
                     USING hnsw (embedding {opclass}) \
                     WITH (m = {m}, ef_construction = {ef_construction})"
                ))
                .execute(&pool)
                .await
                .map_err(|e| Error::Setup(e.to_string()))?;
                info!(table = BENCH_COLLECTION, "Created hnsw index");
            }
        }
        pool.close().await;

        Ok(Self {
            connection: connection.clone(),
            case: case.clone(),
        })
    }
}

#[async_trait]
impl VectorAdapter for PgvectorAdapter {
    fn name(&self) -> &str {
        "pgvector"
    }

    async fn session(&self) -> Result<Box<dyn AdapterSession>> {
        Ok(Box::new(PgvectorSession {
            pool: connect_pool(&self.connection, 4).await?,
            case: self.case.clone(),
        }))
    }
}

async fn connect_pool(connection: &ConnectionConfig, max_connections: u32) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(&connection.postgres_url())
        .await
        .map_err(|e| Error::Connection(e.to_string()))
}

fn operator_class(metric: MetricType) -> &'static str {
    match metric {
        MetricType::L2 => "vector_l2_ops",
        MetricType::InnerProduct => "vector_ip_ops",
        MetricType::Cosine => "vector_cosine_ops",
    }
}

fn order_operator(metric: MetricType) -> &'static str {
    match metric {
        MetricType::L2 => "<->",
        MetricType::InnerProduct => "<#>",
        MetricType::Cosine => "<=>",
    }
}

struct PgvectorSession {
    pool: PgPool,
    case: CaseConfig,
}

#[async_trait]
impl AdapterSession for PgvectorSession {
    async fn insert(&self, vectors: &[Vec<f32>], ids: &[i64]) -> (usize, Option<Error>) {
        if let Err(e) = validate_insert(vectors, ids) {
            return (0, Some(e));
        }

        // A dropped transaction rolls back, keeping the batch atomic.
        let mut tx = match self.pool.begin().await {
            Ok(tx) => tx,
            Err(e) => return (0, Some(Error::Operation(e.to_string()))),
        };
        let sql = format!(
            "INSERT INTO {BENCH_COLLECTION} (id, embedding) VALUES ($1, $2) \
             ON CONFLICT (id) DO UPDATE SET embedding = EXCLUDED.embedding"
        );
        for (id, vector) in ids.iter().zip(vectors) {
            if let Err(e) = sqlx::query(&sql)
                .bind(id)
                .bind(Vector::from(vector.clone()))
                .execute(&mut *tx)
                .await
            {
                return (0, Some(Error::Operation(e.to_string())));
            }
        }
        match tx.commit().await {
            Ok(()) => (vectors.len(), None),
            Err(e) => (0, Some(Error::Operation(e.to_string()))),
        }
    }

    async fn search(
        &self,
        query: &[f32],
        k: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<i64>> {
        let operator = order_operator(self.case.metric());
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| Error::Connection(e.to_string()))?;

        if let CaseConfig::Hnsw(case) = &self.case {
            sqlx::query(&format!("SET hnsw.ef_search = {}", case.ef))
                .execute(&mut *conn)
                .await
                .map_err(|e| Error::Operation(e.to_string()))?;
        }

        let bound = filter.and_then(|f| f.id_gte);
        let sql = if bound.is_some() {
            format!(
                "SELECT id FROM {BENCH_COLLECTION} WHERE id >= $2 \
                 ORDER BY embedding {operator} $1 LIMIT {k}"
            )
        } else {
            format!("SELECT id FROM {BENCH_COLLECTION} ORDER BY embedding {operator} $1 LIMIT {k}")
        };

        let mut query_builder = sqlx::query(&sql).bind(Vector::from(query.to_vec()));
        if let Some(bound) = bound {
            query_builder = query_builder.bind(bound);
        }
        let rows = query_builder
            .fetch_all(&mut *conn)
            .await
            .map_err(|e| Error::Operation(e.to_string()))?;

        rows.iter()
            .map(|row| {
                row.try_get::<i64, _>("id")
                    .map_err(|e| Error::Operation(e.to_string()))
            })
            .collect()
    }

    async fn optimize(&self) -> Result<()> {
        debug!(table = BENCH_COLLECTION, "Vacuuming");
        sqlx::query(&format!("VACUUM ANALYZE {BENCH_COLLECTION}"))
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Optimize(e.to_string()))?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }
}
