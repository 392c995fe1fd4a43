use async_trait::async_trait;
use elasticsearch::{
    BulkParts, Elasticsearch, SearchParts,
    auth::Credentials,
    http::request::JsonBody,
    http::transport::{SingleNodeConnectionPool, TransportBuilder},
    indices::{
        IndicesCreateParts, IndicesDeleteParts, IndicesExistsParts, IndicesForcemergeParts,
        IndicesPutSettingsParts, IndicesRefreshParts,
    },
};
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::adapter::{AdapterSession, BENCH_COLLECTION, VectorAdapter, validate_insert};
use crate::config::{CaseConfig, ConnectionConfig};
use crate::error::{Error, Result};
use crate::types::SearchFilter;

/// Elasticsearch adapter. Vectors live in a `dense_vector` field shaped by
/// the case's index descriptor; ids come back through docvalue fields so
/// search never deserializes source documents.
pub struct ElasticAdapter {
    connection: ConnectionConfig,
    case: CaseConfig,
}

impl ElasticAdapter {
    pub async fn connect(
        dim: usize,
        connection: &ConnectionConfig,
        case: &CaseConfig,
        drop_old: bool,
    ) -> Result<Self> {
        if matches!(case, CaseConfig::NativeHnsw(_)) {
            return Err(Error::Setup(
                "elasticsearch does not accept native index parameter maps".into(),
            ));
        }

        let client = build_client(connection)?;
        let ping = client
            .ping()
            .send()
            .await
            .map_err(|e| Error::Connection(e.to_string()))?;
        if !ping.status_code().is_success() {
            return Err(Error::Connection(format!(
                "ping returned {}",
                ping.status_code()
            )));
        }

        if drop_old {
            let exists = client
                .indices()
                .exists(IndicesExistsParts::Index(&[BENCH_COLLECTION]))
                .send()
                .await
                .map_err(|e| Error::Connection(e.to_string()))?;
            if exists.status_code().is_success() {
                client
                    .indices()
                    .delete(IndicesDeleteParts::Index(&[BENCH_COLLECTION]))
                    .send()
                    .await
                    .map_err(|e| Error::Setup(e.to_string()))?;
                info!(index = BENCH_COLLECTION, "Deleted old index");
            }
            create_index(&client, dim, case).await?;
        }

        // The setup connection is dropped here; phases open their own.
        Ok(Self {
            connection: connection.clone(),
            case: case.clone(),
        })
    }
}

#[async_trait]
impl VectorAdapter for ElasticAdapter {
    fn name(&self) -> &str {
        "elasticsearch"
    }

    /// Hold refreshes while bulk loading; optimize re-enables them.
    async fn ready_to_load(&self) -> Result<()> {
        let client = build_client(&self.connection)?;
        let response = client
            .indices()
            .put_settings(IndicesPutSettingsParts::Index(&[BENCH_COLLECTION]))
            .body(json!({ "index": { "refresh_interval": "-1" } }))
            .send()
            .await
            .map_err(|e| Error::Connection(e.to_string()))?;
        if !response.status_code().is_success() {
            return Err(Error::Setup(format!(
                "disabling refresh returned {}",
                response.status_code()
            )));
        }
        Ok(())
    }

    async fn session(&self) -> Result<Box<dyn AdapterSession>> {
        Ok(Box::new(ElasticSession {
            client: build_client(&self.connection)?,
            case: self.case.clone(),
        }))
    }
}

fn build_client(connection: &ConnectionConfig) -> Result<Elasticsearch> {
    let url = connection
        .http_url()
        .parse()
        .map_err(|e| Error::Setup(format!("invalid url: {e}")))?;

    let mut builder = TransportBuilder::new(SingleNodeConnectionPool::new(url));
    if let (Some(username), Some(password)) = (&connection.username, &connection.password) {
        builder = builder.auth(Credentials::Basic(username.clone(), password.clone()));
    }
    let transport = builder
        .build()
        .map_err(|e| Error::Connection(e.to_string()))?;
    Ok(Elasticsearch::new(transport))
}

async fn create_index(client: &Elasticsearch, dim: usize, case: &CaseConfig) -> Result<()> {
    let mut vector_mapping = case.index_descriptor();
    vector_mapping["dims"] = json!(dim);

    let body = json!({
        "settings": { "index": { "refresh_interval": "-1" } },
        "mappings": {
            "_source": { "excludes": ["embedding"] },
            "properties": {
                "id": { "type": "long", "store": true },
                "embedding": vector_mapping,
            },
        },
    });

    let response = client
        .indices()
        .create(IndicesCreateParts::Index(BENCH_COLLECTION))
        .body(body)
        .send()
        .await
        .map_err(|e| Error::Connection(e.to_string()))?;
    if !response.status_code().is_success() {
        let reason = response.text().await.unwrap_or_default();
        return Err(Error::Setup(format!("failed creating index: {reason}")));
    }
    info!(index = BENCH_COLLECTION, "Created index");
    Ok(())
}

struct ElasticSession {
    client: Elasticsearch,
    case: CaseConfig,
}

#[async_trait]
impl AdapterSession for ElasticSession {
    async fn insert(&self, vectors: &[Vec<f32>], ids: &[i64]) -> (usize, Option<Error>) {
        if let Err(e) = validate_insert(vectors, ids) {
            return (0, Some(e));
        }

        let mut body: Vec<JsonBody<Value>> = Vec::with_capacity(vectors.len() * 2);
        for (id, vector) in ids.iter().zip(vectors) {
            body.push(json!({ "index": {} }).into());
            body.push(json!({ "id": id, "embedding": vector }).into());
        }

        let response = match self
            .client
            .bulk(BulkParts::Index(BENCH_COLLECTION))
            .body(body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => return (0, Some(Error::Operation(e.to_string()))),
        };

        let body: Value = match response.json().await {
            Ok(body) => body,
            Err(e) => return (0, Some(Error::Operation(e.to_string()))),
        };

        let items = body["items"].as_array().map(Vec::as_slice).unwrap_or(&[]);
        let landed = items
            .iter()
            .filter(|item| item["index"]["error"].is_null())
            .count();
        if body["errors"].as_bool().unwrap_or(false) || landed < vectors.len() {
            return (
                landed,
                Some(Error::Operation(format!(
                    "bulk insert landed {landed} of {} records",
                    vectors.len()
                ))),
            );
        }
        (landed, None)
    }

    async fn search(
        &self,
        query: &[f32],
        k: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<i64>> {
        let mut knn = json!({
            "field": "embedding",
            "query_vector": query,
            "k": k,
        });
        if let (Some(knn), Value::Object(extra)) =
            (knn.as_object_mut(), self.case.search_descriptor())
        {
            knn.extend(extra);
            if let Some(bound) = filter.and_then(|f| f.id_gte) {
                knn.insert(
                    "filter".to_string(),
                    json!({ "range": { "id": { "gte": bound } } }),
                );
            }
        }

        let body = json!({
            "knn": knn,
            "size": k,
            "_source": false,
            "docvalue_fields": ["id"],
            "stored_fields": "_none_",
        });

        let response = self
            .client
            .search(SearchParts::Index(&[BENCH_COLLECTION]))
            .body(body)
            .send()
            .await
            .map_err(|e| Error::Operation(e.to_string()))?;
        let body: Value = response
            .json()
            .await
            .map_err(|e| Error::Operation(e.to_string()))?;

        let hits = body["hits"]["hits"]
            .as_array()
            .ok_or_else(|| Error::Operation(format!("unexpected search response: {body}")))?;
        hits.iter()
            .map(|hit| {
                hit["fields"]["id"][0]
                    .as_i64()
                    .ok_or_else(|| Error::Operation("hit without id docvalue".into()))
            })
            .collect()
    }

    /// Re-enable refresh and merge down to one segment so every search hits
    /// a settled index.
    async fn optimize(&self) -> Result<()> {
        let response = self
            .client
            .indices()
            .put_settings(IndicesPutSettingsParts::Index(&[BENCH_COLLECTION]))
            .body(json!({ "index": { "refresh_interval": null } }))
            .send()
            .await
            .map_err(|e| Error::Optimize(e.to_string()))?;
        if !response.status_code().is_success() {
            return Err(Error::Optimize(format!(
                "restoring refresh returned {}",
                response.status_code()
            )));
        }

        self.client
            .indices()
            .refresh(IndicesRefreshParts::Index(&[BENCH_COLLECTION]))
            .send()
            .await
            .map_err(|e| Error::Optimize(e.to_string()))?;

        debug!(index = BENCH_COLLECTION, "Merging segments");
        let response = self
            .client
            .indices()
            .forcemerge(IndicesForcemergeParts::Index(&[BENCH_COLLECTION]))
            .max_num_segments(1)
            .send()
            .await
            .map_err(|e| Error::Optimize(e.to_string()))?;
        if !response.status_code().is_success() {
            return Err(Error::Optimize(format!(
                "forcemerge returned {}",
                response.status_code()
            )));
        }
        Ok(())
    }
}
