use std::collections::HashMap;
use std::fs::File;
use std::path::Path;

use arrow::array::{Array, FixedSizeListArray, Float32Array, Int64Array, ListArray};
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Error, Result};

/// Read-only benchmark input: the vectors to load and the queries to score.
/// The engine never mutates it.
#[derive(Debug, Clone)]
pub struct Dataset {
    /// Embedding vectors, loaded during the Load phase
    pub train: Vec<Vec<f32>>,
    /// Unique identifier for each train vector, parallel to `train`
    pub ids: Vec<i64>,
    /// Search-phase queries with precomputed ground truth
    pub queries: Vec<Query>,
}

/// One query vector and its true top-k neighbor identifiers under the
/// case's metric
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Query {
    pub vector: Vec<f32>,
    pub neighbors: Vec<i64>,
}

/// Serde mirror for the YAML dataset format
#[derive(Debug, Serialize, Deserialize)]
struct DatasetFile {
    train: Vec<Vec<f32>>,
    ids: Vec<i64>,
    #[serde(default)]
    queries: Vec<Query>,
}

impl Dataset {
    pub fn new(train: Vec<Vec<f32>>, ids: Vec<i64>, queries: Vec<Query>) -> Result<Self> {
        let dataset = Self { train, ids, queries };
        dataset.validate()?;
        Ok(dataset)
    }

    /// Load from either a YAML file or a directory holding the parquet
    /// triple (`train.parquet`, `test.parquet`, `neighbors.parquet`).
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.is_dir() {
            Self::from_parquet_dir(path)
        } else {
            Self::from_yaml_file(path)
        }
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&contents)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let file: DatasetFile = serde_yaml::from_str(yaml)?;
        Self::new(file.train, file.ids, file.queries)
    }

    /// Load the parquet triple: `train.parquet` and `test.parquet` carry
    /// `id` and `emb` columns, `neighbors.parquet` carries `id` and
    /// `neighbors_id`.
    pub fn from_parquet_dir(dir: &Path) -> Result<Self> {
        let (ids, train) = read_vectors(&dir.join("train.parquet"))?;
        let (query_ids, query_vectors) = read_vectors(&dir.join("test.parquet"))?;
        let truth = read_neighbors(&dir.join("neighbors.parquet"))?;

        let mut queries = Vec::with_capacity(query_vectors.len());
        for (id, vector) in query_ids.iter().zip(query_vectors) {
            let neighbors = truth.get(id).cloned().ok_or_else(|| {
                Error::Setup(format!("no ground truth for query id {id}"))
            })?;
            queries.push(Query { vector, neighbors });
        }

        info!(
            train = ids.len(),
            queries = queries.len(),
            "Loaded parquet dataset"
        );
        Self::new(train, ids, queries)
    }

    /// Embedding dimension, taken from the first train vector
    pub fn dim(&self) -> Result<usize> {
        self.train
            .first()
            .map(Vec::len)
            .ok_or_else(|| Error::Setup("dataset has no train vectors".into()))
    }

    fn validate(&self) -> Result<()> {
        if self.train.len() != self.ids.len() {
            return Err(Error::Invariant(format!(
                "dataset has {} train vectors but {} identifiers",
                self.train.len(),
                self.ids.len()
            )));
        }
        let dim = self.dim()?;
        if let Some(bad) = self.train.iter().find(|v| v.len() != dim) {
            return Err(Error::Invariant(format!(
                "train vector of dimension {} in a dataset of dimension {dim}",
                bad.len()
            )));
        }
        if let Some(bad) = self.queries.iter().find(|q| q.vector.len() != dim) {
            return Err(Error::Invariant(format!(
                "query vector of dimension {} in a dataset of dimension {dim}",
                bad.vector.len()
            )));
        }
        let mut seen = std::collections::HashSet::with_capacity(self.ids.len());
        if let Some(dup) = self.ids.iter().find(|id| !seen.insert(**id)) {
            return Err(Error::Invariant(format!("duplicate identifier {dup}")));
        }
        Ok(())
    }
}

fn read_vectors(path: &Path) -> Result<(Vec<i64>, Vec<Vec<f32>>)> {
    let file = File::open(path)?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;

    let mut ids = Vec::new();
    let mut vectors = Vec::new();
    for batch in reader {
        let batch = batch?;
        ids.extend_from_slice(int64_column(&batch, "id")?.values());
        read_float_lists(&batch, "emb", &mut vectors)?;
    }
    Ok((ids, vectors))
}

fn read_neighbors(path: &Path) -> Result<HashMap<i64, Vec<i64>>> {
    let file = File::open(path)?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;

    let mut truth = HashMap::new();
    for batch in reader {
        let batch = batch?;
        let ids = int64_column(&batch, "id")?;
        let lists = batch
            .column_by_name("neighbors_id")
            .ok_or_else(|| Error::Setup("neighbors.parquet missing column neighbors_id".into()))?;
        let lists = lists
            .as_any()
            .downcast_ref::<ListArray>()
            .ok_or_else(|| Error::Setup("neighbors_id is not a list column".into()))?;
        for row in 0..lists.len() {
            let value = lists.value(row);
            let neighbors = value
                .as_any()
                .downcast_ref::<Int64Array>()
                .ok_or_else(|| Error::Setup("neighbors_id values are not int64".into()))?;
            truth.insert(ids.value(row), neighbors.values().to_vec());
        }
    }
    Ok(truth)
}

fn int64_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a Int64Array> {
    batch
        .column_by_name(name)
        .ok_or_else(|| Error::Setup(format!("parquet file missing column {name}")))?
        .as_any()
        .downcast_ref::<Int64Array>()
        .ok_or_else(|| Error::Setup(format!("column {name} is not int64")))
}

/// Append every row of an `emb` column, accepting both variable and fixed
/// size list encodings.
fn read_float_lists(batch: &RecordBatch, name: &str, out: &mut Vec<Vec<f32>>) -> Result<()> {
    let column = batch
        .column_by_name(name)
        .ok_or_else(|| Error::Setup(format!("parquet file missing column {name}")))?;

    if let Some(lists) = column.as_any().downcast_ref::<ListArray>() {
        for row in 0..lists.len() {
            let value = lists.value(row);
            out.push(float32_values(&value, name)?);
        }
        return Ok(());
    }
    if let Some(lists) = column.as_any().downcast_ref::<FixedSizeListArray>() {
        for row in 0..lists.len() {
            let value = lists.value(row);
            out.push(float32_values(&value, name)?);
        }
        return Ok(());
    }
    Err(Error::Setup(format!("column {name} is not a list of floats")))
}

fn float32_values(array: &dyn Array, name: &str) -> Result<Vec<f32>> {
    array
        .as_any()
        .downcast_ref::<Float32Array>()
        .map(|floats| floats.values().to_vec())
        .ok_or_else(|| Error::Setup(format!("column {name} values are not float32")))
}
