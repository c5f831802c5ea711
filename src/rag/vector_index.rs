use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow::array::{
    Array, ArrayRef, FixedSizeListArray, Float32Array, RecordBatchIterator, StringArray,
    UInt32Array,
};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{Connection, DistanceType, Table};

use crate::indexer::DocumentChunk;

const CHUNKS_TABLE: &str = "chunks";
const META_TABLE: &str = "index_meta";

#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub chunk: DocumentChunk,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub chunk: DocumentChunk,
    /// L2 distance reported by the store; smaller is closer.
    pub distance: f32,
}

/// Chunk embeddings persisted as a LanceDB table under the index directory.
///
/// A second single-row table records which embedding model built the vectors.
#[derive(Clone)]
pub struct VectorIndex {
    table: Table,
    embedding_model: String,
    dimension: usize,
    created_at: DateTime<Utc>,
    rows: usize,
}

impl std::fmt::Debug for VectorIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorIndex")
            .field("embedding_model", &self.embedding_model)
            .field("dimension", &self.dimension)
            .field("rows", &self.rows)
            .finish()
    }
}

impl VectorIndex {
    /// Writes a fresh index into `dir`, discarding whatever was stored there.
    pub async fn create(
        dir: &Path,
        embedding_model: impl Into<String>,
        entries: Vec<IndexEntry>,
    ) -> Result<Self> {
        let embedding_model = embedding_model.into();
        let dimension = check_dimension(&entries, None)?;

        if dir.exists() {
            tokio::fs::remove_dir_all(dir)
                .await
                .with_context(|| format!("Failed to clear index directory: {}", dir.display()))?;
        }
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create index directory: {}", dir.display()))?;

        let connection = connect(dir).await?;
        let created_at = Utc::now();

        let batch = chunk_batch(&entries, dimension)?;
        let schema = batch.schema();
        let reader = RecordBatchIterator::new(std::iter::once(Ok(batch)), schema);
        let table = connection
            .create_table(CHUNKS_TABLE, Box::new(reader))
            .execute()
            .await
            .context("Failed to create chunks table")?;

        let meta = meta_batch(&embedding_model, created_at)?;
        let schema = meta.schema();
        let reader = RecordBatchIterator::new(std::iter::once(Ok(meta)), schema);
        connection
            .create_table(META_TABLE, Box::new(reader))
            .execute()
            .await
            .context("Failed to create index metadata table")?;

        Ok(Self {
            table,
            embedding_model,
            dimension,
            created_at,
            rows: entries.len(),
        })
    }

    /// `Ok(None)` when no index has been written to `dir`.
    pub async fn open(dir: &Path) -> Result<Option<Self>> {
        if !Self::table_path(dir).exists() {
            return Ok(None);
        }

        let connection = connect(dir).await?;
        let names = connection
            .table_names()
            .execute()
            .await
            .context("Failed to list index tables")?;
        if !names.iter().any(|name| name == CHUNKS_TABLE) {
            return Ok(None);
        }

        let table = connection
            .open_table(CHUNKS_TABLE)
            .execute()
            .await
            .context("Failed to open chunks table")?;
        let schema: SchemaRef = table.schema().await.context("Failed to read schema")?;
        let dimension = vector_dimension(&schema)?;
        let rows = table
            .count_rows(None)
            .await
            .context("Failed to count indexed chunks")?;

        let (embedding_model, created_at) = if names.iter().any(|name| name == META_TABLE) {
            read_meta(&connection).await?
        } else {
            tracing::warn!("Index at {} has no metadata table", dir.display());
            (String::new(), Utc::now())
        };

        Ok(Some(Self {
            table,
            embedding_model,
            dimension,
            created_at,
            rows,
        }))
    }

    /// Directory LanceDB keeps the chunks table in.
    pub fn table_path(dir: &Path) -> PathBuf {
        dir.join(format!("{CHUNKS_TABLE}.lance"))
    }

    pub fn embedding_model(&self) -> &str {
        &self.embedding_model
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn len(&self) -> usize {
        self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    /// Adds entries to the table; every vector must share the index dimension.
    pub async fn append(&mut self, entries: Vec<IndexEntry>) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        check_dimension(&entries, Some(self.dimension))?;

        let batch = chunk_batch(&entries, self.dimension)?;
        let schema = batch.schema();
        let reader = RecordBatchIterator::new(std::iter::once(Ok(batch)), schema);
        self.table
            .add(Box::new(reader))
            .execute()
            .await
            .context("Failed to append chunks")?;

        self.rows += entries.len();
        Ok(())
    }

    /// The `k` entries closest to `query`, closest first.
    pub async fn nearest(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        if self.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        if query.len() != self.dimension {
            anyhow::bail!(
                "Query dimension {} does not match index dimension {}",
                query.len(),
                self.dimension
            );
        }

        let batches: Vec<RecordBatch> = self
            .table
            .vector_search(query)
            .context("Failed to build vector search")?
            .column("vector")
            .distance_type(DistanceType::L2)
            .limit(k)
            .execute()
            .await
            .context("Failed to run vector search")?
            .try_collect()
            .await
            .context("Failed to read search results")?;

        let mut hits = Vec::new();
        for batch in &batches {
            hits.extend(parse_hits(batch)?);
        }
        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        hits.truncate(k);
        Ok(hits)
    }
}

async fn connect(dir: &Path) -> Result<Connection> {
    let uri = dir.to_string_lossy();
    lancedb::connect(&uri)
        .execute()
        .await
        .with_context(|| format!("Failed to open index at {}", dir.display()))
}

/// Shared dimension of `entries`, which must match `expected` when given.
fn check_dimension(entries: &[IndexEntry], expected: Option<usize>) -> Result<usize> {
    let mut dimension = expected;
    for entry in entries {
        let dim = entry.embedding.len();
        if dim == 0 {
            anyhow::bail!("Chunk {} has an empty embedding", entry.chunk.id);
        }
        match dimension {
            None => dimension = Some(dim),
            Some(d) if d != dim => anyhow::bail!(
                "Embedding dimension mismatch for chunk {}: {} != {}",
                entry.chunk.id,
                dim,
                d
            ),
            Some(_) => {}
        }
    }
    dimension.context("Cannot build an index without entries")
}

fn chunk_schema(dimension: usize) -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Utf8, false),
        Field::new("source", DataType::Utf8, false),
        Field::new("chunk_index", DataType::UInt32, false),
        Field::new("text", DataType::Utf8, false),
        Field::new(
            "vector",
            DataType::FixedSizeList(
                Arc::new(Field::new("item", DataType::Float32, false)),
                dimension as i32,
            ),
            false,
        ),
    ]))
}

fn chunk_batch(entries: &[IndexEntry], dimension: usize) -> Result<RecordBatch> {
    let ids: Vec<&str> = entries.iter().map(|e| e.chunk.id.as_str()).collect();
    let sources: Vec<&str> = entries.iter().map(|e| e.chunk.source.as_str()).collect();
    let indices: Vec<u32> = entries.iter().map(|e| e.chunk.chunk_index as u32).collect();
    let texts: Vec<&str> = entries.iter().map(|e| e.chunk.text.as_str()).collect();

    let mut flat = Vec::with_capacity(entries.len() * dimension);
    for entry in entries {
        flat.extend_from_slice(&entry.embedding);
    }
    let item = Arc::new(Field::new("item", DataType::Float32, false));
    let vectors = FixedSizeListArray::try_new(
        item,
        dimension as i32,
        Arc::new(Float32Array::from(flat)),
        None,
    )
    .context("Failed to build vector column")?;

    let columns: Vec<ArrayRef> = vec![
        Arc::new(StringArray::from(ids)),
        Arc::new(StringArray::from(sources)),
        Arc::new(UInt32Array::from(indices)),
        Arc::new(StringArray::from(texts)),
        Arc::new(vectors),
    ];
    RecordBatch::try_new(chunk_schema(dimension), columns).context("Failed to build chunk batch")
}

fn meta_batch(embedding_model: &str, created_at: DateTime<Utc>) -> Result<RecordBatch> {
    let schema = Arc::new(Schema::new(vec![
        Field::new("embedding_model", DataType::Utf8, false),
        Field::new("created_at", DataType::Utf8, false),
    ]));
    let columns: Vec<ArrayRef> = vec![
        Arc::new(StringArray::from(vec![embedding_model])),
        Arc::new(StringArray::from(vec![created_at.to_rfc3339()])),
    ];
    RecordBatch::try_new(schema, columns).context("Failed to build metadata batch")
}

async fn read_meta(connection: &Connection) -> Result<(String, DateTime<Utc>)> {
    let table = connection
        .open_table(META_TABLE)
        .execute()
        .await
        .context("Failed to open index metadata table")?;
    let batches: Vec<RecordBatch> = table
        .query()
        .limit(1)
        .execute()
        .await
        .context("Failed to query index metadata")?
        .try_collect()
        .await
        .context("Failed to read index metadata")?;

    let batch = batches
        .iter()
        .find(|b| b.num_rows() > 0)
        .context("Index metadata table is empty")?;
    let model = string_column(batch, "embedding_model")?.value(0).to_string();
    let created_at = DateTime::parse_from_rfc3339(string_column(batch, "created_at")?.value(0))
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now());
    Ok((model, created_at))
}

fn vector_dimension(schema: &Schema) -> Result<usize> {
    let field = schema
        .field_with_name("vector")
        .context("Chunks table has no vector column")?;
    match field.data_type() {
        DataType::FixedSizeList(_, size) => Ok(*size as usize),
        other => anyhow::bail!("Unexpected vector column type: {other}"),
    }
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .with_context(|| format!("Missing {name} column"))?
        .as_any()
        .downcast_ref::<StringArray>()
        .with_context(|| format!("Invalid {name} column type"))
}

fn parse_hits(batch: &RecordBatch) -> Result<Vec<SearchHit>> {
    let ids = string_column(batch, "id")?;
    let sources = string_column(batch, "source")?;
    let texts = string_column(batch, "text")?;
    let indices = batch
        .column_by_name("chunk_index")
        .context("Missing chunk_index column")?
        .as_any()
        .downcast_ref::<UInt32Array>()
        .context("Invalid chunk_index column type")?;
    let distances = batch
        .column_by_name("_distance")
        .and_then(|col| col.as_any().downcast_ref::<Float32Array>());

    Ok((0..batch.num_rows())
        .map(|row| SearchHit {
            chunk: DocumentChunk {
                id: ids.value(row).to_string(),
                source: sources.value(row).to_string(),
                chunk_index: indices.value(row) as usize,
                text: texts.value(row).to_string(),
            },
            distance: distances
                .filter(|d| !d.is_null(row))
                .map_or(0.0, |d| d.value(row)),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, text: &str, embedding: Vec<f32>) -> IndexEntry {
        IndexEntry {
            chunk: DocumentChunk {
                id: id.to_string(),
                source: "test".to_string(),
                chunk_index: 0,
                text: text.to_string(),
            },
            embedding,
        }
    }

    fn sample_entries() -> Vec<IndexEntry> {
        vec![
            entry("a", "settlement", vec![1.0, 0.0, 0.0]),
            entry("b", "netting", vec![0.0, 1.0, 0.0]),
            entry("c", "confirmation", vec![0.7, 0.7, 0.0]),
        ]
    }

    async fn sample_index(dir: &Path) -> VectorIndex {
        VectorIndex::create(dir, "test-model", sample_entries())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn nearest_orders_by_distance() {
        let dir = tempfile::tempdir().unwrap();
        let index = sample_index(&dir.path().join("index")).await;

        let hits = index.nearest(&[1.0, 0.1, 0.0], 2).await.unwrap();
        let ids: Vec<_> = hits.iter().map(|h| h.chunk.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
        assert!(hits[0].distance <= hits[1].distance);
    }

    #[tokio::test]
    async fn k_larger_than_index_returns_everything() {
        let dir = tempfile::tempdir().unwrap();
        let index = sample_index(&dir.path().join("index")).await;
        assert_eq!(index.nearest(&[0.0, 0.0, 1.0], 50).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn mismatched_dimensions_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut index = sample_index(&dir.path().join("index")).await;
        assert!(index.nearest(&[1.0, 0.0], 1).await.is_err());

        assert!(index.append(vec![entry("d", "x", vec![1.0])]).await.is_err());
        assert_eq!(index.len(), 3);
    }

    #[tokio::test]
    async fn reopened_index_keeps_chunks_and_model() {
        let dir = tempfile::tempdir().unwrap();
        let index_dir = dir.path().join("vector_index");
        sample_index(&index_dir).await;

        let loaded = VectorIndex::open(&index_dir).await.unwrap().expect("index should exist");
        assert_eq!(loaded.embedding_model(), "test-model");
        assert_eq!(loaded.dimension(), 3);
        assert_eq!(loaded.len(), 3);

        let hits = loaded.nearest(&[0.0, 1.0, 0.0], 1).await.unwrap();
        assert_eq!(hits[0].chunk.text, "netting");
    }

    #[tokio::test]
    async fn append_then_reopen_sees_every_row() {
        let dir = tempfile::tempdir().unwrap();
        let index_dir = dir.path().join("index");
        let mut index = sample_index(&index_dir).await;
        index
            .append(vec![entry("d", "novation", vec![0.0, 0.0, 1.0])])
            .await
            .unwrap();
        assert_eq!(index.len(), 4);

        let reopened = VectorIndex::open(&index_dir).await.unwrap().unwrap();
        assert_eq!(reopened.len(), 4);
        let hits = reopened.nearest(&[0.0, 0.0, 1.0], 1).await.unwrap();
        assert_eq!(hits[0].chunk.id, "d");
    }

    #[tokio::test]
    async fn create_overwrites_previous_rows() {
        let dir = tempfile::tempdir().unwrap();
        let index_dir = dir.path().join("index");
        sample_index(&index_dir).await;

        VectorIndex::create(&index_dir, "other-model", vec![entry("z", "only", vec![1.0, 1.0])])
            .await
            .unwrap();
        let reopened = VectorIndex::open(&index_dir).await.unwrap().unwrap();
        assert_eq!(reopened.len(), 1);
        assert_eq!(reopened.dimension(), 2);
        assert_eq!(reopened.embedding_model(), "other-model");
    }

    #[tokio::test]
    async fn open_without_table_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(VectorIndex::open(dir.path()).await.unwrap().is_none());
        assert!(VectorIndex::open(&dir.path().join("missing")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn empty_entries_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(VectorIndex::create(dir.path(), "m", Vec::new()).await.is_err());
    }
}
