//! LanceDB Vector Store
//!
//! 리트리버 인스턴스마다 고유한 테이블(`chunks_<uuid>`)을 사용하므로
//! 같은 디렉토리를 공유해도 인덱스가 섞이지 않습니다.
//! 연결은 첫 사용 시 열고, 테이블은 첫 삽입 시 임베딩 길이로 스키마를 정해 생성합니다.
//! ref: https://lancedb.github.io/lancedb/

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow_array::{
    Array, FixedSizeListArray, Float32Array, RecordBatch, RecordBatchIterator, StringArray,
};
use arrow_schema::{DataType, Field, Schema};
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::connection::Connection;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::DistanceType;
use tokio::sync::OnceCell;

use super::vector::{SearchResult, VectorEntry, VectorStore};
use crate::document::{Document, Metadata};

// ============================================================================
// LanceVectorStore
// ============================================================================

/// LanceDB 벡터 저장소 구현
pub struct LanceVectorStore {
    path: PathBuf,
    table_name: String,
    db: OnceCell<Connection>,
}

impl LanceVectorStore {
    /// 저장소 생성 (연결은 지연)
    ///
    /// # Arguments
    /// * `path` - .lance 디렉토리 경로
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            table_name: format!("chunks_{}", uuid::Uuid::new_v4().simple()),
            db: OnceCell::new(),
        }
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    async fn connection(&self) -> Result<&Connection> {
        self.db
            .get_or_try_init(|| async {
                if !self.path.exists() {
                    tokio::fs::create_dir_all(&self.path)
                        .await
                        .context("Failed to create LanceDB directory")?;
                }

                let path_str = self
                    .path
                    .to_str()
                    .ok_or_else(|| anyhow::anyhow!("Invalid path encoding"))?;

                tracing::debug!("Connecting LanceDB at {}", path_str);
                lancedb::connect(path_str)
                    .execute()
                    .await
                    .context("Failed to connect to LanceDB")
            })
            .await
    }

    /// 벡터 테이블 스키마 (차원은 첫 배치에서 결정)
    fn create_schema(dimension: i32) -> Schema {
        Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new("content", DataType::Utf8, false),
            Field::new("metadata", DataType::Utf8, false),
            Field::new(
                "embedding",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    dimension,
                ),
                false,
            ),
        ])
    }

    /// 엔트리들을 Arrow RecordBatch로 변환
    fn entries_to_batch(entries: &[VectorEntry]) -> Result<RecordBatch> {
        let dimension = entries
            .first()
            .map(|e| e.embedding.len())
            .ok_or_else(|| anyhow::anyhow!("Cannot create batch from empty entries"))?;
        if let Some(bad) = entries.iter().find(|e| e.embedding.len() != dimension) {
            anyhow::bail!(
                "Embedding dimension mismatch: expected {}, got {}",
                dimension,
                bad.embedding.len()
            );
        }

        let ids: Vec<&str> = entries.iter().map(|e| e.document.id.as_str()).collect();
        let contents: Vec<&str> = entries.iter().map(|e| e.document.content.as_str()).collect();
        let metadata: Vec<String> = entries
            .iter()
            .map(|e| serde_json::to_string(&e.document.metadata))
            .collect::<std::result::Result<_, _>>()
            .context("Failed to serialize metadata")?;

        let embeddings_flat: Vec<f32> = entries
            .iter()
            .flat_map(|e| e.embedding.iter().copied())
            .collect();

        let dimension = i32::try_from(dimension).context("Embedding dimension too large")?;
        let field = Arc::new(Field::new("item", DataType::Float32, true));
        let embeddings_list = FixedSizeListArray::try_new(
            field,
            dimension,
            Arc::new(Float32Array::from(embeddings_flat)) as Arc<dyn Array>,
            None,
        )
        .context("Failed to create embedding array")?;

        RecordBatch::try_new(
            Arc::new(Self::create_schema(dimension)),
            vec![
                Arc::new(StringArray::from(ids)),
                Arc::new(StringArray::from(contents)),
                Arc::new(StringArray::from(metadata)),
                Arc::new(embeddings_list),
            ],
        )
        .context("Failed to create RecordBatch")
    }

    /// 검색 결과 배치를 SearchResult로 변환
    fn batch_to_results(batch: &RecordBatch, out: &mut Vec<SearchResult>) -> Result<()> {
        let string_column = |name: &str| {
            batch
                .column_by_name(name)
                .and_then(|c| c.as_any().downcast_ref::<StringArray>())
                .ok_or_else(|| anyhow::anyhow!("Missing {} column", name))
        };
        let ids = string_column("id")?;
        let contents = string_column("content")?;
        let metadata = string_column("metadata")?;

        let embeddings = batch
            .column_by_name("embedding")
            .and_then(|c| c.as_any().downcast_ref::<FixedSizeListArray>())
            .ok_or_else(|| anyhow::anyhow!("Missing embedding column"))?;

        // _distance 컬럼 (LanceDB가 자동 추가)
        let distances = batch
            .column_by_name("_distance")
            .and_then(|c| c.as_any().downcast_ref::<Float32Array>())
            .ok_or_else(|| anyhow::anyhow!("Missing _distance column"))?;

        for i in 0..batch.num_rows() {
            let meta: Metadata =
                serde_json::from_str(metadata.value(i)).context("Failed to parse metadata")?;
            let values = embeddings.value(i);
            let embedding = values
                .as_any()
                .downcast_ref::<Float32Array>()
                .map(|a| a.values().to_vec())
                .ok_or_else(|| anyhow::anyhow!("Invalid embedding values"))?;

            out.push(SearchResult {
                document: Document::with_metadata(contents.value(i), meta).with_id(ids.value(i)),
                embedding,
                // 코사인 거리 → 유사도
                similarity: 1.0 - distances.value(i),
            });
        }
        Ok(())
    }

    /// 테이블 존재 여부 확인
    async fn table_exists(&self) -> Result<bool> {
        let names = self
            .connection()
            .await?
            .table_names()
            .execute()
            .await
            .context("Failed to list tables")?;
        Ok(names.iter().any(|n| n == &self.table_name))
    }

    async fn open_table(&self) -> Result<Option<lancedb::table::Table>> {
        if !self.table_exists().await? {
            return Ok(None);
        }
        let table = self
            .connection()
            .await?
            .open_table(&self.table_name)
            .execute()
            .await
            .context("Failed to open table")?;
        Ok(Some(table))
    }
}

#[async_trait]
impl VectorStore for LanceVectorStore {
    async fn insert_batch(&self, entries: Vec<VectorEntry>) -> Result<usize> {
        if entries.is_empty() {
            return Ok(0);
        }

        let batch = Self::entries_to_batch(&entries)?;
        let schema = batch.schema();
        let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);

        match self.open_table().await? {
            Some(table) => {
                table
                    .add(batches)
                    .execute()
                    .await
                    .context("Failed to add vectors to table")?;
            }
            None => {
                self.connection()
                    .await?
                    .create_table(&self.table_name, batches)
                    .execute()
                    .await
                    .context("Failed to create table")?;
                tracing::debug!("Created LanceDB table {}", self.table_name);
            }
        }

        Ok(entries.len())
    }

    async fn search(&self, query_embedding: &[f32], limit: usize) -> Result<Vec<SearchResult>> {
        if limit == 0 {
            return Ok(vec![]);
        }
        let Some(table) = self.open_table().await? else {
            return Ok(vec![]);
        };

        let stream = table
            .vector_search(query_embedding.to_vec())
            .context("Failed to create vector search")?
            .distance_type(DistanceType::Cosine)
            .limit(limit)
            .execute()
            .await
            .context("Failed to execute vector search")?;

        let batches: Vec<RecordBatch> = stream.try_collect().await?;
        let mut results = Vec::new();
        for batch in &batches {
            Self::batch_to_results(batch, &mut results)?;
        }

        Ok(results)
    }

    async fn count(&self) -> Result<usize> {
        match self.open_table().await? {
            Some(table) => table.count_rows(None).await.context("Failed to count rows"),
            None => Ok(0),
        }
    }

    async fn reset(&self) -> Result<()> {
        if self.table_exists().await? {
            self.connection()
                .await?
                .drop_table(&self.table_name)
                .await
                .context("Failed to drop table")?;
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn entry(text: &str, embedding: Vec<f32>) -> VectorEntry {
        let mut meta = Metadata::new();
        meta.insert("source".into(), json!("a.md"));
        VectorEntry {
            document: Document::with_metadata(text, meta),
            embedding,
        }
    }

    #[tokio::test]
    async fn test_lance_insert_search_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let store = LanceVectorStore::new(temp_dir.path().join("index.lance"));

        assert_eq!(store.count().await.unwrap(), 0);
        assert!(store.search(&[1.0, 0.0, 0.0], 3).await.unwrap().is_empty());

        store
            .insert_batch(vec![
                entry("x axis", vec![1.0, 0.0, 0.0]),
                entry("y axis", vec![0.0, 1.0, 0.0]),
            ])
            .await
            .unwrap();
        assert_eq!(store.count().await.unwrap(), 2);

        let results = store.search(&[1.0, 0.1, 0.0], 1).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].document.content, "x axis");
        assert_eq!(results[0].document.metadata["source"], json!("a.md"));
        assert_eq!(results[0].embedding.len(), 3);
        assert!(results[0].similarity > 0.9);
    }

    #[tokio::test]
    async fn test_lance_instances_do_not_share_tables() {
        let temp_dir = TempDir::new().unwrap();
        let a = LanceVectorStore::new(temp_dir.path().join("shared.lance"));
        let b = LanceVectorStore::new(temp_dir.path().join("shared.lance"));
        assert_ne!(a.table_name(), b.table_name());

        a.insert_batch(vec![entry("only in a", vec![1.0, 0.0])])
            .await
            .unwrap();
        assert_eq!(a.count().await.unwrap(), 1);
        assert_eq!(b.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_lance_reset_drops_rows() {
        let temp_dir = TempDir::new().unwrap();
        let store = LanceVectorStore::new(temp_dir.path().join("reset.lance"));

        store.insert_batch(vec![entry("x", vec![1.0, 0.0])]).await.unwrap();
        store.reset().await.unwrap();
        assert_eq!(store.count().await.unwrap(), 0);

        store.insert_batch(vec![entry("y", vec![0.0, 1.0])]).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let entries = vec![entry("a", vec![1.0, 0.0]), entry("b", vec![1.0])];
        assert!(LanceVectorStore::entries_to_batch(&entries).is_err());
    }
}
