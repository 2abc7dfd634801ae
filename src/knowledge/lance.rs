//! LanceDB Vector Store - 영구 프래그먼트 저장소
//!
//! 컬렉션 하나당 테이블 하나를 사용합니다.
//! 컬럼: `id`, `content`, `metadata` (JSON), `embedding` (FixedSizeList)
//!
//! ref: https://lancedb.github.io/lancedb/

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow_array::{
    Array, FixedSizeListArray, Float32Array, RecordBatch, RecordBatchIterator, StringArray,
};
use arrow_schema::{DataType, Field, Schema, SchemaRef};
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase, Select};
use lancedb::table::Table;
use lancedb::DistanceType;

use crate::embedding::EmbeddingProvider;

use super::metadata::Metadata;
use super::vector::{
    matches_metadata, ContentFilter, MetadataFilter, QueryResult, StoredDocument, VectorStore,
};

/// 기본 컬렉션 이름
pub const DEFAULT_COLLECTION: &str = "fragments";

/// 한 번의 delete 조건식에 넣는 최대 ID 수
const DELETE_CHUNK: usize = 256;

// ============================================================================
// LanceVectorStore
// ============================================================================

/// LanceDB 벡터 저장소 구현
///
/// 임베딩은 저장소가 직접 계산합니다 (add 시 문서, query 시 질의).
pub struct LanceVectorStore {
    table: Table,
    embedder: Arc<dyn EmbeddingProvider>,
    dimension: i32,
}

impl LanceVectorStore {
    /// 저장소 열기 (컬렉션이 없으면 생성)
    ///
    /// # Arguments
    /// * `path` - .lance 디렉토리 경로
    /// * `collection` - 컬렉션(테이블) 이름
    /// * `embedder` - 임베딩 프로바이더
    pub async fn open(
        path: &Path,
        collection: &str,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self> {
        // 부모 디렉토리 생성
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .context("Failed to create LanceDB directory")?;
            }
        }

        let path_str = path
            .to_str()
            .ok_or_else(|| anyhow::anyhow!("Invalid path encoding"))?;

        let db = lancedb::connect(path_str)
            .execute()
            .await
            .context("Failed to connect to LanceDB")?;

        let dimension = i32::try_from(embedder.dimension())
            .context("Embedding dimension too large")?;

        let names = db
            .table_names()
            .execute()
            .await
            .context("Failed to list tables")?;

        let table = if names.iter().any(|n| n == collection) {
            let table = db
                .open_table(collection)
                .execute()
                .await
                .with_context(|| format!("Failed to open collection '{}'", collection))?;
            Self::check_dimension(&table, dimension).await?;
            table
        } else {
            tracing::info!("Creating collection '{}' at {}", collection, path.display());
            db.create_empty_table(collection, Self::create_schema(dimension))
                .execute()
                .await
                .with_context(|| format!("Failed to create collection '{}'", collection))?
        };

        Ok(Self {
            table,
            embedder,
            dimension,
        })
    }

    /// 프래그먼트 테이블 스키마
    fn create_schema(dimension: i32) -> SchemaRef {
        Arc::new(Schema::new(vec![
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
        ]))
    }

    /// 기존 테이블의 임베딩 차원이 현재 모델과 같은지 확인
    async fn check_dimension(table: &Table, dimension: i32) -> Result<()> {
        let schema = table.schema().await.context("Failed to read table schema")?;
        let field = schema
            .field_with_name("embedding")
            .context("Collection has no embedding column")?;

        match field.data_type() {
            DataType::FixedSizeList(_, size) if *size == dimension => Ok(()),
            DataType::FixedSizeList(_, size) => anyhow::bail!(
                "Collection was built with {}-dimensional embeddings, current model produces {}",
                size,
                dimension
            ),
            other => anyhow::bail!("Unexpected embedding column type: {:?}", other),
        }
    }

    /// 문서와 임베딩을 Arrow RecordBatch로 변환
    fn documents_to_batch(
        &self,
        documents: &[StoredDocument],
        embeddings: Vec<Vec<f32>>,
    ) -> Result<RecordBatch> {
        if documents.is_empty() {
            anyhow::bail!("Cannot create batch from empty documents");
        }

        let ids: Vec<&str> = documents.iter().map(|d| d.id.as_str()).collect();
        let contents: Vec<&str> = documents.iter().map(|d| d.content.as_str()).collect();
        let metadata = documents
            .iter()
            .map(|d| serde_json::to_string(&d.metadata))
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("Failed to serialize metadata")?;

        // 임베딩을 FixedSizeList로 변환
        let embeddings_flat: Vec<f32> = embeddings.into_iter().flatten().collect();
        let values = Float32Array::from(embeddings_flat);
        let field = Arc::new(Field::new("item", DataType::Float32, true));
        let embeddings_list = FixedSizeListArray::try_new(
            field,
            self.dimension,
            Arc::new(values) as Arc<dyn Array>,
            None,
        )
        .context("Failed to create embedding array")?;

        RecordBatch::try_new(
            Self::create_schema(self.dimension),
            vec![
                Arc::new(StringArray::from(ids)),
                Arc::new(StringArray::from(contents)),
                Arc::new(StringArray::from(metadata)),
                Arc::new(embeddings_list),
            ],
        )
        .context("Failed to create RecordBatch")
    }

    async fn row_count(&self) -> Result<usize> {
        self.table
            .count_rows(None)
            .await
            .context("Failed to count rows")
    }
}

#[async_trait]
impl VectorStore for LanceVectorStore {
    async fn add_documents(&self, documents: &[StoredDocument]) -> Result<usize> {
        if documents.is_empty() {
            return Ok(0);
        }

        let texts: Vec<String> = documents.iter().map(|d| d.content.clone()).collect();
        let embeddings = self.embedder.embed_batch(&texts).await?;
        if embeddings.len() != documents.len() {
            anyhow::bail!(
                "Embedding count mismatch: expected {}, got {}",
                documents.len(),
                embeddings.len()
            );
        }

        let batch = self.documents_to_batch(documents, embeddings)?;
        let schema = batch.schema();
        let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);

        self.table
            .add(batches)
            .execute()
            .await
            .context("Failed to add fragments to table")?;

        Ok(documents.len())
    }

    async fn delete_documents(&self, ids: &[String]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        let before_count = self.row_count().await?;

        for chunk in ids.chunks(DELETE_CHUNK) {
            let predicate = format!(
                "id IN ({})",
                chunk
                    .iter()
                    .map(|id| sql_string(id))
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            self.table
                .delete(&predicate)
                .await
                .context("Failed to delete fragments")?;
        }

        let after_count = self.row_count().await?;
        Ok(before_count.saturating_sub(after_count))
    }

    async fn list_ids(&self) -> Result<HashSet<String>> {
        let total = self.row_count().await?;
        if total == 0 {
            return Ok(HashSet::new());
        }

        let batches: Vec<RecordBatch> = self
            .table
            .query()
            .select(Select::Columns(vec!["id".to_string()]))
            .limit(total)
            .execute()
            .await
            .context("Failed to scan fragment ids")?
            .try_collect()
            .await?;

        let mut ids = HashSet::with_capacity(total);
        for batch in batches {
            let column = string_column(&batch, "id")?;
            for i in 0..batch.num_rows() {
                ids.insert(column.value(i).to_string());
            }
        }
        Ok(ids)
    }

    async fn query(
        &self,
        text: &str,
        limit: usize,
        metadata_filter: Option<&MetadataFilter>,
        content_filter: Option<&ContentFilter>,
    ) -> Result<Vec<QueryResult>> {
        let total = self.row_count().await?;
        if total == 0 || limit == 0 {
            return Ok(vec![]);
        }

        let query_embedding = self.embedder.embed(text).await?;

        // 필터가 있으면 전체 후보를 받아 Rust에서 거른다
        let filtered = metadata_filter.map(|f| !f.is_empty()).unwrap_or(false)
            || content_filter.is_some();
        let candidates = if filtered { total } else { limit.min(total) };

        let batches: Vec<RecordBatch> = self
            .table
            .vector_search(query_embedding)
            .context("Failed to create vector search")?
            .distance_type(DistanceType::Cosine)
            .limit(candidates)
            .execute()
            .await
            .context("Failed to execute vector search")?
            .try_collect()
            .await?;

        let mut results = Vec::new();
        for batch in batches {
            let ids = string_column(&batch, "id")?;
            let contents = string_column(&batch, "content")?;
            let metadata = string_column(&batch, "metadata")?;
            // _distance 컬럼 (LanceDB가 자동 추가)
            let distances = batch
                .column_by_name("_distance")
                .and_then(|c| c.as_any().downcast_ref::<Float32Array>())
                .ok_or_else(|| anyhow::anyhow!("Missing _distance column"))?;

            for i in 0..batch.num_rows() {
                let metadata: Metadata = serde_json::from_str(metadata.value(i))
                    .context("Failed to parse stored metadata")?;
                let content = contents.value(i);

                if let Some(filter) = metadata_filter {
                    if !matches_metadata(filter, &metadata) {
                        continue;
                    }
                }
                if let Some(filter) = content_filter {
                    if !filter.matches(content) {
                        continue;
                    }
                }

                results.push(QueryResult {
                    id: ids.value(i).to_string(),
                    content: content.to_string(),
                    metadata,
                    // 코사인 거리 → 유사도
                    similarity: 1.0 - distances.value(i),
                });
            }
        }

        results.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.truncate(limit);

        Ok(results)
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<StoredDocument>> {
        let batches: Vec<RecordBatch> = self
            .table
            .query()
            .only_if(format!("id = {}", sql_string(id)))
            .select(Select::Columns(vec![
                "id".to_string(),
                "content".to_string(),
                "metadata".to_string(),
            ]))
            .limit(1)
            .execute()
            .await
            .context("Failed to look up fragment")?
            .try_collect()
            .await?;

        for batch in batches {
            if batch.num_rows() == 0 {
                continue;
            }
            let ids = string_column(&batch, "id")?;
            let contents = string_column(&batch, "content")?;
            let metadata = string_column(&batch, "metadata")?;

            return Ok(Some(StoredDocument {
                id: ids.value(0).to_string(),
                content: contents.value(0).to_string(),
                metadata: serde_json::from_str(metadata.value(0))
                    .context("Failed to parse stored metadata")?,
            }));
        }

        Ok(None)
    }

    async fn count(&self) -> Result<usize> {
        self.row_count().await
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// SQL 문자열 리터럴 (작은따옴표 이스케이프)
fn sql_string(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
        .ok_or_else(|| anyhow::anyhow!("Missing {} column", name))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::metadata::MetadataValue;
    use crate::knowledge::test_support::HashEmbedding;
    use tempfile::TempDir;

    fn create_test_document(id: &str, content: &str) -> StoredDocument {
        let mut metadata = Metadata::new();
        metadata.insert(
            "doc_path".to_string(),
            MetadataValue::List(vec![id.split('|').next().unwrap().to_string()]),
        );
        StoredDocument {
            id: id.to_string(),
            content: content.to_string(),
            metadata,
        }
    }

    async fn open_store(dir: &TempDir) -> LanceVectorStore {
        LanceVectorStore::open(
            &dir.path().join("test.lance"),
            DEFAULT_COLLECTION,
            Arc::new(HashEmbedding::default()),
        )
        .await
        .unwrap()
    }

    #[test]
    fn test_sql_string_escapes_quotes() {
        assert_eq!(sql_string("a.md|ff"), "'a.md|ff'");
        assert_eq!(sql_string("it's.md|ff"), "'it''s.md|ff'");
    }

    #[tokio::test]
    async fn test_lance_store_basic() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir).await;

        // 초기 상태
        assert_eq!(store.count().await.unwrap(), 0);
        assert!(store.list_ids().await.unwrap().is_empty());

        // 삽입
        let documents = vec![
            create_test_document("a.md|1", "hello world"),
            create_test_document("b.md|2", "goodbye moon"),
        ];
        let inserted = store.add_documents(&documents).await.unwrap();
        assert_eq!(inserted, 2);
        assert_eq!(store.count().await.unwrap(), 2);

        let ids = store.list_ids().await.unwrap();
        assert!(ids.contains("a.md|1"));
        assert!(ids.contains("b.md|2"));

        // ID 조회 (메타데이터 포함)
        let found = store.get_by_id("a.md|1").await.unwrap().unwrap();
        assert_eq!(found, documents[0]);
        assert!(store.get_by_id("missing|0").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_lance_search() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir).await;

        store
            .add_documents(&[
                create_test_document("a.md|1", "rust ownership borrowing"),
                create_test_document("b.md|1", "cooking pasta recipes"),
                create_test_document("c.md|1", "gardening tomatoes"),
            ])
            .await
            .unwrap();

        let results = store.query("rust borrowing", 2, None, None).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id, "a.md|1");

        let filter = ContentFilter::Contains("pasta".to_string());
        let results = store
            .query("rust borrowing", 5, None, Some(&filter))
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "b.md|1");
    }

    #[tokio::test]
    async fn test_lance_delete() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(&temp_dir).await;

        store
            .add_documents(&[
                create_test_document("a.md|1", "one"),
                create_test_document("a.md|2", "two"),
                create_test_document("b.md|1", "three"),
            ])
            .await
            .unwrap();
        assert_eq!(store.count().await.unwrap(), 3);

        let deleted = store
            .delete_documents(&["a.md|1".to_string(), "a.md|2".to_string()])
            .await
            .unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_lance_reopen_persists() {
        let temp_dir = TempDir::new().unwrap();
        {
            let store = open_store(&temp_dir).await;
            store
                .add_documents(&[create_test_document("a.md|1", "persist me")])
                .await
                .unwrap();
        }

        let store = open_store(&temp_dir).await;
        assert_eq!(store.count().await.unwrap(), 1);

        // 차원이 다른 모델로는 열 수 없음
        let result = LanceVectorStore::open(
            &temp_dir.path().join("test.lance"),
            DEFAULT_COLLECTION,
            Arc::new(HashEmbedding::new(8)),
        )
        .await;
        assert!(result.is_err());
    }
}
