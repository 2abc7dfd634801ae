//! In-memory [`VectorStore`] 구현
//!
//! 테스트 및 임시 인덱스용입니다.
//! 벡터 검색은 저장된 모든 벡터에 대한 brute-force 코사인 유사도입니다.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, RwLock};

use anyhow::Result;
use async_trait::async_trait;

use crate::embedding::EmbeddingProvider;

use super::vector::{
    cosine_similarity, matches_metadata, ContentFilter, MetadataFilter, QueryResult,
    StoredDocument, VectorStore,
};

struct StoredVector {
    document: StoredDocument,
    embedding: Vec<f32>,
}

/// 메모리 벡터 저장소
pub struct InMemoryVectorStore {
    embedder: Arc<dyn EmbeddingProvider>,
    entries: RwLock<BTreeMap<String, StoredVector>>,
}

impl InMemoryVectorStore {
    /// 임베딩 프로바이더로 생성
    pub fn new(embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            embedder,
            entries: RwLock::new(BTreeMap::new()),
        }
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn add_documents(&self, documents: &[StoredDocument]) -> Result<usize> {
        if documents.is_empty() {
            return Ok(0);
        }

        let texts: Vec<String> = documents.iter().map(|d| d.content.clone()).collect();
        let embeddings = self.embedder.embed_batch(&texts).await?;

        let mut entries = self
            .entries
            .write()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;
        for (document, embedding) in documents.iter().zip(embeddings) {
            entries.insert(
                document.id.clone(),
                StoredVector {
                    document: document.clone(),
                    embedding,
                },
            );
        }

        Ok(documents.len())
    }

    async fn delete_documents(&self, ids: &[String]) -> Result<usize> {
        let mut entries = self
            .entries
            .write()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;
        Ok(ids.iter().filter(|id| entries.remove(*id).is_some()).count())
    }

    async fn list_ids(&self) -> Result<HashSet<String>> {
        let entries = self
            .entries
            .read()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;
        Ok(entries.keys().cloned().collect())
    }

    async fn query(
        &self,
        text: &str,
        limit: usize,
        metadata_filter: Option<&MetadataFilter>,
        content_filter: Option<&ContentFilter>,
    ) -> Result<Vec<QueryResult>> {
        let query_embedding = self.embedder.embed(text).await?;

        let entries = self
            .entries
            .read()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let mut results: Vec<QueryResult> = entries
            .values()
            .filter(|e| {
                metadata_filter
                    .map(|f| matches_metadata(f, &e.document.metadata))
                    .unwrap_or(true)
            })
            .filter(|e| {
                content_filter
                    .map(|f| f.matches(&e.document.content))
                    .unwrap_or(true)
            })
            .map(|e| QueryResult {
                id: e.document.id.clone(),
                content: e.document.content.clone(),
                metadata: e.document.metadata.clone(),
                similarity: cosine_similarity(&query_embedding, &e.embedding),
            })
            .collect();

        results.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.truncate(limit);

        Ok(results)
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<StoredDocument>> {
        let entries = self
            .entries
            .read()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;
        Ok(entries.get(id).map(|e| e.document.clone()))
    }
}

// ============================================================================
// Tests
// ============================================================================
