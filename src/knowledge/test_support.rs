//! 테스트 전용 임베딩/저장소 도우미

use std::collections::hash_map::DefaultHasher;
use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::embedding::EmbeddingProvider;

use super::memory::InMemoryVectorStore;
use super::vector::{ContentFilter, MetadataFilter, QueryResult, StoredDocument, VectorStore};

/// 단어 해시 기반 결정적 임베딩 (bag-of-words)
#[derive(Debug, Clone)]
pub struct HashEmbedding {
    dimension: usize,
}

impl HashEmbedding {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

impl Default for HashEmbedding {
    fn default() -> Self {
        Self::new(64)
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0.0f32; self.dimension];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let mut hasher = DefaultHasher::new();
            word.to_lowercase().hash(&mut hasher);
            let bucket = (hasher.finish() % self.dimension as u64) as usize;
            vector[bucket] += 1.0;
        }
        Ok(vector)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "hash"
    }
}

/// 호출 횟수를 세는 저장소 래퍼
pub struct CountingStore {
    inner: InMemoryVectorStore,
    adds: AtomicUsize,
    added: AtomicUsize,
    deletes: AtomicUsize,
    deleted_ids: std::sync::Mutex<Vec<String>>,
    fail_writes: AtomicBool,
    failures: AtomicUsize,
}

impl CountingStore {
    pub fn new() -> Self {
        Self {
            inner: InMemoryVectorStore::new(Arc::new(HashEmbedding::default())),
            adds: AtomicUsize::new(0),
            added: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
            deleted_ids: std::sync::Mutex::new(Vec::new()),
            fail_writes: AtomicBool::new(false),
            failures: AtomicUsize::new(0),
        }
    }

    /// add_documents 호출 횟수
    pub fn add_calls(&self) -> usize {
        self.adds.load(Ordering::SeqCst)
    }

    /// 추가된 문서 총 개수
    pub fn added_documents(&self) -> usize {
        self.added.load(Ordering::SeqCst)
    }

    /// delete_documents 호출 횟수
    pub fn delete_calls(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    /// 삭제 요청된 ID 전체
    pub fn deleted_ids(&self) -> Vec<String> {
        self.deleted_ids.lock().unwrap().clone()
    }

    pub fn reset_counts(&self) {
        self.adds.store(0, Ordering::SeqCst);
        self.added.store(0, Ordering::SeqCst);
        self.deletes.store(0, Ordering::SeqCst);
        self.deleted_ids.lock().unwrap().clear();
    }

    /// 이후 쓰기 작업을 실패시킴
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// 실패시킨 쓰기 호출 횟수
    pub fn failed_writes(&self) -> usize {
        self.failures.load(Ordering::SeqCst)
    }

    /// 특정 경로의 저장된 ID
    pub async fn ids_for(&self, relative_path: &str) -> HashSet<String> {
        self.inner
            .list_ids()
            .await
            .unwrap()
            .into_iter()
            .filter(|id| super::identity::path_of(id) == Some(relative_path))
            .collect()
    }
}

#[async_trait]
impl VectorStore for CountingStore {
    async fn add_documents(&self, documents: &[StoredDocument]) -> Result<usize> {
        if self.fail_writes.load(Ordering::SeqCst) {
            self.failures.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("simulated add failure");
        }
        self.adds.fetch_add(1, Ordering::SeqCst);
        self.added.fetch_add(documents.len(), Ordering::SeqCst);
        self.inner.add_documents(documents).await
    }

    async fn delete_documents(&self, ids: &[String]) -> Result<usize> {
        if self.fail_writes.load(Ordering::SeqCst) {
            self.failures.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("simulated delete failure");
        }
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.deleted_ids.lock().unwrap().extend(ids.iter().cloned());
        self.inner.delete_documents(ids).await
    }

    async fn list_ids(&self) -> Result<HashSet<String>> {
        self.inner.list_ids().await
    }

    async fn query(
        &self,
        text: &str,
        limit: usize,
        metadata_filter: Option<&MetadataFilter>,
        content_filter: Option<&ContentFilter>,
    ) -> Result<Vec<QueryResult>> {
        self.inner
            .query(text, limit, metadata_filter, content_filter)
            .await
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<StoredDocument>> {
        self.inner.get_by_id(id).await
    }
}
