//! Vector Store - 벡터 저장소 트레이트 및 유틸리티
//!
//! 단일 컬렉션, 키(프래그먼트 ID) 기반 영구 저장소 인터페이스입니다.
//! 임베딩 계산은 저장소 구현이 담당합니다.

use std::collections::{BTreeMap, HashSet};

use anyhow::Result;
use async_trait::async_trait;

use super::metadata::Metadata;

// ============================================================================
// Types
// ============================================================================

/// 저장할 문서 (프래그먼트)
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    /// 프래그먼트 ID (`path|sha256`)
    pub id: String,
    /// 임베딩 대상 텍스트 (prefix + 본문 + footer)
    pub content: String,
    /// 메타데이터
    pub metadata: Metadata,
}

/// 검색 결과
#[derive(Debug, Clone)]
pub struct QueryResult {
    /// 프래그먼트 ID
    pub id: String,
    /// 저장된 텍스트
    pub content: String,
    /// 메타데이터
    pub metadata: Metadata,
    /// 유사도 스코어 (높을수록 관련성 높음)
    pub similarity: f32,
}

/// 메타데이터 필터 (키 → 렌더링된 값, 모두 일치해야 함)
pub type MetadataFilter = BTreeMap<String, String>;

/// 본문 필터
#[derive(Debug, Clone, PartialEq)]
pub enum ContentFilter {
    /// 본문에 문자열 포함
    Contains(String),
    /// 본문에 문자열 미포함
    NotContains(String),
}

impl ContentFilter {
    /// 본문이 필터 조건을 만족하는지 확인
    pub fn matches(&self, content: &str) -> bool {
        match self {
            ContentFilter::Contains(s) => content.contains(s.as_str()),
            ContentFilter::NotContains(s) => !content.contains(s.as_str()),
        }
    }
}

/// 메타데이터가 필터 조건을 모두 만족하는지 확인
pub fn matches_metadata(filter: &MetadataFilter, metadata: &Metadata) -> bool {
    filter.iter().all(|(key, expected)| {
        metadata
            .get(key)
            .map(|v| v.to_string() == *expected)
            .unwrap_or(false)
    })
}

// ============================================================================
// VectorStore Trait
// ============================================================================

/// VectorStore 트레이트 (async)
///
/// 벡터 저장소의 공통 인터페이스입니다.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// 문서 배치 추가 (임베딩 포함)
    async fn add_documents(&self, documents: &[StoredDocument]) -> Result<usize>;

    /// ID 목록으로 문서 삭제
    async fn delete_documents(&self, ids: &[String]) -> Result<usize>;

    /// 저장된 모든 ID
    async fn list_ids(&self) -> Result<HashSet<String>>;

    /// 유사도 검색
    async fn query(
        &self,
        text: &str,
        limit: usize,
        metadata_filter: Option<&MetadataFilter>,
        content_filter: Option<&ContentFilter>,
    ) -> Result<Vec<QueryResult>>;

    /// ID로 문서 조회
    async fn get_by_id(&self, id: &str) -> Result<Option<StoredDocument>>;

    /// 문서 개수
    async fn count(&self) -> Result<usize> {
        Ok(self.list_ids().await?.len())
    }
}

// ============================================================================
// Utility Functions
// ============================================================================

/// 코사인 유사도 계산
///
/// 두 벡터 간의 코사인 유사도를 계산합니다.
/// 결과는 -1.0 ~ 1.0 범위입니다.
///
/// # Arguments
/// * `a` - 첫 번째 벡터
/// * `b` - 두 번째 벡터
///
/// # Returns
/// 코사인 유사도 (-1.0 ~ 1.0)
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

// ============================================================================
// Tests
// ============================================================================
