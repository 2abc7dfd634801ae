//! Reconciler - 디스크 내용과 저장소 프래그먼트 동기화
//!
//! 경로별로 현재 프래그먼트 ID 집합을 다시 계산하고 저장소의 ID 집합과 비교합니다.
//! - 이미 저장된 ID: 유지 (재임베딩 없음)
//! - 새 ID: 배치 끝에서 한 번에 추가
//! - 더 이상 생성되지 않는 ID: 삭제

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use crate::error::{EngineError, Result};

use super::identity::path_of;
use super::loader::DocumentLoader;
use super::metadata::{render_footer, MetadataValue};
use super::vector::{StoredDocument, VectorStore};

/// 프래그먼트 ID 메타데이터 키
pub const DOC_ID_KEY: &str = "doc_id";

/// 동기화 결과 집계
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// 처리한 파일 수
    pub files: usize,
    /// 새로 추가된 프래그먼트 수
    pub added: usize,
    /// 삭제된 프래그먼트 수
    pub removed: usize,
    /// 변경 없는 프래그먼트 수
    pub unchanged: usize,
    /// 읽기/파싱 실패로 건너뛴 파일 수
    pub skipped: usize,
}

impl ReconcileReport {
    /// 저장소 변경이 있었는지
    pub fn has_changes(&self) -> bool {
        self.added > 0 || self.removed > 0
    }
}

/// 저장소 동기화기
pub struct Reconciler {
    store: Arc<dyn VectorStore>,
    loader: DocumentLoader,
    embedding_prefix: String,
}

impl Reconciler {
    /// 새 Reconciler 생성
    ///
    /// # Arguments
    /// * `store` - 벡터 저장소
    /// * `loader` - 문서 로더
    /// * `embedding_prefix` - 저장 전 본문 앞에 붙는 문자열
    pub fn new(
        store: Arc<dyn VectorStore>,
        loader: DocumentLoader,
        embedding_prefix: impl Into<String>,
    ) -> Self {
        Self {
            store,
            loader,
            embedding_prefix: embedding_prefix.into(),
        }
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    /// 경로 배치를 현재 디스크 내용과 일치시킴
    ///
    /// 파일별 읽기/파싱 실패는 경고 후 건너뜁니다.
    /// 저장소 실패는 배치를 중단하며, 이미 반영된 이전 경로의 변경은 되돌리지 않습니다.
    pub async fn reconcile(
        &self,
        base_path: &Path,
        relative_paths: &[String],
    ) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();
        if relative_paths.is_empty() {
            return Ok(report);
        }

        let all_ids = self.store.list_ids().await.map_err(EngineError::Store)?;

        let mut seen_paths = HashSet::new();
        let mut queued_ids = HashSet::new();
        let mut pending: Vec<StoredDocument> = Vec::new();

        for relative_path in relative_paths {
            if !seen_paths.insert(relative_path.as_str()) {
                continue;
            }
            report.files += 1;

            let fragments = match self.loader.load(base_path, relative_path) {
                Ok(fragments) => fragments,
                Err(e) => {
                    tracing::warn!("Failed to load document {}: {}", relative_path, e);
                    report.skipped += 1;
                    continue;
                }
            };

            let stored_ids = stored_under(&all_ids, relative_path);
            let mut valid_ids = HashSet::new();
            let mut announced = false;

            for mut fragment in fragments {
                let id = fragment.id();

                if stored_ids.contains(&id) {
                    if valid_ids.insert(id) {
                        report.unchanged += 1;
                    }
                    continue;
                }

                // 같은 파일 안의 중복 텍스트는 한 번만 추가
                if !queued_ids.insert(id.clone()) {
                    continue;
                }

                if !announced {
                    tracing::info!("(Re)Indexing: {}", relative_path);
                    announced = true;
                }

                fragment
                    .metadata
                    .insert(DOC_ID_KEY.to_string(), MetadataValue::Text(id.clone()));

                let content = format!(
                    "{}{}{}",
                    self.embedding_prefix,
                    fragment.content,
                    render_footer(&fragment.metadata)
                );

                pending.push(StoredDocument {
                    id,
                    content,
                    metadata: fragment.metadata,
                });
            }

            let stale: Vec<String> = stored_ids.difference(&valid_ids).cloned().collect();
            if !stale.is_empty() {
                tracing::info!(
                    "Removing {} stale fragments of {}",
                    stale.len(),
                    relative_path
                );
                self.store
                    .delete_documents(&stale)
                    .await
                    .map_err(EngineError::Store)?;
                report.removed += stale.len();
            }
        }

        if !pending.is_empty() {
            tracing::info!("Adding {} fragments to store...", pending.len());
            self.store
                .add_documents(&pending)
                .await
                .map_err(EngineError::Store)?;
            report.added = pending.len();
        }

        Ok(report)
    }

    /// 경로들의 모든 프래그먼트 삭제 (파일 삭제/이름 변경)
    ///
    /// # Returns
    /// 삭제된 프래그먼트 수
    pub async fn remove(&self, relative_paths: &[String]) -> Result<usize> {
        if relative_paths.is_empty() {
            return Ok(0);
        }

        let all_ids = self.store.list_ids().await.map_err(EngineError::Store)?;
        let mut removed = 0;

        for relative_path in relative_paths {
            let stale: Vec<String> = stored_under(&all_ids, relative_path).into_iter().collect();
            if stale.is_empty() {
                continue;
            }

            tracing::info!("Removing {} fragments of {}", stale.len(), relative_path);
            self.store
                .delete_documents(&stale)
                .await
                .map_err(EngineError::Store)?;
            removed += stale.len();
        }

        Ok(removed)
    }

    /// `keep`에 없는 경로의 프래그먼트 모두 삭제
    ///
    /// 프로세스가 멈춰 있는 동안 지워진 파일을 정리합니다.
    pub async fn prune(&self, keep: &HashSet<String>) -> Result<usize> {
        let orphaned: Vec<String> = self
            .store
            .list_ids()
            .await
            .map_err(EngineError::Store)?
            .into_iter()
            .filter(|id| path_of(id).map(|p| !keep.contains(p)).unwrap_or(true))
            .collect();

        if orphaned.is_empty() {
            return Ok(0);
        }

        tracing::info!("Pruning {} fragments of missing documents", orphaned.len());
        self.store
            .delete_documents(&orphaned)
            .await
            .map_err(EngineError::Store)?;

        Ok(orphaned.len())
    }

    /// 디렉토리 아래 모든 파일의 프래그먼트 삭제
    pub async fn remove_dir(&self, relative_dir: &str) -> Result<usize> {
        let prefix = format!("{}/", relative_dir.trim_end_matches('/'));

        let stale: Vec<String> = self
            .store
            .list_ids()
            .await
            .map_err(EngineError::Store)?
            .into_iter()
            .filter(|id| path_of(id).is_some_and(|p| p.starts_with(&prefix)))
            .collect();

        if stale.is_empty() {
            return Ok(0);
        }

        tracing::info!("Removing {} fragments under {}", stale.len(), prefix);
        self.store
            .delete_documents(&stale)
            .await
            .map_err(EngineError::Store)?;

        Ok(stale.len())
    }
}

/// 경로에 속한 저장된 ID 집합
///
/// 경로 자체에 `|`가 들어갈 수 있으므로 접두사 비교가 아니라
/// 마지막 구분자 앞부분이 정확히 일치하는지로 판단합니다.
fn stored_under(all_ids: &HashSet<String>, relative_path: &str) -> HashSet<String> {
    all_ids
        .iter()
        .filter(|id| path_of(id) == Some(relative_path))
        .cloned()
        .collect()
}

// ============================================================================
// Tests
// ============================================================================
