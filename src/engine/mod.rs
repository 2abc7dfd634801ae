//! Retrieval Engine - 초기 로드, 실시간 동기화, 검색 파사드
//!
//! 1. `load_all`: 루트 아래 패턴과 일치하는 파일 전체를 한 번 동기화한 뒤 감시 시작
//! 2. 감시 이벤트는 단일 워커 태스크가 순서대로 처리 (동기화 직렬화)
//! 3. `query`: 질의 prefix를 붙여 저장소 유사도 검색
//!
//! 엔진은 프래그먼트 상태를 메모리에 두지 않습니다. 저장소가 유일한 원본입니다.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::collector::{relative_path, FileCollector, FilePattern};
use crate::error::{EngineError, Result};
use crate::knowledge::{
    ContentFilter, DocumentLoader, MetadataFilter, QueryResult, ReconcileReport, Reconciler,
    VectorStore,
};
use crate::watcher::{self, FsEvent, WatchHandle};

// ============================================================================
// ModelPrompts
// ============================================================================

/// 임베딩 모델용 비대칭 prefix
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelPrompts {
    /// 문서 본문 앞에 붙는 문자열
    pub embedding_prefix: String,
    /// 질의 앞에 붙는 문자열
    pub query_prefix: String,
}

impl ModelPrompts {
    pub fn new(embedding_prefix: impl Into<String>, query_prefix: impl Into<String>) -> Self {
        Self {
            embedding_prefix: embedding_prefix.into(),
            query_prefix: query_prefix.into(),
        }
    }
}

// ============================================================================
// RetrievalEngine
// ============================================================================

/// 초기 동기화 결과
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// 정규화된 루트
    pub root: PathBuf,
    /// 패턴과 일치한 파일 수
    pub discovered: usize,
    /// 동기화 집계
    pub reconcile: ReconcileReport,
    /// 디스크에서 사라진 파일의 프래그먼트 삭제 수
    pub pruned: usize,
}

struct SyncState {
    watch: WatchHandle,
    worker: JoinHandle<()>,
}

/// 검색 엔진
pub struct RetrievalEngine {
    reconciler: Arc<Reconciler>,
    prompts: ModelPrompts,
    sync: Mutex<Option<SyncState>>,
    closed: AtomicBool,
}

impl RetrievalEngine {
    /// 새 엔진 생성
    ///
    /// # Arguments
    /// * `store` - 벡터 저장소 (엔진이 단독 소유)
    /// * `prompts` - 임베딩/질의 prefix
    /// * `loader` - 문서 로더
    pub fn new(store: Arc<dyn VectorStore>, prompts: ModelPrompts, loader: DocumentLoader) -> Self {
        let reconciler = Reconciler::new(store, loader, prompts.embedding_prefix.clone());
        Self {
            reconciler: Arc::new(reconciler),
            prompts,
            sync: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    pub fn prompts(&self) -> &ModelPrompts {
        &self.prompts
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        self.reconciler.store()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(EngineError::EngineClosed)
        } else {
            Ok(())
        }
    }

    /// 한 번만 동기화 (감시 없음)
    ///
    /// 패턴과 일치하는 파일을 모두 동기화하고, 더 이상 없는 파일의 프래그먼트를 정리합니다.
    pub async fn sync_once(&self, root: &Path, file_pattern: &str) -> Result<LoadReport> {
        self.ensure_open()?;
        let root = canonical_root(root)?;
        let pattern = FilePattern::new(file_pattern)?;
        self.initial_pass(&root, &pattern).await
    }

    async fn initial_pass(&self, root: &Path, pattern: &FilePattern) -> Result<LoadReport> {
        let files = FileCollector::new(pattern.clone()).collect_directory(root)?;
        let relative_paths: Vec<String> = files.into_iter().map(|f| f.relative_path).collect();

        let reconcile = self.reconciler.reconcile(root, &relative_paths).await?;

        let keep: HashSet<String> = relative_paths.iter().cloned().collect();
        let pruned = self.reconciler.prune(&keep).await?;

        tracing::info!(
            "Synced {} documents under {} ({} added, {} removed, {} unchanged, {} skipped)",
            relative_paths.len(),
            root.display(),
            reconcile.added,
            reconcile.removed + pruned,
            reconcile.unchanged,
            reconcile.skipped
        );

        Ok(LoadReport {
            root: root.to_path_buf(),
            discovered: relative_paths.len(),
            reconcile,
            pruned,
        })
    }

    /// 전체 로드 후 실시간 동기화 시작
    ///
    /// 이미 동기화 중이면 이전 감시를 먼저 멈춥니다.
    ///
    /// # Errors
    /// * `EngineError::Io` - 루트를 읽을 수 없음
    /// * `EngineError::InvalidPattern` - 잘못된 glob
    /// * `EngineError::Store` - 초기 동기화 중 저장소 실패
    /// * `EngineError::WatchSetup` - 감시 등록 실패
    /// * `EngineError::EngineClosed` - shutdown 이후 호출
    pub async fn load_all(&self, root: &Path, file_pattern: &str) -> Result<LoadReport> {
        self.ensure_open()?;

        let mut sync = self.sync.lock().await;
        if let Some(previous) = sync.take() {
            stop_sync(previous).await;
        }

        let root = canonical_root(root)?;
        let pattern = FilePattern::new(file_pattern)?;

        // 감시를 먼저 걸어 초기 동기화 중 변경도 큐에 쌓이게 한다
        let (tx, rx) = mpsc::unbounded_channel();
        let watch = watcher::start(&root, tx)?;

        let report = match self.initial_pass(&root, &pattern).await {
            Ok(report) => report,
            Err(e) => {
                watch.stop().await;
                return Err(e);
            }
        };

        let worker = tokio::spawn(sync_worker(
            self.reconciler.clone(),
            root.clone(),
            pattern,
            rx,
        ));

        *sync = Some(SyncState { watch, worker });
        Ok(report)
    }

    /// 실시간 동기화 중인지
    pub async fn is_syncing(&self) -> bool {
        self.sync.lock().await.is_some()
    }

    /// 유사도 검색
    ///
    /// # Arguments
    /// * `text` - 자연어 질의 (query prefix가 앞에 붙음)
    /// * `max_results` - 최대 결과 수
    /// * `metadata_filter` - 메타데이터 일치 조건
    /// * `content_filter` - 본문 포함/미포함 조건
    pub async fn query(
        &self,
        text: &str,
        max_results: usize,
        metadata_filter: Option<&MetadataFilter>,
        content_filter: Option<&ContentFilter>,
    ) -> Result<Vec<QueryResult>> {
        self.ensure_open()?;

        let prefixed = format!("{}{}", self.prompts.query_prefix, text);
        self.store()
            .query(&prefixed, max_results, metadata_filter, content_filter)
            .await
            .map_err(EngineError::Store)
    }

    /// 감시 종료 및 엔진 닫기
    ///
    /// 감시 루프 종료 → 대기 중인 이벤트 처리 완료 → OS 감시 해제 순서입니다.
    /// 여러 번 호출해도 안전합니다.
    pub async fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        if let Some(state) = self.sync.lock().await.take() {
            stop_sync(state).await;
        }
    }
}

async fn stop_sync(state: SyncState) {
    // 감시 태스크가 끝나면 이벤트 송신자가 drop되어 워커가 큐를 비우고 종료
    state.watch.stop().await;
    if let Err(e) = state.worker.await {
        tracing::warn!("Sync worker ended abnormally: {}", e);
    }
}

/// 감시 이벤트를 순서대로 동기화하는 단일 워커
async fn sync_worker(
    reconciler: Arc<Reconciler>,
    root: PathBuf,
    pattern: FilePattern,
    mut events: mpsc::UnboundedReceiver<FsEvent>,
) {
    while let Some(event) = events.recv().await {
        if let Err(e) = apply_event(&reconciler, &root, &pattern, &event).await {
            // 백그라운드 실패는 로그로만 관찰 가능
            tracing::error!("Failed to sync {}: {}", event.path.display(), e);
        }
    }
    tracing::debug!("Sync worker for {} finished", root.display());
}

async fn apply_event(
    reconciler: &Reconciler,
    root: &Path,
    pattern: &FilePattern,
    event: &FsEvent,
) -> Result<()> {
    let Some(rel) = relative_path(root, &event.path) else {
        return Ok(());
    };

    if pattern.matches(&event.path) {
        if event.kind.is_upsert() {
            reconciler.reconcile(root, &[rel]).await?;
        } else {
            reconciler.remove(&[rel]).await?;
        }
    } else if !event.kind.is_upsert() {
        // 디렉토리 삭제/이름 변경이면 그 아래 파일들 정리
        reconciler.remove_dir(&rel).await?;
    }

    Ok(())
}

fn canonical_root(root: &Path) -> Result<PathBuf> {
    root.canonicalize().map_err(|e| EngineError::io(root, e))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use tempfile::TempDir;

    use crate::knowledge::test_support::CountingStore;
    use crate::knowledge::{fragment_id, Metadata, StoredDocument};

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, content).unwrap();
    }

    fn setup() -> (TempDir, PathBuf, Arc<CountingStore>, RetrievalEngine) {
        let dir = TempDir::new().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let store = Arc::new(CountingStore::new());
        let engine = RetrievalEngine::new(
            store.clone(),
            ModelPrompts::default(),
            DocumentLoader::with_defaults(),
        );
        (dir, root, store, engine)
    }

    /// 저장소의 경로별 ID 집합이 기대값이 될 때까지 대기
    async fn wait_for_ids(store: &CountingStore, rel: &str, expected: &HashSet<String>) -> bool {
        for _ in 0..200 {
            if store.ids_for(rel).await == *expected {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        false
    }

    fn ids(list: &[String]) -> HashSet<String> {
        list.iter().cloned().collect()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_load_edit_delete_lifecycle() {
        let (_dir, root, store, engine) = setup();
        write(&root, "a.md", "Hello world");

        // 1. 초기 로드
        let report = engine.load_all(&root, "*.md").await.unwrap();
        assert_eq!(report.discovered, 1);
        let first = store.ids_for("a.md").await;
        assert_eq!(first, ids(&[fragment_id("a.md", "Hello world")]));
        assert_eq!(store.list_ids().await.unwrap().len(), 1);

        // 2. 편집
        write(&root, "a.md", "Hello there");
        let expected = ids(&[fragment_id("a.md", "Hello there")]);
        assert!(wait_for_ids(&store, "a.md", &expected).await);
        assert_ne!(first, expected);

        // 3. 삭제
        std::fs::remove_file(root.join("a.md")).unwrap();
        assert!(wait_for_ids(&store, "a.md", &HashSet::new()).await);

        engine.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_non_matching_files_cause_no_mutation() {
        let (_dir, root, store, engine) = setup();
        engine.load_all(&root, "*.md").await.unwrap();
        store.reset_counts();

        write(&root, "notes.txt", "ignored text");
        std::fs::remove_file(root.join("notes.txt")).unwrap();
        // 이벤트는 순서대로 처리되므로 뒤따르는 파일이 반영되면 앞선 이벤트도 처리됨
        write(&root, "sentinel.md", "Sentinel");

        let expected = ids(&[fragment_id("sentinel.md", "Sentinel")]);
        assert!(wait_for_ids(&store, "sentinel.md", &expected).await);

        engine.shutdown().await;
        assert_eq!(store.added_documents(), 1);
        assert_eq!(store.delete_calls(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_new_subdirectory_is_indexed() {
        let (_dir, root, store, engine) = setup();
        engine.load_all(&root, "*.md").await.unwrap();

        write(&root, "later/inner/note.md", "Fresh note");

        let expected = ids(&[fragment_id("later/inner/note.md", "Fresh note")]);
        assert!(wait_for_ids(&store, "later/inner/note.md", &expected).await);

        // 디렉토리 삭제 시 아래 프래그먼트도 제거
        std::fs::remove_dir_all(root.join("later")).unwrap();
        assert!(wait_for_ids(&store, "later/inner/note.md", &HashSet::new()).await);

        engine.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_file_rename_moves_fragments() {
        let (_dir, root, store, engine) = setup();
        write(&root, "old.md", "Renamed note");
        engine.load_all(&root, "*.md").await.unwrap();
        assert_eq!(store.ids_for("old.md").await.len(), 1);

        std::fs::rename(root.join("old.md"), root.join("new.md")).unwrap();

        let expected = ids(&[fragment_id("new.md", "Renamed note")]);
        assert!(wait_for_ids(&store, "new.md", &expected).await);
        assert!(wait_for_ids(&store, "old.md", &HashSet::new()).await);

        engine.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_directory_moved_in_and_out() {
        let (_dir, root, store, engine) = setup();
        let outside = TempDir::new().unwrap();
        let staged = outside.path().join("staged");
        write(&staged, "inner.md", "Moved in");

        engine.load_all(&root, "*.md").await.unwrap();

        // 디렉토리째 들어온 파일도 색인
        std::fs::rename(&staged, root.join("moved")).unwrap();
        let expected = ids(&[fragment_id("moved/inner.md", "Moved in")]);
        assert!(wait_for_ids(&store, "moved/inner.md", &expected).await);

        // 밖으로 나가면 정리
        std::fs::rename(root.join("moved"), outside.path().join("back")).unwrap();
        assert!(wait_for_ids(&store, "moved/inner.md", &HashSet::new()).await);

        engine.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_background_failure_keeps_worker_alive() {
        let (_dir, root, store, engine) = setup();
        engine.load_all(&root, "*.md").await.unwrap();

        store.fail_writes(true);
        write(&root, "a.md", "Lost write");
        let mut failed = false;
        for _ in 0..200 {
            if store.failed_writes() > 0 {
                failed = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(failed);
        assert!(store.ids_for("a.md").await.is_empty());

        store.fail_writes(false);
        write(&root, "a.md", "Recovered write");

        let expected = ids(&[fragment_id("a.md", "Recovered write")]);
        assert!(wait_for_ids(&store, "a.md", &expected).await);
        assert!(engine.is_syncing().await);

        engine.shutdown().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unreadable_subdir_fails_without_pruning() {
        use std::os::unix::fs::PermissionsExt;

        let (_dir, root, store, engine) = setup();
        write(&root, "a.md", "Top");
        write(&root, "sub/b.md", "Nested");
        engine.sync_once(&root, "*.md").await.unwrap();
        assert_eq!(store.list_ids().await.unwrap().len(), 2);

        let sub = root.join("sub");
        std::fs::set_permissions(&sub, std::fs::Permissions::from_mode(0o000)).unwrap();
        // root 권한이면 권한 제거가 효과가 없음
        let readable = std::fs::read_dir(&sub).is_ok();

        let result = engine.sync_once(&root, "*.md").await;
        std::fs::set_permissions(&sub, std::fs::Permissions::from_mode(0o755)).unwrap();

        if readable {
            return;
        }
        assert!(matches!(result, Err(EngineError::Io { .. })));
        assert_eq!(store.ids_for("sub/b.md").await.len(), 1);
    }

    #[tokio::test]
    async fn test_sync_once_prunes_missing_files() {
        let (_dir, root, store, engine) = setup();
        write(&root, "a.md", "Keep");
        write(&root, "b.md", "Drop");

        engine.sync_once(&root, "*.md").await.unwrap();
        assert_eq!(store.list_ids().await.unwrap().len(), 2);

        std::fs::remove_file(root.join("b.md")).unwrap();
        store.reset_counts();

        let report = engine.sync_once(&root, "*.md").await.unwrap();
        assert_eq!(report.pruned, 1);
        assert_eq!(report.reconcile.unchanged, 1);
        assert_eq!(store.add_calls(), 0);
        assert!(store.ids_for("b.md").await.is_empty());
    }

    #[tokio::test]
    async fn test_load_all_errors() {
        let (_dir, root, _store, engine) = setup();

        let err = engine
            .load_all(&root.join("missing"), "*.md")
            .await
            .unwrap_err();
        assert!(err.is_not_found());

        let err = engine.load_all(&root, "[bad").await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidPattern { .. }));
        assert!(!engine.is_syncing().await);
    }

    #[tokio::test]
    async fn test_shutdown_closes_engine() {
        let (_dir, root, _store, engine) = setup();

        // 시작 전 shutdown도 안전
        engine.shutdown().await;
        engine.shutdown().await;

        let err = engine.query("anything", 5, None, None).await.unwrap_err();
        assert!(matches!(err, EngineError::EngineClosed));

        let err = engine.load_all(&root, "*.md").await.unwrap_err();
        assert!(matches!(err, EngineError::EngineClosed));
    }

    #[tokio::test]
    async fn test_reload_replaces_previous_sync() {
        let (_dir, root, _store, engine) = setup();
        write(&root, "a.md", "Hello");

        engine.load_all(&root, "*.md").await.unwrap();
        engine.load_all(&root, "*.md").await.unwrap();
        assert!(engine.is_syncing().await);

        engine.shutdown().await;
        assert!(!engine.is_syncing().await);
    }

    /// 고정된 결과를 돌려주는 저장소
    struct FixedStore {
        results: Vec<QueryResult>,
        seen: StdMutex<Vec<(String, usize)>>,
    }

    #[async_trait]
    impl VectorStore for FixedStore {
        async fn add_documents(&self, documents: &[StoredDocument]) -> anyhow::Result<usize> {
            Ok(documents.len())
        }

        async fn delete_documents(&self, ids: &[String]) -> anyhow::Result<usize> {
            Ok(ids.len())
        }

        async fn list_ids(&self) -> anyhow::Result<HashSet<String>> {
            Ok(HashSet::new())
        }

        async fn query(
            &self,
            text: &str,
            limit: usize,
            _metadata_filter: Option<&MetadataFilter>,
            _content_filter: Option<&ContentFilter>,
        ) -> anyhow::Result<Vec<QueryResult>> {
            self.seen.lock().unwrap().push((text.to_string(), limit));
            Ok(self.results.iter().take(limit).cloned().collect())
        }

        async fn get_by_id(&self, _id: &str) -> anyhow::Result<Option<StoredDocument>> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn test_query_applies_prefix_and_maps_results() {
        let result = |id: &str, content: &str, similarity: f32| QueryResult {
            id: id.to_string(),
            content: content.to_string(),
            metadata: Metadata::new(),
            similarity,
        };
        let store = Arc::new(FixedStore {
            results: vec![
                result("a.md|1", "Hello world", 0.9),
                result("b.md|1", "Other", 0.2),
            ],
            seen: StdMutex::new(Vec::new()),
        });
        let engine = RetrievalEngine::new(
            store.clone(),
            ModelPrompts::new("", "query: "),
            DocumentLoader::with_defaults(),
        );

        let results = engine.query("greeting", 5, None, None).await.unwrap();
        assert!(results.iter().any(|r| r.content == "Hello world"));
        assert_eq!(results[0].similarity, 0.9);

        let seen = store.seen.lock().unwrap().clone();
        assert_eq!(seen, vec![("query: greeting".to_string(), 5)]);
    }

    #[tokio::test]
    async fn test_query_surfaces_store_error() {
        struct FailingStore;

        #[async_trait]
        impl VectorStore for FailingStore {
            async fn add_documents(&self, _: &[StoredDocument]) -> anyhow::Result<usize> {
                Ok(0)
            }
            async fn delete_documents(&self, _: &[String]) -> anyhow::Result<usize> {
                Ok(0)
            }
            async fn list_ids(&self) -> anyhow::Result<HashSet<String>> {
                Ok(HashSet::new())
            }
            async fn query(
                &self,
                _: &str,
                _: usize,
                _: Option<&MetadataFilter>,
                _: Option<&ContentFilter>,
            ) -> anyhow::Result<Vec<QueryResult>> {
                anyhow::bail!("backend down")
            }
            async fn get_by_id(&self, _: &str) -> anyhow::Result<Option<StoredDocument>> {
                Ok(None)
            }
        }

        let engine = RetrievalEngine::new(
            Arc::new(FailingStore),
            ModelPrompts::default(),
            DocumentLoader::with_defaults(),
        );
        let err = engine.query("x", 3, None, None).await.unwrap_err();
        assert!(matches!(err, EngineError::Store(_)));
    }
}
