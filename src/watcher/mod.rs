//! Filesystem Watcher - 디렉토리 트리 변경 감시
//!
//! 디렉토리마다 비재귀 감시를 등록하고, 새 디렉토리가 생기면 감시 범위를 넓힙니다.
//! 이벤트 소비 루프는 백그라운드 태스크에서 돌며 notify 감시 핸들을 소유합니다.
//!
//! ## 사용법
//! ```rust,ignore
//! let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
//! let handle = trove_rag::watcher::start(&root, tx)?;
//! while let Some(event) = rx.recv().await { /* ... */ }
//! handle.stop().await;
//! ```

mod event;

pub use event::{classify, FsEvent, FsEventKind};

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use walkdir::WalkDir;

use crate::error::{EngineError, Result};

type Coverage = Arc<Mutex<BTreeSet<PathBuf>>>;

// ============================================================================
// WatchHandle
// ============================================================================

/// 실행 중인 감시의 핸들
///
/// `stop()`은 한 번만 호출할 수 있도록 핸들을 소비합니다.
/// stop 없이 drop되면 종료 신호만 보냅니다.
pub struct WatchHandle {
    root: PathBuf,
    coverage: Coverage,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl WatchHandle {
    /// 감시 루트
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 현재 감시 중인 디렉토리 목록
    pub fn watched_dirs(&self) -> Vec<PathBuf> {
        self.coverage
            .lock()
            .map(|dirs| dirs.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// 감시 종료
    ///
    /// 루프에 종료 신호를 보내고, 루프가 끝나기를 기다린 뒤 OS 감시 핸들을 해제합니다.
    /// 반환 이후에는 이벤트가 전달되지 않습니다.
    pub async fn stop(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!("Watcher task ended abnormally: {}", e);
            }
        }
        tracing::info!("Stopped watching {}", self.root.display());
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

// ============================================================================
// start
// ============================================================================

/// `root`와 모든 하위 디렉토리 감시 시작
///
/// 이벤트는 `events`로 전달됩니다. OS 감시 에러는 로그로만 남고 루프를 멈추지 않습니다.
///
/// # Errors
/// * `EngineError::WatchSetup` - 감시 생성 또는 루트 등록 실패
pub fn start(root: &Path, events: mpsc::UnboundedSender<FsEvent>) -> Result<WatchHandle> {
    let root = root.to_path_buf();
    let (raw_tx, raw_rx) = mpsc::unbounded_channel::<notify::Result<notify::Event>>();

    let mut watcher = notify::recommended_watcher(move |res| {
        let _ = raw_tx.send(res);
    })
    .map_err(|source| EngineError::WatchSetup {
        path: root.clone(),
        source,
    })?;

    let coverage: Coverage = Arc::new(Mutex::new(BTreeSet::new()));

    watcher
        .watch(&root, RecursiveMode::NonRecursive)
        .map_err(|source| EngineError::WatchSetup {
            path: root.clone(),
            source,
        })?;
    insert_dir(&coverage, root.clone());

    // 기존 하위 디렉토리
    let mut initial = WatchLoop {
        watcher,
        coverage: coverage.clone(),
        events,
    };
    initial.extend(&root, false);

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let task = tokio::spawn(initial.run(raw_rx, shutdown_rx));

    tracing::info!(
        "Watching {} ({} directories)",
        root.display(),
        coverage.lock().map(|c| c.len()).unwrap_or(0)
    );

    Ok(WatchHandle {
        root,
        coverage,
        shutdown: Some(shutdown_tx),
        task: Some(task),
    })
}

// ============================================================================
// Event loop
// ============================================================================

struct WatchLoop {
    watcher: RecommendedWatcher,
    coverage: Coverage,
    events: mpsc::UnboundedSender<FsEvent>,
}

impl WatchLoop {
    async fn run(
        mut self,
        mut raw_rx: mpsc::UnboundedReceiver<notify::Result<notify::Event>>,
        mut shutdown_rx: oneshot::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown_rx => break,
                maybe = raw_rx.recv() => {
                    let Some(result) = maybe else { break };
                    match result {
                        Ok(event) => {
                            if !self.dispatch(event) {
                                break;
                            }
                        }
                        Err(e) => tracing::warn!("Watch error: {}", e),
                    }
                }
            }
        }
        // self.watcher가 여기서 drop되며 OS 감시 해제
    }

    /// 이벤트 처리. 수신자가 사라졌으면 false.
    fn dispatch(&mut self, event: notify::Event) -> bool {
        for fs_event in classify(&event.kind, &event.paths) {
            match fs_event.kind {
                FsEventKind::Create if fs_event.path.is_dir() => {
                    self.extend(&fs_event.path, true);
                    continue;
                }
                FsEventKind::Rename | FsEventKind::Remove => self.forget(&fs_event.path),
                _ => {}
            }

            if self.events.send(fs_event).is_err() {
                return false;
            }
        }
        true
    }

    /// 디렉토리와 그 하위 디렉토리를 감시 범위에 추가
    ///
    /// `announce_files`면 이미 들어 있는 파일에 대해 Create 이벤트를 보냅니다.
    fn extend(&mut self, dir: &Path, announce_files: bool) {
        for entry in WalkDir::new(dir).follow_links(false) {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    tracing::warn!("Failed to walk {}: {}", dir.display(), e);
                    continue;
                }
            };

            let path = entry.path();
            if entry.file_type().is_dir() {
                if is_covered(&self.coverage, path) {
                    continue;
                }
                match self.watcher.watch(path, RecursiveMode::NonRecursive) {
                    Ok(()) => {
                        tracing::debug!("Watching {}", path.display());
                        insert_dir(&self.coverage, path.to_path_buf());
                    }
                    Err(e) => tracing::warn!("Failed to watch {}: {}", path.display(), e),
                }
            } else if announce_files && entry.file_type().is_file() {
                let _ = self
                    .events
                    .send(FsEvent::new(FsEventKind::Create, path.to_path_buf()));
            }
        }
    }

    /// 사라진 디렉토리를 감시 범위에서 제거
    fn forget(&mut self, path: &Path) {
        if let Ok(mut dirs) = self.coverage.lock() {
            let gone: Vec<PathBuf> = dirs
                .iter()
                .filter(|d| d.starts_with(path))
                .cloned()
                .collect();
            for dir in gone {
                let _ = self.watcher.unwatch(&dir);
                dirs.remove(&dir);
            }
        }
    }
}

fn insert_dir(coverage: &Coverage, dir: PathBuf) {
    if let Ok(mut dirs) = coverage.lock() {
        dirs.insert(dir);
    }
}

fn is_covered(coverage: &Coverage, dir: &Path) -> bool {
    coverage
        .lock()
        .map(|dirs| dirs.contains(dir))
        .unwrap_or(false)
}

// ============================================================================
// Tests
// ============================================================================
