//! 파일 수집 모듈
//!
//! 감시 루트 아래에서 파일 이름(base name)이 glob 패턴과 일치하는 파일을 찾습니다.
//! 상대 경로는 항상 `/` 구분자를 사용합니다.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use globset::{GlobBuilder, GlobMatcher};
use ignore::WalkBuilder;

use crate::error::{EngineError, Result};

/// 기본 파일 패턴
pub const DEFAULT_FILE_PATTERN: &str = "*.md";

// ============================================================================
// File Pattern
// ============================================================================

/// 파일 이름 glob 패턴 (shell glob 문법, base name에만 적용)
#[derive(Debug, Clone)]
pub struct FilePattern {
    pattern: String,
    matcher: GlobMatcher,
}

impl FilePattern {
    /// 패턴 컴파일
    ///
    /// # Errors
    /// * `EngineError::InvalidPattern` - 잘못된 glob 문법
    pub fn new(pattern: &str) -> Result<Self> {
        let glob = GlobBuilder::new(pattern)
            .literal_separator(true)
            .build()
            .map_err(|source| EngineError::InvalidPattern {
                pattern: pattern.to_string(),
                source,
            })?;

        Ok(Self {
            pattern: pattern.to_string(),
            matcher: glob.compile_matcher(),
        })
    }

    /// 원본 패턴 문자열
    pub fn as_str(&self) -> &str {
        &self.pattern
    }

    /// 경로의 base name이 패턴과 일치하는지
    pub fn matches(&self, path: &Path) -> bool {
        path.file_name()
            .map(|name| self.matcher.is_match(Path::new(name)))
            .unwrap_or(false)
    }
}

// ============================================================================
// Collected File
// ============================================================================

/// 수집된 파일 정보
#[derive(Debug, Clone)]
pub struct CollectedFile {
    /// 파일 절대 경로
    pub path: PathBuf,
    /// 루트 기준 상대 경로 (`/` 구분)
    pub relative_path: String,
    /// 파일 크기 (바이트)
    pub size: u64,
}

// ============================================================================
// File Collector
// ============================================================================

/// 파일 수집기
///
/// 감시 이벤트와 같은 범위를 보도록 숨김 파일을 포함하고 .gitignore는 무시합니다.
pub struct FileCollector {
    pattern: FilePattern,
}

impl FileCollector {
    /// 새 수집기 생성
    pub fn new(pattern: FilePattern) -> Self {
        Self { pattern }
    }

    /// 폴더 재귀 수집 (상대 경로 순으로 정렬)
    ///
    /// 읽을 수 없는 하위 디렉토리가 하나라도 있으면 일부 목록 대신 실패를 반환합니다.
    ///
    /// # Errors
    /// * `EngineError::Io` - 루트 또는 하위 항목을 읽을 수 없음
    pub fn collect_directory(&self, root: &Path) -> Result<Vec<CollectedFile>> {
        let metadata = std::fs::metadata(root).map_err(|e| EngineError::io(root, e))?;
        if !metadata.is_dir() {
            return Err(EngineError::io(
                root,
                std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a directory"),
            ));
        }

        let mut files = Vec::new();

        let walker = WalkBuilder::new(root).standard_filters(false).build();

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                // 수집 중 사라진 항목은 없는 것으로 취급
                Err(e) if is_vanished(&e) => continue,
                Err(e) => return Err(walk_error(root, e)),
            };

            // 파일만 처리
            if !entry.file_type().map(|ft| ft.is_file()).unwrap_or(false) {
                continue;
            }

            let path = entry.path();
            if !self.pattern.matches(path) {
                continue;
            }

            let Some(relative_path) = relative_path(root, path) else {
                continue;
            };

            let metadata = match entry.metadata() {
                Ok(m) => m,
                Err(e) if is_vanished(&e) => continue,
                Err(e) => return Err(walk_error(path, e)),
            };

            files.push(CollectedFile {
                path: path.to_path_buf(),
                relative_path,
                size: metadata.len(),
            });
        }

        files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));

        tracing::info!(
            "Collected {} files matching '{}' from {:?}",
            files.len(),
            self.pattern.as_str(),
            root
        );
        Ok(files)
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn is_vanished(error: &ignore::Error) -> bool {
    error.io_error().map(|io| io.kind()) == Some(ErrorKind::NotFound)
}

fn walk_error(path: &Path, error: ignore::Error) -> EngineError {
    let kind = error
        .io_error()
        .map(|io| io.kind())
        .unwrap_or(ErrorKind::Other);
    EngineError::io(path, std::io::Error::new(kind, error.to_string()))
}

/// 루트 기준 상대 경로 (`/` 구분)
///
/// 루트 밖이거나 루트 자체이면 `None`.
/// UTF-8이 아닌 구성 요소가 있으면 다른 경로와 겹치지 않도록 `None`.
pub fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;

    let mut parts: Vec<&str> = Vec::new();
    for component in rel.components() {
        if let Component::Normal(part) = component {
            match part.to_str() {
                Some(part) => parts.push(part),
                None => {
                    tracing::warn!("Skipping non UTF-8 path {:?}", path);
                    return None;
                }
            }
        }
    }

    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

// ============================================================================
// Statistics
// ============================================================================

/// 수집 통계
#[derive(Debug, Default)]
pub struct CollectionStats {
    pub total_files: usize,
    pub total_size: u64,
}

impl CollectionStats {
    /// 수집된 파일 목록에서 통계 계산
    pub fn from_files(files: &[CollectedFile]) -> Self {
        Self {
            total_files: files.len(),
            total_size: files.iter().map(|f| f.size).sum(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
