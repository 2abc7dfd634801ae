//! 엔진 에러 타입
//!
//! 동기화/검색 엔진의 모든 실패를 하나의 열거형으로 모읍니다.
//! 외부 협력자(VectorStore, EmbeddingProvider)는 `anyhow::Result`를 반환하고,
//! 엔진 경계에서 `EngineError::Store`로 감쌉니다.

use std::path::PathBuf;

use thiserror::Error;

/// 엔진 Result 별칭
pub type Result<T> = std::result::Result<T, EngineError>;

/// 동기화/검색 엔진 에러
#[derive(Error, Debug)]
pub enum EngineError {
    /// 파일 읽기 또는 디렉토리 열거 실패
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Front matter 또는 청킹 실패
    #[error("failed to parse {path:?}: {message}")]
    Parse { path: PathBuf, message: String },

    /// 벡터 저장소 add/delete/query 실패
    #[error("store error: {0:#}")]
    Store(anyhow::Error),

    /// 파일 시스템 감시 구독 실패
    #[error("failed to watch {path:?}: {source}")]
    WatchSetup {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },

    /// 잘못된 파일 패턴 (glob)
    #[error("invalid file pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: globset::Error,
    },

    /// shutdown 이후 호출
    #[error("engine closed")]
    EngineClosed,
}

impl EngineError {
    /// I/O 에러 생성 헬퍼
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// 파일이 존재하지 않아서 발생한 에러인지 확인
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::Io { source, .. } if source.kind() == std::io::ErrorKind::NotFound
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_not_found() {
        let err = EngineError::io(
            "a.md",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert!(err.is_not_found());

        let err = EngineError::io(
            "a.md",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope"),
        );
        assert!(!err.is_not_found());
        assert!(!EngineError::EngineClosed.is_not_found());
    }

    #[test]
    fn test_store_error_keeps_context_chain() {
        let inner = anyhow::anyhow!("disk full").context("Failed to add vectors");
        let err = EngineError::Store(inner);
        let msg = err.to_string();
        assert!(msg.contains("Failed to add vectors"));
        assert!(msg.contains("disk full"));
    }
}
