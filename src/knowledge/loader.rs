//! Document Loader - 파일을 프래그먼트 목록으로 변환
//!
//! 1. 파일 읽기
//! 2. YAML front matter 분리 및 파싱
//! 3. 상대 경로 구성 요소를 `doc_path` 메타데이터로 추가
//! 4. Markdown 청킹
//!
//! 파일 내용에 대한 순수 함수이며 부수 효과가 없습니다.

use std::path::Path;

use crate::error::{EngineError, Result};

use super::chunker::{default_chunker, Chunker};
use super::identity::fragment_id;
use super::metadata::{from_yaml, Metadata, MetadataValue};

/// 경로 구성 요소 메타데이터 키
pub const DOC_PATH_KEY: &str = "doc_path";

// ============================================================================
// Fragment
// ============================================================================

/// 문서 프래그먼트 (인덱싱/검색 단위)
#[derive(Debug, Clone, PartialEq)]
pub struct Fragment {
    /// 감시 루트 기준 상대 경로 (`/` 구분)
    pub relative_path: String,
    /// 청크 원문
    pub content: String,
    /// front matter + 파생 필드
    pub metadata: Metadata,
}

impl Fragment {
    /// 콘텐츠 주소 ID
    pub fn id(&self) -> String {
        fragment_id(&self.relative_path, &self.content)
    }
}

// ============================================================================
// DocumentLoader
// ============================================================================

/// 문서 로더
pub struct DocumentLoader {
    chunker: Box<dyn Chunker>,
}

impl DocumentLoader {
    /// 청커를 지정하여 생성
    pub fn new(chunker: Box<dyn Chunker>) -> Self {
        Self { chunker }
    }

    /// 기본 Markdown 청커로 생성
    pub fn with_defaults() -> Self {
        Self::new(default_chunker())
    }

    /// 파일을 읽어 문서 순서대로 프래그먼트 생성
    ///
    /// # Arguments
    /// * `base_path` - 감시 루트
    /// * `relative_path` - 루트 기준 상대 경로
    ///
    /// # Errors
    /// * `EngineError::Io` - 파일을 읽을 수 없음 (NotFound 포함)
    /// * `EngineError::Parse` - front matter 파싱 실패
    pub fn load(&self, base_path: &Path, relative_path: &str) -> Result<Vec<Fragment>> {
        let full_path = base_path.join(relative_path);
        let raw = std::fs::read_to_string(&full_path)
            .map_err(|e| EngineError::io(&full_path, e))?;

        let (mut matter, body) = split_front_matter(&full_path, &raw)?;

        // 상대 경로 구성 요소를 인용용 메타데이터로 추가
        matter.insert(
            DOC_PATH_KEY.to_string(),
            MetadataValue::List(split_path_components(relative_path)),
        );

        let fragments = self
            .chunker
            .split(body)
            .into_iter()
            .map(|chunk| Fragment {
                relative_path: relative_path.to_string(),
                content: chunk.text,
                metadata: matter.clone(),
            })
            .collect::<Vec<_>>();

        tracing::debug!(
            "Loaded {} fragments from {} ({})",
            fragments.len(),
            relative_path,
            self.chunker.name()
        );

        Ok(fragments)
    }
}

impl Default for DocumentLoader {
    fn default() -> Self {
        Self::with_defaults()
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// YAML front matter 분리
///
/// 첫 줄이 `---`이고 이후 `---` 줄로 닫히는 경우에만 front matter로 취급합니다.
/// 닫는 구분자가 없으면 전체를 본문으로 반환합니다.
pub fn split_front_matter<'a>(path: &Path, raw: &'a str) -> Result<(Metadata, &'a str)> {
    let raw = raw.strip_prefix('\u{feff}').unwrap_or(raw);

    let rest = match raw
        .strip_prefix("---\n")
        .or_else(|| raw.strip_prefix("---\r\n"))
    {
        Some(rest) => rest,
        None => return Ok((Metadata::new(), raw)),
    };

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end() == "---" {
            let yaml = &rest[..offset];
            let body = &rest[offset + line.len()..];
            return Ok((parse_yaml_matter(path, yaml)?, body));
        }
        offset += line.len();
    }

    Ok((Metadata::new(), raw))
}

/// YAML 문자열을 메타데이터 맵으로 파싱
fn parse_yaml_matter(path: &Path, yaml: &str) -> Result<Metadata> {
    if yaml.trim().is_empty() {
        return Ok(Metadata::new());
    }

    let value: serde_yaml::Value =
        serde_yaml::from_str(yaml).map_err(|e| EngineError::Parse {
            path: path.to_path_buf(),
            message: format!("invalid front matter: {}", e),
        })?;

    let mapping = match value {
        serde_yaml::Value::Null => return Ok(Metadata::new()),
        serde_yaml::Value::Mapping(mapping) => mapping,
        _ => {
            return Err(EngineError::Parse {
                path: path.to_path_buf(),
                message: "front matter must be a key/value mapping".to_string(),
            })
        }
    };

    let mut metadata = Metadata::new();
    for (key, value) in &mapping {
        let key = match key {
            serde_yaml::Value::String(s) => s.clone(),
            other => match from_yaml(other) {
                Some(v) => v.to_string(),
                None => continue,
            },
        };
        if let Some(value) = from_yaml(value) {
            metadata.insert(key, value);
        }
    }

    Ok(metadata)
}

/// 상대 경로를 디렉토리/파일 구성 요소로 분할
pub fn split_path_components(relative_path: &str) -> Vec<String> {
    let mut components: Vec<String> = relative_path
        .split('/')
        .filter(|c| !c.is_empty())
        .map(|c| c.to_string())
        .collect();

    if relative_path.starts_with('/') {
        components.insert(0, "/".to_string());
    }

    components
}

// ============================================================================
// Tests
// ============================================================================
