//! Content Identity - 콘텐츠 주소 기반 프래그먼트 ID
//!
//! ID 형식: `<relativePath>|<64자리 sha256 hex>`
//! 저장소에 그대로 영구 저장되므로 프로세스 재시작 후에도 동일해야 합니다.

use sha2::{Digest, Sha256};

/// 경로와 해시 사이 구분자
pub const ID_SEPARATOR: char = '|';

/// 프래그먼트 ID 생성
///
/// 경로와 콘텐츠만 사용합니다 (메타데이터, 순서, 시간 정보 제외).
///
/// # Arguments
/// * `relative_path` - 감시 루트 기준 상대 경로
/// * `content` - 청크 원문 (임베딩 prefix/메타데이터 footer 적용 전)
pub fn fragment_id(relative_path: &str, content: &str) -> String {
    format!("{}{}{}", relative_path, ID_SEPARATOR, sha256_hex(content))
}

/// ID에서 상대 경로 부분 추출
///
/// 해시에는 구분자가 없으므로 마지막 구분자 기준으로 나눕니다.
/// 경로별 프래그먼트 집합은 이 값이 경로와 정확히 같은 ID들입니다.
pub fn path_of(id: &str) -> Option<&str> {
    id.rsplit_once(ID_SEPARATOR).map(|(path, _)| path)
}

/// SHA-256 hex 문자열
pub fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fragment_id_format() {
        let id = fragment_id("notes/a.md", "Hello world");
        let (path, hash) = id.split_once('|').unwrap();
        assert_eq!(path, "notes/a.md");
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_fragment_id_deterministic() {
        assert_eq!(
            fragment_id("a.md", "Hello world"),
            fragment_id("a.md", "Hello world")
        );
        // 알려진 SHA-256 값
        assert_eq!(
            sha256_hex("Hello world"),
            "64ec88ca00b268e5ba1a35678a1b5316d212f4f366b2477232534a8aeca37f3c"
        );
    }

    #[test]
    fn test_fragment_id_changes_with_content_or_path() {
        let base = fragment_id("a.md", "Hello world");
        assert_ne!(base, fragment_id("a.md", "Hello there"));
        assert_ne!(base, fragment_id("b.md", "Hello world"));
    }

    #[test]
    fn test_path_of_excludes_similar_names() {
        assert_eq!(path_of(&fragment_id("a.md", "x")), Some("a.md"));
        assert_ne!(path_of(&fragment_id("a.md.bak", "x")), Some("a.md"));
        // `a.md|` 로 시작하지만 다른 파일
        assert_eq!(path_of(&fragment_id("a.md|x.md", "x")), Some("a.md|x.md"));
    }

    #[test]
    fn test_path_of() {
        let id = fragment_id("dir/with|pipe.md", "text");
        assert_eq!(path_of(&id), Some("dir/with|pipe.md"));
        assert_eq!(path_of("no-separator"), None);
    }
}
