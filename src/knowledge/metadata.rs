//! 프래그먼트 메타데이터
//!
//! Front matter는 열린 key/value 맵이므로, 동적 값 대신
//! 작은 태그드 유니온(`MetadataValue`)으로 표현합니다.
//! `BTreeMap`을 사용해 키 순서가 항상 결정적입니다.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// 메타데이터 맵 (키 순서 정렬)
pub type Metadata = BTreeMap<String, MetadataValue>;

/// 메타데이터 값
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Number(f64),
    Text(String),
    List(Vec<String>),
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataValue::Bool(b) => write!(f, "{}", b),
            MetadataValue::Number(n) => write!(f, "{}", n),
            MetadataValue::Text(s) => f.write_str(s),
            MetadataValue::List(items) => write!(f, "[{}]", items.join(", ")),
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(s: &str) -> Self {
        MetadataValue::Text(s.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(s: String) -> Self {
        MetadataValue::Text(s)
    }
}

impl From<bool> for MetadataValue {
    fn from(b: bool) -> Self {
        MetadataValue::Bool(b)
    }
}

impl From<f64> for MetadataValue {
    fn from(n: f64) -> Self {
        MetadataValue::Number(n)
    }
}

impl From<Vec<String>> for MetadataValue {
    fn from(items: Vec<String>) -> Self {
        MetadataValue::List(items)
    }
}

/// YAML 값을 메타데이터 값으로 변환
///
/// null은 `None`, 스칼라 시퀀스는 `List`, 중첩 맵은 compact 문자열로 변환합니다.
pub fn from_yaml(value: &serde_yaml::Value) -> Option<MetadataValue> {
    use serde_yaml::Value;

    match value {
        Value::Null => None,
        Value::Bool(b) => Some(MetadataValue::Bool(*b)),
        Value::Number(n) => n.as_f64().map(MetadataValue::Number),
        Value::String(s) => Some(MetadataValue::Text(s.clone())),
        Value::Sequence(items) => Some(MetadataValue::List(
            items
                .iter()
                .filter_map(|item| from_yaml(item).map(|v| v.to_string()))
                .collect(),
        )),
        Value::Mapping(_) | Value::Tagged(_) => serde_yaml::to_string(value)
            .ok()
            .map(|s| MetadataValue::Text(s.trim().replace('\n', "; "))),
    }
}

/// 메타데이터 footer 렌더링
///
/// 저장소에 제출할 때 프래그먼트 본문 뒤에 붙여, 검색 결과에서 출처를 인용할 수 있게 합니다.
pub fn render_footer(metadata: &Metadata) -> String {
    let mut footer = String::from("\n---\nDocument metadata:\n");
    for (key, value) in metadata {
        footer.push_str(key);
        footer.push_str(": ");
        footer.push_str(&value.to_string());
        footer.push('\n');
    }
    footer
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(MetadataValue::from("hello").to_string(), "hello");
        assert_eq!(MetadataValue::from(true).to_string(), "true");
        assert_eq!(MetadataValue::from(3.0).to_string(), "3");
        assert_eq!(MetadataValue::from(2.5).to_string(), "2.5");
        assert_eq!(
            MetadataValue::from(vec!["a".to_string(), "b.md".to_string()]).to_string(),
            "[a, b.md]"
        );
    }

    #[test]
    fn test_render_footer_is_ordered() {
        let mut metadata = Metadata::new();
        metadata.insert("title".to_string(), "Notes".into());
        metadata.insert("doc_path".to_string(), vec!["a.md".to_string()].into());

        let footer = render_footer(&metadata);
        assert_eq!(
            footer,
            "\n---\nDocument metadata:\ndoc_path: [a.md]\ntitle: Notes\n"
        );
    }

    #[test]
    fn test_from_yaml() {
        let yaml: serde_yaml::Value =
            serde_yaml::from_str("title: Hi\ndraft: false\nweight: 4\ntags: [x, y]\nnothing: ~\nnested:\n  a: 1\n")
                .unwrap();
        let map = yaml.as_mapping().unwrap();
        let get = |k: &str| from_yaml(map.get(k).unwrap());

        assert_eq!(get("title"), Some(MetadataValue::Text("Hi".into())));
        assert_eq!(get("draft"), Some(MetadataValue::Bool(false)));
        assert_eq!(get("weight"), Some(MetadataValue::Number(4.0)));
        assert_eq!(
            get("tags"),
            Some(MetadataValue::List(vec!["x".into(), "y".into()]))
        );
        assert_eq!(get("nothing"), None);
        assert_eq!(get("nested"), Some(MetadataValue::Text("a: 1".into())));
    }

    #[test]
    fn test_serde_untagged_roundtrip_keeps_types() {
        let mut metadata = Metadata::new();
        metadata.insert("flag".to_string(), true.into());
        metadata.insert("n".to_string(), 1.5.into());
        metadata.insert("path".to_string(), vec!["a".to_string()].into());

        let json = serde_json::to_string(&metadata).unwrap();
        let back: Metadata = serde_json::from_str(&json).unwrap();
        assert_eq!(back, metadata);
    }
}
