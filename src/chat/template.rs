//! 프롬프트 템플릿
//!
//! 컨텍스트 템플릿의 `{{contexts}}` 자리에 검색된 본문을 관련도 순 목록으로 넣습니다.

use std::path::Path;

use anyhow::{Context, Result};

/// 컨텍스트 자리 표시자
pub const CONTEXTS_PLACEHOLDER: &str = "{{contexts}}";

/// 기본 시스템 프롬프트
pub const DEFAULT_SYSTEM_PROMPT: &str = "\
You are a helpful assistant with access to a knowledge base, tasked with answering questions from the user.

Use an unbiased and journalistic tone. Do not repeat text. Don't make anything up. If you are not sure about something, just say that you don't know.
";

/// 기본 컨텍스트 프롬프트
pub const DEFAULT_CONTEXT_PROMPT: &str = "\
Try to answer the question based on the provided search results from the knowledge base. If the search results from the knowledge base are not relevant to the question at hand, ask the user if they would like to fall back to your training data. Don't make anything up.

Anything in the following 'context' XML blocks is retrieved from the knowledge base, not part of the conversation with the user. The bullet points are ordered by relevance, so the first one is the most relevant.

Each item ends with a metadata footer that you can use to cite your sources. The 'doc_path' field is the location within the knowledge base: folder names followed by the file name.

<context>
{{contexts}}
</context>

When answering a question relevant to the above context, cite your sources. If you are unsure about the source, say that you don't know.

Whenever you reference the knowledge base or the provided context, always refer to it as \"your notes\".
";

/// 시스템/컨텍스트 템플릿 쌍
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplates {
    pub system: String,
    pub context: String,
}

impl Default for PromptTemplates {
    fn default() -> Self {
        Self {
            system: DEFAULT_SYSTEM_PROMPT.to_string(),
            context: DEFAULT_CONTEXT_PROMPT.to_string(),
        }
    }
}

impl PromptTemplates {
    /// 템플릿 파일 로드
    ///
    /// 경로가 없거나 파일이 존재하지 않으면 기본 템플릿을 사용합니다.
    pub fn load(system_path: Option<&Path>, context_path: Option<&Path>) -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            system: read_or(system_path, defaults.system)?,
            context: read_or(context_path, defaults.context)?,
        })
    }

    /// 시스템 프롬프트
    pub fn render_system(&self) -> String {
        self.system.clone()
    }

    /// 컨텍스트 프롬프트 렌더링 (컨텍스트가 없으면 None)
    pub fn render_context(&self, contexts: &[String]) -> Option<String> {
        if contexts.is_empty() {
            return None;
        }

        let items = contexts
            .iter()
            .map(|c| format!("- {}", c.trim_end()))
            .collect::<Vec<_>>()
            .join("\n");

        Some(self.context.replace(CONTEXTS_PLACEHOLDER, &items))
    }
}

fn read_or(path: Option<&Path>, fallback: String) -> Result<String> {
    let Some(path) = path else {
        return Ok(fallback);
    };

    match std::fs::read_to_string(path) {
        Ok(content) => {
            tracing::debug!("Loaded prompt template {:?}", path);
            Ok(content)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(fallback),
        Err(e) => Err(e).with_context(|| format!("Failed to read prompt template {:?}", path)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_render_context() {
        let templates = PromptTemplates {
            system: "sys".to_string(),
            context: "<context>\n{{contexts}}\n</context>".to_string(),
        };

        assert_eq!(templates.render_context(&[]), None);
        assert_eq!(
            templates
                .render_context(&["first\n".to_string(), "second".to_string()])
                .unwrap(),
            "<context>\n- first\n- second\n</context>"
        );
    }

    #[test]
    fn test_default_context_has_placeholder() {
        assert!(DEFAULT_CONTEXT_PROMPT.contains(CONTEXTS_PLACEHOLDER));
        let rendered = PromptTemplates::default()
            .render_context(&["note".to_string()])
            .unwrap();
        assert!(rendered.contains("- note"));
        assert!(!rendered.contains(CONTEXTS_PLACEHOLDER));
    }

    #[test]
    fn test_load_falls_back_when_missing() {
        let dir = TempDir::new().unwrap();
        let system = dir.path().join("system.tpl");
        std::fs::write(&system, "Custom system").unwrap();

        let templates =
            PromptTemplates::load(Some(&system), Some(&dir.path().join("missing.tpl"))).unwrap();

        assert_eq!(templates.system, "Custom system");
        assert_eq!(templates.context, DEFAULT_CONTEXT_PROMPT);
        assert_eq!(PromptTemplates::load(None, None).unwrap(), PromptTemplates::default());
    }
}
