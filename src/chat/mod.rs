//! Chat 모듈 - 검색 결과로 보강된 대화 세션
//!
//! - Session: 대화 기록 (단일 락으로 보호되는 소유 상태)
//! - Template: 시스템/컨텍스트 프롬프트
//! - LLM: 스트리밍 대화 모델

mod llm;
mod template;

pub use llm::{ChatModel, OllamaChat, DEFAULT_CHAT_MODEL};
pub use template::{
    PromptTemplates, CONTEXTS_PLACEHOLDER, DEFAULT_CONTEXT_PROMPT, DEFAULT_SYSTEM_PROMPT,
};

use std::sync::{Mutex, MutexGuard};

use anyhow::Result;
use tokio::sync::mpsc;

use crate::engine::RetrievalEngine;
use crate::knowledge::QueryResult;

// ============================================================================
// Messages
// ============================================================================

/// 메시지 역할
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    Human,
    Ai,
}

impl Role {
    /// Ollama API 역할 이름
    pub fn as_ollama(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::Human => "user",
            Role::Ai => "assistant",
        }
    }
}

/// 대화 메시지
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

// ============================================================================
// ChatSession
// ============================================================================

#[derive(Debug, Default)]
struct SessionState {
    completed: Vec<ChatMessage>,
    streaming_parts: Vec<String>,
    is_streaming: bool,
    error: Option<String>,
}

/// 대화 세션
///
/// 모든 상태 변경은 하나의 락 아래에서 메서드로만 이루어집니다.
#[derive(Debug)]
pub struct ChatSession {
    templates: PromptTemplates,
    state: Mutex<SessionState>,
}

impl ChatSession {
    /// 시스템 프롬프트로 시작하는 새 세션
    pub fn new(templates: PromptTemplates) -> Self {
        let state = SessionState {
            completed: vec![ChatMessage::new(Role::System, templates.render_system())],
            ..SessionState::default()
        };
        Self {
            templates,
            state: Mutex::new(state),
        }
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn templates(&self) -> &PromptTemplates {
        &self.templates
    }

    /// 사용자 메시지 추가
    pub fn append_user(&self, message: impl Into<String>) {
        self.state()
            .completed
            .push(ChatMessage::new(Role::Human, message));
    }

    /// 검색된 컨텍스트를 시스템 메시지로 추가
    ///
    /// # Returns
    /// 렌더링된 컨텍스트 프롬프트 (컨텍스트가 없으면 None, 메시지도 추가하지 않음)
    pub fn add_contexts(&self, contexts: &[String]) -> Option<String> {
        let rendered = self.templates.render_context(contexts)?;
        self.state()
            .completed
            .push(ChatMessage::new(Role::System, rendered.clone()));
        Some(rendered)
    }

    /// 응답 스트리밍 시작
    pub fn begin_streaming(&self) {
        let mut state = self.state();
        state.is_streaming = true;
        state.streaming_parts.clear();
    }

    /// 스트리밍 조각 추가
    pub fn stream_chunk(&self, chunk: impl Into<String>) {
        self.state().streaming_parts.push(chunk.into());
    }

    /// 스트리밍 종료, 모인 조각을 AI 메시지로 확정
    pub fn end_streaming(&self) {
        let mut state = self.state();
        let content = state.streaming_parts.concat();
        state.streaming_parts.clear();
        state.is_streaming = false;
        state.completed.push(ChatMessage::new(Role::Ai, content));
    }

    /// 스트리밍 중단, 모인 조각 버림
    pub fn abort_streaming(&self) {
        let mut state = self.state();
        state.streaming_parts.clear();
        state.is_streaming = false;
    }

    /// 대화 기록 스냅샷 (진행 중인 스트림 포함)
    pub fn messages(&self) -> Vec<ChatMessage> {
        let state = self.state();
        let mut messages = state.completed.clone();
        if !state.streaming_parts.is_empty() {
            messages.push(ChatMessage::new(Role::Ai, state.streaming_parts.concat()));
        }
        messages
    }

    /// 대화 초기화 (시스템 프롬프트만 남김)
    pub fn reset(&self) {
        let mut state = self.state();
        *state = SessionState {
            completed: vec![ChatMessage::new(Role::System, self.templates.render_system())],
            ..SessionState::default()
        };
    }

    pub fn set_error(&self, error: impl Into<String>) {
        self.state().error = Some(error.into());
    }

    pub fn error(&self) -> Option<String> {
        self.state().error.clone()
    }

    pub fn clear_error(&self) {
        self.state().error = None;
    }

    pub fn is_streaming(&self) -> bool {
        self.state().is_streaming
    }

    pub fn is_empty(&self) -> bool {
        self.state().completed.is_empty()
    }
}

// ============================================================================
// ask
// ============================================================================

/// 한 번의 질문/응답 결과
#[derive(Debug, Clone)]
pub struct Answer {
    /// 프롬프트에 들어간 검색 결과 (관련도 순)
    pub contexts: Vec<QueryResult>,
    /// 렌더링된 컨텍스트 프롬프트
    pub context_prompt: Option<String>,
    /// 모델 응답 전체
    pub reply: String,
}

/// 질문에 대해 검색 → 컨텍스트 추가 → 모델 응답 스트리밍
///
/// 응답 조각은 세션에 쌓이는 동시에 `chunks`로 전달됩니다.
/// 실패하면 세션에 에러를 기록하고 스트림을 버립니다.
pub async fn ask(
    engine: &RetrievalEngine,
    session: &ChatSession,
    model: &dyn ChatModel,
    question: &str,
    max_results: usize,
    chunks: mpsc::UnboundedSender<String>,
) -> Result<Answer> {
    session.clear_error();

    let contexts = match engine.query(question, max_results, None, None).await {
        Ok(contexts) => contexts,
        Err(e) => {
            session.set_error(e.to_string());
            return Err(e.into());
        }
    };

    let contents: Vec<String> = contexts.iter().map(|c| c.content.clone()).collect();
    let context_prompt = session.add_contexts(&contents);
    session.append_user(question);
    session.begin_streaming();

    let messages = session.messages();
    let (inner_tx, mut inner_rx) = mpsc::unbounded_channel::<String>();

    let forward = async {
        while let Some(chunk) = inner_rx.recv().await {
            session.stream_chunk(chunk.clone());
            let _ = chunks.send(chunk);
        }
    };

    let (result, ()) = tokio::join!(model.generate(&messages, inner_tx), forward);

    match result {
        Ok(reply) => {
            session.end_streaming();
            Ok(Answer {
                contexts,
                context_prompt,
                reply,
            })
        }
        Err(e) => {
            session.abort_streaming();
            session.set_error(format!("{:#}", e));
            Err(e)
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
