//! 대화 모델 - Ollama `/api/chat` 스트리밍
//!
//! 응답은 줄 단위 JSON(NDJSON)이며, 각 줄의 `message.content`를 조각으로 전달합니다.
//!
//! ref: https://github.com/ollama/ollama/blob/main/docs/api.md#generate-a-chat-completion

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use url::Url;

use crate::embedding::api_url;

use super::ChatMessage;

/// 기본 대화 모델
pub const DEFAULT_CHAT_MODEL: &str = "llama3.2:latest";

// ============================================================================
// ChatModel Trait
// ============================================================================

/// 대화 모델 트레이트
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// 대화 기록으로 응답 생성
    ///
    /// 생성되는 조각을 `chunks`로 보내고, 완성된 전체 응답을 반환합니다.
    async fn generate(
        &self,
        messages: &[ChatMessage],
        chunks: mpsc::UnboundedSender<String>,
    ) -> Result<String>;

    /// 모델 이름
    fn name(&self) -> &str;
}

// ============================================================================
// OllamaChat
// ============================================================================

/// Ollama 대화 모델
#[derive(Debug)]
pub struct OllamaChat {
    endpoint: Url,
    model: String,
    client: reqwest::Client,
}

impl OllamaChat {
    /// 새 인스턴스 생성
    ///
    /// # Arguments
    /// * `base_url` - Ollama 서버 주소
    /// * `model` - 대화 모델 이름
    /// * `headers` - 모든 요청에 붙일 고정 헤더 (게이트웨이용)
    pub fn new(base_url: &str, model: impl Into<String>, headers: &[(String, String)]) -> Result<Self> {
        let endpoint = api_url(base_url, "api/chat")?;

        let mut default_headers = HeaderMap::new();
        for (name, value) in headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .with_context(|| format!("Invalid header name: {}", name))?;
            let value = HeaderValue::from_str(value)
                .with_context(|| format!("Invalid header value for {}", name))?;
            default_headers.insert(name, value);
        }

        // 스트리밍 응답은 길어질 수 있어 연결 타임아웃만 둔다
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .default_headers(default_headers)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            endpoint,
            model: model.into(),
            client,
        })
    }

    /// 요청 엔드포인트
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

/// 스트리밍 응답의 한 줄
#[derive(Debug, Default, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    message: Option<ChunkMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkMessage {
    #[serde(default)]
    content: String,
}

#[async_trait]
impl ChatModel for OllamaChat {
    async fn generate(
        &self,
        messages: &[ChatMessage],
        chunks: mpsc::UnboundedSender<String>,
    ) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages: messages
                .iter()
                .map(|m| WireMessage {
                    role: m.role.as_ollama(),
                    content: &m.content,
                })
                .collect(),
            stream: true,
        };

        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&request)
            .send()
            .await
            .context("Failed to send chat request")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Ollama API error ({}): {}", status, body);
        }

        let mut stream = response.bytes_stream();
        let mut buffer: Vec<u8> = Vec::new();
        let mut full = String::new();

        'outer: while let Some(bytes) = stream.next().await {
            let bytes = bytes.context("Failed to read chat stream")?;
            buffer.extend_from_slice(&bytes);

            for line in drain_lines(&mut buffer) {
                if handle_line(&line, &mut full, &chunks)? {
                    break 'outer;
                }
            }
        }

        // 마지막 줄에 개행이 없을 수 있음
        if !buffer.is_empty() {
            let line = String::from_utf8_lossy(&buffer).to_string();
            handle_line(&line, &mut full, &chunks)?;
        }

        Ok(full)
    }

    fn name(&self) -> &str {
        &self.model
    }
}

/// 한 줄 처리. 스트림이 끝났으면 true.
fn handle_line(
    line: &str,
    full: &mut String,
    chunks: &mpsc::UnboundedSender<String>,
) -> Result<bool> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(false);
    }

    let chunk: ChatChunk = serde_json::from_str(line).context("Failed to parse chat chunk")?;
    if let Some(error) = chunk.error {
        anyhow::bail!("Ollama stream error: {}", error);
    }

    if let Some(message) = chunk.message {
        if !message.content.is_empty() {
            full.push_str(&message.content);
            // 수신자가 사라져도 생성은 끝까지 모은다
            let _ = chunks.send(message.content);
        }
    }

    Ok(chunk.done)
}

/// 버퍼에서 완성된 줄들을 꺼냄 (남은 조각은 버퍼에 유지)
fn drain_lines(buffer: &mut Vec<u8>) -> Vec<String> {
    let mut lines = Vec::new();
    while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
        let line: Vec<u8> = buffer.drain(..=pos).collect();
        lines.push(String::from_utf8_lossy(&line[..line.len() - 1]).to_string());
    }
    lines
}

// ============================================================================
// Tests
// ============================================================================
