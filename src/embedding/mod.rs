//! 임베딩 모듈 - Ollama API를 통한 텍스트 벡터화
//!
//! 텍스트를 벡터로 변환하는 임베딩 프로바이더입니다.
//! 벡터 저장소가 문서 추가/검색 시 내부적으로 사용합니다.
//!
//! ## 사용법
//! ```rust,ignore
//! let embedder = OllamaEmbedding::new("http://localhost:11434", "mxbai-embed-large:latest", 1024)?;
//! let embedding = embedder.embed("Hello, world!").await?;
//! ```

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::Url;

// ============================================================================
// EmbeddingProvider Trait
// ============================================================================

/// 임베딩 프로바이더 트레이트
///
/// 텍스트를 벡터로 변환하는 인터페이스입니다.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// 단일 텍스트 임베딩
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// 배치 임베딩 (기본 구현: 순차 호출)
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    /// 임베딩 차원 수
    fn dimension(&self) -> usize;

    /// 프로바이더 이름
    fn name(&self) -> &str;
}

// ============================================================================
// Ollama Embedding
// ============================================================================

/// 기본 Ollama 서버 주소
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// 기본 임베딩 모델
pub const DEFAULT_EMBEDDING_MODEL: &str = "mxbai-embed-large:latest";

/// 기본 임베딩 차원 (mxbai-embed-large)
pub const DEFAULT_DIMENSION: usize = 1024;

/// 한 번의 요청에 보내는 최대 텍스트 수
const BATCH_SIZE: usize = 32;
/// 재시도 가능한 에러 시 최대 재시도 횟수
const MAX_RETRIES: u32 = 3;
/// 재시도 시 초기 백오프 (ms)
const INITIAL_BACKOFF_MS: u64 = 500;

/// Ollama 임베딩 구현체
///
/// ref: https://github.com/ollama/ollama/blob/main/docs/api.md#generate-embeddings
#[derive(Debug)]
pub struct OllamaEmbedding {
    endpoint: Url,
    model: String,
    client: reqwest::Client,
    dimension: usize,
}

impl OllamaEmbedding {
    /// 새 Ollama 임베딩 인스턴스 생성
    ///
    /// # Arguments
    /// * `base_url` - Ollama 서버 주소
    /// * `model` - 임베딩 모델 이름
    /// * `dimension` - 모델의 임베딩 차원
    pub fn new(base_url: &str, model: impl Into<String>, dimension: usize) -> Result<Self> {
        if dimension == 0 {
            anyhow::bail!("Invalid dimension: 0");
        }

        let endpoint = api_url(base_url, "api/embed")?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            endpoint,
            model: model.into(),
            client,
            dimension,
        })
    }

    /// 기본 서버/모델로 생성
    pub fn with_defaults() -> Result<Self> {
        Self::new(DEFAULT_OLLAMA_URL, DEFAULT_EMBEDDING_MODEL, DEFAULT_DIMENSION)
    }

    /// 요청 엔드포인트
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// 단일 배치 요청 (재시도 포함)
    async fn request(&self, input: &[String]) -> Result<Vec<Vec<f32>>> {
        let request = EmbedRequest {
            model: &self.model,
            input,
        };

        let mut last_error: Option<anyhow::Error> = None;

        // 재시도 루프 (전송 실패, 429, 5xx 시 지수 백오프)
        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                let backoff = Duration::from_millis(INITIAL_BACKOFF_MS * 2u64.pow(attempt - 1));
                tracing::warn!(
                    "Embedding request failed, retrying in {:?} (attempt {}/{})",
                    backoff,
                    attempt,
                    MAX_RETRIES
                );
                tokio::time::sleep(backoff).await;
            }

            let response = match self
                .client
                .post(self.endpoint.clone())
                .json(&request)
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(e) => {
                    last_error = Some(anyhow::anyhow!("Failed to send embedding request: {}", e));
                    continue;
                }
            };

            let status = response.status();
            let body = response
                .text()
                .await
                .context("Failed to read response body")?;

            // 성공
            if status.is_success() {
                let embed_response: EmbedResponse =
                    serde_json::from_str(&body).context("Failed to parse embedding response")?;
                return self.validate(input.len(), embed_response.embeddings);
            }

            let message = serde_json::from_str::<OllamaError>(&body)
                .map(|e| e.error)
                .unwrap_or(body);

            // 429 / 5xx - 재시도
            if status.as_u16() == 429 || status.is_server_error() {
                last_error = Some(anyhow::anyhow!("Ollama API error ({}): {}", status, message));
                continue;
            }

            // 다른 에러 - 즉시 실패
            anyhow::bail!("Ollama API error ({}): {}", status, message);
        }

        // 모든 재시도 실패
        Err(last_error
            .unwrap_or_else(|| anyhow::anyhow!("Embedding failed after {} retries", MAX_RETRIES)))
    }

    /// 응답 개수와 차원 검증
    fn validate(&self, expected: usize, embeddings: Vec<Vec<f32>>) -> Result<Vec<Vec<f32>>> {
        if embeddings.len() != expected {
            anyhow::bail!(
                "Embedding count mismatch: expected {}, got {}",
                expected,
                embeddings.len()
            );
        }
        if let Some(bad) = embeddings.iter().find(|e| e.len() != self.dimension) {
            anyhow::bail!(
                "Embedding dimension mismatch: model '{}' returned {}, expected {}",
                self.model,
                bad.len(),
                self.dimension
            );
        }
        Ok(embeddings)
    }
}

/// Ollama `/api/embed` 요청 본문
#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

/// Ollama `/api/embed` 응답
#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Ollama 에러 응답
#[derive(Debug, Deserialize)]
struct OllamaError {
    error: String,
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut embeddings = self.request(&[text.to_string()]).await?;
        embeddings
            .pop()
            .ok_or_else(|| anyhow::anyhow!("Empty embedding response"))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());

        for (i, batch) in texts.chunks(BATCH_SIZE).enumerate() {
            tracing::debug!(
                "Embedding batch {}/{}",
                i + 1,
                texts.len().div_ceil(BATCH_SIZE)
            );
            results.extend(self.request(batch).await?);
        }

        Ok(results)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        &self.model
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 서버 주소와 API 경로 결합
///
/// 서버 주소에 하위 경로가 있어도 유지되도록 끝에 `/`를 보장합니다.
pub fn api_url(base_url: &str, path: &str) -> Result<Url> {
    let mut base =
        Url::parse(base_url).with_context(|| format!("Invalid server URL: {}", base_url))?;

    if !base.path().ends_with('/') {
        let with_slash = format!("{}/", base.path());
        base.set_path(&with_slash);
    }

    base.join(path)
        .with_context(|| format!("Invalid API path: {}", path))
}

// ============================================================================
// Tests
// ============================================================================
