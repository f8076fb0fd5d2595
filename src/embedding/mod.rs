//! 임베딩 모듈 - OpenAI 호환 API를 통한 텍스트 벡터화
//!
//! 텍스트 윈도우를 고정 차원 벡터로 변환합니다.
//! 입력은 공백 정리 후 프로바이더 입력 상한(기본 8000자)으로 잘립니다.
//!
//! ## 사용법
//! ```rust,ignore
//! let embedder = OpenAiEmbedding::from_env("text-embedding-3-small", 8000)?;
//! let embedding = embedder.embed("A landlord shall not increase the rent").await?;
//! ```

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::normalizer::sanitize_text;

// ============================================================================
// EmbeddingProvider Trait
// ============================================================================

/// 임베딩 프로바이더 트레이트
///
/// 외부 임베딩 모델을 감싸는 인터페이스입니다. 지연/실패 가능성이 있습니다.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// 단일 텍스트 임베딩
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// 임베딩 차원 수
    fn dimension(&self) -> usize;

    /// 프로바이더 이름
    fn name(&self) -> &str;
}

/// 임베딩 입력 준비 (공백 정리 + 문자 수 제한)
pub fn prepare_input(text: &str, max_chars: usize) -> String {
    sanitize_text(text, max_chars)
}

// ============================================================================
// OpenAI Embedding
// ============================================================================

/// OpenAI 임베딩 API 엔드포인트
/// source: https://platform.openai.com/docs/api-reference/embeddings
const OPENAI_EMBED_URL: &str = "https://api.openai.com/v1/embeddings";

/// 기본 임베딩 차원 (text-embedding-3-small)
pub const DEFAULT_DIMENSION: usize = 1536;

/// 429 / 5xx 에러 시 최대 재시도 횟수
const MAX_RETRIES: u32 = 3;
/// 재시도 시 초기 백오프 (ms)
const INITIAL_BACKOFF_MS: u64 = 1000;

/// OpenAI 임베딩 구현체
#[derive(Debug)]
pub struct OpenAiEmbedding {
    api_key: String,
    model: String,
    client: reqwest::Client,
    dimension: usize,
    max_input_chars: usize,
    endpoint: String,
}

impl OpenAiEmbedding {
    /// 새 인스턴스 생성
    ///
    /// # Arguments
    /// * `api_key` - OpenAI API 키
    /// * `model` - 임베딩 모델 이름
    /// * `max_input_chars` - 입력 문자 수 상한
    pub fn new(api_key: String, model: &str, max_input_chars: usize) -> Result<Self> {
        let dimension = dimension_for_model(model)?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            api_key,
            model: model.to_string(),
            client,
            dimension,
            max_input_chars,
            endpoint: OPENAI_EMBED_URL.to_string(),
        })
    }

    /// 환경변수에서 API 키를 읽어 생성
    pub fn from_env(model: &str, max_input_chars: usize) -> Result<Self> {
        let api_key = get_api_key()?;
        Self::new(api_key, model, max_input_chars)
    }

    /// 다른 OpenAI 호환 엔드포인트 사용
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

/// 모델 이름으로 차원 결정
pub fn dimension_for_model(model: &str) -> Result<usize> {
    match model {
        "text-embedding-3-small" | "text-embedding-ada-002" => Ok(DEFAULT_DIMENSION),
        "text-embedding-3-large" => Ok(3072),
        other => anyhow::bail!(
            "Unknown embedding model: {}. Expected text-embedding-3-small, text-embedding-3-large or text-embedding-ada-002",
            other
        ),
    }
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct OpenAiError {
    error: OpenAiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct OpenAiErrorDetail {
    message: String,
    #[serde(default, rename = "type")]
    kind: String,
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let input = prepare_input(text, self.max_input_chars);

        // 빈 텍스트 처리
        if input.is_empty() {
            return Ok(vec![0.0; self.dimension]);
        }

        let request = EmbedRequest {
            model: &self.model,
            input: &input,
        };

        let mut last_error: Option<anyhow::Error> = None;

        // 재시도 루프 (429/5xx 에러 시 지수 백오프)
        for attempt in 0..=MAX_RETRIES {
            let backoff = Duration::from_millis(INITIAL_BACKOFF_MS * 2u64.pow(attempt));

            let response = match self
                .client
                .post(&self.endpoint)
                .bearer_auth(&self.api_key)
                .json(&request)
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(e) => {
                    last_error = Some(anyhow::anyhow!("Failed to send embedding request: {}", e));
                    if attempt < MAX_RETRIES {
                        tracing::warn!(
                            "Embedding request failed, retrying in {:?} (attempt {}/{})",
                            backoff,
                            attempt + 1,
                            MAX_RETRIES
                        );
                        tokio::time::sleep(backoff).await;
                        continue;
                    }
                    break;
                }
            };

            let status = response.status();
            let body = response
                .text()
                .await
                .context("Failed to read response body")?;

            if status.is_success() {
                let parsed: EmbedResponse =
                    serde_json::from_str(&body).context("Failed to parse embedding response")?;
                let embedding = parsed
                    .data
                    .into_iter()
                    .next()
                    .map(|d| d.embedding)
                    .ok_or_else(|| anyhow::anyhow!("Embedding response contained no data"))?;

                if embedding.len() != self.dimension {
                    anyhow::bail!(
                        "Embedding dimension mismatch: expected {}, got {}",
                        self.dimension,
                        embedding.len()
                    );
                }

                // NaN/Inf는 0으로 대체
                return Ok(embedding
                    .into_iter()
                    .map(|v| if v.is_finite() { v } else { 0.0 })
                    .collect());
            }

            if status.as_u16() == 429 || status.is_server_error() {
                tracing::warn!(
                    "Embedding API returned {}, backing off {:?} (attempt {}/{})",
                    status,
                    backoff,
                    attempt + 1,
                    MAX_RETRIES
                );
                last_error = Some(anyhow::anyhow!("Embedding API error ({})", status));

                if attempt < MAX_RETRIES {
                    tokio::time::sleep(backoff).await;
                    continue;
                }
            } else {
                // 다른 에러 - 즉시 실패
                if let Ok(error) = serde_json::from_str::<OpenAiError>(&body) {
                    anyhow::bail!(
                        "Embedding API error ({} {}): {}",
                        status,
                        error.error.kind,
                        error.error.message
                    );
                }
                anyhow::bail!("Embedding API error ({}): {}", status, body);
            }
        }

        Err(last_error
            .unwrap_or_else(|| anyhow::anyhow!("Embedding failed after {} retries", MAX_RETRIES)))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        &self.model
    }
}

// ============================================================================
// API Key Management
// ============================================================================

/// API 키 로드 (`OPENAI_API_KEY` 환경변수)
pub fn get_api_key() -> Result<String> {
    match std::env::var("OPENAI_API_KEY") {
        Ok(key) if !key.trim().is_empty() => Ok(key),
        _ => anyhow::bail!(
            "API key not found. Set OPENAI_API_KEY environment variable.\n\
             Set: export OPENAI_API_KEY=your-api-key"
        ),
    }
}

/// API 키 존재 여부 확인
pub fn has_api_key() -> bool {
    std::env::var("OPENAI_API_KEY")
        .map(|k| !k.trim().is_empty())
        .unwrap_or(false)
}

// ============================================================================
// Tests
// ============================================================================
