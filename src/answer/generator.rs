//! 생성 단계 - OpenAI chat completions (강제 tool call)
//!
//! `emit_answer` 함수 호출 인자(없으면 message content)를 [`Answer`]로 파싱합니다.
//! 호출 실패나 스키마 불일치는 [`generate_or_fallback`]에서 최소 답변으로 대체됩니다.
//! source: https://platform.openai.com/docs/guides/function-calling

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::AnswerError;

use super::{Answer, JURISDICTION, SHORT_ANSWER_REQUESTED};

/// OpenAI chat completions 엔드포인트
const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";

/// 강제 호출 도구 이름
const TOOL_NAME: &str = "emit_answer";

const TEMPERATURE: f32 = 0.2;
const MAX_TOKENS: u32 = 800;

const SYSTEM_PROMPT: &str = "You are a neutral legal information assistant for Ontario, Canada.

Write substantial but concise answers for laypeople. Use ONLY the provided snippets as ground truth; if the law text is missing or unclear, say so and set confidence:\"low\". Never invent section numbers, quotes, forms, deadlines, or fees. Ontario-only. Avoid sensitive personal data.

Scope constraints:
- Answer ONLY Ontario legal questions. If the question is general, not legal, or not about Ontario (or Canada where relevant), politely refuse and suggest 2-3 example Ontario-legal questions instead.

Return JSON via the function \"emit_answer\" only. Always include:
- question (echo the user text) and jurisdiction:\"Ontario\"
- short_answer: 3-6 crisp bullets
- what_the_law_says: 1-3 items with act, section, url, and a short direct quote (at most 40 words)
- process_and_forms: 2-5 practical steps; include official form names and URLs when relevant
- caveats: 2-4 items (scope limits, deadlines, exemptions)
- sources: authoritative Ontario URLs (can duplicate law URLs)
- followups: 2-4 helpful next questions";

// ============================================================================
// AnswerGenerator Trait
// ============================================================================

/// 외부 생성 단계
#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    /// 질문과 근거 문서로 답변 생성
    async fn generate(&self, question: &str, context_md: &str) -> Result<Answer, AnswerError>;

    /// 생성기 이름
    fn name(&self) -> &str;
}

/// 생성 실패를 최소 답변으로 대체
///
/// 최소 답변도 [`ScopeGate::finalize`](crate::answer::ScopeGate::finalize)를 거치므로
/// 허용 도메인 인용으로 `sources`와 `what_the_law_says`가 채워집니다.
pub async fn generate_or_fallback(
    generator: &dyn AnswerGenerator,
    question: &str,
    context_md: &str,
) -> Answer {
    match generator.generate(question, context_md).await {
        Ok(answer) => answer,
        Err(e) => {
            tracing::warn!("Answer generation via {} failed: {}", generator.name(), e);
            Answer::minimal_fallback(question)
        }
    }
}

// ============================================================================
// OpenAI Generator
// ============================================================================

/// OpenAI chat completions 생성기
pub struct OpenAiGenerator {
    api_key: String,
    model: String,
    client: reqwest::Client,
    endpoint: String,
}

impl OpenAiGenerator {
    pub fn new(api_key: String, model: &str) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .context("Failed to build OpenAI HTTP client")?;

        Ok(Self {
            api_key,
            model: model.to_string(),
            client,
            endpoint: OPENAI_CHAT_URL.to_string(),
        })
    }

    /// 환경변수 `OPENAI_API_KEY`로 생성
    pub fn from_env(model: &str) -> anyhow::Result<Self> {
        Self::new(crate::embedding::get_api_key()?, model)
    }

    /// 다른 OpenAI 호환 엔드포인트 사용
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    fn request_body(&self, question: &str, context_md: &str) -> ChatRequest<'_> {
        ChatRequest {
            model: &self.model,
            temperature: TEMPERATURE,
            max_tokens: MAX_TOKENS,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: question.to_string(),
                },
                ChatMessage {
                    role: "assistant",
                    content: format!("Relevant sources and excerpts:\n{}", context_md),
                },
            ],
            tools: vec![json!({
                "type": "function",
                "function": {
                    "name": TOOL_NAME,
                    "description": "Return JSON for frontend",
                    "parameters": tool_parameters(),
                }
            })],
            tool_choice: json!({ "type": "function", "function": { "name": TOOL_NAME } }),
        }
    }
}

#[async_trait]
impl AnswerGenerator for OpenAiGenerator {
    async fn generate(&self, question: &str, context_md: &str) -> Result<Answer, AnswerError> {
        let body = self.request_body(question, context_md);

        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(self.api_key.trim())
            .json(&body)
            .send()
            .await
            .map_err(|e| AnswerError::Generation(format!("failed to call chat completions: {}", e)))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(AnswerError::Generation(format!(
                "OpenAI returned {}: {}",
                status, text
            )));
        }

        let parsed: ChatResponse = resp
            .json()
            .await
            .map_err(|e| AnswerError::Malformed(format!("failed to parse chat response: {}", e)))?;

        answer_from_response(question, parsed)
    }

    fn name(&self) -> &str {
        &self.model
    }
}

/// 응답 → 답변 (tool call 인자 우선, 다음 content)
fn answer_from_response(question: &str, response: ChatResponse) -> Result<Answer, AnswerError> {
    let message = response
        .choices
        .into_iter()
        .next()
        .map(|c| c.message)
        .ok_or_else(|| AnswerError::Malformed("response contained no choices".to_string()))?;

    let tool_args = message
        .tool_calls
        .into_iter()
        .find(|call| call.function.name == TOOL_NAME)
        .map(|call| call.function.arguments);

    let mut answer = match (tool_args, message.content) {
        (Some(args), _) => Answer::parse(&args)?,
        (None, Some(content)) if !content.trim().is_empty() => Answer::parse(&content)?,
        _ => {
            return Err(AnswerError::Malformed(
                "no tool call or content in response".to_string(),
            ))
        }
    };

    if answer.question.trim().is_empty() {
        answer.question = question.to_string();
    }
    Ok(answer)
}

/// `emit_answer` 도구 JSON 스키마
fn tool_parameters() -> Value {
    let (min_bullets, max_bullets) = SHORT_ANSWER_REQUESTED;
    json!({
        "type": "object",
        "properties": {
            "question": { "type": "string" },
            "jurisdiction": { "type": "string", "enum": [JURISDICTION] },
            "short_answer": {
                "type": "array",
                "items": { "type": "string" },
                "minItems": min_bullets,
                "maxItems": max_bullets
            },
            "what_the_law_says": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "act": { "type": "string" },
                        "section": { "type": "string" },
                        "url": { "type": "string", "format": "uri" },
                        "quote": { "type": "string" }
                    },
                    "required": ["act", "section", "url", "quote"],
                    "additionalProperties": false
                }
            },
            "process_and_forms": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "step": { "type": "string" },
                        "forms": {
                            "type": "array",
                            "items": {
                                "type": "object",
                                "properties": {
                                    "name": { "type": "string" },
                                    "url": { "type": "string", "format": "uri" }
                                },
                                "required": ["name", "url"],
                                "additionalProperties": false
                            }
                        }
                    },
                    "required": ["step"],
                    "additionalProperties": false
                }
            },
            "caveats": { "type": "array", "items": { "type": "string" } },
            "sources": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "title": { "type": "string" },
                        "url": { "type": "string", "format": "uri" }
                    },
                    "required": ["url"],
                    "additionalProperties": false
                }
            },
            "followups": { "type": "array", "items": { "type": "string" } },
            "confidence": { "type": "string", "enum": ["high", "medium", "low"] }
        },
        "required": ["question", "jurisdiction", "short_answer"],
        "additionalProperties": false
    })
}

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    max_tokens: u32,
    messages: Vec<ChatMessage<'a>>,
    tools: Vec<Value>,
    tool_choice: Value,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ToolCall>,
}

#[derive(Debug, Deserialize)]
struct ToolCall {
    function: FunctionCall,
}

#[derive(Debug, Deserialize)]
struct FunctionCall {
    name: String,
    arguments: String,
}

// ============================================================================
// Tests
// ============================================================================
