//! 질의 흐름 - 검증 → 검색 → 근거 조립 → 게이트 → 생성 → 마무리
//!
//! 근거 부족은 거절 답변(정상 응답)이며, 생성 실패는 최소 답변으로 대체됩니다.
//! `Err`는 검증 실패([`ValidationError`])나 분류되지 않은 내부 오류뿐입니다.

use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::answer::generator::generate_or_fallback;
use crate::answer::{build_context, refusal, Answer, AnswerGenerator, GateDecision, ScopeGate};
use crate::config::Settings;
use crate::error::ValidationError;
use crate::knowledge::HybridRetriever;

// ============================================================================
// Request / Response
// ============================================================================

/// 질의 요청 (`{query, topic?, sessionId?}`)
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AskRequest {
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
}

impl AskRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.query.trim().is_empty() {
            return Err(ValidationError::MissingQuery);
        }
        Ok(())
    }
}

/// 질의 응답 (답변 필드는 평탄화)
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AskResponse {
    pub session_id: String,
    pub trace_id: String,
    #[serde(flatten)]
    pub answer: Answer,
}

// ============================================================================
// AskService
// ============================================================================

/// 질의 서비스
pub struct AskService {
    retriever: HybridRetriever,
    gate: ScopeGate,
    generator: Arc<dyn AnswerGenerator>,
    max_per_doc: usize,
    max_total: usize,
}

impl AskService {
    pub fn new(
        settings: &Settings,
        retriever: HybridRetriever,
        generator: Arc<dyn AnswerGenerator>,
    ) -> Self {
        Self {
            retriever,
            gate: ScopeGate::from_settings(settings),
            generator,
            max_per_doc: settings.context_max_per_doc,
            max_total: settings.context_max_total,
        }
    }

    /// 질의 처리
    pub async fn ask(&self, request: &AskRequest) -> Result<AskResponse> {
        request.validate()?;

        let query = request.query.trim();
        let session_id = request
            .session_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let trace_id = Uuid::new_v4().to_string();

        tracing::info!(
            %trace_id,
            %session_id,
            topic = request.topic.as_deref().unwrap_or("unknown"),
            "Ask received"
        );

        let retrieval = self.retriever.retrieve(query).await?;
        let bundle = build_context(&retrieval.chunks, self.max_per_doc, self.max_total);

        let answer = match self.gate.check(
            retrieval.keyword_count(),
            retrieval.vector_count(),
            &bundle.citations,
        ) {
            GateDecision::Refuse(reason) => {
                tracing::info!(%trace_id, ?reason, "Ask refused");
                refusal(query)
            }
            GateDecision::Pass => {
                let generated =
                    generate_or_fallback(self.generator.as_ref(), query, &bundle.markdown).await;
                let answer = self.gate.finalize(query, generated, &bundle.citations);
                tracing::info!(
                    %trace_id,
                    sources = answer.sources.len(),
                    "Ask answered"
                );
                answer
            }
        };

        Ok(AskResponse {
            session_id,
            trace_id,
            answer,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::answer::{Confidence, SourceRef};
    use crate::embedding::EmbeddingProvider;
    use crate::error::AnswerError;
    use crate::ingest::{IngestDoc, IngestRequest, Ingestor};
    use crate::knowledge::{KnowledgeStore, MemoryVectorStore};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::TempDir;

    const DIM: usize = 16;

    /// 단어 해시 bag-of-words 임베더
    struct BagOfWords;

    #[async_trait]
    impl EmbeddingProvider for BagOfWords {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            let mut v = vec![0.0; DIM];
            for word in text.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty()) {
                let h = word
                    .to_lowercase()
                    .bytes()
                    .fold(0usize, |acc, b| acc.wrapping_mul(31).wrapping_add(b as usize));
                v[h % DIM] += 1.0;
            }
            Ok(v)
        }

        fn dimension(&self) -> usize {
            DIM
        }

        fn name(&self) -> &str {
            "bag-of-words"
        }
    }

    /// 미리 정한 결과를 돌려주는 생성기
    struct ScriptedGenerator {
        result: Mutex<Option<Result<Answer, AnswerError>>>,
        seen_context: Mutex<Option<String>>,
    }

    impl ScriptedGenerator {
        fn new(result: Result<Answer, AnswerError>) -> Self {
            Self {
                result: Mutex::new(Some(result)),
                seen_context: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl AnswerGenerator for ScriptedGenerator {
        async fn generate(&self, question: &str, context_md: &str) -> Result<Answer, AnswerError> {
            *self.seen_context.lock().unwrap() = Some(context_md.to_string());
            self.result
                .lock()
                .unwrap()
                .take()
                .unwrap_or_else(|| Ok(Answer::minimal_fallback(question)))
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    fn paragraph(topic: &str) -> String {
        (0..12)
            .map(|i| format!("Rule {} says the landlord may increase the rent for {}.", i, topic))
            .collect::<Vec<_>>()
            .join(" ")
    }

    async fn service(generator: Arc<ScriptedGenerator>) -> (TempDir, AskService) {
        let dir = TempDir::new().unwrap();
        let settings = Settings {
            chunk_size: 200,
            chunk_overlap: 30,
            ..Settings::default()
        };
        let store = Arc::new(KnowledgeStore::open(&dir.path().join("k.db")).unwrap());
        let vectors = Arc::new(MemoryVectorStore::new());
        let embedder = Arc::new(BagOfWords);

        let ingestor =
            Ingestor::new(&settings, store.clone(), vectors.clone(), embedder.clone()).unwrap();
        let docs = [
            ("https://www.ontario.ca/laws/statute/06r17", "Residential Tenancies Act", "apartments"),
            ("https://tribunalsontario.ca/ltb/guideline", "Rent Increase Guideline", "houses"),
        ];
        let request = IngestRequest {
            docs: docs
                .iter()
                .map(|(url, title, topic)| IngestDoc {
                    url: url.to_string(),
                    html: Some(format!(
                        "<html><head><title>{}</title></head><body><p>{}</p></body></html>",
                        title,
                        paragraph(topic)
                    )),
                })
                .collect(),
        };
        let report = ingestor.ingest(&request).await.unwrap();
        assert!(report.per_doc.iter().all(|d| d.chunks >= 2));

        let retriever = HybridRetriever::new(store, vectors, embedder);
        (dir, AskService::new(&settings, retriever, generator))
    }

    fn generated_answer() -> Answer {
        Answer {
            question: "Can my landlord increase the rent?".to_string(),
            jurisdiction: "Ontario".to_string(),
            short_answer: vec!["Yes, within limits.".to_string()],
            what_the_law_says: vec![],
            process_and_forms: vec![],
            caveats: vec![],
            sources: vec![
                SourceRef {
                    title: None,
                    url: "https://www.ontario.ca/laws/statute/06r17".to_string(),
                },
                SourceRef {
                    title: None,
                    url: "https://made-up.example.com/rent".to_string(),
                },
            ],
            followups: vec![],
            confidence: Confidence::Medium,
        }
    }

    #[tokio::test]
    async fn test_missing_query_is_validation_error() {
        let generator = Arc::new(ScriptedGenerator::new(Ok(generated_answer())));
        let (_dir, service) = service(generator).await;

        let err = service.ask(&AskRequest::new("   ")).await.unwrap_err();
        assert_eq!(
            err.downcast_ref::<ValidationError>(),
            Some(&ValidationError::MissingQuery)
        );
    }

    #[tokio::test]
    async fn test_out_of_scope_question_is_refused() {
        let generator = Arc::new(ScriptedGenerator::new(Ok(generated_answer())));
        let (_dir, service) = service(generator.clone()).await;

        let response = service.ask(&AskRequest::new("What is GitHub?")).await.unwrap();
        assert_eq!(response.answer, refusal("What is GitHub?"));
        // 거절 시 생성 단계는 호출되지 않음
        assert!(generator.seen_context.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_in_scope_question_merges_sources() {
        let generator = Arc::new(ScriptedGenerator::new(Ok(generated_answer())));
        let (_dir, service) = service(generator.clone()).await;

        let request = AskRequest {
            query: "Can my landlord increase the rent?".to_string(),
            topic: Some("tenancy".to_string()),
            session_id: Some("session-1".to_string()),
        };
        let response = service.ask(&request).await.unwrap();
        assert_eq!(response.session_id, "session-1");
        assert!(Uuid::parse_str(&response.trace_id).is_ok());

        let answer = &response.answer;
        assert_eq!(answer.short_answer, vec!["Yes, within limits."]);
        let urls: Vec<&str> = answer.sources.iter().map(|s| s.url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "https://www.ontario.ca/laws/statute/06r17",
                "https://tribunalsontario.ca/ltb/guideline"
            ]
        );
        assert!(!answer.what_the_law_says.is_empty());

        let context = generator.seen_context.lock().unwrap().clone().unwrap();
        assert!(context.contains("URL: https://www.ontario.ca/laws/statute/06r17"));
    }

    #[tokio::test]
    async fn test_generation_failure_degrades_to_fallback() {
        let generator = Arc::new(ScriptedGenerator::new(Err(AnswerError::Generation(
            "timeout".to_string(),
        ))));
        let (_dir, service) = service(generator).await;

        let response = service
            .ask(&AskRequest::new("Can my landlord increase the rent?"))
            .await
            .unwrap();
        let answer = &response.answer;
        assert_eq!(answer.short_answer, vec!["No structured answer received."]);
        assert_eq!(answer.confidence, Confidence::Low);
        // 근거 인용으로 출처와 법령 항목이 채워짐
        assert!(!answer.sources.is_empty());
        assert!(!answer.what_the_law_says.is_empty());
        assert!(Uuid::parse_str(&response.session_id).is_ok());
    }

    #[test]
    fn test_response_flattens_answer() {
        let response = AskResponse {
            session_id: "s".to_string(),
            trace_id: "t".to_string(),
            answer: refusal("q"),
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["sessionId"], "s");
        assert_eq!(json["traceId"], "t");
        assert_eq!(json["jurisdiction"], "Ontario");
        assert_eq!(json["confidence"], "low");
        assert!(json["short_answer"].is_array());
        assert!(json.get("answer").is_none());
    }

    #[test]
    fn test_request_deserializes_camel_case() {
        let request: AskRequest =
            serde_json::from_str(r#"{"query":"q","sessionId":"abc","topic":"traffic"}"#).unwrap();
        assert_eq!(request.session_id.as_deref(), Some("abc"));
        assert_eq!(request.topic.as_deref(), Some("traffic"));
    }
}
