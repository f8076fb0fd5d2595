//! 답변 모듈 - 구조화된 답변 계약
//!
//! 생성 단계의 출력은 [`Answer`] 스키마를 통과해야 하며,
//! 통과하지 못하면 [`Answer::minimal_fallback`]으로 대체됩니다.
//!
//! - context: 검색 청크 → 근거 묶음 (Context Assembler)
//! - gate: 근거 충분성 판단, 거절 답변, 출처 병합 (Scope Gate)
//! - generator: 외부 생성 단계 (OpenAI chat completions)

pub mod context;
pub mod gate;
pub mod generator;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::AnswerError;

pub use context::{build_context, Citation, EvidenceBundle};
pub use gate::{refusal, Allowlist, GateDecision, GateThresholds, RefusalReason, ScopeGate};
pub use generator::{AnswerGenerator, OpenAiGenerator};

/// 답변 관할 (고정)
pub const JURISDICTION: &str = "Ontario";

/// 모델에 요청하는 short_answer 개수 범위
pub const SHORT_ANSWER_REQUESTED: (usize, usize) = (3, 6);

/// 허용되는 short_answer 최대 개수
const SHORT_ANSWER_MAX: usize = 6;

// ============================================================================
// Types
// ============================================================================

/// 구조화된 답변
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub question: String,
    pub jurisdiction: String,
    pub short_answer: Vec<String>,
    #[serde(default)]
    pub what_the_law_says: Vec<LawExcerpt>,
    #[serde(default)]
    pub process_and_forms: Vec<ProcessStep>,
    #[serde(default)]
    pub caveats: Vec<String>,
    #[serde(default)]
    pub sources: Vec<SourceRef>,
    #[serde(default)]
    pub followups: Vec<String>,
    #[serde(default)]
    pub confidence: Confidence,
}

/// 법령 인용
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LawExcerpt {
    pub act: String,
    #[serde(default)]
    pub section: String,
    pub url: String,
    #[serde(default)]
    pub quote: String,
}

/// 절차 단계
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessStep {
    pub step: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forms: Option<Vec<FormRef>>,
}

/// 공식 서식
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormRef {
    pub name: String,
    pub url: String,
}

/// 출처
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub url: String,
}

/// 답변 신뢰도
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    #[default]
    Medium,
    Low,
}

// ============================================================================
// Answer
// ============================================================================

impl Answer {
    /// 생성 실패 시의 최소 답변
    pub fn minimal_fallback(question: &str) -> Self {
        Self {
            question: question.to_string(),
            jurisdiction: JURISDICTION.to_string(),
            short_answer: vec!["No structured answer received.".to_string()],
            what_the_law_says: vec![],
            process_and_forms: vec![],
            caveats: vec![],
            sources: vec![],
            followups: vec![],
            confidence: Confidence::Low,
        }
    }

    /// JSON 문자열 파싱 + 검증
    pub fn parse(json: &str) -> Result<Self, AnswerError> {
        let answer: Answer =
            serde_json::from_str(json).map_err(|e| AnswerError::Malformed(e.to_string()))?;
        answer.validated()
    }

    /// 스키마 검증
    ///
    /// short_answer 항목은 trim 후 빈 항목을 버리고 1..=6개여야 합니다.
    pub fn validated(mut self) -> Result<Self, AnswerError> {
        if self.jurisdiction != JURISDICTION {
            return Err(AnswerError::Malformed(format!(
                "jurisdiction: expected {}, got {:?}",
                JURISDICTION, self.jurisdiction
            )));
        }

        self.short_answer = self
            .short_answer
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        if self.short_answer.is_empty() || self.short_answer.len() > SHORT_ANSWER_MAX {
            return Err(AnswerError::Malformed(format!(
                "short_answer: expected 1..={} bullets, got {}",
                SHORT_ANSWER_MAX,
                self.short_answer.len()
            )));
        }

        for law in &self.what_the_law_says {
            check_url("what_the_law_says[].url", &law.url)?;
        }
        for form in self.process_and_forms.iter().flat_map(|p| p.forms.iter().flatten()) {
            check_url("process_and_forms[].forms[].url", &form.url)?;
        }
        for source in &self.sources {
            check_url("sources[].url", &source.url)?;
        }

        Ok(self)
    }
}

/// 절대 http(s) URL 여부
fn check_url(field: &str, value: &str) -> Result<(), AnswerError> {
    match Url::parse(value) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(()),
        _ => Err(AnswerError::Malformed(format!(
            "{}: not an absolute http(s) URL: {}",
            field, value
        ))),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"{
        "question": "Can my landlord raise rent twice a year?",
        "jurisdiction": "Ontario",
        "short_answer": ["No.", "  ", "Once every 12 months."],
        "what_the_law_says": [{
            "act": "Residential Tenancies Act, 2006",
            "section": "s. 119",
            "url": "https://www.ontario.ca/laws/statute/06r17",
            "quote": "at least 12 months have elapsed"
        }],
        "process_and_forms": [{"step": "Check the notice", "forms": [{"name": "N1", "url": "https://tribunalsontario.ca/n1"}]}],
        "sources": [{"url": "https://www.ontario.ca/laws/statute/06r17"}]
    }"#;

    #[test]
    fn test_parse_applies_defaults_and_trims() {
        let answer = Answer::parse(VALID).unwrap();
        assert_eq!(answer.short_answer, vec!["No.", "Once every 12 months."]);
        assert_eq!(answer.confidence, Confidence::Medium);
        assert!(answer.caveats.is_empty());
        assert!(answer.followups.is_empty());
        assert_eq!(answer.sources[0].title, None);
    }

    #[test]
    fn test_rejects_wrong_jurisdiction() {
        let json = VALID.replace("\"Ontario\"", "\"Quebec\"");
        assert!(matches!(Answer::parse(&json), Err(AnswerError::Malformed(_))));
    }

    #[test]
    fn test_rejects_bad_short_answer_counts() {
        let empty = r#"{"question":"q","jurisdiction":"Ontario","short_answer":[" "]}"#;
        assert!(Answer::parse(empty).is_err());

        let seven = r#"{"question":"q","jurisdiction":"Ontario","short_answer":["1","2","3","4","5","6","7"]}"#;
        assert!(Answer::parse(seven).is_err());

        let missing = r#"{"question":"q","jurisdiction":"Ontario"}"#;
        assert!(Answer::parse(missing).is_err());
    }

    #[test]
    fn test_rejects_relative_or_non_http_urls() {
        let json = VALID.replace("https://tribunalsontario.ca/n1", "/forms/n1");
        assert!(Answer::parse(&json).is_err());

        let json = VALID.replace(
            r#""sources": [{"url": "https://www.ontario.ca/laws/statute/06r17"}]"#,
            r#""sources": [{"url": "ftp://ontario.ca/x"}]"#,
        );
        assert!(Answer::parse(&json).is_err());
    }

    #[test]
    fn test_rejects_unknown_confidence() {
        let json = r#"{"question":"q","jurisdiction":"Ontario","short_answer":["a"],"confidence":"certain"}"#;
        assert!(Answer::parse(json).is_err());
    }

    #[test]
    fn test_minimal_fallback_shape() {
        let answer = Answer::minimal_fallback("What is GitHub?");
        assert_eq!(answer.short_answer, vec!["No structured answer received."]);
        assert_eq!(answer.confidence, Confidence::Low);
        assert!(answer.sources.is_empty());
        assert!(answer.what_the_law_says.is_empty());

        let json = serde_json::to_value(&answer).unwrap();
        assert_eq!(json["confidence"], "low");
        assert_eq!(json["jurisdiction"], "Ontario");
    }
}
