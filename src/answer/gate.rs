//! Scope Gate - 근거 충분성 판단 + 거절 답변 + 출처 병합
//!
//! 통과 조건 (모두 만족):
//! - 키워드 매치 문서 수 >= `min_keyword_docs` (기본 2)
//! - 벡터 매치 청크 수 >= `min_vector_chunks` (기본 4)
//! - 허용 도메인 인용이 하나 이상
//!
//! 생성 이후에도 최종 출처가 비면 같은 거절 답변으로 내립니다.
//! 근거 부족은 에러가 아니라 정상 응답입니다.

use url::Url;

use crate::config::{Settings, DEFAULT_ALLOWED_DOMAINS};

use super::context::Citation;
use super::{Answer, Confidence, LawExcerpt, SourceRef, JURISDICTION};

/// 인용으로 보충하는 법령 항목 최대 수
const BACKFILL_LIMIT: usize = 5;

// ============================================================================
// Allowlist
// ============================================================================

/// 신뢰 출처 도메인 목록 (정확히 일치 또는 서브도메인)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allowlist {
    domains: Vec<String>,
}

impl Default for Allowlist {
    fn default() -> Self {
        Self::new(DEFAULT_ALLOWED_DOMAINS.iter().copied())
    }
}

impl Allowlist {
    pub fn new<I, S>(domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let domains = domains
            .into_iter()
            .map(|d| normalize_host(d.as_ref().trim()))
            .filter(|d| !d.is_empty())
            .collect();
        Self { domains }
    }

    /// URL 호스트가 허용 도메인인지
    pub fn is_allowed(&self, url: &str) -> bool {
        let Some(host) = host_of(url) else {
            return false;
        };
        self.domains
            .iter()
            .any(|d| host == *d || host.ends_with(&format!(".{}", d)))
    }
}

/// 소문자화 + `www.` 제거
fn normalize_host(host: &str) -> String {
    let host = host.to_lowercase();
    host.strip_prefix("www.").unwrap_or(&host).to_string()
}

fn host_of(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = normalize_host(parsed.host_str()?);
    if host.is_empty() {
        None
    } else {
        Some(host)
    }
}

// ============================================================================
// Decision
// ============================================================================

/// 게이트 판단
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Pass,
    Refuse(RefusalReason),
}

/// 거절 사유
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefusalReason {
    TooFewKeywordDocs,
    TooFewVectorChunks,
    NoAllowedCitation,
    /// 생성 이후 검증 가능한 출처가 없음
    NoVerifiableSources,
}

/// 최소 근거 기준
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateThresholds {
    pub min_keyword_docs: usize,
    pub min_vector_chunks: usize,
}

impl Default for GateThresholds {
    fn default() -> Self {
        Self {
            min_keyword_docs: 2,
            min_vector_chunks: 4,
        }
    }
}

// ============================================================================
// ScopeGate
// ============================================================================

/// 스코프 게이트
#[derive(Debug, Clone, Default)]
pub struct ScopeGate {
    allowlist: Allowlist,
    thresholds: GateThresholds,
}

impl ScopeGate {
    pub fn new(allowlist: Allowlist, thresholds: GateThresholds) -> Self {
        Self {
            allowlist,
            thresholds,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            Allowlist::new(&settings.allowed_domains),
            GateThresholds {
                min_keyword_docs: settings.min_keyword_docs,
                min_vector_chunks: settings.min_vector_chunks,
            },
        )
    }

    pub fn allowlist(&self) -> &Allowlist {
        &self.allowlist
    }

    /// 생성 전 판단
    pub fn check(&self, keyword_docs: usize, vector_chunks: usize, citations: &[Citation]) -> GateDecision {
        let allowed_citations = citations
            .iter()
            .filter(|c| self.allowlist.is_allowed(&c.url))
            .count();

        let decision = if keyword_docs < self.thresholds.min_keyword_docs {
            GateDecision::Refuse(RefusalReason::TooFewKeywordDocs)
        } else if vector_chunks < self.thresholds.min_vector_chunks {
            GateDecision::Refuse(RefusalReason::TooFewVectorChunks)
        } else if allowed_citations == 0 {
            GateDecision::Refuse(RefusalReason::NoAllowedCitation)
        } else {
            GateDecision::Pass
        };

        if let GateDecision::Refuse(reason) = decision {
            tracing::warn!(
                ?reason,
                keyword_docs,
                vector_chunks,
                allowed_citations,
                "Scope gate refused"
            );
        }

        decision
    }

    /// 생성 결과 마무리
    ///
    /// 출처 병합/중복 제거, 법령 항목 보충, 출처가 비면 거절로 내림
    pub fn finalize(&self, question: &str, mut answer: Answer, citations: &[Citation]) -> Answer {
        let sources = self.merge_sources(&answer.sources, citations);

        if sources.is_empty() {
            tracing::warn!(
                reason = ?RefusalReason::NoVerifiableSources,
                "Scope gate downgraded answer"
            );
            return refusal(question);
        }

        backfill_law(&mut answer, citations);
        answer.sources = sources;
        answer
    }

    /// 생성 출처 + 인용 → 허용 도메인만, URL 기준 첫 등장 순서로 중복 제거
    pub fn merge_sources(&self, generated: &[SourceRef], citations: &[Citation]) -> Vec<SourceRef> {
        let from_citations = citations.iter().map(|c| SourceRef {
            title: Some(c.act.clone()),
            url: c.url.clone(),
        });

        let mut merged: Vec<SourceRef> = Vec::new();
        for source in generated.iter().cloned().chain(from_citations) {
            if source.url.is_empty() || !self.allowlist.is_allowed(&source.url) {
                continue;
            }
            if merged.iter().any(|s| s.url == source.url) {
                continue;
            }
            merged.push(source);
        }
        merged
    }
}

/// 범위 밖 / 근거 부족 시의 고정 거절 답변
pub fn refusal(question: &str) -> Answer {
    Answer {
        question: question.to_string(),
        jurisdiction: JURISDICTION.to_string(),
        short_answer: vec![
            "I focus on Ontario legal information.".to_string(),
            "This question appears outside that scope (not an Ontario legal question).".to_string(),
            "Try rephrasing with a clear Ontario law topic or situation.".to_string(),
        ],
        what_the_law_says: vec![],
        process_and_forms: vec![],
        caveats: vec![
            "General or non-legal questions cannot be answered here.".to_string(),
            "I can help with Ontario statutes, tribunals, and procedures.".to_string(),
        ],
        sources: vec![],
        followups: vec![
            "What laws govern rent increases in Ontario?".to_string(),
            "How do I dispute a speeding ticket in Ontario?".to_string(),
            "How can I end a tenancy in Ontario?".to_string(),
        ],
        confidence: Confidence::Low,
    }
}

/// what_the_law_says가 비어 있고 인용이 있으면 상위 인용으로 채움
pub fn backfill_law(answer: &mut Answer, citations: &[Citation]) {
    if !answer.what_the_law_says.is_empty() || citations.is_empty() {
        return;
    }

    answer.what_the_law_says = citations
        .iter()
        .take(BACKFILL_LIMIT)
        .map(|c| LawExcerpt {
            act: if c.act.is_empty() {
                "Source".to_string()
            } else {
                c.act.clone()
            },
            section: c.section.clone(),
            url: c.url.clone(),
            quote: c.snippet.clone(),
        })
        .collect();
}

// ============================================================================
// Tests
// ============================================================================
