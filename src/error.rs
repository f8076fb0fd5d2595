//! 에러 분류
//!
//! 수집(ingest)은 문서 단위로 실패를 기록하고 배치를 계속 진행합니다.
//! 요청 검증 실패는 부수 효과 이전에 필드 단위 원인과 함께 거부됩니다.
//! 생성 단계 실패는 호출자에게 노출되지 않습니다.

use thiserror::Error;

/// 문서 수집 단계 에러 (문서 또는 청크 하나에 한정)
#[derive(Debug, Error)]
pub enum IngestError {
    /// 네트워크 / 타임아웃 / 2xx 이외 응답
    #[error("fetch failed for {url}: {message}")]
    Fetch { url: String, message: String },

    /// 깨진 PDF / HTML
    #[error("parse failed for {url}: {message}")]
    Parse { url: String, message: String },

    /// 청크 임베딩 실패 (청크 텍스트 행은 유지됨)
    #[error("embedding failed for chunk {chunk_id}: {message}")]
    Embedding { chunk_id: i64, message: String },

    /// 저장소 쓰기 실패
    #[error("store write failed for {url}: {message}")]
    Store { url: String, message: String },
}

impl IngestError {
    pub fn fetch(url: &str, err: impl std::fmt::Display) -> Self {
        Self::Fetch {
            url: url.to_string(),
            message: err.to_string(),
        }
    }

    pub fn parse(url: &str, err: impl std::fmt::Display) -> Self {
        Self::Parse {
            url: url.to_string(),
            message: err.to_string(),
        }
    }

    pub fn store(url: &str, err: impl std::fmt::Display) -> Self {
        Self::Store {
            url: url.to_string(),
            message: format!("{:#}", err),
        }
    }
}

/// 요청 검증 에러
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("query: missing or empty")]
    MissingQuery,

    #[error("docs: no documents supplied")]
    EmptyDocumentList,

    #[error("docs[{index}].url: missing or empty")]
    MissingUrl { index: usize },

    #[error("{name}: {reason}")]
    InvalidSetting { name: &'static str, reason: String },
}

/// 생성 단계 에러 (질의 흐름 안에서 최소 폴백 답변으로 대체됨)
#[derive(Debug, Error)]
pub enum AnswerError {
    /// API 호출 실패 / 2xx 이외 응답
    #[error("generation failed: {0}")]
    Generation(String),

    /// 응답이 답변 스키마에 맞지 않음
    #[error("malformed answer: {0}")]
    Malformed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_messages_name_the_field() {
        assert_eq!(ValidationError::MissingQuery.to_string(), "query: missing or empty");
        assert_eq!(
            ValidationError::MissingUrl { index: 3 }.to_string(),
            "docs[3].url: missing or empty"
        );
    }

    #[test]
    fn test_ingest_error_display() {
        let err = IngestError::fetch("https://www.ontario.ca/x", "timed out");
        assert_eq!(
            err.to_string(),
            "fetch failed for https://www.ontario.ca/x: timed out"
        );
    }
}
