//! 설정 - 환경변수 기반 튜닝 파라미터
//!
//! 모든 값은 환경변수로 덮어쓸 수 있으며, 없으면 기본값을 사용합니다.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ValidationError;
use crate::knowledge::ChunkConfig;

/// 기본 허용 출처 도메인 (정확히 일치하거나 하위 도메인)
pub const DEFAULT_ALLOWED_DOMAINS: &[&str] = &[
    "ontario.ca",
    "canlii.org",
    "tribunalsontario.ca",
    "laws-lois.justice.gc.ca",
    "ontariocourts.ca",
];

// ============================================================================
// Settings
// ============================================================================

/// 전체 튜닝 파라미터
#[derive(Debug, Clone)]
pub struct Settings {
    /// 문서당 정규화 텍스트 최대 길이 (문자 수)
    pub max_text_chars: usize,
    /// 청크 최대 크기
    pub chunk_size: usize,
    /// 청크 오버랩
    pub chunk_overlap: usize,
    /// 문서당 임베딩 청크 상한
    pub max_embed_chunks_per_doc: usize,
    /// 페치 타임아웃
    pub fetch_timeout: Duration,
    /// 리다이렉트 상한
    pub fetch_max_redirects: usize,
    /// 임베딩 입력 상한 (문자 수)
    pub embed_input_chars: usize,
    /// 키워드 검색 결과 수 (K1)
    pub keyword_limit: usize,
    /// 벡터 검색 결과 수 (K2)
    pub vector_limit: usize,
    /// 문서당 컨텍스트 청크 상한
    pub context_max_per_doc: usize,
    /// 전체 컨텍스트 청크 상한
    pub context_max_total: usize,
    /// 게이트 통과 최소 키워드 문서 수
    pub min_keyword_docs: usize,
    /// 게이트 통과 최소 벡터 청크 수
    pub min_vector_chunks: usize,
    /// 허용 출처 도메인
    pub allowed_domains: Vec<String>,
    /// 문서에 저장할 관할 태그
    pub jurisdiction: String,
    /// 데이터 디렉토리 (knowledge.db, vectors.lance)
    pub data_dir: PathBuf,
    /// 임베딩 모델
    pub embed_model: String,
    /// 생성 모델
    pub llm_model: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_text_chars: 250_000,
            chunk_size: 1000,
            chunk_overlap: 150,
            max_embed_chunks_per_doc: 120,
            fetch_timeout: Duration::from_millis(60_000),
            fetch_max_redirects: 5,
            embed_input_chars: 8000,
            keyword_limit: 20,
            vector_limit: 30,
            context_max_per_doc: 2,
            context_max_total: 8,
            min_keyword_docs: 2,
            min_vector_chunks: 4,
            allowed_domains: DEFAULT_ALLOWED_DOMAINS
                .iter()
                .map(|d| d.to_string())
                .collect(),
            jurisdiction: "ON".to_string(),
            data_dir: default_data_dir(),
            embed_model: "text-embedding-3-small".to_string(),
            llm_model: "gpt-4o-mini".to_string(),
        }
    }
}

impl Settings {
    /// 환경변수에서 설정 로드
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// 임의의 조회 함수로 설정 로드 (테스트용)
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let d = Self::default();

        // 호스트 정규화(소문자, www.)는 Allowlist가 담당
        let allowed_domains = lookup("ALLOWED_SOURCE_DOMAINS")
            .map(|raw| {
                raw.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect::<Vec<_>>()
            })
            .filter(|v| !v.is_empty())
            .unwrap_or(d.allowed_domains);

        Self {
            max_text_chars: parse_var(&lookup, "MAX_TEXT_CHARS", d.max_text_chars),
            chunk_size: parse_var(&lookup, "CHUNK_SIZE", d.chunk_size),
            chunk_overlap: parse_var(&lookup, "CHUNK_OVERLAP", d.chunk_overlap),
            max_embed_chunks_per_doc: parse_var(
                &lookup,
                "MAX_EMBED_CHUNKS_PER_DOC",
                d.max_embed_chunks_per_doc,
            ),
            fetch_timeout: Duration::from_millis(parse_var(
                &lookup,
                "FETCH_TIMEOUT_MS",
                d.fetch_timeout.as_millis() as u64,
            )),
            fetch_max_redirects: parse_var(&lookup, "FETCH_MAX_REDIRECTS", d.fetch_max_redirects),
            embed_input_chars: parse_var(&lookup, "EMBED_INPUT_CHARS", d.embed_input_chars),
            keyword_limit: parse_var(&lookup, "KEYWORD_LIMIT", d.keyword_limit),
            vector_limit: parse_var(&lookup, "VECTOR_LIMIT", d.vector_limit),
            context_max_per_doc: parse_var(&lookup, "CONTEXT_MAX_PER_DOC", d.context_max_per_doc),
            context_max_total: parse_var(&lookup, "CONTEXT_MAX_TOTAL", d.context_max_total),
            min_keyword_docs: parse_var(&lookup, "MIN_KEYWORD_DOCS", d.min_keyword_docs),
            min_vector_chunks: parse_var(&lookup, "MIN_VECTOR_CHUNKS", d.min_vector_chunks),
            allowed_domains,
            jurisdiction: lookup("JURISDICTION")
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(d.jurisdiction),
            data_dir: lookup("ONTARIO_RAG_DATA_DIR")
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or(d.data_dir),
            embed_model: lookup("EMBED_MODEL")
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(d.embed_model),
            llm_model: lookup("LLM_MODEL")
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(d.llm_model),
        }
    }

    /// 설정값 검증
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.chunk_size == 0 {
            return Err(ValidationError::InvalidSetting {
                name: "CHUNK_SIZE",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(ValidationError::InvalidSetting {
                name: "CHUNK_OVERLAP",
                reason: format!("must be smaller than CHUNK_SIZE ({})", self.chunk_size),
            });
        }

        let positive = [
            ("MAX_TEXT_CHARS", self.max_text_chars),
            ("MAX_EMBED_CHUNKS_PER_DOC", self.max_embed_chunks_per_doc),
            ("EMBED_INPUT_CHARS", self.embed_input_chars),
            ("KEYWORD_LIMIT", self.keyword_limit),
            ("VECTOR_LIMIT", self.vector_limit),
            ("CONTEXT_MAX_PER_DOC", self.context_max_per_doc),
            ("CONTEXT_MAX_TOTAL", self.context_max_total),
            // 0이면 스코프 게이트가 사실상 꺼짐
            ("MIN_KEYWORD_DOCS", self.min_keyword_docs),
            ("MIN_VECTOR_CHUNKS", self.min_vector_chunks),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(ValidationError::InvalidSetting {
                    name,
                    reason: "must be greater than zero".to_string(),
                });
            }
        }

        Ok(())
    }

    /// 청커 설정
    pub fn chunk_config(&self) -> ChunkConfig {
        ChunkConfig {
            max_size: self.chunk_size,
            overlap: self.chunk_overlap,
        }
    }

    /// SQLite 파일 경로
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("knowledge.db")
    }

    /// LanceDB 디렉토리 경로
    pub fn lance_path(&self) -> PathBuf {
        self.data_dir.join("vectors.lance")
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 데이터 디렉토리 경로 (~/.ontario-law-rag/)
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".ontario-law-rag")
}

fn parse_var<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + Copy,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => match raw.trim().parse::<T>() {
            Ok(v) => v,
            Err(_) => {
                tracing::warn!("Ignoring unparsable {}={:?}, using default", key, raw);
                default
            }
        },
        _ => default,
    }
}

// ============================================================================
// Tests
// ============================================================================
