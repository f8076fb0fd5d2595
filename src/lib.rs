//! ontario-law-rag - 온타리오 법령 하이브리드 RAG
//!
//! 수집(정규화 → 청킹 → 임베딩 → 저장)과 질의(하이브리드 검색 → 근거 조립 →
//! 스코프 게이트 → 생성 → 출처 병합)를 제공합니다.
//!
//! - SQLite FTS5: 문서 키워드 검색
//! - LanceDB: 청크 벡터 검색

pub mod answer;
pub mod ask;
pub mod cli;
pub mod config;
pub mod embedding;
pub mod error;
pub mod ingest;
pub mod knowledge;
pub mod normalizer;

// Re-exports
pub use answer::{Answer, AnswerGenerator, Confidence, OpenAiGenerator, ScopeGate};
pub use ask::{AskRequest, AskResponse, AskService};
pub use config::Settings;
pub use embedding::{get_api_key, has_api_key, EmbeddingProvider, OpenAiEmbedding};
pub use error::{AnswerError, IngestError, ValidationError};
pub use ingest::{DocResult, IngestDoc, IngestReport, IngestRequest, Ingestor};
pub use knowledge::{
    ChunkConfig, Document, DocumentSummary, HybridRetriever, KnowledgeStore, LanceVectorStore,
    MemoryVectorStore, NewDocument, VectorStore,
};
pub use normalizer::{NormalizedDocument, Normalizer};
