//! Knowledge 모듈 - 문서 저장소 + 하이브리드 검색
//!
//! - SQLite: 문서/청크 저장 + FTS5 키워드 검색
//! - LanceDB: 청크 임베딩 벡터 검색 (ANN)
//! - Hybrid: 키워드 문서 순위와 벡터 청크 순위를 따로 반환
//! - Chunker: 문장/줄바꿈 경계 인식 윈도우 분할

mod chunker;
mod hybrid;
mod lance;
mod store;
mod vector;

// Re-exports
pub use chunker::{chunk_ranges, ChunkConfig, ChunkRanges};
pub use hybrid::{
    HybridRetriever, RankedChunk, Retrieval, DEFAULT_KEYWORD_LIMIT,
    DEFAULT_VECTOR_LIMIT,
};
pub use lance::LanceVectorStore;
pub use store::{
    Chunk, Document, DocumentSummary, KeywordHit, KnowledgeStore, NewDocument, StoreStats,
};
pub use vector::{cosine_similarity, MemoryVectorStore, VectorEntry, VectorMatch, VectorStore};
