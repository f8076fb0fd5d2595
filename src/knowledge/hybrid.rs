//! 하이브리드 검색 - FTS5 문서 순위 + 벡터 청크 순위
//!
//! 두 신호를 점수로 섞지 않고 따로 반환합니다.
//! 키워드 결과는 벡터 검색의 후보 문서 prefilter로만 쓰이며,
//! 키워드 결과가 비어 있으면 벡터 검색은 제한 없이 수행됩니다.
//!
//! 검색기는 호출 간 상태가 없고 읽기 전용입니다.

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::embedding::EmbeddingProvider;

use super::store::{KeywordHit, KnowledgeStore};
use super::vector::VectorStore;

/// 기본 키워드 결과 수 (K1)
pub const DEFAULT_KEYWORD_LIMIT: usize = 20;
/// 기본 벡터 결과 수 (K2)
pub const DEFAULT_VECTOR_LIMIT: usize = 30;

// ============================================================================
// Types
// ============================================================================

/// 유사도가 붙은 청크 (문서 메타데이터 포함)
#[derive(Debug, Clone, PartialEq)]
pub struct RankedChunk {
    pub chunk_id: i64,
    pub doc_id: i64,
    pub chunk_index: i64,
    pub text: String,
    /// 코사인 유사도
    pub similarity: f32,
    pub title: String,
    pub act_name: Option<String>,
    pub section: Option<String>,
    pub url: String,
}

/// 한 질의의 검색 결과
#[derive(Debug, Clone, Default)]
pub struct Retrieval {
    /// 키워드 관련도 순 문서
    pub keyword_docs: Vec<KeywordHit>,
    /// 유사도 순 청크
    pub chunks: Vec<RankedChunk>,
}

impl Retrieval {
    /// 키워드 매치 문서 수
    pub fn keyword_count(&self) -> usize {
        self.keyword_docs.len()
    }

    /// 벡터 매치 청크 수
    pub fn vector_count(&self) -> usize {
        self.chunks.len()
    }
}

// ============================================================================
// HybridRetriever
// ============================================================================

/// 하이브리드 검색기
///
/// SQLite FTS5 (문서) + 벡터 저장소 (청크)
pub struct HybridRetriever {
    store: Arc<KnowledgeStore>,
    vectors: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    keyword_limit: usize,
    vector_limit: usize,
}

impl HybridRetriever {
    pub fn new(
        store: Arc<KnowledgeStore>,
        vectors: Arc<dyn VectorStore>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        Self {
            store,
            vectors,
            embedder,
            keyword_limit: DEFAULT_KEYWORD_LIMIT,
            vector_limit: DEFAULT_VECTOR_LIMIT,
        }
    }

    /// 결과 수 제한 설정
    pub fn with_limits(mut self, keyword_limit: usize, vector_limit: usize) -> Self {
        self.keyword_limit = keyword_limit;
        self.vector_limit = vector_limit;
        self
    }

    /// 키워드 신호: 관련도 상위 문서
    pub fn keyword_docs(&self, query: &str) -> Result<Vec<KeywordHit>> {
        self.store
            .keyword_search(query, self.keyword_limit)
            .context("Keyword search failed")
    }

    /// 벡터 신호: 유사도 상위 청크
    ///
    /// `doc_ids`가 비어 있으면 전체 청크에서 검색합니다.
    /// 벡터는 있으나 SQLite에 청크가 없으면 (재수집 중) 결과에서 제외합니다.
    pub async fn vector_chunks(&self, query: &str, doc_ids: &[i64]) -> Result<Vec<RankedChunk>> {
        let query_embedding = self
            .embedder
            .embed(query)
            .await
            .context("Failed to embed query")?;

        let filter = if doc_ids.is_empty() { None } else { Some(doc_ids) };
        let matches = self
            .vectors
            .search(&query_embedding, self.vector_limit, filter)
            .await
            .context("Vector search failed")?;

        let chunk_ids: Vec<i64> = matches.iter().map(|m| m.chunk_id).collect();
        let chunks = self.store.chunks_by_ids(&chunk_ids)?;

        let mut doc_ids: Vec<i64> = matches.iter().map(|m| m.doc_id).collect();
        doc_ids.sort_unstable();
        doc_ids.dedup();
        let documents = self.store.documents_by_ids(&doc_ids)?;

        let mut ranked = Vec::with_capacity(matches.len());
        for m in matches {
            let (Some(chunk), Some(doc)) = (chunks.get(&m.chunk_id), documents.get(&m.doc_id))
            else {
                tracing::debug!("Skipping stale vector for chunk {}", m.chunk_id);
                continue;
            };

            ranked.push(RankedChunk {
                chunk_id: chunk.id,
                doc_id: doc.id,
                chunk_index: chunk.idx,
                text: chunk.text.clone(),
                similarity: m.similarity,
                title: doc.title.clone(),
                act_name: doc.act_name.clone(),
                section: doc.section.clone(),
                url: doc.url.clone(),
            });
        }

        Ok(ranked)
    }

    /// 두 신호 모두 수행
    pub async fn retrieve(&self, query: &str) -> Result<Retrieval> {
        let keyword_docs = self.keyword_docs(query)?;
        let doc_ids: Vec<i64> = keyword_docs.iter().map(|h| h.doc_id).collect();
        let chunks = self.vector_chunks(query, &doc_ids).await?;

        tracing::debug!(
            "Retrieved {} keyword docs, {} vector chunks for query",
            keyword_docs.len(),
            chunks.len()
        );

        Ok(Retrieval {
            keyword_docs,
            chunks,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::store::NewDocument;
    use crate::knowledge::vector::{MemoryVectorStore, VectorEntry};
    use async_trait::async_trait;
    use tempfile::TempDir;

    /// 단어 빈도 기반 결정적 임베더
    struct KeywordEmbedder;

    #[async_trait]
    impl EmbeddingProvider for KeywordEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            let lower = text.to_lowercase();
            Ok(vec![
                lower.matches("rent").count() as f32,
                lower.matches("deposit").count() as f32,
                1.0,
            ])
        }

        fn dimension(&self) -> usize {
            3
        }

        fn name(&self) -> &str {
            "keyword-test"
        }
    }

    async fn index(
        store: &KnowledgeStore,
        vectors: &MemoryVectorStore,
        url: &str,
        title: &str,
        chunks: &[&str],
    ) -> i64 {
        let doc_id = store
            .upsert_document(&NewDocument {
                url: url.to_string(),
                title: title.to_string(),
                jurisdiction: "Ontario".to_string(),
                act_name: None,
                section: None,
                content: chunks.join(" "),
            })
            .unwrap();

        for (i, text) in chunks.iter().enumerate() {
            let chunk_id = store.insert_chunk(doc_id, i as i64, text).unwrap();
            vectors
                .upsert(&VectorEntry {
                    chunk_id,
                    doc_id,
                    chunk_index: i as i32,
                    embedding: KeywordEmbedder.embed(text).await.unwrap(),
                })
                .await
                .unwrap();
        }
        doc_id
    }

    async fn setup(dir: &TempDir) -> (Arc<KnowledgeStore>, Arc<MemoryVectorStore>) {
        let store = Arc::new(KnowledgeStore::open(&dir.path().join("k.db")).unwrap());
        let vectors = Arc::new(MemoryVectorStore::new());

        index(
            &store,
            &vectors,
            "https://www.ontario.ca/laws/statute/06r17",
            "Residential Tenancies Act",
            &["Rent may increase once every twelve months.", "A rent deposit is limited."],
        )
        .await;
        index(
            &store,
            &vectors,
            "https://www.ontario.ca/page/highway-traffic",
            "Highway Traffic Act",
            &["Speeding fines depend on the speed over the limit."],
        )
        .await;

        (store, vectors)
    }

    #[tokio::test]
    async fn test_keyword_prefilter_restricts_vector_search() {
        let dir = TempDir::new().unwrap();
        let (store, vectors) = setup(&dir).await;
        let retriever = HybridRetriever::new(store, vectors, Arc::new(KeywordEmbedder));

        let result = retriever.retrieve("rent deposit").await.unwrap();
        assert_eq!(result.keyword_count(), 1);
        assert_eq!(result.vector_count(), 2);
        assert!(result
            .chunks
            .iter()
            .all(|c| c.title == "Residential Tenancies Act"));
        assert!(result.chunks[0].similarity >= result.chunks[1].similarity);
    }

    #[tokio::test]
    async fn test_empty_keyword_set_allows_unrestricted_vector_search() {
        let dir = TempDir::new().unwrap();
        let (store, vectors) = setup(&dir).await;
        let retriever = HybridRetriever::new(store, vectors, Arc::new(KeywordEmbedder));

        let result = retriever.retrieve("zzzz qqqq").await.unwrap();
        assert_eq!(result.keyword_count(), 0);
        assert_eq!(result.vector_count(), 3);
    }

    #[tokio::test]
    async fn test_stale_vectors_are_dropped() {
        let dir = TempDir::new().unwrap();
        let (store, vectors) = setup(&dir).await;

        let doc = store
            .get_by_url("https://www.ontario.ca/page/highway-traffic")
            .unwrap()
            .unwrap();
        store.delete_chunks_for_document(doc.id).unwrap();

        let retriever =
            HybridRetriever::new(store.clone(), vectors.clone(), Arc::new(KeywordEmbedder))
                .with_limits(20, 10);
        let chunks = retriever.vector_chunks("speeding", &[]).await.unwrap();
        assert_eq!(chunks.len(), 2);
        assert!(chunks.iter().all(|c| c.doc_id != doc.id));
    }
}
