//! Vector Store - 청크 임베딩 저장/검색 트레이트
//!
//! 임베딩은 청크 ID와 1:1이며, 같은 청크 ID로 다시 쓰면 교체됩니다(upsert).
//! 유사도는 `1 - cosine_distance` 입니다.
//!
//! 유사도가 같은 결과의 순서는 저장소의 자연 순서를 따르며 의미는 없습니다.

use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;

// ============================================================================
// Types
// ============================================================================

/// 벡터 엔트리 (저장용)
#[derive(Debug, Clone)]
pub struct VectorEntry {
    /// 청크 ID (chunks.id) - upsert 키
    pub chunk_id: i64,
    /// 문서 ID (documents.id)
    pub doc_id: i64,
    /// 문서 내 청크 순번 (0-based)
    pub chunk_index: i32,
    /// 임베딩 벡터
    pub embedding: Vec<f32>,
}

/// 벡터 검색 결과
#[derive(Debug, Clone, PartialEq)]
pub struct VectorMatch {
    pub chunk_id: i64,
    pub doc_id: i64,
    /// 코사인 유사도
    pub similarity: f32,
}

// ============================================================================
// VectorStore Trait
// ============================================================================

/// VectorStore 트레이트 (async)
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// 청크 ID 기준 생성 또는 교체
    async fn upsert(&self, entry: &VectorEntry) -> Result<()>;

    /// 코사인 유사도 상위 `limit`개 검색
    ///
    /// `doc_ids`가 주어지고 비어있지 않으면 해당 문서의 청크로 제한합니다.
    async fn search(
        &self,
        query_embedding: &[f32],
        limit: usize,
        doc_ids: Option<&[i64]>,
    ) -> Result<Vec<VectorMatch>>;

    /// doc_id로 벡터 삭제
    async fn delete_by_doc_id(&self, doc_id: i64) -> Result<usize>;

    /// 벡터 개수 조회
    async fn count(&self) -> Result<usize>;

    /// 특정 청크의 임베딩 존재 여부
    async fn has_embedding(&self, chunk_id: i64) -> Result<bool>;
}

// ============================================================================
// MemoryVectorStore
// ============================================================================

/// 메모리 벡터 저장소 (선형 스캔)
///
/// 테스트와 소규모 실행용입니다. 삽입 순서가 자연 순서입니다.
#[derive(Debug, Default)]
pub struct MemoryVectorStore {
    entries: RwLock<Vec<VectorEntry>>,
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn upsert(&self, entry: &VectorEntry) -> Result<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        match entries.iter_mut().find(|e| e.chunk_id == entry.chunk_id) {
            Some(existing) => *existing = entry.clone(),
            None => entries.push(entry.clone()),
        }
        Ok(())
    }

    async fn search(
        &self,
        query_embedding: &[f32],
        limit: usize,
        doc_ids: Option<&[i64]>,
    ) -> Result<Vec<VectorMatch>> {
        let entries = self
            .entries
            .read()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let filter = doc_ids.filter(|ids| !ids.is_empty());

        let mut matches: Vec<VectorMatch> = entries
            .iter()
            .filter(|e| filter.map_or(true, |ids| ids.contains(&e.doc_id)))
            .map(|e| VectorMatch {
                chunk_id: e.chunk_id,
                doc_id: e.doc_id,
                similarity: cosine_similarity(query_embedding, &e.embedding),
            })
            .collect();

        // 안정 정렬 - 동점은 삽입 순서 유지
        matches.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        matches.truncate(limit);
        Ok(matches)
    }

    async fn delete_by_doc_id(&self, doc_id: i64) -> Result<usize> {
        let mut entries = self
            .entries
            .write()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;
        let before = entries.len();
        entries.retain(|e| e.doc_id != doc_id);
        Ok(before - entries.len())
    }

    async fn count(&self) -> Result<usize> {
        let entries = self
            .entries
            .read()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;
        Ok(entries.len())
    }

    async fn has_embedding(&self, chunk_id: i64) -> Result<bool> {
        let entries = self
            .entries
            .read()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;
        Ok(entries.iter().any(|e| e.chunk_id == chunk_id))
    }
}

// ============================================================================
// Utility Functions
// ============================================================================

/// 코사인 유사도 계산
///
/// 결과는 -1.0 ~ 1.0 범위이며, 길이가 다르거나 영벡터면 0.0입니다.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(chunk_id: i64, doc_id: i64, embedding: Vec<f32>) -> VectorEntry {
        VectorEntry {
            chunk_id,
            doc_id,
            chunk_index: 0,
            embedding,
        }
    }

    #[test]
    fn test_cosine_similarity() {
        let a = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &[1.0, 0.0, 0.0]) - 1.0).abs() < 0.0001);
        assert!(cosine_similarity(&a, &[0.0, 1.0, 0.0]).abs() < 0.0001);
        assert!((cosine_similarity(&a, &[-1.0, 0.0, 0.0]) + 1.0).abs() < 0.0001);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&a, &[0.0, 0.0, 0.0]), 0.0);
    }

    #[tokio::test]
    async fn test_memory_upsert_replaces() {
        let store = MemoryVectorStore::new();
        store.upsert(&entry(1, 10, vec![1.0, 0.0])).await.unwrap();
        store.upsert(&entry(1, 10, vec![0.0, 1.0])).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 1);

        let hits = store.search(&[0.0, 1.0], 5, None).await.unwrap();
        assert!((hits[0].similarity - 1.0).abs() < 0.0001);
        assert!(store.has_embedding(1).await.unwrap());
        assert!(!store.has_embedding(2).await.unwrap());
    }

    #[tokio::test]
    async fn test_memory_search_filter_and_order() {
        let store = MemoryVectorStore::new();
        store.upsert(&entry(1, 10, vec![1.0, 0.0])).await.unwrap();
        store.upsert(&entry(2, 20, vec![0.8, 0.2])).await.unwrap();
        store.upsert(&entry(3, 30, vec![0.0, 1.0])).await.unwrap();

        let all = store.search(&[1.0, 0.0], 10, None).await.unwrap();
        let ids: Vec<_> = all.iter().map(|m| m.chunk_id).collect();
        assert_eq!(ids, vec![1, 2, 3]);

        let filtered = store.search(&[1.0, 0.0], 10, Some(&[20, 30])).await.unwrap();
        let ids: Vec<_> = filtered.iter().map(|m| m.chunk_id).collect();
        assert_eq!(ids, vec![2, 3]);

        // 빈 필터는 제한 없음
        let unrestricted = store.search(&[1.0, 0.0], 2, Some(&[])).await.unwrap();
        assert_eq!(unrestricted.len(), 2);
    }

    #[tokio::test]
    async fn test_memory_delete_by_doc_id() {
        let store = MemoryVectorStore::new();
        store.upsert(&entry(1, 10, vec![1.0])).await.unwrap();
        store.upsert(&entry(2, 10, vec![1.0])).await.unwrap();
        store.upsert(&entry(3, 20, vec![1.0])).await.unwrap();
        assert_eq!(store.delete_by_doc_id(10).await.unwrap(), 2);
        assert_eq!(store.count().await.unwrap(), 1);
    }
}
