//! 수집 파이프라인 - 정규화 → 청킹 → 임베딩 → 저장
//!
//! 제출된 문서 목록을 순차 처리합니다. 문서 하나의 실패는 결과에 기록되고
//! 배치는 다음 문서로 계속 진행됩니다.
//!
//! 재수집은 "삭제 후 추가"이며 트랜잭션이 아닙니다. 도중에 중단되면
//! 문서의 청크가 이전보다 적게 남을 수 있습니다.

use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::config::Settings;
use crate::embedding::EmbeddingProvider;
use crate::error::{IngestError, ValidationError};
use crate::knowledge::{ChunkConfig, KnowledgeStore, NewDocument, VectorEntry, VectorStore};
use crate::normalizer::{NormalizedDocument, Normalizer};

/// 이 청크 수마다 스케줄러에 양보
const YIELD_EVERY: usize = 20;

// ============================================================================
// Request / Response
// ============================================================================

/// 수집 요청 (`{"docs":[{"url":..,"html":..}]}`)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IngestRequest {
    #[serde(default)]
    pub docs: Vec<IngestDoc>,
}

/// 수집 대상 문서 하나
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IngestDoc {
    #[serde(default)]
    pub url: String,
    /// 미리 가져온 마크업 (있으면 페치 생략)
    #[serde(default)]
    pub html: Option<String>,
}

impl IngestRequest {
    /// URL 목록으로 요청 생성
    pub fn from_urls<I, S>(urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            docs: urls
                .into_iter()
                .map(|url| IngestDoc {
                    url: url.into(),
                    html: None,
                })
                .collect(),
        }
    }

    /// 부수 효과 이전 요청 검증
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.docs.is_empty() {
            return Err(ValidationError::EmptyDocumentList);
        }
        for (index, doc) in self.docs.iter().enumerate() {
            if doc.url.trim().is_empty() {
                return Err(ValidationError::MissingUrl { index });
            }
        }
        Ok(())
    }
}

/// 문서별 수집 결과
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocResult {
    pub url: String,
    /// 정규화 전에 실패하면 URL
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub act_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    pub text_length: usize,
    pub chunks: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DocResult {
    /// 정규화 단계 실패 (메타데이터 없음, 제목은 URL)
    fn failed(url: &str, err: &IngestError) -> Self {
        Self {
            url: url.to_string(),
            title: url.to_string(),
            error: Some(err.to_string()),
            ..Default::default()
        }
    }

    fn from_normalized(doc: &NormalizedDocument) -> Self {
        Self {
            url: doc.url.clone(),
            title: doc.title.clone(),
            act_name: doc.act_name.clone(),
            section: doc.section.clone(),
            content_type: doc.content_type.clone(),
            text_length: doc.text.chars().count(),
            chunks: 0,
            error: None,
        }
    }
}

/// 배치 수집 결과
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestReport {
    /// 삽입된 청크 수 합계
    pub inserted: usize,
    pub docs_processed: usize,
    pub per_doc: Vec<DocResult>,
}

/// 임베딩 재시도 결과
#[derive(Debug, Clone, Default, Serialize)]
pub struct RetryReport {
    pub attempted: usize,
    pub embedded: usize,
    pub failed: usize,
}

// ============================================================================
// Ingestor
// ============================================================================

/// 수집기
pub struct Ingestor {
    store: Arc<KnowledgeStore>,
    vectors: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    normalizer: Normalizer,
    chunk_config: ChunkConfig,
    max_chunks_per_doc: usize,
    jurisdiction: String,
}

impl Ingestor {
    pub fn new(
        settings: &Settings,
        store: Arc<KnowledgeStore>,
        vectors: Arc<dyn VectorStore>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self> {
        Ok(Self {
            store,
            vectors,
            embedder,
            normalizer: Normalizer::new(settings)?,
            chunk_config: settings.chunk_config(),
            max_chunks_per_doc: settings.max_embed_chunks_per_doc,
            jurisdiction: settings.jurisdiction.clone(),
        })
    }

    /// 배치 수집
    ///
    /// 검증 실패만 `Err`이며, 문서별 실패는 `per_doc[].error`에 기록됩니다.
    pub async fn ingest(&self, request: &IngestRequest) -> Result<IngestReport, ValidationError> {
        request.validate()?;

        tracing::info!("Ingesting {} documents", request.docs.len());

        let mut report = IngestReport::default();

        for doc in &request.docs {
            let url = doc.url.trim();
            let result = self.ingest_document(url, doc.html.as_deref()).await;

            report.inserted += result.chunks;
            report.docs_processed += 1;
            report.per_doc.push(result);
        }

        tracing::info!(
            "Ingest complete: {} documents, {} chunks",
            report.docs_processed,
            report.inserted
        );

        Ok(report)
    }

    /// 문서 하나 수집
    ///
    /// 실패는 결과의 `error`로 기록되며, 그때까지 추출한 메타데이터와
    /// 삽입된 청크 수는 유지됩니다.
    async fn ingest_document(&self, url: &str, html: Option<&str>) -> DocResult {
        let normalized = match self.normalizer.normalize(url, html).await {
            Ok(normalized) => normalized,
            Err(e) => {
                tracing::warn!("Ingest failed for {}: {}", url, e);
                return DocResult::failed(url, &e);
            }
        };

        let mut result = DocResult::from_normalized(&normalized);

        if normalized.text.is_empty() {
            tracing::warn!("No text extracted from {}", url);
            return result;
        }

        if let Err(e) = self.index_document(&normalized, &mut result).await {
            tracing::warn!("Ingest failed for {} after {} chunks: {}", url, result.chunks, e);
            result.error = Some(e.to_string());
        }

        result
    }

    /// 문서 저장 + 기존 청크 교체 + 청크별 임베딩
    async fn index_document(
        &self,
        normalized: &NormalizedDocument,
        result: &mut DocResult,
    ) -> Result<(), IngestError> {
        let url = normalized.url.as_str();

        let doc_id = self
            .store
            .upsert_document(&NewDocument {
                url: normalized.url.clone(),
                title: normalized.title.clone(),
                jurisdiction: self.jurisdiction.clone(),
                act_name: normalized.act_name.clone(),
                section: normalized.section.clone(),
                content: normalized.text.clone(),
            })
            .map_err(|e| IngestError::store(url, e))?;

        // 기존 청크/벡터 제거 후 새로 추가
        self.store
            .delete_chunks_for_document(doc_id)
            .map_err(|e| IngestError::store(url, e))?;
        self.vectors
            .delete_by_doc_id(doc_id)
            .await
            .map_err(|e| IngestError::store(url, e))?;

        let text = normalized.text.as_str();
        let mut failures: Vec<IngestError> = Vec::new();

        for (idx, range) in self
            .chunk_config
            .ranges(text)
            .take(self.max_chunks_per_doc)
            .enumerate()
        {
            let chunk_text = &text[range];
            let chunk_id = self
                .store
                .insert_chunk(doc_id, idx as i64, chunk_text)
                .map_err(|e| IngestError::store(url, e))?;
            result.chunks += 1;

            if let Err(e) = self.embed_chunk(chunk_id, doc_id, idx, chunk_text).await {
                tracing::warn!("{}", e);
                failures.push(e);
            }

            if (idx + 1) % YIELD_EVERY == 0 {
                tokio::task::yield_now().await;
            }
        }

        if let Some(first) = failures.first() {
            result.error = Some(format!(
                "{} of {} chunk embeddings failed; first: {}",
                failures.len(),
                result.chunks,
                first
            ));
        }

        tracing::info!(
            "Ingested {} (id={}, chunks={})",
            url,
            doc_id,
            result.chunks
        );

        Ok(())
    }

    /// 청크 임베딩 + 벡터 upsert + 완료 표시
    ///
    /// 실패해도 청크 텍스트 행은 남으며 재시도 대상이 됩니다.
    async fn embed_chunk(
        &self,
        chunk_id: i64,
        doc_id: i64,
        idx: usize,
        text: &str,
    ) -> Result<(), IngestError> {
        let to_error = |e: anyhow::Error| IngestError::Embedding {
            chunk_id,
            message: format!("{:#}", e),
        };

        let embedding = self.embedder.embed(text).await.map_err(to_error)?;

        self.vectors
            .upsert(&VectorEntry {
                chunk_id,
                doc_id,
                chunk_index: idx as i32,
                embedding,
            })
            .await
            .map_err(to_error)?;

        self.store.mark_chunk_embedded(chunk_id).map_err(to_error)?;

        tracing::debug!("Embedded chunk {} of doc {}", idx, doc_id);
        Ok(())
    }

    /// 임베딩이 누락된 청크 재시도
    pub async fn retry_missing_embeddings(&self, limit: usize) -> Result<RetryReport> {
        let chunks = self.store.chunks_missing_embeddings(limit)?;
        let mut report = RetryReport {
            attempted: chunks.len(),
            ..Default::default()
        };

        for (i, chunk) in chunks.iter().enumerate() {
            match self
                .embed_chunk(chunk.id, chunk.doc_id, chunk.idx as usize, &chunk.text)
                .await
            {
                Ok(()) => report.embedded += 1,
                Err(e) => {
                    tracing::warn!("{}", e);
                    report.failed += 1;
                }
            }

            if (i + 1) % YIELD_EVERY == 0 {
                tokio::task::yield_now().await;
            }
        }

        tracing::info!(
            "Re-embedded {}/{} chunks ({} failed)",
            report.embedded,
            report.attempted,
            report.failed
        );

        Ok(report)
    }
}

/// 문서 삭제 (벡터 먼저, 청크는 FK cascade)
///
/// 임베딩 프로바이더 없이 호출할 수 있도록 저장소만 받습니다.
pub async fn delete_document(
    store: &KnowledgeStore,
    vectors: &dyn VectorStore,
    doc_id: i64,
) -> Result<bool> {
    let removed = vectors.delete_by_doc_id(doc_id).await?;
    let deleted = store.delete_document(doc_id)?;
    if deleted {
        tracing::info!("Deleted document {} ({} vectors)", doc_id, removed);
    }
    Ok(deleted)
}

// ============================================================================
// Tests
// ============================================================================
