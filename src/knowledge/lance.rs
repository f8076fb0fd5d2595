//! LanceDB Vector Store - 청크 임베딩 ANN 검색
//!
//! 청크 ID를 키로 임베딩을 저장하고 코사인 거리로 검색합니다.
//! 문서 ID 필터는 prefilter로 적용됩니다.
//! ref: https://lancedb.github.io/lancedb/

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow_array::{
    Array, FixedSizeListArray, Float32Array, Int32Array, Int64Array, RecordBatch,
    RecordBatchIterator,
};
use arrow_schema::{DataType, Field, Schema};
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::connection::Connection;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::DistanceType;

use super::vector::{VectorEntry, VectorMatch, VectorStore};

/// 벡터 테이블 이름
const TABLE_NAME: &str = "chunk_embeddings";

// ============================================================================
// LanceVectorStore
// ============================================================================

/// LanceDB 벡터 저장소 구현
pub struct LanceVectorStore {
    db: Connection,
    dimension: i32,
}

impl LanceVectorStore {
    /// LanceDB 저장소 열기
    ///
    /// # Arguments
    /// * `path` - .lance 디렉토리 경로
    /// * `dimension` - 임베딩 차원
    pub async fn open(path: &Path, dimension: usize) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .context("Failed to create LanceDB directory")?;
            }
        }

        let path_str = path
            .to_str()
            .ok_or_else(|| anyhow::anyhow!("Invalid path encoding"))?;

        let db = lancedb::connect(path_str)
            .execute()
            .await
            .context("Failed to connect to LanceDB")?;

        let dimension = i32::try_from(dimension).context("Embedding dimension too large")?;

        Ok(Self { db, dimension })
    }

    /// 벡터 테이블 스키마
    fn schema(&self) -> Schema {
        Schema::new(vec![
            Field::new("chunk_id", DataType::Int64, false),
            Field::new("doc_id", DataType::Int64, false),
            Field::new("chunk_index", DataType::Int32, false),
            Field::new(
                "embedding",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    self.dimension,
                ),
                false,
            ),
        ])
    }

    /// 엔트리를 Arrow RecordBatch로 변환
    fn entry_to_batch(&self, entry: &VectorEntry) -> Result<RecordBatch> {
        if entry.embedding.len() != self.dimension as usize {
            anyhow::bail!(
                "Embedding dimension mismatch for chunk {}: expected {}, got {}",
                entry.chunk_id,
                self.dimension,
                entry.embedding.len()
            );
        }

        let values = Float32Array::from(entry.embedding.clone());
        let field = Arc::new(Field::new("item", DataType::Float32, true));
        let embeddings = FixedSizeListArray::try_new(
            field,
            self.dimension,
            Arc::new(values) as Arc<dyn Array>,
            None,
        )
        .context("Failed to create embedding array")?;

        RecordBatch::try_new(
            Arc::new(self.schema()),
            vec![
                Arc::new(Int64Array::from(vec![entry.chunk_id])),
                Arc::new(Int64Array::from(vec![entry.doc_id])),
                Arc::new(Int32Array::from(vec![entry.chunk_index])),
                Arc::new(embeddings),
            ],
        )
        .context("Failed to create RecordBatch")
    }

    /// 테이블 존재 여부 확인
    async fn table_exists(&self) -> bool {
        self.db
            .table_names()
            .execute()
            .await
            .map(|names| names.iter().any(|n| n == TABLE_NAME))
            .unwrap_or(false)
    }

    /// 테이블 열기 (없으면 None)
    async fn open_table(&self) -> Result<Option<lancedb::table::Table>> {
        if !self.table_exists().await {
            return Ok(None);
        }

        let table = self
            .db
            .open_table(TABLE_NAME)
            .execute()
            .await
            .context("Failed to open vector table")?;
        Ok(Some(table))
    }
}

#[async_trait]
impl VectorStore for LanceVectorStore {
    async fn upsert(&self, entry: &VectorEntry) -> Result<()> {
        let batch = self.entry_to_batch(entry)?;
        let schema = batch.schema();
        let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);

        match self.open_table().await? {
            Some(table) => {
                // 같은 chunk_id 행을 지우고 다시 추가 (재시도 안전)
                table
                    .delete(&format!("chunk_id = {}", entry.chunk_id))
                    .await
                    .context("Failed to replace existing embedding")?;
                table
                    .add(batches)
                    .execute()
                    .await
                    .context("Failed to add embedding")?;
            }
            None => {
                self.db
                    .create_table(TABLE_NAME, batches)
                    .execute()
                    .await
                    .context("Failed to create vector table")?;
            }
        }

        Ok(())
    }

    async fn search(
        &self,
        query_embedding: &[f32],
        limit: usize,
        doc_ids: Option<&[i64]>,
    ) -> Result<Vec<VectorMatch>> {
        let Some(table) = self.open_table().await? else {
            return Ok(vec![]);
        };

        let mut query = table
            .vector_search(query_embedding.to_vec())
            .context("Failed to create vector search")?
            .distance_type(DistanceType::Cosine)
            .limit(limit);

        if let Some(ids) = doc_ids.filter(|ids| !ids.is_empty()) {
            let list = ids
                .iter()
                .map(|id| id.to_string())
                .collect::<Vec<_>>()
                .join(", ");
            query = query.only_if(format!("doc_id IN ({})", list));
        }

        let batches: Vec<RecordBatch> = query
            .execute()
            .await
            .context("Failed to execute vector search")?
            .try_collect()
            .await?;

        let mut matches = Vec::new();

        for batch in batches {
            let chunk_ids = batch
                .column_by_name("chunk_id")
                .and_then(|c| c.as_any().downcast_ref::<Int64Array>())
                .ok_or_else(|| anyhow::anyhow!("Missing chunk_id column"))?;

            let doc_ids = batch
                .column_by_name("doc_id")
                .and_then(|c| c.as_any().downcast_ref::<Int64Array>())
                .ok_or_else(|| anyhow::anyhow!("Missing doc_id column"))?;

            // _distance 컬럼 (LanceDB가 자동 추가)
            let distances = batch
                .column_by_name("_distance")
                .and_then(|c| c.as_any().downcast_ref::<Float32Array>())
                .ok_or_else(|| anyhow::anyhow!("Missing _distance column"))?;

            for i in 0..batch.num_rows() {
                matches.push(VectorMatch {
                    chunk_id: chunk_ids.value(i),
                    doc_id: doc_ids.value(i),
                    similarity: 1.0 - distances.value(i),
                });
            }
        }

        Ok(matches)
    }

    async fn delete_by_doc_id(&self, doc_id: i64) -> Result<usize> {
        let Some(table) = self.open_table().await? else {
            return Ok(0);
        };

        // doc_id는 i64로 검증됨 - 필터 인젝션 불가
        let filter = format!("doc_id = {}", doc_id);
        let before = table
            .count_rows(Some(filter.clone()))
            .await
            .context("Failed to count rows for doc_id")?;

        if before > 0 {
            table
                .delete(&filter)
                .await
                .context("Failed to delete vectors")?;
        }

        Ok(before)
    }

    async fn count(&self) -> Result<usize> {
        let Some(table) = self.open_table().await? else {
            return Ok(0);
        };
        table.count_rows(None).await.context("Failed to count rows")
    }

    async fn has_embedding(&self, chunk_id: i64) -> Result<bool> {
        let Some(table) = self.open_table().await? else {
            return Ok(false);
        };

        let count = table
            .count_rows(Some(format!("chunk_id = {}", chunk_id)))
            .await
            .context("Failed to count rows for chunk_id")?;

        Ok(count > 0)
    }
}

// ============================================================================
// Tests
// ============================================================================
