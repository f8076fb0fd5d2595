//! Knowledge Store - rusqlite 기반 문서/청크 저장소
//!
//! 정규화된 문서와 파생 청크를 저장하고 FTS5 키워드 검색을 제공합니다.
//! 저장 위치: ~/.ontario-law-rag/knowledge.db
//!
//! - 문서 식별자는 정규 URL (UNIQUE), 재수집 시 id는 유지
//! - 청크는 문서에 종속 (ON DELETE CASCADE), 문서 내 idx는 0부터 연속

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, params_from_iter, Connection, OpenFlags, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

// ============================================================================
// Types
// ============================================================================

/// 저장된 문서 엔트리
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: i64,
    pub url: String,
    pub title: String,
    pub jurisdiction: String,
    pub act_name: Option<String>,
    pub section: Option<String>,
    pub content: String,
    pub last_checked: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 문서 upsert 입력
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub url: String,
    pub title: String,
    pub jurisdiction: String,
    pub act_name: Option<String>,
    pub section: Option<String>,
    pub content: String,
}

/// 저장된 청크
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub id: i64,
    pub doc_id: i64,
    pub idx: i64,
    pub text: String,
}

/// 키워드 검색 결과 (문서 단위)
#[derive(Debug, Clone)]
pub struct KeywordHit {
    pub doc_id: i64,
    pub title: String,
    pub act_name: Option<String>,
    pub section: Option<String>,
    pub url: String,
    /// 관련도 (높을수록 좋음, 부분 문자열 매치는 0)
    pub score: f64,
}

/// 출처 조회용 문서 요약
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentSummary {
    pub id: i64,
    pub title: String,
    pub act_name: Option<String>,
    pub section: Option<String>,
    pub url: String,
}

/// 저장소 통계
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub document_count: usize,
    pub chunk_count: usize,
    pub embedded_chunk_count: usize,
    pub total_content_bytes: usize,
    pub db_path: PathBuf,
}

const DOC_COLUMNS: &str =
    "id, url, title, jurisdiction, act_name, section, content, last_checked, updated_at";

/// plainto_tsquery('english')처럼 버리는 불용어
const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "can", "do", "does", "for", "from",
    "how", "i", "if", "in", "into", "is", "it", "me", "my", "of", "on", "or", "so", "than",
    "that", "the", "their", "then", "there", "these", "they", "this", "to", "was", "what",
    "when", "where", "which", "who", "why", "will", "with", "you", "your",
];

// ============================================================================
// KnowledgeStore
// ============================================================================

/// Knowledge Store - 동기 문서 저장소
///
/// SQLite 기반 문서/청크 저장 및 FTS5 키워드 검색을 제공합니다.
pub struct KnowledgeStore {
    conn: Arc<Mutex<Connection>>,
    db_path: PathBuf,
}

impl KnowledgeStore {
    /// 저장소 열기 (없으면 생성)
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).context("Failed to create database directory")?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .context("Failed to open SQLite database")?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: path.to_path_buf(),
        };

        store.initialize()?;
        Ok(store)
    }

    /// DB 경로 반환
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))
    }

    /// 스키마 초기화
    fn initialize(&self) -> Result<()> {
        let conn = self.lock()?;

        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS documents (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                url TEXT NOT NULL UNIQUE,
                title TEXT NOT NULL,
                jurisdiction TEXT NOT NULL,
                act_name TEXT,
                section TEXT,
                content TEXT NOT NULL,
                last_checked TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_documents_updated_at ON documents(updated_at);

            CREATE TABLE IF NOT EXISTS chunks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                doc_id INTEGER NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
                idx INTEGER NOT NULL,
                text TEXT NOT NULL,
                embedded INTEGER NOT NULL DEFAULT 0,
                UNIQUE(doc_id, idx)
            );

            CREATE INDEX IF NOT EXISTS idx_chunks_doc_id ON chunks(doc_id);
            "#,
        )
        .context("Failed to create tables")?;

        // FTS5 가상 테이블 (키워드 검색용)
        // source: https://www.sqlite.org/fts5.html
        conn.execute_batch(
            r#"
            CREATE VIRTUAL TABLE IF NOT EXISTS documents_fts USING fts5(
                title,
                section,
                content,
                content=documents,
                content_rowid=id,
                tokenize='porter unicode61'
            );

            CREATE TRIGGER IF NOT EXISTS documents_ai AFTER INSERT ON documents BEGIN
                INSERT INTO documents_fts(rowid, title, section, content)
                VALUES (new.id, new.title, new.section, new.content);
            END;

            CREATE TRIGGER IF NOT EXISTS documents_ad AFTER DELETE ON documents BEGIN
                INSERT INTO documents_fts(documents_fts, rowid, title, section, content)
                VALUES('delete', old.id, old.title, old.section, old.content);
            END;

            CREATE TRIGGER IF NOT EXISTS documents_au AFTER UPDATE ON documents BEGIN
                INSERT INTO documents_fts(documents_fts, rowid, title, section, content)
                VALUES('delete', old.id, old.title, old.section, old.content);
                INSERT INTO documents_fts(rowid, title, section, content)
                VALUES (new.id, new.title, new.section, new.content);
            END;
            "#,
        )
        .context("Failed to create FTS5 index")?;

        tracing::debug!("Knowledge store initialized at {:?}", self.db_path);
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Documents
    // ------------------------------------------------------------------------

    /// 문서 upsert (URL이 같으면 내용 갱신, id 유지)
    pub fn upsert_document(&self, doc: &NewDocument) -> Result<i64> {
        let conn = self.lock()?;
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);

        let id: i64 = conn
            .query_row(
                "INSERT INTO documents
                    (url, title, jurisdiction, act_name, section, content, last_checked, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7, ?7)
                 ON CONFLICT(url) DO UPDATE SET
                    title = excluded.title,
                    jurisdiction = excluded.jurisdiction,
                    act_name = excluded.act_name,
                    section = excluded.section,
                    content = excluded.content,
                    last_checked = excluded.last_checked,
                    updated_at = excluded.updated_at
                 RETURNING id",
                params![
                    doc.url,
                    doc.title,
                    doc.jurisdiction,
                    doc.act_name,
                    doc.section,
                    doc.content,
                    now
                ],
                |row| row.get(0),
            )
            .context("Failed to upsert document")?;

        tracing::debug!("Upserted document: {} (id={})", doc.url, id);
        Ok(id)
    }

    /// ID로 문서 조회
    pub fn get_document(&self, id: i64) -> Result<Option<Document>> {
        let conn = self.lock()?;
        let sql = format!("SELECT {} FROM documents WHERE id = ?1", DOC_COLUMNS);
        let doc = conn
            .query_row(&sql, params![id], row_to_document)
            .optional()?;
        Ok(doc)
    }

    /// URL로 문서 조회
    pub fn get_by_url(&self, url: &str) -> Result<Option<Document>> {
        let conn = self.lock()?;
        let sql = format!("SELECT {} FROM documents WHERE url = ?1", DOC_COLUMNS);
        let doc = conn
            .query_row(&sql, params![url], row_to_document)
            .optional()?;
        Ok(doc)
    }

    /// 여러 ID의 문서 조회
    pub fn documents_by_ids(&self, ids: &[i64]) -> Result<HashMap<i64, Document>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let conn = self.lock()?;
        let sql = format!(
            "SELECT {} FROM documents WHERE id IN ({})",
            DOC_COLUMNS,
            placeholders(ids.len())
        );
        let mut stmt = conn.prepare(&sql)?;
        let docs = stmt
            .query_map(params_from_iter(ids.iter()), row_to_document)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(docs.into_iter().map(|d| (d.id, d)).collect())
    }

    /// 최근 갱신된 문서 요약
    pub fn recent_documents(&self, limit: usize) -> Result<Vec<DocumentSummary>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, title, act_name, section, url FROM documents
             ORDER BY updated_at DESC, id DESC
             LIMIT ?1",
        )?;

        let rows = stmt
            .query_map(params![limit as i64], row_to_summary)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(rows)
    }

    /// 문서 삭제 (청크는 CASCADE)
    pub fn delete_document(&self, id: i64) -> Result<bool> {
        let conn = self.lock()?;
        let rows = conn.execute("DELETE FROM documents WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    // ------------------------------------------------------------------------
    // Chunks
    // ------------------------------------------------------------------------

    /// 문서의 기존 청크 전체 삭제
    pub fn delete_chunks_for_document(&self, doc_id: i64) -> Result<usize> {
        let conn = self.lock()?;
        let rows = conn.execute("DELETE FROM chunks WHERE doc_id = ?1", params![doc_id])?;
        Ok(rows)
    }

    /// 청크 삽입
    pub fn insert_chunk(&self, doc_id: i64, idx: i64, text: &str) -> Result<i64> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO chunks (doc_id, idx, text) VALUES (?1, ?2, ?3)",
            params![doc_id, idx, text],
        )
        .context("Failed to insert chunk")?;
        Ok(conn.last_insert_rowid())
    }

    /// 문서의 청크 수
    pub fn chunk_count(&self, doc_id: i64) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM chunks WHERE doc_id = ?1",
            params![doc_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// 임베딩 완료 표시
    pub fn mark_chunk_embedded(&self, chunk_id: i64) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE chunks SET embedded = 1 WHERE id = ?1",
            params![chunk_id],
        )?;
        Ok(())
    }

    /// 여러 ID의 청크 조회
    pub fn chunks_by_ids(&self, ids: &[i64]) -> Result<HashMap<i64, Chunk>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let conn = self.lock()?;
        let sql = format!(
            "SELECT id, doc_id, idx, text FROM chunks WHERE id IN ({})",
            placeholders(ids.len())
        );
        let mut stmt = conn.prepare(&sql)?;
        let chunks = stmt
            .query_map(params_from_iter(ids.iter()), row_to_chunk)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(chunks.into_iter().map(|c| (c.id, c)).collect())
    }

    /// 문서의 청크 (idx 순)
    pub fn chunks_for_document(&self, doc_id: i64) -> Result<Vec<Chunk>> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT id, doc_id, idx, text FROM chunks WHERE doc_id = ?1 ORDER BY idx")?;
        let chunks = stmt
            .query_map(params![doc_id], row_to_chunk)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(chunks)
    }

    /// 임베딩이 없는 청크 (재시도 대상)
    pub fn chunks_missing_embeddings(&self, limit: usize) -> Result<Vec<Chunk>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, doc_id, idx, text FROM chunks
             WHERE embedded = 0
             ORDER BY doc_id, idx
             LIMIT ?1",
        )?;
        let chunks = stmt
            .query_map(params![limit as i64], row_to_chunk)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(chunks)
    }

    // ------------------------------------------------------------------------
    // Search
    // ------------------------------------------------------------------------

    /// 키워드 검색 (FTS5 BM25 + 제목/조항 부분 문자열 폴백)
    ///
    /// source: https://www.sqlite.org/fts5.html#the_bm25_function
    pub fn keyword_search(&self, query: &str, limit: usize) -> Result<Vec<KeywordHit>> {
        let query = query.trim();
        if query.is_empty() || limit == 0 {
            return Ok(vec![]);
        }

        let conn = self.lock()?;
        let mut hits: Vec<KeywordHit> = Vec::new();

        let fts_query = build_fts_query(query);
        if !fts_query.is_empty() {
            let mut stmt = conn.prepare(
                r#"
                SELECT d.id, d.title, d.act_name, d.section, d.url, bm25(documents_fts) AS rank
                FROM documents_fts
                JOIN documents d ON d.id = documents_fts.rowid
                WHERE documents_fts MATCH ?1
                ORDER BY rank
                LIMIT ?2
                "#,
            )?;

            let rows = stmt
                .query_map(params![fts_query, limit as i64], |row| {
                    Ok(KeywordHit {
                        doc_id: row.get(0)?,
                        title: row.get(1)?,
                        act_name: row.get(2)?,
                        section: row.get(3)?,
                        url: row.get(4)?,
                        score: -row.get::<_, f64>(5)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()
                .context("FTS5 keyword search failed")?;

            hits.extend(rows);
        }

        // 제목/조항 부분 문자열 폴백
        if hits.len() < limit {
            let pattern = format!("%{}%", escape_like(&query.to_lowercase()));
            let mut stmt = conn.prepare(
                r#"
                SELECT id, title, act_name, section, url
                FROM documents
                WHERE LOWER(title) LIKE ?1 ESCAPE '\'
                   OR LOWER(COALESCE(section, '')) LIKE ?1 ESCAPE '\'
                ORDER BY updated_at DESC, id DESC
                LIMIT ?2
                "#,
            )?;

            let rows = stmt
                .query_map(params![pattern, limit as i64], |row| {
                    Ok(KeywordHit {
                        doc_id: row.get(0)?,
                        title: row.get(1)?,
                        act_name: row.get(2)?,
                        section: row.get(3)?,
                        url: row.get(4)?,
                        score: 0.0,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            for row in rows {
                if hits.len() >= limit {
                    break;
                }
                if !hits.iter().any(|h| h.doc_id == row.doc_id) {
                    hits.push(row);
                }
            }
        }

        Ok(hits)
    }

    /// 출처 조회: 빈 쿼리면 최근 갱신순, 아니면 FTS 관련도순
    pub fn search_sources(&self, query: &str, limit: usize) -> Result<Vec<DocumentSummary>> {
        let query = query.trim();
        if query.is_empty() {
            return self.recent_documents(limit);
        }

        let fts_query = build_fts_query(query);
        if fts_query.is_empty() {
            return Ok(vec![]);
        }

        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT d.id, d.title, d.act_name, d.section, d.url
            FROM documents_fts
            JOIN documents d ON d.id = documents_fts.rowid
            WHERE documents_fts MATCH ?1
            ORDER BY bm25(documents_fts)
            LIMIT ?2
            "#,
        )?;

        let rows = stmt
            .query_map(params![fts_query, limit as i64], row_to_summary)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(rows)
    }

    // ------------------------------------------------------------------------
    // Maintenance
    // ------------------------------------------------------------------------

    /// 저장소 통계
    pub fn stats(&self) -> Result<StoreStats> {
        let conn = self.lock()?;

        let (document_count, total_content_bytes): (i64, i64) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(LENGTH(CAST(content AS BLOB))), 0) FROM documents",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        let (chunk_count, embedded_chunk_count): (i64, i64) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(embedded), 0) FROM chunks",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        Ok(StoreStats {
            document_count: document_count as usize,
            chunk_count: chunk_count as usize,
            embedded_chunk_count: embedded_chunk_count as usize,
            total_content_bytes: total_content_bytes as usize,
            db_path: self.db_path.clone(),
        })
    }

    /// FTS5 인덱스 리빌드
    ///
    /// source: https://www.sqlite.org/fts5.html#the_rebuild_command
    pub fn rebuild_fts_index(&self) -> Result<usize> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO documents_fts(documents_fts) VALUES('rebuild')",
            [],
        )?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))?;

        tracing::info!("Rebuilt FTS5 index with {} documents", count);
        Ok(count as usize)
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn row_to_document(row: &Row<'_>) -> rusqlite::Result<Document> {
    Ok(Document {
        id: row.get(0)?,
        url: row.get(1)?,
        title: row.get(2)?,
        jurisdiction: row.get(3)?,
        act_name: row.get(4)?,
        section: row.get(5)?,
        content: row.get(6)?,
        last_checked: parse_datetime(row, 7)?,
        updated_at: parse_datetime(row, 8)?,
    })
}

fn row_to_chunk(row: &Row<'_>) -> rusqlite::Result<Chunk> {
    Ok(Chunk {
        id: row.get(0)?,
        doc_id: row.get(1)?,
        idx: row.get(2)?,
        text: row.get(3)?,
    })
}

fn row_to_summary(row: &Row<'_>) -> rusqlite::Result<DocumentSummary> {
    Ok(DocumentSummary {
        id: row.get(0)?,
        title: row.get(1)?,
        act_name: row.get(2)?,
        section: row.get(3)?,
        url: row.get(4)?,
    })
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

/// RFC3339 컬럼을 DateTime<Utc>로 파싱 (손상된 값은 변환 에러)
fn parse_datetime(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

/// FTS5 쿼리 구성
///
/// 영숫자 단어만 추출하고 불용어를 제거한 뒤 각 단어를 따옴표로 감쌉니다.
/// 공백으로 연결된 구문은 FTS5에서 AND로 해석됩니다.
/// source: https://www.sqlite.org/fts5.html#full_text_query_syntax
fn build_fts_query(query: &str) -> String {
    query
        .split(|c: char| !c.is_alphanumeric())
        .map(|w| w.to_lowercase())
        .filter(|w| !w.is_empty() && !STOP_WORDS.contains(&w.as_str()))
        .map(|w| format!("\"{}\"", w))
        .collect::<Vec<_>>()
        .join(" ")
}

/// LIKE 패턴 이스케이프
fn escape_like(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

// ============================================================================
// Tests
// ============================================================================
