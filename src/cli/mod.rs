//! CLI 모듈
//!
//! ontario-law-rag CLI 명령어 정의 및 구현
//!
//! 요청/응답 형식이 있는 명령(ingest, ask, sources, reembed)은 JSON을 출력합니다.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;

use crate::answer::OpenAiGenerator;
use crate::ask::{AskRequest, AskService};
use crate::config::Settings;
use crate::embedding::{dimension_for_model, has_api_key, EmbeddingProvider, OpenAiEmbedding};
use crate::ingest::{delete_document, IngestDoc, IngestRequest, Ingestor};
use crate::knowledge::{HybridRetriever, KnowledgeStore, LanceVectorStore, VectorStore};

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser)]
#[command(name = "ontario-law-rag")]
#[command(version, about = "온타리오 법령 하이브리드 RAG", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// URL 또는 매니페스트의 문서를 수집
    Ingest {
        /// 수집할 URL (반복 가능)
        #[arg(short, long)]
        url: Vec<String>,

        /// 수집 요청 JSON 파일 (`{"docs":[{"url":..,"html":..}]}`)
        #[arg(short, long)]
        manifest: Option<PathBuf>,
    },

    /// 질문하기
    Ask {
        /// 질문
        query: String,

        /// 주제 태그 (예: tenancy, traffic)
        #[arg(short, long)]
        topic: Option<String>,

        /// 세션 ID (없으면 새로 발급)
        #[arg(short, long)]
        session_id: Option<String>,
    },

    /// 출처 문서 조회 (쿼리가 없으면 최근 갱신순)
    Sources {
        /// 검색 쿼리
        query: Option<String>,

        /// 결과 개수 제한
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// 임베딩이 누락된 청크 재시도
    Reembed {
        /// 최대 청크 수
        #[arg(short, long, default_value = "500")]
        limit: usize,
    },

    /// 문서 삭제
    Delete {
        /// 삭제할 문서 URL
        #[arg(short, long)]
        url: Option<String>,

        /// 삭제할 문서 ID
        #[arg(short, long)]
        id: Option<i64>,
    },

    /// FTS5 키워드 인덱스 리빌드
    Reindex,

    /// 상태 확인
    Status,
}

// ============================================================================
// Runtime
// ============================================================================

/// 명령 실행에 필요한 저장소 묶음
struct Runtime {
    settings: Settings,
    store: Arc<KnowledgeStore>,
    vectors: Arc<dyn VectorStore>,
}

impl Runtime {
    /// 저장소 열기 (API 키 불필요)
    async fn open(settings: Settings) -> Result<Self> {
        if !settings.data_dir.exists() {
            std::fs::create_dir_all(&settings.data_dir)
                .context("Failed to create data directory")?;
        }

        let store = KnowledgeStore::open(&settings.db_path()).context("Failed to open knowledge store")?;

        let dimension = dimension_for_model(&settings.embed_model)?;
        let vectors = LanceVectorStore::open(&settings.lance_path(), dimension)
            .await
            .context("Failed to open vector store")?;

        Ok(Self {
            settings,
            store: Arc::new(store),
            vectors: Arc::new(vectors),
        })
    }

    /// 임베딩 프로바이더 (API 키 필요)
    fn embedder(&self) -> Result<Arc<dyn EmbeddingProvider>> {
        require_api_key()?;
        let embedder =
            OpenAiEmbedding::from_env(&self.settings.embed_model, self.settings.embed_input_chars)?;
        Ok(Arc::new(embedder))
    }

    fn ingestor(&self) -> Result<Ingestor> {
        Ingestor::new(
            &self.settings,
            self.store.clone(),
            self.vectors.clone(),
            self.embedder()?,
        )
    }

    fn ask_service(&self) -> Result<AskService> {
        let retriever = HybridRetriever::new(self.store.clone(), self.vectors.clone(), self.embedder()?)
            .with_limits(self.settings.keyword_limit, self.settings.vector_limit);
        let generator = OpenAiGenerator::from_env(&self.settings.llm_model)?;
        Ok(AskService::new(&self.settings, retriever, Arc::new(generator)))
    }
}

// ============================================================================
// CLI Runner
// ============================================================================

/// CLI 명령어 실행
pub async fn run(cli: Cli) -> Result<()> {
    let settings = Settings::from_env();
    settings.validate()?;

    let runtime = Runtime::open(settings).await?;

    match cli.command {
        Commands::Ingest { url, manifest } => cmd_ingest(&runtime, url, manifest).await,
        Commands::Ask {
            query,
            topic,
            session_id,
        } => cmd_ask(&runtime, query, topic, session_id).await,
        Commands::Sources { query, limit } => cmd_sources(&runtime, query.as_deref(), limit),
        Commands::Reembed { limit } => cmd_reembed(&runtime, limit).await,
        Commands::Delete { url, id } => cmd_delete(&runtime, url, id).await,
        Commands::Reindex => cmd_reindex(&runtime),
        Commands::Status => cmd_status(&runtime).await,
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

/// 문서 수집 명령어 (ingest)
async fn cmd_ingest(runtime: &Runtime, urls: Vec<String>, manifest: Option<PathBuf>) -> Result<()> {
    let mut request = match manifest {
        Some(path) => read_manifest(&path)?,
        None => IngestRequest::default(),
    };
    request
        .docs
        .extend(urls.into_iter().map(|url| IngestDoc { url, html: None }));

    // 검증은 API 키 확인보다 먼저
    request.validate()?;

    let report = runtime.ingestor()?.ingest(&request).await?;
    print_json(&report)
}

/// 질의 명령어 (ask)
async fn cmd_ask(
    runtime: &Runtime,
    query: String,
    topic: Option<String>,
    session_id: Option<String>,
) -> Result<()> {
    let request = AskRequest {
        query,
        topic,
        session_id,
    };
    request.validate()?;

    let response = runtime.ask_service()?.ask(&request).await?;
    print_json(&response)
}

/// 출처 조회 명령어 (sources)
fn cmd_sources(runtime: &Runtime, query: Option<&str>, limit: usize) -> Result<()> {
    let sources = runtime
        .store
        .search_sources(query.unwrap_or_default(), limit)
        .context("Failed to look up sources")?;
    print_json(&sources)
}

/// 임베딩 재시도 명령어 (reembed)
async fn cmd_reembed(runtime: &Runtime, limit: usize) -> Result<()> {
    let report = runtime.ingestor()?.retry_missing_embeddings(limit).await?;
    print_json(&report)
}

/// 삭제 명령어 (delete)
///
/// ID 또는 URL로 문서를 삭제합니다. 청크와 벡터도 함께 삭제됩니다.
async fn cmd_delete(runtime: &Runtime, url: Option<String>, id: Option<i64>) -> Result<()> {
    let document = if let Some(id) = id {
        runtime
            .store
            .get_document(id)
            .context("Failed to look up document")?
    } else if let Some(ref url_str) = url {
        runtime
            .store
            .get_by_url(url_str)
            .context("Failed to look up document")?
    } else {
        bail!("Specify either --id or --url");
    };

    let Some(document) = document else {
        println!("[!] 해당 문서를 찾을 수 없습니다");
        return Ok(());
    };

    delete_document(&runtime.store, runtime.vectors.as_ref(), document.id)
        .await
        .context("Failed to delete document")?;
    println!(
        "[OK] 문서 #{} 삭제됨: {} (청크/벡터 포함)",
        document.id, document.title
    );

    Ok(())
}

/// 리인덱스 명령어 (reindex)
fn cmd_reindex(runtime: &Runtime) -> Result<()> {
    let count = runtime
        .store
        .rebuild_fts_index()
        .context("Failed to rebuild FTS index")?;
    println!("[OK] FTS5 인덱스 리빌드 완료: 문서 {} 건", count);
    Ok(())
}

/// 상태 명령어 (status)
async fn cmd_status(runtime: &Runtime) -> Result<()> {
    println!("ontario-law-rag v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("[*] 데이터 디렉토리: {}", runtime.settings.data_dir.display());

    if has_api_key() {
        println!("[OK] API 키: 설정됨");
    } else {
        println!("[!] API 키: 미설정");
        println!("    설정: export OPENAI_API_KEY=your-key");
    }

    let stats = runtime.store.stats().context("Failed to read store stats")?;
    println!("[OK] 저장된 문서: {} 건", stats.document_count);
    println!(
        "     청크: {} (임베딩 {})",
        stats.chunk_count, stats.embedded_chunk_count
    );
    println!("     총 콘텐츠: {}", format_bytes(stats.total_content_bytes));

    match runtime.vectors.count().await {
        Ok(count) => println!("[OK] 벡터 인덱스: {} 청크", count),
        Err(e) => println!("[!] 벡터 통계 조회 실패: {}", e),
    }

    let missing = stats.chunk_count.saturating_sub(stats.embedded_chunk_count);
    if missing > 0 {
        println!("[!] 임베딩 누락 청크 {} 개 (reembed로 재시도)", missing);
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 수집 요청 JSON 파일 읽기
fn read_manifest(path: &Path) -> Result<IngestRequest> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read manifest {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Invalid manifest {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn require_api_key() -> Result<()> {
    if !has_api_key() {
        bail!(
            "API 키가 설정되지 않았습니다.\n\n\
             설정 방법:\n  \
             export OPENAI_API_KEY=your-api-key"
        );
    }
    Ok(())
}

/// 바이트 크기 포맷팅
fn format_bytes(bytes: usize) -> String {
    const KB: usize = 1024;
    const MB: usize = KB * 1024;

    if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(500), "500 B");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(1048576), "1.00 MB");
    }

    #[test]
    fn test_read_manifest() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("docs.json");
        std::fs::write(
            &path,
            r#"{"docs":[{"url":"https://www.ontario.ca/a","html":"<p>A</p>"},{"url":"https://canlii.org/b"}]}"#,
        )
        .unwrap();

        let request = read_manifest(&path).unwrap();
        assert_eq!(request.docs.len(), 2);
        assert_eq!(request.docs[0].html.as_deref(), Some("<p>A</p>"));
        assert!(request.docs[1].html.is_none());

        std::fs::write(&path, "not json").unwrap();
        assert!(read_manifest(&path).is_err());
    }

    #[test]
    fn test_cli_parses_commands() {
        let cli = Cli::parse_from([
            "ontario-law-rag",
            "ingest",
            "-u",
            "https://www.ontario.ca/a",
            "-u",
            "https://canlii.org/b",
        ]);
        match cli.command {
            Commands::Ingest { url, manifest } => {
                assert_eq!(url.len(), 2);
                assert!(manifest.is_none());
            }
            _ => panic!("expected ingest"),
        }

        let cli = Cli::parse_from([
            "ontario-law-rag",
            "ask",
            "Can my landlord raise the rent?",
            "--topic",
            "tenancy",
        ]);
        match cli.command {
            Commands::Ask {
                query,
                topic,
                session_id,
            } => {
                assert_eq!(query, "Can my landlord raise the rent?");
                assert_eq!(topic.as_deref(), Some("tenancy"));
                assert!(session_id.is_none());
            }
            _ => panic!("expected ask"),
        }

        let cli = Cli::parse_from(["ontario-law-rag", "sources"]);
        assert!(matches!(cli.command, Commands::Sources { query: None, limit: 20 }));

        let cli = Cli::try_parse_from(["ontario-law-rag", "reindex"]).unwrap();
        assert!(matches!(cli.command, Commands::Reindex));
    }
}
