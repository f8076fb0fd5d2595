//! 텍스트 정규화 모듈 - URL/HTML/PDF를 단일 텍스트로 변환
//!
//! HTML에서는 script/style/nav/header/footer를 제외한 본문 텍스트를,
//! PDF에서는 원시 텍스트를 추출한 뒤 공백을 정리하고 길이를 제한합니다.
//!
//! 제목/법령명/조항 메타데이터는 패턴 매칭에 의한 추정치입니다.
//! 정확한 분류를 보장하지 않으며, 값이 없거나 그럴듯한 라벨 하나가 나올 뿐입니다.

pub mod pdf;

use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{Context, Result};
use regex::Regex;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use scraper::{ElementRef, Html, Node, Selector};
use serde::Serialize;

use crate::config::Settings;
use crate::error::IngestError;

/// HTML과 PDF를 구분하는 Accept 헤더
const ACCEPT_HEADER: &str = "text/html,application/pdf;q=0.9,*/*;q=0.8";

/// 수집기 User-Agent
const USER_AGENT: &str = concat!("ontario-law-rag-ingester/", env!("CARGO_PKG_VERSION"));

/// 본문에서 제외할 요소
const SKIPPED_ELEMENTS: &[&str] = &["script", "style", "nav", "header", "footer", "noscript"];

// ============================================================================
// Types
// ============================================================================

/// 정규화된 문서
#[derive(Debug, Clone, Serialize)]
pub struct NormalizedDocument {
    /// 정규 URL
    pub url: String,
    /// 공백 정리 + 길이 제한된 본문
    pub text: String,
    /// 제목 (h1 > title > URL)
    pub title: String,
    /// 제목에 "Act"가 들어가면 제목 그대로 (추정)
    pub act_name: Option<String>,
    /// 첫 h2에서 찾은 조항 라벨 (예: "s. 12A")
    pub section: Option<String>,
    /// 응답 Content-Type (직접 받은 HTML이면 없음)
    pub content_type: Option<String>,
}

// ============================================================================
// Normalizer
// ============================================================================

/// 문서 페처 + 정규화기
pub struct Normalizer {
    client: reqwest::Client,
    max_text_chars: usize,
}

impl Normalizer {
    /// 설정으로 생성 (타임아웃, 리다이렉트 상한 적용)
    pub fn new(settings: &Settings) -> Result<Self> {
        Self::with_limits(
            settings.fetch_timeout,
            settings.fetch_max_redirects,
            settings.max_text_chars,
        )
    }

    pub fn with_limits(timeout: Duration, max_redirects: usize, max_text_chars: usize) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(max_redirects))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            max_text_chars,
        })
    }

    /// 문서 하나를 정규화
    ///
    /// `html`이 주어지면 페치를 생략합니다.
    pub async fn normalize(
        &self,
        url: &str,
        html: Option<&str>,
    ) -> std::result::Result<NormalizedDocument, IngestError> {
        if let Some(markup) = html {
            return Ok(self.normalize_html(url, markup, None));
        }

        let (bytes, content_type) = self.fetch(url).await?;

        if is_pdf_response(url, content_type.as_deref(), &bytes) {
            self.normalize_pdf(url, bytes, content_type).await
        } else {
            let markup = String::from_utf8_lossy(&bytes);
            Ok(self.normalize_html(url, &markup, content_type))
        }
    }

    /// URL에서 원시 바이트와 Content-Type 가져오기
    async fn fetch(&self, url: &str) -> std::result::Result<(Vec<u8>, Option<String>), IngestError> {
        tracing::info!("Fetching: {}", url);

        let response = self
            .client
            .get(url)
            .header(ACCEPT, ACCEPT_HEADER)
            .send()
            .await
            .map_err(|e| IngestError::fetch(url, e))?
            .error_for_status()
            .map_err(|e| IngestError::fetch(url, e))?;

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        let bytes = response
            .bytes()
            .await
            .map_err(|e| IngestError::fetch(url, e))?;

        Ok((bytes.to_vec(), content_type))
    }

    /// PDF 정규화 (CPU 바운드이므로 spawn_blocking)
    async fn normalize_pdf(
        &self,
        url: &str,
        bytes: Vec<u8>,
        content_type: Option<String>,
    ) -> std::result::Result<NormalizedDocument, IngestError> {
        let raw = tokio::task::spawn_blocking(move || pdf::extract_text(&bytes))
            .await
            .map_err(|e| IngestError::parse(url, format!("PDF extraction task failed: {}", e)))?
            .map_err(|e| IngestError::parse(url, format!("{:#}", e)))?;

        // PDF 제목은 신뢰하기 어려우므로 URL 사용
        let title = url.to_string();

        Ok(NormalizedDocument {
            url: url.to_string(),
            text: sanitize_text(&raw, self.max_text_chars),
            act_name: act_name_for(&title),
            title,
            section: None,
            content_type,
        })
    }

    /// HTML 정규화
    pub fn normalize_html(
        &self,
        url: &str,
        markup: &str,
        content_type: Option<String>,
    ) -> NormalizedDocument {
        let document = Html::parse_document(markup);

        let title = first_text(&document, "h1")
            .or_else(|| first_text(&document, "title"))
            .unwrap_or_else(|| url.to_string());

        let section = first_text(&document, "h2").and_then(|h2| section_label(&h2));

        let body = extract_body_text(&document);

        NormalizedDocument {
            url: url.to_string(),
            text: sanitize_text(&body, self.max_text_chars),
            act_name: act_name_for(&title),
            title,
            section,
            content_type,
        }
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// URL 확장자 또는 Content-Type으로 PDF 판별
pub fn looks_like_pdf(url: &str, content_type: Option<&str>) -> bool {
    let ct = content_type.unwrap_or_default().to_lowercase();
    ct.contains("application/pdf") || url.to_lowercase().ends_with(".pdf")
}

/// 페치 응답이 PDF인지 (헤더/URL, 아니면 %PDF 매직)
fn is_pdf_response(url: &str, content_type: Option<&str>, bytes: &[u8]) -> bool {
    looks_like_pdf(url, content_type) || pdf::looks_like_pdf_bytes(bytes)
}

/// 공백 정리 (NBSP 포함) + 문자 수 제한
pub fn sanitize_text(text: &str, max_chars: usize) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    truncate_chars(&collapsed, max_chars).to_string()
}

/// 문자 수 기준으로 자르기 (UTF-8 안전)
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// 제목에 "Act"가 들어가면 법령명으로 간주 (휴리스틱)
pub fn act_name_for(title: &str) -> Option<String> {
    if title.to_lowercase().contains("act") {
        Some(title.to_string())
    } else {
        None
    }
}

/// 조항 번호 패턴 추출 (예: "s. 12A", "s 7", "s.45.1")
pub fn section_label(text: &str) -> Option<String> {
    static SECTION_RE: OnceLock<Regex> = OnceLock::new();
    let re = SECTION_RE
        .get_or_init(|| Regex::new(r"\bs\.?\s?\d+[A-Za-z\-]*").expect("valid section regex"));

    re.find(text).map(|m| m.as_str().to_string())
}

/// 선택자에 맞는 첫 요소의 텍스트 (boilerplate 요소 안쪽은 건너뜀)
fn first_text(document: &Html, selector: &str) -> Option<String> {
    let selector = Selector::parse(selector).ok()?;
    let element = document
        .select(&selector)
        .find(|element| !inside_skipped(element))?;
    let text = element.text().collect::<Vec<_>>().join(" ");
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

fn inside_skipped(element: &ElementRef) -> bool {
    element.ancestors().any(|node| {
        node.value()
            .as_element()
            .is_some_and(|e| SKIPPED_ELEMENTS.contains(&e.name()))
    })
}

/// body 텍스트 추출 (boilerplate 요소 제외)
fn extract_body_text(document: &Html) -> String {
    let root = Selector::parse("body")
        .ok()
        .and_then(|selector| document.select(&selector).next())
        .unwrap_or_else(|| document.root_element());

    let mut text = String::new();
    collect_text(root, &mut text);
    text
}

fn collect_text(element: ElementRef, out: &mut String) {
    for child in element.children() {
        match child.value() {
            Node::Text(t) => {
                out.push_str(t);
                out.push(' ');
            }
            Node::Element(e) if SKIPPED_ELEMENTS.contains(&e.name()) => {}
            Node::Element(_) => {
                if let Some(child_element) = ElementRef::wrap(child) {
                    collect_text(child_element, out);
                }
            }
            _ => {}
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
