//! PDF 텍스트 추출 모듈
//!
//! pdf-extract 크레이트로 메모리상의 PDF 바이트에서 원시 텍스트를 추출합니다.

use anyhow::{Context, Result};

/// PDF 바이트에서 텍스트 추출
///
/// 페이지 구분(폼피드)은 그대로 두며 공백 정리는 호출자가 수행합니다.
pub fn extract_text(bytes: &[u8]) -> Result<String> {
    if !looks_like_pdf_bytes(bytes) {
        anyhow::bail!("Missing %PDF header ({} bytes)", bytes.len());
    }

    let text = pdf_extract::extract_text_from_mem(bytes).context("Failed to extract text from PDF")?;

    if text.trim().is_empty() {
        tracing::warn!("No text extracted from PDF. It might be a scanned document.");
    }

    Ok(text)
}

/// PDF 매직 넘버 확인 (선행 공백 허용)
pub fn looks_like_pdf_bytes(bytes: &[u8]) -> bool {
    let head = &bytes[..bytes.len().min(1024)];
    head.windows(5).any(|w| w == b"%PDF-")
}

// ============================================================================
// Tests
// ============================================================================
