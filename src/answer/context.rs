//! Context Assembler - 검색 청크 → 근거 묶음
//!
//! 유사도 내림차순으로 청크를 받아들이되, 전체 `max_total`개,
//! 문서당 `max_per_doc`개를 넘지 않습니다. 문서 상한에 걸린 청크는
//! 건너뛰며 다른 문서의 청크로 채우지 않습니다.

use std::collections::HashMap;

use serde::Serialize;

use crate::knowledge::RankedChunk;
use crate::normalizer::truncate_chars;

/// 기본 문서당 청크 수
pub const DEFAULT_MAX_PER_DOC: usize = 2;
/// 기본 전체 청크 수
pub const DEFAULT_MAX_TOTAL: usize = 8;

/// 렌더링 발췌 길이 (문자)
const EXCERPT_CHARS: usize = 800;
/// 인용 스니펫 길이 (문자)
const SNIPPET_CHARS: usize = 280;

// ============================================================================
// Types
// ============================================================================

/// 인용 레코드
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Citation {
    /// 법령명, 없으면 문서 제목
    pub act: String,
    pub section: String,
    pub url: String,
    pub snippet: String,
    /// 자리표시 점수 (재정규화하지 않음)
    pub score: f32,
}

/// 질의 단위 근거 묶음 (저장하지 않음)
#[derive(Debug, Clone, Default)]
pub struct EvidenceBundle {
    /// 선택된 청크 (유사도 순)
    pub items: Vec<RankedChunk>,
    /// 렌더링된 근거 문서
    pub markdown: String,
    /// items와 같은 순서의 인용
    pub citations: Vec<Citation>,
}

impl EvidenceBundle {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

// ============================================================================
// Assembly
// ============================================================================

/// 근거 묶음 생성
pub fn build_context(chunks: &[RankedChunk], max_per_doc: usize, max_total: usize) -> EvidenceBundle {
    let mut sorted: Vec<&RankedChunk> = chunks.iter().collect();
    // 안정 정렬 - 동점은 입력 순서
    sorted.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut per_doc: HashMap<i64, usize> = HashMap::new();
    let mut items: Vec<RankedChunk> = Vec::new();

    for chunk in sorted {
        if items.len() >= max_total {
            break;
        }
        let count = per_doc.entry(chunk.doc_id).or_insert(0);
        if *count >= max_per_doc {
            continue;
        }
        *count += 1;
        items.push(chunk.clone());
    }

    let markdown = items.iter().map(render_section).collect::<Vec<_>>().join("\n");
    let citations = items.iter().map(citation_for).collect();

    EvidenceBundle {
        items,
        markdown,
        citations,
    }
}

/// 청크 하나의 근거 섹션
fn render_section(chunk: &RankedChunk) -> String {
    let mut out = format!("### {}", chunk.title);
    if let Some(section) = chunk.section.as_deref() {
        out.push_str(&format!(" — {}", section));
    }
    out.push('\n');
    if let Some(act) = chunk.act_name.as_deref() {
        out.push_str(&format!("Act: {}\n", act));
    }
    out.push_str(&format!("URL: {}\n", chunk.url));
    out.push_str(&format!("> {}\n", truncate_chars(&chunk.text, EXCERPT_CHARS)));
    out
}

fn citation_for(chunk: &RankedChunk) -> Citation {
    Citation {
        act: chunk.act_name.clone().unwrap_or_else(|| chunk.title.clone()),
        section: chunk.section.clone().unwrap_or_default(),
        url: chunk.url.clone(),
        snippet: truncate_chars(&chunk.text, SNIPPET_CHARS).to_string(),
        score: 0.0,
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(chunk_id: i64, doc_id: i64, similarity: f32) -> RankedChunk {
        RankedChunk {
            chunk_id,
            doc_id,
            chunk_index: 0,
            text: format!("chunk {} text", chunk_id),
            similarity,
            title: format!("Doc {}", doc_id),
            act_name: None,
            section: None,
            url: format!("https://www.ontario.ca/doc/{}", doc_id),
        }
    }

    #[test]
    fn test_caps_hold_for_skewed_pool() {
        // 한 문서에 유사도 높은 청크가 몰린 경우
        let mut pool: Vec<RankedChunk> = (0..10).map(|i| chunk(i, 1, 0.9 - i as f32 * 0.01)).collect();
        pool.extend((10..20).map(|i| chunk(i, (i % 3) + 2, 0.5)));

        let bundle = build_context(&pool, 2, 8);
        assert!(bundle.items.len() <= 8);

        let mut per_doc: HashMap<i64, usize> = HashMap::new();
        for item in &bundle.items {
            *per_doc.entry(item.doc_id).or_default() += 1;
        }
        assert!(per_doc.values().all(|&n| n <= 2));
        assert_eq!(per_doc[&1], 2);
        // 문서 1의 상위 두 청크가 먼저 선택됨
        assert_eq!(bundle.items[0].chunk_id, 0);
        assert_eq!(bundle.items[1].chunk_id, 1);
        assert_eq!(bundle.citations.len(), bundle.items.len());
    }

    #[test]
    fn test_total_cap_and_sort() {
        let pool: Vec<RankedChunk> = (0..6).map(|i| chunk(i, i, i as f32 / 10.0)).collect();
        let bundle = build_context(&pool, 2, 3);
        let ids: Vec<i64> = bundle.items.iter().map(|c| c.chunk_id).collect();
        assert_eq!(ids, vec![5, 4, 3]);
    }

    #[test]
    fn test_empty_pool() {
        let bundle = build_context(&[], 2, 8);
        assert!(bundle.is_empty());
        assert!(bundle.markdown.is_empty());
        assert!(bundle.citations.is_empty());
    }

    #[test]
    fn test_rendering_and_citation_fields() {
        let mut c = chunk(1, 7, 0.8);
        c.title = "Residential Tenancies Act, 2006".to_string();
        c.act_name = Some("Residential Tenancies Act, 2006".to_string());
        c.section = Some("s. 120".to_string());
        c.text = "x".repeat(1000);

        let bundle = build_context(&[c, chunk(2, 8, 0.1)], 2, 8);
        let first = bundle.markdown.split("\n\n").next().unwrap();
        assert!(first.starts_with("### Residential Tenancies Act, 2006 — s. 120\n"));
        assert!(first.contains("Act: Residential Tenancies Act, 2006\nURL: https://www.ontario.ca/doc/7\n"));
        assert!(first.contains(&format!("> {}\n", "x".repeat(800))));
        assert!(!first.contains(&"x".repeat(801)));

        assert!(bundle.markdown.contains("### Doc 8\nURL: https://www.ontario.ca/doc/8\n"));

        let cite = &bundle.citations[0];
        assert_eq!(cite.act, "Residential Tenancies Act, 2006");
        assert_eq!(cite.section, "s. 120");
        assert_eq!(cite.snippet.chars().count(), 280);
        assert_eq!(cite.score, 0.0);

        // 법령명이 없으면 제목
        assert_eq!(bundle.citations[1].act, "Doc 8");
        assert_eq!(bundle.citations[1].section, "");
    }
}
