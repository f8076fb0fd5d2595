//! Text Chunking Module
//!
//! 정규화된 텍스트를 겹치는 윈도우(반열림 구간 `[start, end)`)로 분할합니다.
//! 경계 탐지는 문장 부호 + 공백, 또는 줄바꿈 휴리스틱만 사용하며
//! 법률 문서의 의미 구조는 해석하지 않습니다.
//!
//! 구간은 UTF-8 바이트 오프셋이며 항상 문자 경계에 놓입니다.

use std::ops::Range;

// ============================================================================
// Chunk Configuration
// ============================================================================

/// 청킹 설정
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkConfig {
    /// 최대 청크 크기
    pub max_size: usize,
    /// 연속 청크 간 최대 오버랩
    pub overlap: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            max_size: 1000,
            overlap: 150,
        }
    }
}

impl ChunkConfig {
    /// 텍스트에 대한 청크 구간 이터레이터 생성
    ///
    /// 호출할 때마다 처음부터 다시 시작하는 새 이터레이터를 반환합니다.
    pub fn ranges<'a>(&self, text: &'a str) -> ChunkRanges<'a> {
        ChunkRanges {
            text,
            config: *self,
            next_start: 0,
        }
    }
}

/// 청크 구간 이터레이터 생성 (함수형 진입점)
pub fn chunk_ranges<'a>(text: &'a str, config: &ChunkConfig) -> ChunkRanges<'a> {
    config.ranges(text)
}

// ============================================================================
// ChunkRanges
// ============================================================================

/// 지연 평가되는 청크 구간 커서
///
/// - `start`는 단조 증가
/// - `[0, len)`의 모든 위치는 최소 한 구간에 포함
/// - 연속 구간의 겹침은 `overlap` 이하
#[derive(Debug, Clone)]
pub struct ChunkRanges<'a> {
    text: &'a str,
    config: ChunkConfig,
    next_start: usize,
}

impl Iterator for ChunkRanges<'_> {
    type Item = Range<usize>;

    fn next(&mut self) -> Option<Self::Item> {
        let len = self.text.len();
        let start = self.next_start;
        if start >= len {
            return None;
        }

        let max = self.config.max_size.max(1);

        let mut hard_end = floor_char_boundary(self.text, start.saturating_add(max));
        if hard_end <= start {
            // max가 문자 하나보다 작은 경우에도 진행 보장
            hard_end = ceil_char_boundary(self.text, start + 1);
        }

        let end = if hard_end >= len {
            len
        } else {
            let midpoint = start + max / 2;
            match last_boundary(self.text.as_bytes(), start, hard_end) {
                Some(boundary) if boundary > midpoint => boundary + 1,
                _ => hard_end,
            }
        };

        self.next_start = if end >= len {
            len
        } else {
            let back = ceil_char_boundary(self.text, end.saturating_sub(self.config.overlap));
            if back > start {
                back
            } else {
                end
            }
        };

        Some(start..end)
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// `[start, hard_end)` 안에서 마지막 문장 경계 위치
///
/// 문장 부호(`.`, `?`, `!`) 뒤에 공백이 오거나 줄바꿈인 위치를 찾습니다.
fn last_boundary(bytes: &[u8], start: usize, hard_end: usize) -> Option<usize> {
    (start..hard_end).rev().find(|&p| match bytes[p] {
        b'\n' => true,
        b'.' | b'?' | b'!' => bytes.get(p + 1) == Some(&b' '),
        _ => false,
    })
}

/// UTF-8 경계 조정 (인덱스 이하로)
#[inline]
fn floor_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        s.len()
    } else {
        let mut i = index;
        while i > 0 && !s.is_char_boundary(i) {
            i -= 1;
        }
        i
    }
}

/// UTF-8 경계 조정 (인덱스 이상으로)
#[inline]
fn ceil_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        s.len()
    } else {
        let mut i = index;
        while i < s.len() && !s.is_char_boundary(i) {
            i += 1;
        }
        i
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn legal_text(sentences: usize) -> String {
        (0..sentences)
            .map(|i| format!("Rule {:03} of this tenancy act sets a clear limit.", i))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn assert_well_formed(text: &str, config: ChunkConfig) {
        let ranges: Vec<_> = config.ranges(text).collect();
        if text.is_empty() {
            assert!(ranges.is_empty());
            return;
        }

        assert_eq!(ranges[0].start, 0);
        assert_eq!(ranges.last().map(|r| r.end), Some(text.len()));

        for r in &ranges {
            assert!(r.end > r.start, "empty range {:?}", r);
            assert!(text.is_char_boundary(r.start) && text.is_char_boundary(r.end));
        }

        for pair in ranges.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            assert!(b.start > a.start, "start must advance");
            assert!(b.start <= a.end, "gap between {:?} and {:?}", a, b);
            assert!(a.end - b.start <= config.overlap, "overlap too large");
        }
    }

    #[test]
    fn test_empty_text() {
        assert_eq!(ChunkConfig::default().ranges("").count(), 0);
    }

    #[test]
    fn test_short_text_single_range() {
        let text = "Tenant must give 60 days notice.";
        let ranges: Vec<_> = ChunkConfig::default().ranges(text).collect();
        assert_eq!(ranges, vec![0..text.len()]);
    }

    #[test]
    fn test_sentence_boundaries_three_windows() {
        let text = legal_text(52);
        assert_eq!(text.len(), 2547);

        let ranges: Vec<_> = ChunkConfig::default().ranges(&text).collect();
        assert_eq!(ranges, vec![0..979, 829..1812, 1662..2547]);

        // 문장 끝에서 잘림
        assert!(text[ranges[0].clone()].ends_with("limit."));
        assert!(text[ranges[1].clone()].ends_with("limit."));
    }

    #[test]
    fn test_hard_cut_without_punctuation() {
        let text = "a".repeat(2500);
        let ranges: Vec<_> = ChunkConfig::default().ranges(&text).collect();
        assert_eq!(ranges[0], 0..1000);
        assert_eq!(ranges[1], 850..1850);
        assert_eq!(ranges[2], 1700..2500);
    }

    #[test]
    fn test_newline_boundary() {
        let mut text = "x".repeat(700);
        text.push('\n');
        text.push_str(&"y".repeat(700));
        let ranges: Vec<_> = ChunkConfig::default().ranges(&text).collect();
        assert_eq!(ranges[0], 0..701);
    }

    #[test]
    fn test_boundary_before_midpoint_is_ignored() {
        let mut text = "Short. ".to_string();
        text.push_str(&"z".repeat(1500));
        let ranges: Vec<_> = ChunkConfig::default().ranges(&text).collect();
        assert_eq!(ranges[0], 0..1000);
    }

    #[test]
    fn test_coverage_properties() {
        let configs = [
            ChunkConfig::default(),
            ChunkConfig { max_size: 100, overlap: 20 },
            ChunkConfig { max_size: 64, overlap: 0 },
            ChunkConfig { max_size: 10, overlap: 9 },
        ];
        let texts = [
            legal_text(80),
            "no punctuation at all ".repeat(120),
            "Line one\nLine two\nLine three\n".repeat(40),
            "온타리오 주택 임대법은 임차인을 보호합니다. ".repeat(60),
        ];
        for config in configs {
            for text in &texts {
                assert_well_formed(text, config);
            }
        }
    }

    #[test]
    fn test_deterministic_and_restartable() {
        let text = legal_text(70);
        let config = ChunkConfig::default();
        let first: Vec<_> = config.ranges(&text).collect();
        let second: Vec<_> = chunk_ranges(&text, &config).collect();
        assert_eq!(first, second);

        let cursor = config.ranges(&text);
        let cloned: Vec<_> = cursor.clone().collect();
        assert_eq!(cloned, cursor.collect::<Vec<_>>());
    }

    #[test]
    fn test_multibyte_hard_cut_stays_on_char_boundary() {
        let text = "가".repeat(1000); // 3000 bytes
        let config = ChunkConfig { max_size: 1000, overlap: 150 };
        for r in config.ranges(&text) {
            assert!(text.is_char_boundary(r.start));
            assert!(text.is_char_boundary(r.end));
        }
        assert_well_formed(&text, config);
    }

    #[test]
    fn test_floor_and_ceil_char_boundary() {
        let s = "Hello, 세계!";
        assert_eq!(floor_char_boundary(s, 5), 5);
        assert_eq!(floor_char_boundary(s, 100), s.len());
        assert_eq!(floor_char_boundary(s, 8), 7);
        assert_eq!(ceil_char_boundary(s, 8), 10);
        assert_eq!(floor_char_boundary("", 0), 0);
    }
}
