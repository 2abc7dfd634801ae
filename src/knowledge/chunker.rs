//! Text Chunking Module
//!
//! Markdown 인식 텍스트 분할을 제공합니다.
//! 문서 구조를 존중하면서 적절한 크기의 청크로 나누고,
//! 각 청크가 속한 헤더 계층을 함께 반환합니다.

use std::sync::OnceLock;

use regex::Regex;

// ============================================================================
// Chunk Configuration
// ============================================================================

/// 청킹 설정
#[derive(Debug, Clone)]
pub struct ChunkConfig {
    /// 목표 청크 크기 (문자 수)
    pub chunk_size: usize,
    /// 오버랩 크기 (문자 수)
    pub chunk_overlap: usize,
    /// 헤더 계층을 각 청크 앞에 붙일지 여부
    pub heading_hierarchy: bool,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            chunk_size: 300,
            chunk_overlap: 32,
            heading_hierarchy: true,
        }
    }
}

impl ChunkConfig {
    /// 큰 청크 설정 (긴 문서 위주 노트용)
    pub fn for_long_form() -> Self {
        Self {
            chunk_size: 1200,
            chunk_overlap: 100,
            heading_hierarchy: true,
        }
    }

    /// 오버랩 없는 설정
    pub fn without_overlap(mut self) -> Self {
        self.chunk_overlap = 0;
        self
    }

    /// 병합 기준이 되는 최소 청크 크기
    fn min_characters(&self) -> usize {
        self.chunk_size / 4
    }
}

// ============================================================================
// Chunk
// ============================================================================

/// 분할된 청크
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    /// 청크 텍스트 (헤더 prefix 포함)
    pub text: String,
}

// ============================================================================
// Chunker Trait
// ============================================================================

/// 텍스트 청킹 전략 트레이트
pub trait Chunker: Send + Sync {
    /// 텍스트를 문서 순서대로 청크 분할
    fn split(&self, text: &str) -> Vec<Chunk>;

    /// 청커 이름
    fn name(&self) -> &'static str;
}

// ============================================================================
// MarkdownChunker
// ============================================================================

/// 헤더 경계로 나눈 섹션
#[derive(Debug)]
struct Section {
    headings: Vec<String>,
    body: String,
}

fn header_re() -> &'static Regex {
    static HEADER_RE: OnceLock<Regex> = OnceLock::new();
    HEADER_RE.get_or_init(|| Regex::new(r"^(#{1,6})\s+\S").unwrap())
}

/// Markdown 인식 청커
///
/// Markdown 구조를 존중하면서 텍스트를 분할합니다:
/// - 헤더 경계 유지 (헤더 계층 추적)
/// - 코드 블록 보존
/// - 문단 경계 존중
pub struct MarkdownChunker {
    config: ChunkConfig,
}

impl MarkdownChunker {
    /// 설정으로 생성
    pub fn new(config: ChunkConfig) -> Self {
        Self { config }
    }

    /// 기본 설정으로 생성
    pub fn with_defaults() -> Self {
        Self::new(ChunkConfig::default())
    }

    /// 설정 반환
    pub fn config(&self) -> &ChunkConfig {
        &self.config
    }

    /// Markdown을 섹션으로 분할
    fn split_sections(&self, text: &str) -> Vec<Section> {
        let mut sections = Vec::new();
        // (레벨, 헤더 라인)
        let mut stack: Vec<(usize, String)> = Vec::new();
        let mut current = String::new();
        let mut in_code_block = false;
        // 현재 본문이 속한 헤더 레벨
        let mut open_level: Option<usize> = None;

        for line in text.lines() {
            // 코드 블록 추적
            if line.trim_start().starts_with("```") {
                in_code_block = !in_code_block;
            }

            let level = if in_code_block {
                None
            } else {
                header_re()
                    .captures(line)
                    .and_then(|c| c.get(1))
                    .map(|m| m.as_str().len())
            };

            if let Some(level) = level {
                // 이전 섹션 마감
                // 본문 없는 헤더는 하위 헤더가 이어지지 않을 때만 헤더만으로 섹션이 됨
                if !current.trim().is_empty()
                    || open_level.is_some_and(|open| level <= open)
                {
                    sections.push(Section {
                        headings: stack.iter().map(|(_, h)| h.clone()).collect(),
                        body: current.trim().to_string(),
                    });
                }
                current.clear();
                open_level = Some(level);

                while stack.last().map(|(l, _)| *l >= level).unwrap_or(false) {
                    stack.pop();
                }
                stack.push((level, line.trim().to_string()));
                continue;
            }

            current.push_str(line);
            current.push('\n');
        }

        // 마지막 섹션 추가
        if !current.trim().is_empty() || open_level.is_some() {
            sections.push(Section {
                headings: stack.iter().map(|(_, h)| h.clone()).collect(),
                body: current.trim().to_string(),
            });
        }

        sections
    }

    /// 긴 섹션을 문단, 필요하면 줄 경계에서 분할
    fn split_long_section(&self, body: &str) -> Vec<String> {
        let max = self.config.chunk_size;
        if char_len(body) <= max {
            return vec![body.to_string()];
        }

        let mut pieces = Vec::new();
        let mut current = String::new();

        // 이중 줄바꿈(문단 경계)으로 분할
        for para in body.split("\n\n") {
            let para = para.trim();
            if para.is_empty() {
                continue;
            }

            // 문단 자체가 최대 크기 초과면 줄 단위로
            let units: Vec<&str> = if char_len(para) > max {
                para.lines().collect()
            } else {
                vec![para]
            };

            for (i, unit) in units.into_iter().enumerate() {
                let sep = if i == 0 { "\n\n" } else { "\n" };
                if !current.is_empty() && char_len(&current) + sep.len() + char_len(unit) > max {
                    pieces.push(std::mem::take(&mut current));
                }
                if !current.is_empty() {
                    current.push_str(sep);
                }
                current.push_str(unit);
            }
        }

        // 마지막 청크 추가
        if !current.is_empty() {
            pieces.push(current);
        }

        // 너무 작은 청크 병합
        self.merge_small_chunks(pieces)
    }

    /// 작은 청크 병합
    fn merge_small_chunks(&self, chunks: Vec<String>) -> Vec<String> {
        let min = self.config.min_characters();
        if min == 0 {
            return chunks;
        }

        let mut result: Vec<String> = Vec::new();

        for chunk in chunks {
            if let Some(last) = result.last_mut() {
                // 이전 청크가 너무 작으면 병합
                if char_len(last) < min
                    && char_len(last) + char_len(&chunk) + 2 <= self.config.chunk_size
                {
                    last.push_str("\n\n");
                    last.push_str(&chunk);
                    continue;
                }
            }
            result.push(chunk);
        }

        result
    }

    /// 오버랩 적용 (같은 섹션 안에서만)
    fn apply_overlap(&self, pieces: Vec<String>) -> Vec<String> {
        if self.config.chunk_overlap == 0 || pieces.len() < 2 {
            return pieces;
        }

        let mut result = Vec::with_capacity(pieces.len());

        for (i, piece) in pieces.iter().enumerate() {
            if i == 0 {
                result.push(piece.clone());
                continue;
            }

            // 이전 청크의 끝부분 가져오기
            let prev = &pieces[i - 1];
            let overlap = tail_words(prev, self.config.chunk_overlap);

            if overlap.is_empty() {
                result.push(piece.clone());
            } else {
                result.push(format!("{}\n{}", overlap, piece));
            }
        }

        result
    }
}

impl Chunker for MarkdownChunker {
    fn split(&self, text: &str) -> Vec<Chunk> {
        if text.trim().is_empty() {
            return vec![];
        }

        let mut chunks = Vec::new();

        for section in self.split_sections(text) {
            // 1. 긴 섹션 분할 + 2. 오버랩 적용
            let pieces = self.apply_overlap(self.split_long_section(&section.body));

            for (i, piece) in pieces.into_iter().enumerate() {
                // 3. 헤더 계층 (또는 섹션 자신의 헤더) 붙이기
                let prefix = if self.config.heading_hierarchy {
                    section.headings.join("\n")
                } else if i == 0 {
                    section.headings.last().cloned().unwrap_or_default()
                } else {
                    String::new()
                };

                let text = if prefix.is_empty() {
                    piece
                } else if piece.is_empty() {
                    prefix
                } else {
                    format!("{}\n\n{}", prefix, piece)
                };

                chunks.push(Chunk { text });
            }
        }

        chunks
    }

    fn name(&self) -> &'static str {
        "MarkdownChunker"
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

#[inline]
fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// 문자열 끝에서 최대 `max_chars` 문자, 단어 경계에서 시작
fn tail_words(s: &str, max_chars: usize) -> &str {
    let total = char_len(s);
    if total <= max_chars {
        return s.trim();
    }

    let start = s
        .char_indices()
        .nth(total - max_chars)
        .map(|(i, _)| i)
        .unwrap_or(s.len());
    let start = floor_char_boundary(s, start);

    let tail = &s[start..];
    // 단어 중간이면 다음 공백 이후부터
    let cut_mid_word = start > 0
        && !s[..start].ends_with(char::is_whitespace)
        && !tail.starts_with(char::is_whitespace);
    let tail = if cut_mid_word {
        tail.find(char::is_whitespace)
            .map(|p| &tail[p..])
            .unwrap_or("")
    } else {
        tail
    };

    tail.trim()
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

// ============================================================================
// Factory Functions
// ============================================================================

/// 기본 청커 생성
pub fn default_chunker() -> Box<dyn Chunker> {
    Box::new(MarkdownChunker::with_defaults())
}

/// Markdown 청커 생성 (설정 지정)
pub fn markdown_chunker(config: ChunkConfig) -> Box<dyn Chunker> {
    Box::new(MarkdownChunker::new(config))
}

// ============================================================================
// Tests
// ============================================================================
