//! Chunking 모듈 - 문서 분할 전략
//!
//! 정규화 문서(요소) 목록을 더 작은 정규화 문서 목록으로 나눕니다.
//! 모든 전략은 순수 함수처럼 동작합니다 (입력 순서 유지, 외부 상태 없음).
//!
//! - `basic_chunking`: 크기/오버랩 기반으로 연속 요소를 묶음
//! - `by_title_chunking`: 제목 경계를 존중하면서 묶음

mod basic;
mod by_title;

use anyhow::Result;
use serde_json::{json, Value};

use crate::document::{Document, Metadata};
use crate::error::RagError;
use crate::registry::Registry;

pub use basic::{BasicChunking, BasicChunkingParams};
pub use by_title::{ByTitleChunking, ByTitleChunkingParams};

/// 청크 사이 구분자
const JOINER: &str = "\n\n";

/// 크기 한계는 모두 문자(char) 수 기준
fn char_len(text: &str) -> usize {
    text.chars().count()
}

// ============================================================================
// Chunker Trait
// ============================================================================

/// 청킹 전략 트레이트
pub trait Chunker: Send + Sync {
    /// 문서 목록을 청크 목록으로 분할
    fn chunk(&self, docs: &[Document]) -> Vec<Document>;

    /// 청커 이름 (레지스트리 식별자)
    fn name(&self) -> &'static str;
}

/// 레지스트리 등록
pub fn register(registry: &mut Registry) -> Result<()> {
    registry.register_chunker("basic_chunking", basic::create);
    registry.register_chunker("by_title_chunking", by_title::create);
    Ok(())
}

// ============================================================================
// Shared Building Blocks
// ============================================================================

/// 공통 크기 검증
fn validate_sizes(component: &str, max_characters: usize, overlap: usize) -> Result<()> {
    if max_characters == 0 {
        return Err(RagError::invalid_config(format!(
            "{}: max_characters must be greater than 0",
            component
        ))
        .into());
    }
    if overlap >= max_characters {
        return Err(RagError::invalid_config(format!(
            "{}: overlap ({}) must be smaller than max_characters ({})",
            component, overlap, max_characters
        ))
        .into());
    }
    Ok(())
}

/// 청크 누적기
///
/// 요소 텍스트를 `JOINER`로 이어 붙이고, 첫 요소의 메타데이터를 기억합니다.
/// 길이는 문자 수로 셉니다.
#[derive(Default)]
struct ChunkBuilder {
    text: String,
    chars: usize,
    metadata: Option<Metadata>,
    source_ids: Vec<String>,
}

impl ChunkBuilder {
    fn len(&self) -> usize {
        self.chars
    }

    fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// 요소를 추가했을 때의 길이
    fn len_with(&self, text: &str) -> usize {
        if self.text.is_empty() {
            char_len(text)
        } else {
            self.chars + char_len(JOINER) + char_len(text)
        }
    }

    fn push(&mut self, doc: &Document, text: &str) {
        if self.metadata.is_none() {
            self.metadata = Some(doc.metadata.clone());
        }
        if !self.text.is_empty() {
            self.text.push_str(JOINER);
            self.chars += char_len(JOINER);
        }
        self.text.push_str(text);
        self.chars += char_len(text);
        self.source_ids.push(doc.id.clone());
    }

    /// 누적된 내용을 청크로 내보내고 초기화
    fn flush_into(&mut self, out: &mut Vec<Document>) {
        if self.text.trim().is_empty() {
            *self = Self::default();
            return;
        }
        let builder = std::mem::take(self);
        out.push(make_chunk(
            builder.text,
            builder.metadata.unwrap_or_default(),
            builder.source_ids,
            out.len(),
        ));
    }
}

/// 청크 문서 생성
fn make_chunk(text: String, mut metadata: Metadata, source_ids: Vec<String>, index: usize) -> Document {
    metadata.insert("chunk_index".to_string(), json!(index));
    metadata.insert(
        "source_ids".to_string(),
        Value::Array(source_ids.into_iter().map(Value::String).collect()),
    );
    Document::with_metadata(text, metadata)
}

/// 최대 크기를 넘는 텍스트를 창(window) 단위로 분할
///
/// 창 크기와 오버랩은 문자 수 기준입니다.
/// 두 번째 창부터 이전 창의 끝 `overlap` 문자를 앞에 포함합니다.
/// 가능하면 창의 뒤쪽 절반 안의 공백에서 끊습니다.
fn split_oversized(text: &str, max_characters: usize, overlap: usize) -> Vec<String> {
    // 문자 인덱스 → 바이트 오프셋 (끝 경계 포함)
    let offsets: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();
    let total = offsets.len() - 1;

    let mut pieces = Vec::new();
    let mut start = 0;

    while start < total {
        let hard_end = (start + max_characters).min(total);
        let end = if hard_end >= total {
            total
        } else {
            let window = &text[offsets[start]..offsets[hard_end]];
            let half = (hard_end - start) / 2;
            match window.chars().enumerate().filter(|(_, c)| c.is_whitespace()).last() {
                Some((pos, _)) if pos > half => start + pos,
                _ => hard_end,
            }
        };
        let end = end.max(start + 1);

        let piece = text[offsets[start]..offsets[end]].trim();
        if !piece.is_empty() {
            pieces.push(piece.to_string());
        }

        if end >= total {
            break;
        }

        let next = end.saturating_sub(overlap);
        start = if next > start { next } else { end };
    }

    pieces
}

// ============================================================================
// Tests
// ============================================================================
