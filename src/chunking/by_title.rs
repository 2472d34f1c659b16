//! 제목 기준 청킹
//!
//! 제목 요소(메타데이터 `category == "Title"` 또는 Markdown 헤더 줄)가 새 섹션을 엽니다.
//! - 섹션 안에서는 `new_after_n_chars`(소프트) / `max_characters`(하드) 기준으로 청크를 닫음
//! - 코드 블록 안의 `#` 줄은 헤더로 보지 않음
//! - `combine_text_under_n_characters`보다 작은 청크는 다음 청크와 병합 (최대 크기 이내일 때)

use std::sync::{Arc, OnceLock};

use anyhow::Result;
use regex::Regex;
use serde::Deserialize;

use super::{char_len, split_oversized, validate_sizes, ChunkBuilder, Chunker, JOINER};
use crate::document::Document;
use crate::error::RagError;
use crate::registry::{parse_params, Params};

/// by_title_chunking 파라미터
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ByTitleChunkingParams {
    /// 하드 최대 크기
    pub max_characters: usize,
    /// 분할된 조각 간 오버랩
    pub overlap: usize,
    /// 소프트 최대 크기 (이 크기에 도달하면 새 청크 시작)
    pub new_after_n_chars: usize,
    /// 이보다 작은 청크는 다음 청크와 병합 (기본값: max_characters)
    pub combine_text_under_n_characters: Option<usize>,
}

impl Default for ByTitleChunkingParams {
    fn default() -> Self {
        Self {
            max_characters: 250,
            overlap: 40,
            new_after_n_chars: 250,
            combine_text_under_n_characters: None,
        }
    }
}

/// 제목 기준 청커
#[derive(Debug, Clone)]
pub struct ByTitleChunking {
    max_characters: usize,
    overlap: usize,
    new_after_n_chars: usize,
    combine_under: usize,
}

impl Default for ByTitleChunking {
    fn default() -> Self {
        Self::from_valid(ByTitleChunkingParams::default())
    }
}

impl ByTitleChunking {
    pub fn new(params: ByTitleChunkingParams) -> Result<Self> {
        validate_sizes("by_title_chunking", params.max_characters, params.overlap)?;
        if params.new_after_n_chars == 0 {
            return Err(RagError::invalid_config(
                "by_title_chunking: new_after_n_chars must be greater than 0",
            )
            .into());
        }
        Ok(Self::from_valid(params))
    }

    fn from_valid(params: ByTitleChunkingParams) -> Self {
        Self {
            max_characters: params.max_characters,
            overlap: params.overlap,
            new_after_n_chars: params.new_after_n_chars.min(params.max_characters),
            combine_under: params
                .combine_text_under_n_characters
                .unwrap_or(params.max_characters),
        }
    }

    /// 요소들을 섹션으로 그룹화
    ///
    /// 반환: 섹션 목록, 각 섹션은 (원본 문서 인덱스, 텍스트) 목록
    fn split_sections(&self, docs: &[Document]) -> Vec<Vec<(usize, String)>> {
        let mut sections: Vec<Vec<(usize, String)>> = Vec::new();
        let mut current: Vec<(usize, String)> = Vec::new();
        let mut in_code_block = false;

        for (idx, doc) in docs.iter().enumerate() {
            if doc.content.trim().is_empty() {
                continue;
            }

            // Title 요소는 항상 새 섹션
            if doc.is_title() && !current.is_empty() {
                sections.push(std::mem::take(&mut current));
            }

            let mut buffer = String::new();
            for line in doc.content.lines() {
                if line.trim_start().starts_with("```") {
                    in_code_block = !in_code_block;
                }

                if !in_code_block && header_re().is_match(line) {
                    if !buffer.trim().is_empty() {
                        current.push((idx, buffer.trim().to_string()));
                    }
                    buffer.clear();
                    if !current.is_empty() {
                        sections.push(std::mem::take(&mut current));
                    }
                }

                buffer.push_str(line);
                buffer.push('\n');
            }

            if !buffer.trim().is_empty() {
                current.push((idx, buffer.trim().to_string()));
            }
        }

        if !current.is_empty() {
            sections.push(current);
        }

        sections
    }

    /// 섹션 하나를 청크로 묶음
    fn pack_section(&self, docs: &[Document], section: &[(usize, String)], out: &mut Vec<Document>) {
        let mut current = ChunkBuilder::default();

        for (idx, text) in section {
            let doc = &docs[*idx];

            if char_len(text) > self.max_characters {
                current.flush_into(out);
                for piece in split_oversized(text, self.max_characters, self.overlap) {
                    let mut single = ChunkBuilder::default();
                    single.push(doc, &piece);
                    single.flush_into(out);
                }
                continue;
            }

            if !current.is_empty()
                && (current.len() >= self.new_after_n_chars
                    || current.len_with(text) > self.max_characters)
            {
                current.flush_into(out);
            }
            current.push(doc, text);
        }

        current.flush_into(out);
    }

    /// 작은 청크 병합
    fn merge_small_chunks(&self, chunks: Vec<Document>) -> Vec<Document> {
        if self.combine_under == 0 {
            return chunks;
        }

        let mut result: Vec<Document> = Vec::new();

        for chunk in chunks {
            if let Some(last) = result.last_mut() {
                let last_len = char_len(&last.content);
                let combined = last_len + char_len(JOINER) + char_len(&chunk.content);
                if last_len < self.combine_under && combined <= self.max_characters {
                    last.content.push_str(JOINER);
                    last.content.push_str(&chunk.content);
                    merge_source_ids(last, &chunk);
                    continue;
                }
            }
            result.push(chunk);
        }

        // 병합 후 인덱스 재부여
        for (i, chunk) in result.iter_mut().enumerate() {
            chunk
                .metadata
                .insert("chunk_index".to_string(), serde_json::json!(i));
        }

        result
    }
}

impl Chunker for ByTitleChunking {
    fn chunk(&self, docs: &[Document]) -> Vec<Document> {
        let mut chunks = Vec::new();

        for section in self.split_sections(docs) {
            self.pack_section(docs, &section, &mut chunks);
        }

        self.merge_small_chunks(chunks)
    }

    fn name(&self) -> &'static str {
        "by_title_chunking"
    }
}

/// Markdown 헤더 줄
fn header_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^#{1,6}\s+").expect("valid header regex"))
}

fn merge_source_ids(target: &mut Document, other: &Document) {
    let mut ids = target
        .metadata
        .get("source_ids")
        .and_then(|v| v.as_array().cloned())
        .unwrap_or_default();
    if let Some(more) = other.metadata.get("source_ids").and_then(|v| v.as_array()) {
        ids.extend(more.iter().cloned());
    }
    target
        .metadata
        .insert("source_ids".to_string(), serde_json::Value::Array(ids));
}

/// 레지스트리 생성자
pub(super) fn create(params: &Params) -> Result<Arc<dyn Chunker>> {
    let params: ByTitleChunkingParams = parse_params("by_title_chunking", params)?;
    Ok(Arc::new(ByTitleChunking::new(params)?))
}
