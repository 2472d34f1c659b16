//! 기본 청킹 - 크기/오버랩 기반
//!
//! 연속된 요소를 `max_characters` 이하로 묶습니다.
//! 한 요소가 `max_characters`보다 크면 창 단위로 자르고, 자른 조각에만 오버랩을 적용합니다.

use std::sync::Arc;

use anyhow::Result;
use serde::Deserialize;

use super::{char_len, split_oversized, validate_sizes, ChunkBuilder, Chunker};
use crate::document::Document;
use crate::registry::{parse_params, Params};

/// basic_chunking 파라미터
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BasicChunkingParams {
    /// 최대 청크 크기
    pub max_characters: usize,
    /// 분할된 조각 간 오버랩
    pub overlap: usize,
}

impl Default for BasicChunkingParams {
    fn default() -> Self {
        Self {
            max_characters: 250,
            overlap: 40,
        }
    }
}

/// 기본 청커
#[derive(Debug, Clone, Default)]
pub struct BasicChunking {
    params: BasicChunkingParams,
}

impl BasicChunking {
    pub fn new(params: BasicChunkingParams) -> Result<Self> {
        validate_sizes("basic_chunking", params.max_characters, params.overlap)?;
        Ok(Self { params })
    }
}

impl Chunker for BasicChunking {
    fn chunk(&self, docs: &[Document]) -> Vec<Document> {
        let max = self.params.max_characters;
        let mut chunks = Vec::new();
        let mut current = ChunkBuilder::default();

        for doc in docs {
            let text = doc.content.trim();
            if text.is_empty() {
                continue;
            }

            if char_len(text) > max {
                current.flush_into(&mut chunks);
                for piece in split_oversized(text, max, self.params.overlap) {
                    let mut single = ChunkBuilder::default();
                    single.push(doc, &piece);
                    single.flush_into(&mut chunks);
                }
                continue;
            }

            if !current.is_empty() && current.len_with(text) > max {
                current.flush_into(&mut chunks);
            }
            current.push(doc, text);
        }

        current.flush_into(&mut chunks);
        chunks
    }

    fn name(&self) -> &'static str {
        "basic_chunking"
    }
}

/// 레지스트리 생성자
pub(super) fn create(params: &Params) -> Result<Arc<dyn Chunker>> {
    let params: BasicChunkingParams = parse_params("basic_chunking", params)?;
    Ok(Arc::new(BasicChunking::new(params)?))
}
