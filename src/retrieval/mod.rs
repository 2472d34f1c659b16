//! Retrieval 모듈 - 검색 전략
//!
//! 모든 전략은 같은 계약을 따릅니다:
//! - `init(docs)`: 인덱스를 비우고, 시드 문서가 있으면 `add_docs`로 추가
//! - `add_docs(docs, chunker)`: 청킹 → 메타데이터 평탄화 → 임베딩 → 삽입 (누적, 중복 제거 없음)
//! - `query(text)`: 최선순으로 정렬된 최대 `k`개 문서 (빈 인덱스면 빈 결과)
//!
//! 전략:
//! - `simple`: 상위 k 유사도 (선택적 임계값)
//! - `mmr`: Maximal Marginal Relevance
//! - `reranker`: fetch_k 후보 → cross-encoder 재정렬 → 상위 k

mod index;
mod lance;
pub mod mmr;
pub mod rerank;
pub mod similarity;
mod vector;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::chunking::Chunker;
use crate::document::Document;
use crate::error::RagError;

pub use index::{IndexBackend, IndexParams, RetrievalIndex};
pub use lance::LanceVectorStore;
pub use mmr::{mmr_select, MmrParams, MmrRetriever};
pub use rerank::{CrossEncoder, HttpCrossEncoder, RerankParams, Reranker};
pub use similarity::{SimilarityParams, SimilarityRetriever};
pub use vector::{cosine_similarity, InMemoryVectorStore, SearchResult, VectorEntry, VectorStore};

// ============================================================================
// Retriever Trait
// ============================================================================

/// 검색 전략 트레이트
#[async_trait]
pub trait Retriever: Send + Sync {
    /// 인덱스 초기화 (시드 문서가 있으면 기본 청커로 추가)
    async fn init(&self, docs: Option<Vec<Document>>) -> Result<()>;

    /// 문서 추가
    ///
    /// `chunker`가 없으면 인스턴스의 기본 청커를 사용하고, 그것도 없으면 MissingChunker.
    async fn add_docs(&self, docs: &[Document], chunker: Option<Arc<dyn Chunker>>) -> Result<()>;

    /// 쿼리에 대한 상위 문서
    async fn query(&self, text: &str) -> Result<Vec<Document>>;

    /// 평가용: 검색된 문서의 본문만 반환
    async fn predict(&self, input: &str) -> Result<Vec<String>> {
        Ok(self
            .query(input)
            .await?
            .into_iter()
            .map(|d| d.content)
            .collect())
    }

    /// 레지스트리 식별자
    fn name(&self) -> &'static str;
}

// ============================================================================
// Shared Validation
// ============================================================================

fn validate_k(component: &str, k: usize) -> Result<()> {
    if k == 0 {
        return Err(RagError::invalid_config(format!("{}: k must be at least 1", component)).into());
    }
    Ok(())
}

fn validate_fetch_k(component: &str, k: usize, fetch_k: usize) -> Result<()> {
    if fetch_k < k {
        return Err(RagError::invalid_config(format!(
            "{}: fetch_k ({}) must be >= k ({})",
            component, fetch_k, k
        ))
        .into());
    }
    Ok(())
}

fn validate_unit_range(component: &str, field: &str, value: f32) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(RagError::invalid_config(format!(
            "{}: {} must be within [0, 1], got {}",
            component, field, value
        ))
        .into());
    }
    Ok(())
}
