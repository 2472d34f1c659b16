//! Vector Store - 벡터 검색 트레이트 및 인메모리 구현
//!
//! 검색 결과는 문서와 함께 저장된 임베딩을 돌려줍니다 (MMR이 후보 간 유사도 계산에 사용).

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::document::Document;

// ============================================================================
// Types
// ============================================================================

/// 벡터 엔트리 (저장용)
#[derive(Debug, Clone)]
pub struct VectorEntry {
    /// 메타데이터가 평탄화된 청크 문서
    pub document: Document,
    /// 임베딩 벡터
    pub embedding: Vec<f32>,
}

/// 검색 결과
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub document: Document,
    pub embedding: Vec<f32>,
    /// 쿼리와의 코사인 유사도
    pub similarity: f32,
}

// ============================================================================
// VectorStore Trait
// ============================================================================

/// VectorStore 트레이트 (async)
///
/// 한 저장소는 하나의 리트리버 인스턴스만 소유합니다.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// 벡터 배치 삽입 (중복 제거 없음)
    async fn insert_batch(&self, entries: Vec<VectorEntry>) -> Result<usize>;

    /// 유사도 내림차순 상위 `limit`개 검색
    ///
    /// 비어 있는 저장소는 빈 결과를 반환합니다.
    async fn search(&self, query_embedding: &[f32], limit: usize) -> Result<Vec<SearchResult>>;

    /// 벡터 개수 조회
    async fn count(&self) -> Result<usize>;

    /// 모든 벡터 삭제
    async fn reset(&self) -> Result<()>;
}

// ============================================================================
// InMemoryVectorStore
// ============================================================================

/// 인메모리 벡터 저장소 (전수 코사인 검색)
///
/// 동점은 삽입 순서를 유지합니다.
#[derive(Debug, Default)]
pub struct InMemoryVectorStore {
    entries: RwLock<Vec<VectorEntry>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn insert_batch(&self, entries: Vec<VectorEntry>) -> Result<usize> {
        let inserted = entries.len();
        self.entries.write().await.extend(entries);
        Ok(inserted)
    }

    async fn search(&self, query_embedding: &[f32], limit: usize) -> Result<Vec<SearchResult>> {
        let entries = self.entries.read().await;
        if entries.is_empty() || limit == 0 {
            return Ok(vec![]);
        }

        let mut scored: Vec<(usize, f32)> = entries
            .iter()
            .enumerate()
            .map(|(i, e)| (i, cosine_similarity(query_embedding, &e.embedding)))
            .collect();

        // sort_by는 stable
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);

        Ok(scored
            .into_iter()
            .map(|(i, similarity)| SearchResult {
                document: entries[i].document.clone(),
                embedding: entries[i].embedding.clone(),
                similarity,
            })
            .collect())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.entries.read().await.len())
    }

    async fn reset(&self) -> Result<()> {
        self.entries.write().await.clear();
        Ok(())
    }
}

// ============================================================================
// Utility Functions
// ============================================================================

/// 코사인 유사도 계산
///
/// 결과는 -1.0 ~ 1.0 범위입니다. 길이가 다르거나 영벡터면 0.0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

// ============================================================================
// Tests
// ============================================================================
