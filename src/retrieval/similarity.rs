//! 유사도 검색 (선택적 임계값)
//!
//! 쿼리 임베딩과 가장 가까운 k개 문서를 반환합니다.
//! `similarity_threshold`가 0보다 크면 임계값 미만 후보는 k개가 안 되더라도 제외합니다.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;

use super::{validate_k, validate_unit_range, IndexParams, RetrievalIndex, Retriever};
use crate::chunking::Chunker;
use crate::document::Document;
use crate::registry::{parse_params, Params, Registry};

/// simple 리트리버 파라미터
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SimilarityParams {
    pub k: usize,
    /// 0.0이면 임계값 없음
    pub similarity_threshold: f32,
    #[serde(flatten)]
    pub index: IndexParams,
}

impl Default for SimilarityParams {
    fn default() -> Self {
        Self {
            k: 1,
            similarity_threshold: 0.0,
            index: IndexParams::default(),
        }
    }
}

/// 유사도 리트리버
pub struct SimilarityRetriever {
    index: RetrievalIndex,
    chunker: Option<Arc<dyn Chunker>>,
    k: usize,
    threshold: Option<f32>,
}

impl SimilarityRetriever {
    pub fn new(
        index: RetrievalIndex,
        chunker: Option<Arc<dyn Chunker>>,
        params: &SimilarityParams,
    ) -> Result<Self> {
        validate_k("simple", params.k)?;
        validate_unit_range("simple", "similarity_threshold", params.similarity_threshold)?;

        Ok(Self {
            index,
            chunker,
            k: params.k,
            threshold: (params.similarity_threshold > 0.0).then_some(params.similarity_threshold),
        })
    }
}

#[async_trait]
impl Retriever for SimilarityRetriever {
    async fn init(&self, docs: Option<Vec<Document>>) -> Result<()> {
        self.index.reset().await?;
        if let Some(docs) = docs {
            self.add_docs(&docs, None).await?;
        }
        Ok(())
    }

    async fn add_docs(&self, docs: &[Document], chunker: Option<Arc<dyn Chunker>>) -> Result<()> {
        self.index.add_docs(docs, chunker, self.chunker.as_ref()).await?;
        Ok(())
    }

    async fn query(&self, text: &str) -> Result<Vec<Document>> {
        let embedding = self.index.embed_query(text).await?;
        let results = self.index.search(&embedding, self.k).await?;

        let docs: Vec<Document> = results
            .into_iter()
            .filter(|r| self.threshold.map_or(true, |t| r.similarity >= t))
            .map(|r| r.document)
            .collect();

        tracing::debug!("simple: {} results for {:?}", docs.len(), text);
        Ok(docs)
    }

    fn name(&self) -> &'static str {
        "simple"
    }
}

/// 레지스트리 등록
pub fn register(registry: &mut Registry) -> Result<()> {
    registry.register_retriever("simple", create);
    Ok(())
}

fn create(params: &Params, chunker: Option<Arc<dyn Chunker>>) -> Result<Arc<dyn Retriever>> {
    let params: SimilarityParams = parse_params("simple", params)?;
    let index = RetrievalIndex::from_params(&params.index)?;
    Ok(Arc::new(SimilarityRetriever::new(index, chunker, &params)?))
}

// ============================================================================
// Tests
// ============================================================================
