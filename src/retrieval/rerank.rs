//! 2단계 재정렬 검색
//!
//! 1. 벡터 유사도로 `fetch_k`개 후보 검색 (빠르고 거침)
//! 2. cross-encoder로 (쿼리, 후보) 쌍마다 관련성 점수 계산
//! 3. 점수 내림차순 정렬 후 상위 `k`개 반환

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{validate_fetch_k, validate_k, IndexParams, RetrievalIndex, Retriever};
use crate::chunking::Chunker;
use crate::document::Document;
use crate::registry::{parse_params, Params, Registry};

/// 기본 cross-encoder 모델
pub const DEFAULT_CROSS_ENCODER: &str = "cross-encoder/ms-marco-MiniLM-L6-v2";

/// 기본 rerank 서버 주소
pub const DEFAULT_CROSS_ENCODER_URL: &str = "http://localhost:8080";

// ============================================================================
// CrossEncoder
// ============================================================================

/// Cross-encoder 트레이트
#[async_trait]
pub trait CrossEncoder: Send + Sync {
    /// 각 passage의 쿼리 관련성 점수 (입력 순서 유지)
    async fn score(&self, query: &str, passages: &[String]) -> Result<Vec<f32>>;

    fn model(&self) -> &str;
}

/// HTTP rerank 서버 클라이언트 (text-embeddings-inference `/rerank` 형식)
///
/// ref: https://huggingface.github.io/text-embeddings-inference/
#[derive(Debug, Clone)]
pub struct HttpCrossEncoder {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

#[derive(Debug, Serialize)]
struct RerankRequest<'a> {
    query: &'a str,
    texts: &'a [String],
    raw_scores: bool,
}

#[derive(Debug, Deserialize)]
struct RerankHit {
    index: usize,
    score: f32,
}

impl HttpCrossEncoder {
    pub fn new(model: impl Into<String>, base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.into(),
        })
    }
}

#[async_trait]
impl CrossEncoder for HttpCrossEncoder {
    async fn score(&self, query: &str, passages: &[String]) -> Result<Vec<f32>> {
        if passages.is_empty() {
            return Ok(vec![]);
        }

        let url = format!("{}/rerank", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&RerankRequest {
                query,
                texts: passages,
                raw_scores: false,
            })
            .send()
            .await
            .with_context(|| format!("Failed to send rerank request to {}", url))?;

        let status = response.status();
        let body = response.text().await.context("Failed to read response body")?;
        if !status.is_success() {
            anyhow::bail!("Rerank error ({}): {}", status, body);
        }

        let hits: Vec<RerankHit> =
            serde_json::from_str(&body).context("Failed to parse rerank response")?;
        scores_by_index(hits, passages.len())
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// 서버 응답(점수순)을 입력 순서의 점수 목록으로 변환
fn scores_by_index(hits: Vec<RerankHit>, len: usize) -> Result<Vec<f32>> {
    let mut scores: Vec<Option<f32>> = vec![None; len];
    for hit in hits {
        let slot = scores
            .get_mut(hit.index)
            .ok_or_else(|| anyhow::anyhow!("Rerank index {} out of range", hit.index))?;
        *slot = Some(hit.score);
    }
    scores
        .into_iter()
        .enumerate()
        .map(|(i, s)| s.ok_or_else(|| anyhow::anyhow!("Rerank response missing index {}", i)))
        .collect()
}

// ============================================================================
// Reranker
// ============================================================================

/// reranker 파라미터
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RerankParams {
    pub k: usize,
    pub fetch_k: usize,
    pub cross_encoding_model: String,
    pub cross_encoder_url: String,
    #[serde(flatten)]
    pub index: IndexParams,
}

impl Default for RerankParams {
    fn default() -> Self {
        Self {
            k: 3,
            fetch_k: 6,
            cross_encoding_model: DEFAULT_CROSS_ENCODER.to_string(),
            cross_encoder_url: DEFAULT_CROSS_ENCODER_URL.to_string(),
            index: IndexParams::default(),
        }
    }
}

/// fetch → rerank 리트리버
pub struct Reranker {
    index: RetrievalIndex,
    chunker: Option<Arc<dyn Chunker>>,
    cross_encoder: Arc<dyn CrossEncoder>,
    k: usize,
    fetch_k: usize,
}

impl Reranker {
    pub fn new(
        index: RetrievalIndex,
        chunker: Option<Arc<dyn Chunker>>,
        cross_encoder: Arc<dyn CrossEncoder>,
        params: &RerankParams,
    ) -> Result<Self> {
        validate_k("reranker", params.k)?;
        validate_fetch_k("reranker", params.k, params.fetch_k)?;

        Ok(Self {
            index,
            chunker,
            cross_encoder,
            k: params.k,
            fetch_k: params.fetch_k,
        })
    }
}

#[async_trait]
impl Retriever for Reranker {
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
        let candidates = self.index.search(&embedding, self.fetch_k).await?;
        if candidates.is_empty() {
            return Ok(vec![]);
        }

        let passages: Vec<String> = candidates
            .iter()
            .map(|c| c.document.content.clone())
            .collect();
        let scores = self.cross_encoder.score(text, &passages).await?;
        if scores.len() != candidates.len() {
            anyhow::bail!(
                "Cross-encoder returned {} scores for {} candidates",
                scores.len(),
                candidates.len()
            );
        }

        let mut ranked: Vec<(f32, Document)> = scores
            .into_iter()
            .zip(candidates.into_iter().map(|c| c.document))
            .collect();
        ranked.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        ranked.truncate(self.k);

        tracing::debug!(
            "reranker: kept {} of {} candidates ({})",
            ranked.len(),
            passages.len(),
            self.cross_encoder.model()
        );
        Ok(ranked.into_iter().map(|(_, doc)| doc).collect())
    }

    fn name(&self) -> &'static str {
        "reranker"
    }
}

/// 레지스트리 등록
pub fn register(registry: &mut Registry) -> Result<()> {
    registry.register_retriever("reranker", create);
    Ok(())
}

fn create(params: &Params, chunker: Option<Arc<dyn Chunker>>) -> Result<Arc<dyn Retriever>> {
    let params: RerankParams = parse_params("reranker", params)?;
    let index = RetrievalIndex::from_params(&params.index)?;
    let cross_encoder =
        HttpCrossEncoder::new(&params.cross_encoding_model, &params.cross_encoder_url)?;
    Ok(Arc::new(Reranker::new(
        index,
        chunker,
        Arc::new(cross_encoder),
        &params,
    )?))
}

// ============================================================================
// Tests
// ============================================================================
