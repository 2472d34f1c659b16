//! Maximal Marginal Relevance 검색
//!
//! 1. 쿼리 임베딩으로 `fetch_k`개 후보 검색
//! 2. 첫 선택은 쿼리와 가장 유사한 후보
//! 3. 이후에는 `λ·sim(q, c) − (1−λ)·max_s sim(c, s)`가 최대인 후보를 선택 (λ = diversity)
//!
//! `diversity`는 관련성 쪽 가중치입니다 (1.0 = 순수 유사도 순, 0.0 = 최대 다양성).
//! 동점이면 먼저 나온 후보가 이깁니다.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;

use super::vector::cosine_similarity;
use super::{
    validate_fetch_k, validate_k, validate_unit_range, IndexParams, RetrievalIndex, Retriever,
};
use crate::chunking::Chunker;
use crate::document::Document;
use crate::registry::{parse_params, Params, Registry};

/// mmr 리트리버 파라미터
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MmrParams {
    pub k: usize,
    /// 후보 풀 크기 (>= k)
    pub fetch_k: usize,
    /// 관련성 가중치 λ ∈ [0, 1]
    pub diversity: f32,
    #[serde(flatten)]
    pub index: IndexParams,
}

impl Default for MmrParams {
    fn default() -> Self {
        Self {
            k: 1,
            fetch_k: 1,
            diversity: 0.5,
            index: IndexParams::default(),
        }
    }
}

/// MMR 리트리버
pub struct MmrRetriever {
    index: RetrievalIndex,
    chunker: Option<Arc<dyn Chunker>>,
    k: usize,
    fetch_k: usize,
    diversity: f32,
}

impl MmrRetriever {
    pub fn new(
        index: RetrievalIndex,
        chunker: Option<Arc<dyn Chunker>>,
        params: &MmrParams,
    ) -> Result<Self> {
        validate_k("mmr", params.k)?;
        validate_fetch_k("mmr", params.k, params.fetch_k)?;
        validate_unit_range("mmr", "diversity", params.diversity)?;

        Ok(Self {
            index,
            chunker,
            k: params.k,
            fetch_k: params.fetch_k,
            diversity: params.diversity,
        })
    }
}

#[async_trait]
impl Retriever for MmrRetriever {
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
        let query_embedding = self.index.embed_query(text).await?;
        let candidates = self.index.search(&query_embedding, self.fetch_k).await?;

        let embeddings: Vec<&[f32]> = candidates.iter().map(|c| c.embedding.as_slice()).collect();
        let selected = mmr_select(&query_embedding, &embeddings, self.k, self.diversity);

        tracing::debug!(
            "mmr: selected {:?} from {} candidates",
            selected,
            candidates.len()
        );

        let mut slots: Vec<Option<Document>> =
            candidates.into_iter().map(|c| Some(c.document)).collect();
        Ok(selected
            .into_iter()
            .filter_map(|i| slots.get_mut(i).and_then(Option::take))
            .collect())
    }

    fn name(&self) -> &'static str {
        "mmr"
    }
}

/// MMR 선택
///
/// 선택된 후보의 인덱스를 선택 순서대로 반환합니다. 길이는 `min(k, candidates.len())`.
pub fn mmr_select(query: &[f32], candidates: &[&[f32]], k: usize, lambda: f32) -> Vec<usize> {
    let n = candidates.len();
    let k = k.min(n);
    if k == 0 {
        return vec![];
    }

    let query_sims: Vec<f32> = candidates
        .iter()
        .map(|c| cosine_similarity(query, c))
        .collect();

    let mut selected: Vec<usize> = Vec::with_capacity(k);
    let mut chosen = vec![false; n];
    // 각 후보의 선택 집합에 대한 최대 유사도
    let mut max_sim_to_selected = vec![f32::NEG_INFINITY; n];

    while selected.len() < k {
        let mut best: Option<(usize, f32)> = None;

        for i in (0..n).filter(|&i| !chosen[i]) {
            let score = if selected.is_empty() {
                query_sims[i]
            } else {
                lambda * query_sims[i] - (1.0 - lambda) * max_sim_to_selected[i]
            };
            if best.map_or(true, |(_, s)| score > s) {
                best = Some((i, score));
            }
        }

        let Some((pick, _)) = best else { break };
        chosen[pick] = true;
        selected.push(pick);

        for i in (0..n).filter(|&i| !chosen[i]) {
            let sim = cosine_similarity(candidates[i], candidates[pick]);
            if sim > max_sim_to_selected[i] {
                max_sim_to_selected[i] = sim;
            }
        }
    }

    selected
}

/// 레지스트리 등록
pub fn register(registry: &mut Registry) -> Result<()> {
    registry.register_retriever("mmr", create);
    Ok(())
}

fn create(params: &Params, chunker: Option<Arc<dyn Chunker>>) -> Result<Arc<dyn Retriever>> {
    let params: MmrParams = parse_params("mmr", params)?;
    let index = RetrievalIndex::from_params(&params.index)?;
    Ok(Arc::new(MmrRetriever::new(index, chunker, &params)?))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::BasicChunking;
    use crate::error::{rag_error, RagError};
    use crate::testing::StaticEmbedding;
    use serde_json::json;

    // 쿼리는 x축. a와 a2는 거의 같은 방향, b는 y축 쪽으로 기울어짐
    const QUERY: [f32; 2] = [1.0, 0.0];
    const A: [f32; 2] = [1.0, 0.05];
    const A2: [f32; 2] = [1.0, 0.1];
    const B: [f32; 2] = [0.6, 0.8];
    const C: [f32; 2] = [0.2, 1.0];

    #[test]
    fn test_first_pick_is_most_similar() {
        let candidates: Vec<&[f32]> = vec![&B, &A, &C];
        let picked = mmr_select(&QUERY, &candidates, 1, 0.0);
        assert_eq!(picked, vec![1]);
    }

    #[test]
    fn test_full_relevance_equals_similarity_order() {
        let candidates: Vec<&[f32]> = vec![&C, &A2, &B, &A];
        let picked = mmr_select(&QUERY, &candidates, 4, 1.0);

        let mut by_sim: Vec<usize> = (0..candidates.len()).collect();
        by_sim.sort_by(|&i, &j| {
            cosine_similarity(&QUERY, candidates[j])
                .partial_cmp(&cosine_similarity(&QUERY, candidates[i]))
                .unwrap()
        });
        assert_eq!(picked, by_sim);
        assert_eq!(picked, vec![3, 1, 2, 0]);
    }

    #[test]
    fn test_zero_diversity_avoids_near_duplicate() {
        let candidates: Vec<&[f32]> = vec![&A, &A2, &B];
        let picked = mmr_select(&QUERY, &candidates, 2, 0.0);

        assert_eq!(picked[0], 0);
        // A2는 A와 가장 유사하므로 두 번째 선택이 될 수 없음
        assert_eq!(picked[1], 2);
    }

    #[test]
    fn test_ties_keep_first_candidate() {
        let candidates: Vec<&[f32]> = vec![&A, &A, &A];
        assert_eq!(mmr_select(&QUERY, &candidates, 3, 0.5), vec![0, 1, 2]);
    }

    #[test]
    fn test_k_larger_than_candidates() {
        let candidates: Vec<&[f32]> = vec![&A, &B];
        assert_eq!(mmr_select(&QUERY, &candidates, 5, 0.5).len(), 2);
        assert!(mmr_select(&QUERY, &[], 3, 0.5).is_empty());
    }

    fn retriever(k: usize, fetch_k: usize, diversity: f32) -> MmrRetriever {
        let embedder = StaticEmbedding::new([
            ("query", QUERY.to_vec()),
            ("alpha", A.to_vec()),
            ("alpha again", A2.to_vec()),
            ("beta", B.to_vec()),
        ]);
        let index = RetrievalIndex::in_memory(Arc::new(embedder));
        let params = MmrParams {
            k,
            fetch_k,
            diversity,
            ..Default::default()
        };
        MmrRetriever::new(index, Some(Arc::new(BasicChunking::default())), &params).unwrap()
    }

    async fn seed(retriever: &MmrRetriever) {
        for text in ["alpha", "alpha again", "beta"] {
            retriever.add_docs(&[Document::new(text)], None).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_query_diverse_selection() {
        let retriever = retriever(2, 3, 0.0);
        seed(&retriever).await;

        let results = retriever.predict("query").await.unwrap();
        assert_eq!(results, vec!["alpha".to_string(), "beta".to_string()]);
    }

    #[tokio::test]
    async fn test_query_relevance_only() {
        let retriever = retriever(2, 3, 1.0);
        seed(&retriever).await;

        let results = retriever.predict("query").await.unwrap();
        assert_eq!(results, vec!["alpha".to_string(), "alpha again".to_string()]);
    }

    #[tokio::test]
    async fn test_empty_index() {
        let retriever = retriever(2, 3, 0.5);
        assert!(retriever.query("query").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_chunker() {
        let embedder = StaticEmbedding::new([("alpha", A.to_vec())]);
        let index = RetrievalIndex::in_memory(Arc::new(embedder));
        let retriever = MmrRetriever::new(index, None, &MmrParams::default()).unwrap();

        let err = retriever
            .add_docs(&[Document::new("alpha")], None)
            .await
            .unwrap_err();
        assert_eq!(rag_error(&err), Some(&RagError::MissingChunker));
    }

    #[test]
    fn test_invalid_params() {
        let mut params = Params::new();
        params.insert("k".into(), json!(3));
        params.insert("fetch_k".into(), json!(2));
        let err = create(&params, None).err().unwrap();
        assert!(matches!(rag_error(&err), Some(RagError::InvalidConfig(_))));

        let mut params = Params::new();
        params.insert("diversity".into(), json!(-0.1));
        assert!(create(&params, None).is_err());
    }
}
