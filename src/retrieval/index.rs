//! 검색 인덱스 - 임베딩 프로바이더 + 벡터 저장소
//!
//! 리트리버 인스턴스 하나가 인덱스 하나를 독점합니다.
//! 청킹 → 메타데이터 평탄화 → 임베딩 → 삽입 순서로 문서를 추가합니다.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use serde::Deserialize;

use super::lance::LanceVectorStore;
use super::vector::{InMemoryVectorStore, SearchResult, VectorEntry, VectorStore};
use crate::chunking::Chunker;
use crate::document::Document;
use crate::embedding::{create_embedder, EmbeddingProvider, Provider, DEFAULT_MODEL};
use crate::error::RagError;

/// 벡터 저장소 백엔드
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexBackend {
    #[default]
    Memory,
    Lance,
}

/// 인덱스 공통 파라미터 (각 리트리버 파라미터에 flatten)
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IndexParams {
    /// 임베딩 모델
    #[serde(alias = "embedding_model", alias = "emedding_model")]
    pub model: String,
    pub embedding_provider: Provider,
    /// 임베딩 서버 주소 (Ollama)
    pub base_url: Option<String>,
    pub index: IndexBackend,
    /// LanceDB 디렉토리 (기본값: 상태 디렉토리 아래 `lance`)
    pub index_path: Option<PathBuf>,
}

impl Default for IndexParams {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            embedding_provider: Provider::default(),
            base_url: None,
            index: IndexBackend::default(),
            index_path: None,
        }
    }
}

// ============================================================================
// RetrievalIndex
// ============================================================================

/// 리트리버 전용 검색 인덱스
pub struct RetrievalIndex {
    embedder: Arc<dyn EmbeddingProvider>,
    store: Box<dyn VectorStore>,
}

impl RetrievalIndex {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, store: Box<dyn VectorStore>) -> Self {
        Self { embedder, store }
    }

    /// 인메모리 저장소 인덱스
    pub fn in_memory(embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self::new(embedder, Box::new(InMemoryVectorStore::new()))
    }

    /// 파라미터로 인덱스 생성
    pub fn from_params(params: &IndexParams) -> Result<Self> {
        let embedder = create_embedder(
            params.embedding_provider,
            &params.model,
            params.base_url.as_deref(),
        )?;

        let store: Box<dyn VectorStore> = match params.index {
            IndexBackend::Memory => Box::new(InMemoryVectorStore::new()),
            IndexBackend::Lance => {
                let path = match &params.index_path {
                    Some(p) => p.clone(),
                    None => crate::config::get_data_dir().join("lance"),
                };
                let store = LanceVectorStore::new(path);
                tracing::debug!("Using LanceDB table {}", store.table_name());
                Box::new(store)
            }
        };

        Ok(Self::new(embedder, store))
    }

    /// 인덱스 비우기
    pub async fn reset(&self) -> Result<()> {
        self.store.reset().await
    }

    /// 문서 청킹 후 삽입
    ///
    /// 청커는 호출자가 지정한 것 → 기본 청커 순으로 선택하고, 둘 다 없으면 MissingChunker.
    pub async fn add_docs(
        &self,
        docs: &[Document],
        supplied: Option<Arc<dyn Chunker>>,
        default: Option<&Arc<dyn Chunker>>,
    ) -> Result<usize> {
        let chunker = supplied
            .or_else(|| default.cloned())
            .ok_or(RagError::MissingChunker)?;

        let chunks: Vec<Document> = chunker
            .chunk(docs)
            .iter()
            .map(Document::sanitized)
            .collect();
        if chunks.is_empty() {
            return Ok(0);
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let embeddings = self.embedder.embed_batch(&texts).await?;
        if embeddings.len() != chunks.len() {
            anyhow::bail!(
                "Embedder returned {} vectors for {} chunks",
                embeddings.len(),
                chunks.len()
            );
        }

        let entries: Vec<VectorEntry> = chunks
            .into_iter()
            .zip(embeddings)
            .map(|(document, embedding)| VectorEntry {
                document,
                embedding,
            })
            .collect();

        let inserted = self.store.insert_batch(entries).await?;
        tracing::info!(
            "Indexed {} chunks from {} documents ({})",
            inserted,
            docs.len(),
            chunker.name()
        );
        Ok(inserted)
    }

    /// 쿼리 임베딩
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embedder.embed(text).await
    }

    /// 임베딩으로 최근접 검색
    pub async fn search(&self, embedding: &[f32], limit: usize) -> Result<Vec<SearchResult>> {
        self.store.search(embedding, limit).await
    }

    pub async fn count(&self) -> Result<usize> {
        self.store.count().await
    }
}

// ============================================================================
// Tests
// ============================================================================
