//! RAG 파이프라인 - 리트리버 + 생성기 + 수집기 조합
//!
//! - `ingest`: 주어진 입력(파일 경로, 업로드 파일, 디렉터리, 텍스트)을 모두 읽어 리트리버에 추가
//! - `query`: 검색 → 생성, (응답, 근거 본문 목록) 반환

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;

use crate::document::Document;
use crate::error::RagError;
use crate::generation::Generator;
use crate::ingestion::Ingestor;
use crate::retrieval::Retriever;

/// 생성기에 넘길 때 검색 본문 사이 구분자
const CONTEXT_SEPARATOR: &str = "\n\n";

/// ingest 입력 (하나 이상 지정)
#[derive(Debug, Clone, Default)]
pub struct IngestRequest {
    /// 파일 경로 (여러 개 가능)
    pub filepaths: Vec<PathBuf>,
    /// 업로드된 파일 (이름, 내용)
    pub file: Option<(String, Vec<u8>)>,
    pub dir: Option<PathBuf>,
    pub text: Option<String>,
}

impl IngestRequest {
    pub fn filepath(path: impl Into<PathBuf>) -> Self {
        Self {
            filepaths: vec![path.into()],
            ..Default::default()
        }
    }

    pub fn dir(path: impl Into<PathBuf>) -> Self {
        Self {
            dir: Some(path.into()),
            ..Default::default()
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.filepaths.is_empty() && self.file.is_none() && self.dir.is_none() && self.text.is_none()
    }
}

/// RAG 파이프라인
pub struct RagPipeline {
    retriever: Arc<dyn Retriever>,
    generator: Arc<dyn Generator>,
    ingestor: Arc<dyn Ingestor>,
}

impl RagPipeline {
    pub fn new(
        retriever: Arc<dyn Retriever>,
        generator: Arc<dyn Generator>,
        ingestor: Arc<dyn Ingestor>,
    ) -> Self {
        Self {
            retriever,
            generator,
            ingestor,
        }
    }

    pub fn retriever(&self) -> &Arc<dyn Retriever> {
        &self.retriever
    }

    pub fn generator(&self) -> &Arc<dyn Generator> {
        &self.generator
    }

    pub fn ingestor(&self) -> &Arc<dyn Ingestor> {
        &self.ingestor
    }

    /// 입력을 모두 읽은 뒤 한 번에 리트리버에 추가 (추가된 요소 수 반환)
    pub async fn ingest(&self, request: IngestRequest) -> Result<usize> {
        if request.is_empty() {
            return Err(RagError::invalid_config(
                "ingest needs at least one of filepath, file, dir or text",
            )
            .into());
        }

        let mut docs: Vec<Document> = Vec::new();
        if !request.filepaths.is_empty() {
            docs.extend(self.ingestor.load_files(&request.filepaths).await?);
        }
        if let Some((name, bytes)) = &request.file {
            docs.extend(self.ingestor.load_bytes(name, bytes).await?);
        }
        if let Some(dir) = &request.dir {
            docs.extend(self.ingestor.load_dir(dir).await?);
        }
        if let Some(text) = &request.text {
            docs.extend(self.ingestor.load_text(text));
        }

        self.retriever.add_docs(&docs, None).await?;
        tracing::info!("Ingested {} elements into {}", docs.len(), self.retriever.name());
        Ok(docs.len())
    }

    /// 질의 (응답, 검색된 본문 목록)
    pub async fn query(&self, text: &str) -> Result<(String, Vec<String>)> {
        let contexts: Vec<String> = self
            .retriever
            .query(text)
            .await?
            .into_iter()
            .map(|d| d.content)
            .collect();

        let joined = contexts.join(CONTEXT_SEPARATOR);
        let answer = self.generator.query(text, &[joined]).await?;
        tracing::debug!("Answered with {} sources", contexts.len());
        Ok((answer, contexts))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::BasicChunking;
    use crate::error::rag_error;
    use crate::generation::ResponseGenerator;
    use crate::ingestion::SimpleIngestor;
    use crate::retrieval::{RetrievalIndex, SimilarityParams, SimilarityRetriever};
    use crate::testing::{BagOfWordsEmbedding, EchoLlm};
    use tempfile::TempDir;

    fn pipeline(k: usize) -> RagPipeline {
        let index = RetrievalIndex::in_memory(Arc::new(BagOfWordsEmbedding::default()));
        let params = SimilarityParams {
            k,
            ..Default::default()
        };
        let retriever =
            SimilarityRetriever::new(index, Some(Arc::new(BasicChunking::default())), &params)
                .unwrap();

        RagPipeline::new(
            Arc::new(retriever),
            Arc::new(ResponseGenerator::new(Arc::new(EchoLlm))),
            Arc::new(SimpleIngestor::default()),
        )
    }

    #[tokio::test]
    async fn test_end_to_end_single_source() {
        let pipeline = pipeline(1);
        pipeline
            .ingest(IngestRequest::text("Einstein proposed relativity."))
            .await
            .unwrap();

        let (answer, sources) = pipeline.query("Who proposed relativity?").await.unwrap();
        assert_eq!(sources, vec!["Einstein proposed relativity.".to_string()]);
        assert!(!answer.is_empty());
        assert!(answer.contains("Einstein proposed relativity."));
    }

    #[tokio::test]
    async fn test_ingest_combines_inputs() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("one.txt");
        std::fs::write(&file, "First file.").unwrap();
        let corpus = dir.path().join("corpus");
        std::fs::create_dir_all(&corpus).unwrap();
        std::fs::write(corpus.join("two.md"), "Second file.").unwrap();

        let pipeline = pipeline(10);
        let request = IngestRequest {
            filepaths: vec![file],
            file: Some(("upload.txt".into(), b"Uploaded.".to_vec())),
            dir: Some(corpus),
            text: Some("Raw text.".into()),
        };
        assert_eq!(pipeline.ingest(request).await.unwrap(), 4);

        // 기본 청커가 짧은 요소들을 한 청크로 묶음
        let (_, sources) = pipeline.query("file").await.unwrap();
        assert_eq!(sources.len(), 1);
        for part in ["First file.", "Uploaded.", "Second file.", "Raw text."] {
            assert!(sources[0].contains(part), "missing {}", part);
        }
    }

    #[tokio::test]
    async fn test_empty_ingest_request_fails() {
        let err = pipeline(1).ingest(IngestRequest::default()).await.unwrap_err();
        assert!(matches!(rag_error(&err), Some(RagError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_query_on_empty_index() {
        let (answer, sources) = pipeline(3).query("anything").await.unwrap();
        assert!(sources.is_empty());
        assert!(answer.contains("Question: anything"));
    }
}
