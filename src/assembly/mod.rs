//! 설정 기반 조립 및 평가 실행
//!
//! 1. 데이터셋 로드 + 컬럼 매핑
//! 2. 레지스트리로 모든 컴포넌트와 스코어러 생성 (여기서 실패하면 수집 전에 중단)
//! 3. 코퍼스 수집 → 리트리버 인덱싱
//! 4. 리트리버 평가 `(Ret) <name>` → 생성기 평가 `(Gen) <name>` (순차 실행)
//!
//! 생성기 평가 전에 `retrieval_context`가 없는 행은 리트리버 검색 결과로 채웁니다.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::Value;

use crate::chunking::Chunker;
use crate::config::{ChunkerConfig, ComponentConfig, Config, CorpusConfig, RetrieverConfig};
use crate::document::Document;
use crate::error::RagError;
use crate::evaluation::{
    row_str, Dataset, Evaluation, EvaluationSummary, RunTracker, Scorer, Target,
};
use crate::generation::Generator;
use crate::ingestion::Ingestor;
use crate::pipeline::RagPipeline;
use crate::registry::Registry;
use crate::retrieval::Retriever;

/// 평가 실행 결과
#[derive(Debug, Default)]
pub struct EvaluationOutcome {
    pub retriever: Option<EvaluationSummary>,
    pub generator: Option<EvaluationSummary>,
    /// 추적 저장소에 기록된 실행 id
    pub run_ids: Vec<String>,
}

impl EvaluationOutcome {
    pub fn summaries(&self) -> impl Iterator<Item = &EvaluationSummary> {
        self.retriever.iter().chain(self.generator.iter())
    }
}

/// 설정 → 라이브 컴포넌트 조립기
pub struct Assembler {
    registry: Registry,
}

impl Assembler {
    pub fn new(registry: Registry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn build_chunker(&self, config: &ChunkerConfig) -> Result<Arc<dyn Chunker>> {
        let ctor = self.registry.get_chunker(&config.name)?;
        ctor(&config.params)
    }

    /// 청커를 먼저 만들어 리트리버 생성자에 넘김
    pub fn build_retriever(&self, config: &RetrieverConfig) -> Result<Arc<dyn Retriever>> {
        let ctor = self.registry.get_retriever(&config.name)?;
        let chunker = config
            .chunker
            .as_ref()
            .map(|c| self.build_chunker(c))
            .transpose()?;
        if chunker.is_none() {
            tracing::warn!("Retriever '{}' has no chunker configured", config.name);
        }
        ctor(&config.params, chunker)
    }

    pub fn build_generator(&self, config: &ComponentConfig) -> Result<Arc<dyn Generator>> {
        let ctor = self.registry.get_generator(&config.name)?;
        ctor(&config.params)
    }

    pub fn build_ingestor(&self, config: &ComponentConfig) -> Result<Arc<dyn Ingestor>> {
        let ctor = self.registry.get_ingestor(&config.name)?;
        ctor(&config.params)
    }

    /// 스코어러 목록 (파라미터 없이 생성)
    pub fn build_scorers(&self, identifiers: &[String]) -> Result<Vec<Arc<dyn Scorer>>> {
        identifiers
            .iter()
            .map(|id| {
                let ctor = self.registry.get_scorer(id)?;
                ctor(&Default::default())
            })
            .collect()
    }

    pub fn build_pipeline(&self, config: &Config) -> Result<RagPipeline> {
        let retriever = self.build_retriever(&config.retriever)?;
        let generator = self.build_generator(&config.generator)?;
        let ingestor = self.build_ingestor(&config.ingestor)?;
        Ok(RagPipeline::new(retriever, generator, ingestor))
    }

    /// 전체 평가 실행
    pub async fn run_evaluation(
        &self,
        config: &Config,
        tracker: Option<&RunTracker>,
    ) -> Result<EvaluationOutcome> {
        let mut dataset = Dataset::from_jsonl(&config.dataset.path)?;
        if let Some(mapping) = &config.dataset.column_mapping {
            dataset.apply_column_mapping(mapping, config.dataset.strict)?;
        }

        let pipeline = self.build_pipeline(config)?;
        let retriever_scorers = self.build_scorers(config.scorers.retriever_scorers())?;
        let generator_scorers = self.build_scorers(config.scorers.generator_scorers())?;

        let retriever = pipeline.retriever().clone();
        retriever.init(None).await?;
        let docs = load_corpus(pipeline.ingestor().as_ref(), &config.corpus).await?;
        retriever.add_docs(&docs, None).await?;
        tracing::info!("Ingested {} corpus elements", docs.len());

        let mut outcome = EvaluationOutcome::default();
        let name = config.evaluation_name();

        if !retriever_scorers.is_empty() {
            let evaluation = Evaluation::new(format!("(Ret) {}", name), retriever_scorers);
            let summary = evaluation
                .evaluate(&dataset, Target::Retriever(retriever.as_ref()))
                .await?;
            record(tracker, &summary, &mut outcome.run_ids)?;
            outcome.retriever = Some(summary);
        }

        if !generator_scorers.is_empty() {
            fill_retrieval_context(&mut dataset, retriever.as_ref()).await?;

            let evaluation = Evaluation::new(format!("(Gen) {}", name), generator_scorers);
            let summary = evaluation
                .evaluate(&dataset, Target::Generator(pipeline.generator().as_ref()))
                .await?;
            record(tracker, &summary, &mut outcome.run_ids)?;
            outcome.generator = Some(summary);
        }

        Ok(outcome)
    }
}

/// 코퍼스 경로(파일/디렉터리)를 순서대로 로드
pub async fn load_corpus(ingestor: &dyn Ingestor, corpus: &CorpusConfig) -> Result<Vec<Document>> {
    let mut docs = Vec::new();
    for path in corpus.paths() {
        let loaded = if path.is_dir() {
            ingestor.load_dir(path).await
        } else {
            ingestor.load_files(&[path.to_path_buf()]).await
        };
        docs.extend(loaded.with_context(|| format!("Failed to ingest corpus {}", path.display()))?);
    }
    Ok(docs)
}

/// `retrieval_context`가 없는 행을 리트리버 검색 결과로 채움
pub async fn fill_retrieval_context(dataset: &mut Dataset, retriever: &dyn Retriever) -> Result<()> {
    let mut filled = 0;
    for row in &mut dataset.rows {
        if row.contains_key("retrieval_context") {
            continue;
        }
        let input = row_str(row, "input")
            .ok_or_else(|| RagError::KeyNotFound("input".into()))?
            .to_string();
        let contexts = retriever.predict(&input).await?;
        row.insert(
            "retrieval_context".to_string(),
            Value::Array(contexts.into_iter().map(Value::String).collect()),
        );
        filled += 1;
    }
    tracing::debug!("Filled retrieval_context for {} rows", filled);
    Ok(())
}

fn record(tracker: Option<&RunTracker>, summary: &EvaluationSummary, run_ids: &mut Vec<String>) -> Result<()> {
    if let Some(tracker) = tracker {
        run_ids.push(tracker.record(summary)?);
    }
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::rag_error;
    use crate::evaluation::Output;
    use crate::registry::{builtin_registry, parse_params, Category, Params};
    use crate::retrieval::{RetrievalIndex, SimilarityParams, SimilarityRetriever};
    use crate::testing::{BagOfWordsEmbedding, ContextGenerator, RecordingScorer};
    use serde_json::json;
    use std::path::Path;
    use tempfile::TempDir;

    fn offline_similarity(
        params: &Params,
        chunker: Option<Arc<dyn Chunker>>,
    ) -> Result<Arc<dyn Retriever>> {
        let params: SimilarityParams = parse_params("simple", params)?;
        let index = RetrievalIndex::in_memory(Arc::new(BagOfWordsEmbedding::default()));
        Ok(Arc::new(SimilarityRetriever::new(index, chunker, &params)?))
    }

    fn context_generator(_: &Params) -> Result<Arc<dyn Generator>> {
        Ok(Arc::new(ContextGenerator))
    }

    fn recall(_: &Params) -> Result<Arc<dyn Scorer>> {
        Ok(Arc::new(RecordingScorer::new("contextual_recall", 1.0)))
    }

    fn faithfulness(_: &Params) -> Result<Arc<dyn Scorer>> {
        Ok(Arc::new(RecordingScorer::new("faithfulness", 0.5)))
    }

    /// 내장 청커/수집기 + 오프라인 리트리버/생성기/스코어러
    fn assembler() -> Assembler {
        let (mut registry, _) = builtin_registry(&["scorers.judge".to_string()]);
        registry.register_retriever("simple", offline_similarity);
        registry.register_generator("ResponseGenerator", context_generator);
        registry.register_scorer("contextual_recall", recall);
        registry.register_scorer("faithfulness", faithfulness);
        Assembler::new(registry)
    }

    fn write_fixture(dir: &Path, corpus: &str) -> Config {
        std::fs::create_dir_all(dir.join("corpus")).unwrap();
        std::fs::write(
            dir.join("corpus/physics.md"),
            "# Physics\n\nEinstein proposed relativity.\n",
        )
        .unwrap();
        std::fs::write(
            dir.join("eval.jsonl"),
            concat!(
                "{\"question\": \"Who proposed relativity?\", \"answer\": \"Einstein\"}\n",
                "\n",
                "{\"question\": \"What is physics?\", \"answer\": \"A science\", \"retrieval_context\": [\"given\"]}\n",
            ),
        )
        .unwrap();

        let yaml = format!(
            r#"
evaluation_name: fixture
generator: {{ name: ResponseGenerator, params: {{ model: unused }} }}
ingestor: {{ name: SimpleIngestor }}
retriever:
  name: simple
  params:
    k: 1
    chunker:
      name: by_title_chunking
      params: {{ max_characters: 30, overlap: 0, combine_text_under_n_characters: 0 }}
scorers:
  retriever: [contextual_recall]
  generator: [faithfulness]
dataset:
  path: eval.jsonl
  column_mapping: {{ input: question, expected_output: answer }}
  strict: true
corpus:
  path: {}
"#,
            corpus
        );
        let path = dir.join("evaluate.yaml");
        std::fs::write(&path, yaml).unwrap();
        Config::load(&path).unwrap()
    }

    #[tokio::test]
    async fn test_run_evaluation_end_to_end() {
        let dir = TempDir::new().unwrap();
        let config = write_fixture(dir.path(), "corpus");
        let tracker = RunTracker::open(&dir.path().join("runs.db")).unwrap();

        let outcome = assembler()
            .run_evaluation(&config, Some(&tracker))
            .await
            .unwrap();

        let ret = outcome.retriever.as_ref().unwrap();
        assert_eq!(ret.name, "(Ret) fixture");
        assert_eq!(ret.rows.len(), 2);
        assert_eq!(ret.scorers[0].mean, Some(1.0));

        let gen = outcome.generator.as_ref().unwrap();
        assert_eq!(gen.name, "(Gen) fixture");
        // 첫 행은 리트리버로 채운 컨텍스트, 둘째 행은 데이터셋의 컨텍스트
        assert_eq!(
            gen.rows[0].output,
            Output::Answer("Einstein proposed relativity.".into())
        );
        assert_eq!(gen.rows[1].output, Output::Answer("given".into()));

        assert_eq!(outcome.run_ids.len(), 2);
        assert_eq!(tracker.recent_runs(10).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_component_fails_before_ingestion() {
        let dir = TempDir::new().unwrap();
        // 존재하지 않는 코퍼스: 조립이 먼저 실패해야 함
        let mut config = write_fixture(dir.path(), "missing.txt");
        config.retriever.name = "bm25".into();

        let err = assembler().run_evaluation(&config, None).await.unwrap_err();
        assert_eq!(
            rag_error(&err),
            Some(&RagError::NotFound {
                category: Category::Retrievers,
                identifier: "bm25".into()
            })
        );
    }

    #[tokio::test]
    async fn test_unknown_scorer_fails_before_ingestion() {
        let dir = TempDir::new().unwrap();
        let mut config = write_fixture(dir.path(), "missing.txt");
        config.scorers.generator = Some(vec!["g_eval".into()]);

        let err = assembler().run_evaluation(&config, None).await.unwrap_err();
        assert!(matches!(rag_error(&err), Some(RagError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_strict_mapping_missing_column() {
        let dir = TempDir::new().unwrap();
        let mut config = write_fixture(dir.path(), "corpus");
        config
            .dataset
            .column_mapping
            .as_mut()
            .unwrap()
            .insert("retrieval_context".into(), "contexts".into());

        let err = assembler().run_evaluation(&config, None).await.unwrap_err();
        assert_eq!(
            rag_error(&err),
            Some(&RagError::KeyNotFound("contexts".into()))
        );
    }

    #[tokio::test]
    async fn test_retriever_gets_configured_chunker() {
        let dir = TempDir::new().unwrap();
        let config = write_fixture(dir.path(), "corpus");
        let assembler = assembler();

        let retriever = assembler.build_retriever(&config.retriever).unwrap();
        retriever
            .add_docs(&[Document::new("Chunked by config.")], None)
            .await
            .unwrap();

        let mut bare = config.retriever.clone();
        bare.chunker = None;
        let retriever = assembler.build_retriever(&bare).unwrap();
        let err = retriever
            .add_docs(&[Document::new("No chunker.")], None)
            .await
            .unwrap_err();
        assert_eq!(rag_error(&err), Some(&RagError::MissingChunker));
    }

    #[tokio::test]
    async fn test_load_corpus_rejects_unsupported_file() {
        let dir = TempDir::new().unwrap();
        let bad = dir.path().join("notes.docx");
        std::fs::write(&bad, "x").unwrap();
        let corpus: CorpusConfig =
            serde_json::from_value(json!({ "path": bad })).unwrap();

        let ingestor = assembler().build_ingestor(&ComponentConfig {
            name: "SimpleIngestor".into(),
            params: Params::new(),
        });
        let err = load_corpus(ingestor.unwrap().as_ref(), &corpus)
            .await
            .unwrap_err();
        assert!(matches!(rag_error(&err), Some(RagError::InvalidFileType(_))));
    }
}
