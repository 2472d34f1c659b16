//! ragkit - 설정 기반 RAG 파이프라인 및 평가 도구
//!
//! 이름으로 등록된 컴포넌트(리트리버, 청커, 생성기, 수집기, 스코어러)를
//! YAML 설정으로 조립해 수집 → 검색 → 생성 파이프라인과 평가를 실행합니다.

pub mod assembly;
pub mod chunking;
pub mod cli;
pub mod config;
pub mod document;
pub mod embedding;
pub mod error;
pub mod evaluation;
pub mod generation;
pub mod ingestion;
pub mod llm;
pub mod pipeline;
pub mod registry;
pub mod retrieval;

#[cfg(test)]
pub mod testing;

// Re-exports
pub use assembly::{Assembler, EvaluationOutcome};
pub use chunking::{BasicChunking, ByTitleChunking, Chunker};
pub use config::{get_data_dir, Config};
pub use document::Document;
pub use embedding::EmbeddingProvider;
pub use error::RagError;
pub use evaluation::{Dataset, Evaluation, EvaluationSummary, RunTracker, Scorer};
pub use generation::{Generator, ResponseGenerator};
pub use ingestion::{FileType, Ingestor, SimpleIngestor};
pub use llm::LlmClient;
pub use pipeline::{IngestRequest, RagPipeline};
pub use registry::{builtin_registry, Registry};
pub use retrieval::{MmrRetriever, Reranker, Retriever, SimilarityRetriever};
