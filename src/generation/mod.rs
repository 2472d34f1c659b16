//! Generation 모듈 - 검색 컨텍스트 기반 응답 생성
//!
//! `ResponseGenerator`는 고정 프롬프트 템플릿에 컨텍스트와 질문을 채워 LLM에 전달합니다.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;

use crate::llm::{LlmClient, OllamaChat};
use crate::registry::{parse_params, Params, Registry};

/// 응답 생성 프롬프트 지시문
const PROMPT_INSTRUCTIONS: &str = "Use the following pieces of context to answer the question at the end. \
If you don't know the answer, just say that you don't know, don't try to make up an answer. \
Use three sentences maximum. Keep the answer as concise as possible. \n";

// ============================================================================
// Generator Trait
// ============================================================================

/// 응답 생성기 트레이트
#[async_trait]
pub trait Generator: Send + Sync {
    /// 질문과 컨텍스트 목록으로 응답 생성
    async fn query(&self, query: &str, context: &[String]) -> Result<String>;

    /// 평가용 진입점
    async fn predict(&self, input: &str, retrieval_context: &[String]) -> Result<String> {
        self.query(input, retrieval_context).await
    }

    fn name(&self) -> &'static str;
}

/// 레지스트리 등록
pub fn register(registry: &mut Registry) -> Result<()> {
    registry.register_generator("ResponseGenerator", create_response_generator);
    Ok(())
}

/// 프롬프트 구성 (컨텍스트는 줄바꿈으로 연결)
///
/// 컨텍스트와 질문은 한 번에 삽입되며, 삽입된 텍스트는 다시 치환되지 않습니다.
pub fn build_prompt(question: &str, context: &[String]) -> String {
    format!(
        "{}Context: {}\nQuestion: {}\nHelpful Answer: ",
        PROMPT_INSTRUCTIONS,
        context.join("\n"),
        question
    )
}

// ============================================================================
// ResponseGenerator
// ============================================================================

/// ResponseGenerator 파라미터
#[derive(Debug, Clone, Deserialize)]
pub struct ResponseGeneratorParams {
    /// Ollama chat 모델
    pub model: String,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default)]
    pub base_url: Option<String>,
}

/// 프롬프트 템플릿 + LLM 응답 생성기
pub struct ResponseGenerator {
    llm: Arc<dyn LlmClient>,
}

impl ResponseGenerator {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl Generator for ResponseGenerator {
    async fn query(&self, query: &str, context: &[String]) -> Result<String> {
        let prompt = build_prompt(query, context);
        tracing::debug!(
            "Generating with {} ({} context passages)",
            self.llm.model(),
            context.len()
        );
        let answer = self.llm.complete(&prompt).await?;
        Ok(answer.trim().to_string())
    }

    fn name(&self) -> &'static str {
        "ResponseGenerator"
    }
}

fn create_response_generator(params: &Params) -> Result<Arc<dyn Generator>> {
    let params: ResponseGeneratorParams = parse_params("ResponseGenerator", params)?;
    let llm = OllamaChat::new(&params.model, params.base_url.as_deref(), params.temperature)?;
    Ok(Arc::new(ResponseGenerator::new(Arc::new(llm))))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{rag_error, RagError};
    use crate::testing::EchoLlm;

    #[test]
    fn test_build_prompt_joins_context_with_newlines() {
        let prompt = build_prompt(
            "Who proposed relativity?",
            &["Einstein proposed relativity.".to_string(), "Second.".to_string()],
        );
        assert!(prompt.contains("Context: Einstein proposed relativity.\nSecond.\n"));
        assert!(prompt.contains("Question: Who proposed relativity?\n"));
        assert!(prompt.ends_with("Helpful Answer: "));
    }

    #[test]
    fn test_build_prompt_keeps_placeholder_text_in_context() {
        let prompt = build_prompt(
            "Who?",
            &["literal {question} token".to_string(), "{context} too".to_string()],
        );
        assert!(prompt.contains("Context: literal {question} token\n{context} too\n"));
        assert!(prompt.contains("Question: Who?\n"));
        assert_eq!(prompt.matches("Who?").count(), 1);
    }

    #[tokio::test]
    async fn test_response_generator_uses_llm() {
        let generator = ResponseGenerator::new(Arc::new(EchoLlm));
        let answer = generator
            .predict("Who?", &["Einstein proposed relativity.".to_string()])
            .await
            .unwrap();
        assert!(answer.contains("Einstein proposed relativity."));
    }

    #[test]
    fn test_create_requires_model() {
        let err = create_response_generator(&Params::new()).err().unwrap();
        assert!(matches!(rag_error(&err), Some(RagError::InvalidConfig(_))));

        let mut params = Params::new();
        params.insert("model".into(), serde_json::json!("qwen2.5:3b"));
        assert_eq!(create_response_generator(&params).unwrap().name(), "ResponseGenerator");
    }
}
