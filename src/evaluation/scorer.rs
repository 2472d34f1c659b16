//! 평가 스코어러
//!
//! LLM judge 방식의 스코어러 5종을 등록합니다.
//! - 생성기용: `faithfulness`, `answer_relevancy`
//! - 리트리버용: `contextual_precision`, `contextual_recall`, `contextual_relevancy`
//!
//! judge는 `{"score": 0~1, "reason": "..."}` JSON으로 답하도록 요청받습니다.

use std::fmt;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::dataset::{row_str, row_str_list, Row};
use crate::error::RagError;
use crate::llm::{get_api_key, GeminiChat, LlmClient, DEFAULT_GEMINI_MODEL};
use crate::registry::{parse_params, Params, Registry};

// ============================================================================
// Types
// ============================================================================

/// 평가 대상의 출력
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Output {
    /// 리트리버: 검색된 본문 목록
    Contexts(Vec<String>),
    /// 생성기: 응답 텍스트
    Answer(String),
}

impl Output {
    fn contexts(&self) -> Option<&[String]> {
        match self {
            Output::Contexts(c) => Some(c),
            Output::Answer(_) => None,
        }
    }

    fn answer(&self) -> Option<&str> {
        match self {
            Output::Answer(a) => Some(a),
            Output::Contexts(_) => None,
        }
    }
}

/// 점수 (0.0 ~ 1.0)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Score {
    pub score: f64,
    #[serde(default)]
    pub reason: Option<String>,
}

/// 스코어러 트레이트
#[async_trait]
pub trait Scorer: Send + Sync {
    fn name(&self) -> &str;

    /// 한 행과 대상 출력에 대한 점수
    async fn score(&self, row: &Row, output: &Output) -> Result<Score>;
}

// ============================================================================
// Judge Metrics
// ============================================================================

/// LLM judge 지표
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    Faithfulness,
    AnswerRelevancy,
    ContextualPrecision,
    ContextualRecall,
    ContextualRelevancy,
}

impl Metric {
    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Faithfulness => "faithfulness",
            Metric::AnswerRelevancy => "answer_relevancy",
            Metric::ContextualPrecision => "contextual_precision",
            Metric::ContextualRecall => "contextual_recall",
            Metric::ContextualRelevancy => "contextual_relevancy",
        }
    }

    fn rubric(&self) -> &'static str {
        match self {
            Metric::Faithfulness => {
                "Break the ACTUAL OUTPUT into individual claims. Score is the fraction of claims \
                 that are supported by the RETRIEVAL CONTEXT (contradicted or unsupported claims \
                 count against it)."
            }
            Metric::AnswerRelevancy => {
                "Break the ACTUAL OUTPUT into individual statements. Score is the fraction of \
                 statements that are relevant to answering the INPUT."
            }
            Metric::ContextualPrecision => {
                "For each node of the RETRIEVAL CONTEXT, in order, decide whether it is useful for \
                 arriving at the EXPECTED OUTPUT. Score is the mean precision@k over the useful \
                 nodes, so useful nodes ranked higher give a higher score."
            }
            Metric::ContextualRecall => {
                "Break the EXPECTED OUTPUT into individual sentences. Score is the fraction of \
                 sentences that can be attributed to some node of the RETRIEVAL CONTEXT."
            }
            Metric::ContextualRelevancy => {
                "Break the RETRIEVAL CONTEXT into individual statements. Score is the fraction of \
                 statements that are relevant to the INPUT."
            }
        }
    }

    /// 행과 출력에서 judge 프롬프트의 필드 구성
    fn fields(&self, row: &Row, output: &Output) -> Result<Vec<(&'static str, String)>> {
        let input = || required(self, row_str(row, "input").map(str::to_string), "input");
        let expected = || {
            required(
                self,
                row_str(row, "expected_output").map(str::to_string),
                "expected_output",
            )
        };
        let answer = || required(self, output.answer().map(str::to_string), "answer output");
        let contexts = || {
            required(
                self,
                output.contexts().map(format_contexts),
                "retrieval context output",
            )
        };

        Ok(match self {
            Metric::Faithfulness => {
                let context = row_str_list(row, "retrieval_context")
                    .map(|c| format_contexts(&c));
                vec![
                    ("INPUT", input()?),
                    ("ACTUAL OUTPUT", answer()?),
                    ("RETRIEVAL CONTEXT", required(self, context, "retrieval_context")?),
                ]
            }
            Metric::AnswerRelevancy => vec![("INPUT", input()?), ("ACTUAL OUTPUT", answer()?)],
            Metric::ContextualPrecision => vec![
                ("INPUT", input()?),
                ("EXPECTED OUTPUT", expected()?),
                ("RETRIEVAL CONTEXT", contexts()?),
            ],
            Metric::ContextualRecall => vec![
                ("EXPECTED OUTPUT", expected()?),
                ("RETRIEVAL CONTEXT", contexts()?),
            ],
            Metric::ContextualRelevancy => {
                vec![("INPUT", input()?), ("RETRIEVAL CONTEXT", contexts()?)]
            }
        })
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn required(metric: &Metric, value: Option<String>, field: &str) -> Result<String> {
    value.ok_or_else(|| anyhow::anyhow!("{} requires '{}'", metric, field))
}

fn format_contexts(contexts: &[String]) -> String {
    contexts
        .iter()
        .enumerate()
        .map(|(i, c)| format!("[{}] {}", i + 1, c))
        .collect::<Vec<_>>()
        .join("\n")
}

// ============================================================================
// JudgeScorer
// ============================================================================

/// LLM judge 스코어러
pub struct JudgeScorer {
    metric: Metric,
    llm: Arc<dyn LlmClient>,
}

impl JudgeScorer {
    pub fn new(metric: Metric, llm: Arc<dyn LlmClient>) -> Self {
        Self { metric, llm }
    }

    fn build_prompt(&self, fields: &[(&'static str, String)]) -> String {
        let mut prompt = format!(
            "You are an evaluator computing the '{}' metric.\n{}\n\n",
            self.metric,
            self.metric.rubric()
        );
        for (label, value) in fields {
            prompt.push_str(&format!("{}:\n{}\n\n", label, value));
        }
        prompt.push_str(
            "Respond with only a JSON object of the form \
             {\"score\": <number between 0 and 1>, \"reason\": \"<one sentence>\"}.",
        );
        prompt
    }
}

#[async_trait]
impl Scorer for JudgeScorer {
    fn name(&self) -> &str {
        self.metric.as_str()
    }

    async fn score(&self, row: &Row, output: &Output) -> Result<Score> {
        let fields = self.metric.fields(row, output)?;
        let response = self.llm.complete(&self.build_prompt(&fields)).await?;
        parse_judgement(&response).with_context(|| format!("{} judge response", self.metric))
    }
}

/// judge 응답에서 JSON 점수 추출 (코드 펜스/앞뒤 텍스트 허용)
pub fn parse_judgement(response: &str) -> Result<Score> {
    let start = response.find('{');
    let end = response.rfind('}');
    let json = match (start, end) {
        (Some(s), Some(e)) if s < e => &response[s..=e],
        _ => anyhow::bail!("no JSON object in judge response: {}", response.trim()),
    };

    let mut score: Score = serde_json::from_str(json).context("Failed to parse judge JSON")?;
    if !score.score.is_finite() {
        anyhow::bail!("judge returned non-finite score");
    }
    score.score = score.score.clamp(0.0, 1.0);
    Ok(score)
}

// ============================================================================
// Registration
// ============================================================================

/// judge 파라미터
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct JudgeParams {
    model: String,
}

impl Default for JudgeParams {
    fn default() -> Self {
        Self {
            model: DEFAULT_GEMINI_MODEL.to_string(),
        }
    }
}

fn create_judge(metric: Metric, params: &Params) -> Result<Arc<dyn Scorer>> {
    let params: JudgeParams = parse_params(metric.as_str(), params)?;
    let api_key = get_api_key().map_err(|e| {
        RagError::invalid_config(format!("{} scorer needs a Gemini API key: {}", metric, e))
    })?;
    let llm = GeminiChat::new(api_key, params.model)?;
    Ok(Arc::new(JudgeScorer::new(metric, Arc::new(llm))))
}

fn faithfulness(params: &Params) -> Result<Arc<dyn Scorer>> {
    create_judge(Metric::Faithfulness, params)
}

fn answer_relevancy(params: &Params) -> Result<Arc<dyn Scorer>> {
    create_judge(Metric::AnswerRelevancy, params)
}

fn contextual_precision(params: &Params) -> Result<Arc<dyn Scorer>> {
    create_judge(Metric::ContextualPrecision, params)
}

fn contextual_recall(params: &Params) -> Result<Arc<dyn Scorer>> {
    create_judge(Metric::ContextualRecall, params)
}

fn contextual_relevancy(params: &Params) -> Result<Arc<dyn Scorer>> {
    create_judge(Metric::ContextualRelevancy, params)
}

/// 레지스트리 등록
pub fn register(registry: &mut Registry) -> Result<()> {
    registry.register_scorer("faithfulness", faithfulness);
    registry.register_scorer("answer_relevancy", answer_relevancy);
    registry.register_scorer("contextual_precision", contextual_precision);
    registry.register_scorer("contextual_recall", contextual_recall);
    registry.register_scorer("contextual_relevancy", contextual_relevancy);
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
