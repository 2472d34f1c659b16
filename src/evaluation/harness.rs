//! 평가 하네스
//!
//! 데이터셋의 모든 행에 대상(리트리버/생성기)을 실행한 뒤, 각 (행, 출력)에 모든 스코어러를 적용합니다.
//! 한 행의 스코어러 실패는 실패 점수로 기록하고 실행을 계속합니다.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;

use super::dataset::{row_str, row_str_list, Dataset, Row};
use super::scorer::{Output, Scorer};
use crate::error::RagError;
use crate::generation::Generator;
use crate::retrieval::Retriever;

// ============================================================================
// Target
// ============================================================================

/// 평가 대상
#[derive(Clone, Copy)]
pub enum Target<'a> {
    Retriever(&'a dyn Retriever),
    Generator(&'a dyn Generator),
}

impl Target<'_> {
    pub fn kind(&self) -> &'static str {
        match self {
            Target::Retriever(_) => "retriever",
            Target::Generator(_) => "generator",
        }
    }

    pub fn component(&self) -> &'static str {
        match self {
            Target::Retriever(r) => r.name(),
            Target::Generator(g) => g.name(),
        }
    }

    /// 한 행에 대한 대상 출력
    async fn predict(&self, row: &Row) -> Result<Output> {
        let input = row_str(row, "input").ok_or_else(|| RagError::KeyNotFound("input".into()))?;
        match self {
            Target::Retriever(r) => Ok(Output::Contexts(r.predict(input).await?)),
            Target::Generator(g) => {
                let context = row_str_list(row, "retrieval_context").unwrap_or_default();
                Ok(Output::Answer(g.predict(input, &context).await?))
            }
        }
    }
}

// ============================================================================
// Results
// ============================================================================

/// 한 스코어러의 한 행 결과
#[derive(Debug, Clone, Serialize)]
pub struct ScoreRecord {
    pub scorer: String,
    pub score: Option<f64>,
    pub reason: Option<String>,
    pub error: Option<String>,
}

/// 행 결과
#[derive(Debug, Clone, Serialize)]
pub struct RowResult {
    pub index: usize,
    pub input: String,
    pub output: Output,
    pub scores: Vec<ScoreRecord>,
}

/// 스코어러별 요약
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScorerSummary {
    pub scorer: String,
    /// 성공한 점수의 평균 (성공이 없으면 None)
    pub mean: Option<f64>,
    pub scored: usize,
    pub failures: usize,
}

/// 평가 실행 요약
#[derive(Debug, Clone, Serialize)]
pub struct EvaluationSummary {
    pub name: String,
    pub target: String,
    pub component: String,
    pub scorers: Vec<ScorerSummary>,
    pub rows: Vec<RowResult>,
}

impl EvaluationSummary {
    /// 콘솔 출력용 요약
    pub fn report(&self) -> String {
        let mut out = format!(
            "{} [{}: {}] {} rows\n",
            self.name,
            self.target,
            self.component,
            self.rows.len()
        );
        for s in &self.scorers {
            let mean = s
                .mean
                .map(|m| format!("{:.3}", m))
                .unwrap_or_else(|| "n/a".to_string());
            out.push_str(&format!(
                "  {:<22} mean={} scored={} failed={}\n",
                s.scorer, mean, s.scored, s.failures
            ));
        }
        out
    }
}

// ============================================================================
// Evaluation
// ============================================================================

/// 평가 정의
pub struct Evaluation {
    pub name: String,
    pub scorers: Vec<Arc<dyn Scorer>>,
}

impl Evaluation {
    pub fn new(name: impl Into<String>, scorers: Vec<Arc<dyn Scorer>>) -> Self {
        Self {
            name: name.into(),
            scorers,
        }
    }

    /// 평가 실행
    ///
    /// 대상 실행 실패는 전파하고, 스코어러 실패는 기록만 합니다.
    pub async fn evaluate(&self, dataset: &Dataset, target: Target<'_>) -> Result<EvaluationSummary> {
        tracing::info!(
            "Evaluating {} '{}' on {} rows with {} scorers",
            target.kind(),
            self.name,
            dataset.len(),
            self.scorers.len()
        );

        let mut rows = Vec::with_capacity(dataset.len());

        for (index, row) in dataset.rows.iter().enumerate() {
            let output = target
                .predict(row)
                .await
                .with_context(|| format!("{} failed on row {}", target.kind(), index))?;

            let mut scores = Vec::with_capacity(self.scorers.len());
            for scorer in &self.scorers {
                let record = match scorer.score(row, &output).await {
                    Ok(score) => ScoreRecord {
                        scorer: scorer.name().to_string(),
                        score: Some(score.score),
                        reason: score.reason,
                        error: None,
                    },
                    Err(e) => {
                        tracing::warn!("Scorer {} failed on row {}: {:#}", scorer.name(), index, e);
                        ScoreRecord {
                            scorer: scorer.name().to_string(),
                            score: None,
                            reason: None,
                            error: Some(format!("{:#}", e)),
                        }
                    }
                };
                scores.push(record);
            }

            tracing::debug!("Row {}/{} scored", index + 1, dataset.len());
            rows.push(RowResult {
                index,
                input: row_str(row, "input").unwrap_or_default().to_string(),
                output,
                scores,
            });
        }

        let scorers = self
            .scorers
            .iter()
            .map(|s| summarize(s.name(), &rows))
            .collect();

        Ok(EvaluationSummary {
            name: self.name.clone(),
            target: target.kind().to_string(),
            component: target.component().to_string(),
            scorers,
            rows,
        })
    }
}

fn summarize(scorer: &str, rows: &[RowResult]) -> ScorerSummary {
    let records = rows
        .iter()
        .flat_map(|r| r.scores.iter())
        .filter(|s| s.scorer == scorer);

    let mut total = 0.0;
    let mut scored = 0;
    let mut failures = 0;
    for record in records {
        match record.score {
            Some(v) => {
                total += v;
                scored += 1;
            }
            None => failures += 1,
        }
    }

    ScorerSummary {
        scorer: scorer.to_string(),
        mean: (scored > 0).then(|| total / scored as f64),
        scored,
        failures,
    }
}

// ============================================================================
// Tests
// ============================================================================
