//! Evaluation 모듈 - 데이터셋 기반 컴포넌트 평가
//!
//! - `dataset`: JSONL 데이터셋과 컬럼 매핑
//! - `scorer`: LLM judge 스코어러
//! - `harness`: 행별 실행 + 채점 + 요약
//! - `tracking`: 실행 결과의 로컬 기록

mod dataset;
mod harness;
pub mod scorer;
pub mod tracking;

pub use dataset::{row_str, row_str_list, Dataset, Row};
pub use harness::{
    Evaluation, EvaluationSummary, RowResult, ScoreRecord, ScorerSummary, Target,
};
pub use scorer::{parse_judgement, JudgeScorer, Metric, Output, Score, Scorer};
pub use tracking::{RunRecord, RunTracker, StoredScore};
