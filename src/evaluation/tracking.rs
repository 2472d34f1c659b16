//! 평가 실행 기록 - rusqlite 기반 로컬 추적 저장소
//!
//! `-wb/--enable_wandb`가 켜지면 실행 요약과 행별 점수를 기록합니다.
//! 파이프라인 동작에는 영향이 없습니다.
//! 저장 위치: <data_local_dir>/.ragkit/runs.db

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags};
use serde::Serialize;

use super::harness::EvaluationSummary;
use crate::config::get_data_dir;

/// 기록된 실행
#[derive(Debug, Clone, Serialize)]
pub struct RunRecord {
    pub id: String,
    pub name: String,
    pub target: String,
    pub component: String,
    pub rows: usize,
    pub created_at: DateTime<Utc>,
}

/// 기록된 점수
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredScore {
    pub row_index: usize,
    pub scorer: String,
    pub score: Option<f64>,
    pub error: Option<String>,
}

/// 실행 추적 저장소
pub struct RunTracker {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl RunTracker {
    /// 저장소 열기 (없으면 생성)
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).context("Failed to create database directory")?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .context("Failed to open SQLite database")?;

        let tracker = Self {
            conn: Mutex::new(conn),
            db_path: path.to_path_buf(),
        };
        tracker.initialize()?;
        Ok(tracker)
    }

    /// 기본 위치에서 열기
    pub fn open_default() -> Result<Self> {
        Self::open(&get_data_dir().join("runs.db"))
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn initialize(&self) -> Result<()> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS runs (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                target TEXT NOT NULL,
                component TEXT NOT NULL,
                rows INTEGER NOT NULL,
                summary TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS scores (
                run_id TEXT NOT NULL REFERENCES runs(id),
                row_index INTEGER NOT NULL,
                scorer TEXT NOT NULL,
                score REAL,
                reason TEXT,
                error TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_scores_run ON scores(run_id);",
        )
        .context("Failed to create tracking tables")?;

        tracing::debug!("Run tracker initialized at {:?}", self.db_path);
        Ok(())
    }

    /// 실행 기록 (실행 id 반환)
    pub fn record(&self, summary: &EvaluationSummary) -> Result<String> {
        let mut conn = self.conn.lock().map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;
        let id = uuid::Uuid::new_v4().to_string();
        let summary_json =
            serde_json::to_string(&summary.scorers).context("Failed to serialize summary")?;

        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO runs (id, name, target, component, rows, summary, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                id,
                summary.name,
                summary.target,
                summary.component,
                summary.rows.len() as i64,
                summary_json,
                Utc::now().to_rfc3339(),
            ],
        )
        .context("Failed to insert run")?;

        for row in &summary.rows {
            for score in &row.scores {
                tx.execute(
                    "INSERT INTO scores (run_id, row_index, scorer, score, reason, error)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        id,
                        row.index as i64,
                        score.scorer,
                        score.score,
                        score.reason,
                        score.error,
                    ],
                )
                .context("Failed to insert score")?;
            }
        }
        tx.commit()?;

        tracing::info!("Recorded run '{}' ({})", summary.name, id);
        Ok(id)
    }

    /// 최근 실행 목록
    pub fn recent_runs(&self, limit: usize) -> Result<Vec<RunRecord>> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;
        let mut stmt = conn.prepare(
            "SELECT id, name, target, component, rows, created_at FROM runs
             ORDER BY created_at DESC
             LIMIT ?1",
        )?;

        let runs = stmt
            .query_map(params![limit as i64], |row| {
                Ok(RunRecord {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    target: row.get(2)?,
                    component: row.get(3)?,
                    rows: row.get::<_, i64>(4)? as usize,
                    created_at: parse_datetime(row.get::<_, String>(5)?),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(runs)
    }

    /// 실행의 행별 점수
    pub fn run_scores(&self, run_id: &str) -> Result<Vec<StoredScore>> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;
        let mut stmt = conn.prepare(
            "SELECT row_index, scorer, score, error FROM scores
             WHERE run_id = ?1
             ORDER BY row_index, rowid",
        )?;

        let scores = stmt
            .query_map(params![run_id], |row| {
                Ok(StoredScore {
                    row_index: row.get::<_, i64>(0)? as usize,
                    scorer: row.get(1)?,
                    score: row.get(2)?,
                    error: row.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(scores)
    }
}

/// RFC3339 문자열을 DateTime<Utc>로 파싱
fn parse_datetime(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluation::harness::{RowResult, ScoreRecord, ScorerSummary};
    use crate::evaluation::scorer::Output;
    use tempfile::TempDir;

    fn summary() -> EvaluationSummary {
        EvaluationSummary {
            name: "(Ret) demo".into(),
            target: "retriever".into(),
            component: "simple".into(),
            scorers: vec![ScorerSummary {
                scorer: "contextual_recall".into(),
                mean: Some(1.0),
                scored: 1,
                failures: 1,
            }],
            rows: vec![
                RowResult {
                    index: 0,
                    input: "q1".into(),
                    output: Output::Contexts(vec!["c".into()]),
                    scores: vec![ScoreRecord {
                        scorer: "contextual_recall".into(),
                        score: Some(1.0),
                        reason: Some("ok".into()),
                        error: None,
                    }],
                },
                RowResult {
                    index: 1,
                    input: "q2".into(),
                    output: Output::Contexts(vec![]),
                    scores: vec![ScoreRecord {
                        scorer: "contextual_recall".into(),
                        score: None,
                        reason: None,
                        error: Some("judge timeout".into()),
                    }],
                },
            ],
        }
    }

    #[test]
    fn test_record_and_read_back() {
        let dir = TempDir::new().unwrap();
        let tracker = RunTracker::open(&dir.path().join("runs.db")).unwrap();

        let id = tracker.record(&summary()).unwrap();

        let runs = tracker.recent_runs(10).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].id, id);
        assert_eq!(runs[0].name, "(Ret) demo");
        assert_eq!(runs[0].rows, 2);

        let scores = tracker.run_scores(&id).unwrap();
        assert_eq!(scores.len(), 2);
        assert_eq!(scores[0].score, Some(1.0));
        assert_eq!(scores[1].score, None);
        assert_eq!(scores[1].error.as_deref(), Some("judge timeout"));
    }

    #[test]
    fn test_reopen_keeps_runs() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("runs.db");

        RunTracker::open(&path).unwrap().record(&summary()).unwrap();
        let tracker = RunTracker::open(&path).unwrap();
        assert_eq!(tracker.recent_runs(10).unwrap().len(), 1);
        assert_eq!(tracker.db_path(), path.as_path());
    }
}
