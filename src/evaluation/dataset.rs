//! 평가 데이터셋 - JSONL 행 목록
//!
//! 표준 컬럼: `input`, `expected_output`, (선택) `retrieval_context`

use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use serde_json::Value;

use crate::error::RagError;

/// 데이터셋 행
pub type Row = serde_json::Map<String, Value>;

/// 평가 데이터셋
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    pub rows: Vec<Row>,
}

impl Dataset {
    pub fn from_rows(rows: Vec<Row>) -> Self {
        Self { rows }
    }

    /// JSONL 파일 로드 (빈 줄은 무시)
    pub fn from_jsonl(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("Failed to open dataset: {}", path.display()))?;

        let mut rows = Vec::new();
        for (lineno, line) in BufReader::new(file).lines().enumerate() {
            let line = line.context("Failed to read dataset line")?;
            if line.trim().is_empty() {
                continue;
            }
            let value: Value = serde_json::from_str(&line).with_context(|| {
                format!("Invalid JSON at {}:{}", path.display(), lineno + 1)
            })?;
            match value {
                Value::Object(row) => rows.push(row),
                _ => anyhow::bail!(
                    "Dataset line {}:{} is not a JSON object",
                    path.display(),
                    lineno + 1
                ),
            }
        }

        tracing::info!("Loaded {} rows from {}", rows.len(), path.display());
        Ok(Self { rows })
    }

    /// JSONL 파일로 저장 (행당 한 줄)
    pub fn to_jsonl(&self, path: &Path) -> Result<()> {
        let file = std::fs::File::create(path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        for row in &self.rows {
            serde_json::to_writer(&mut writer, row)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
        Ok(())
    }

    /// 컬럼 이름 변경 (현재 이름 → 새 이름)
    ///
    /// 행에 없는 키는 건너뛰고, `strict`이면 KeyNotFound로 실패합니다.
    pub fn rename_columns(&mut self, mapping: &BTreeMap<String, String>, strict: bool) -> Result<()> {
        for row in &mut self.rows {
            for (current, new) in mapping {
                match row.remove(current) {
                    Some(value) => {
                        row.insert(new.clone(), value);
                    }
                    None if strict => return Err(RagError::KeyNotFound(current.clone()).into()),
                    None => continue,
                }
            }
        }
        Ok(())
    }

    /// 설정의 컬럼 매핑 적용
    ///
    /// 설정은 `표준 이름 → 데이터셋의 실제 이름` 방향이므로 뒤집어서 변경합니다.
    pub fn apply_column_mapping(
        &mut self,
        standard_to_actual: &BTreeMap<String, String>,
        strict: bool,
    ) -> Result<()> {
        let inverted: BTreeMap<String, String> = standard_to_actual
            .iter()
            .map(|(standard, actual)| (actual.clone(), standard.clone()))
            .collect();
        self.rename_columns(&inverted, strict)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// 행의 문자열 필드
pub fn row_str<'a>(row: &'a Row, key: &str) -> Option<&'a str> {
    row.get(key).and_then(Value::as_str)
}

/// 행의 문자열 목록 필드 (단일 문자열도 한 개짜리 목록으로 취급)
pub fn row_str_list(row: &Row, key: &str) -> Option<Vec<String>> {
    match row.get(key)? {
        Value::Array(items) => Some(
            items
                .iter()
                .map(|v| match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect(),
        ),
        Value::String(s) => Some(vec![s.clone()]),
        _ => None,
    }
}

// ============================================================================
// Tests
// ============================================================================
