//! 정규화 문서 타입
//!
//! 수집(Ingestion) → 청킹(Chunking) → 검색(Retrieval) 순으로 소유권이 넘어가는
//! 공통 문서 표현입니다. 한 번 만들어진 문서는 수정하지 않습니다.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// 문서 메타데이터 (키 → 스칼라/문자열)
pub type Metadata = serde_json::Map<String, Value>;

/// 리스트 값 메타데이터를 문자열로 합칠 때 쓰는 구분자
pub const LIST_DELIMITER: &str = ", ";

/// 메타데이터 `category` 값: 제목 요소
pub const CATEGORY_TITLE: &str = "Title";

/// 메타데이터 `category` 값: 본문 요소
pub const CATEGORY_TEXT: &str = "NarrativeText";

// ============================================================================
// Document
// ============================================================================

/// 정규화 문서
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// 불투명 식별자
    pub id: String,
    /// 본문 텍스트
    pub content: String,
    /// 메타데이터
    #[serde(default)]
    pub metadata: Metadata,
}

impl Document {
    /// 새 문서 (무작위 id)
    pub fn new(content: impl Into<String>) -> Self {
        Self::with_metadata(content, Metadata::new())
    }

    /// 메타데이터와 함께 생성
    pub fn with_metadata(content: impl Into<String>, metadata: Metadata) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            content: content.into(),
            metadata,
        }
    }

    /// id 지정
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// 요소 카테고리 (Title, NarrativeText, ...)
    pub fn category(&self) -> Option<&str> {
        self.metadata.get("category").and_then(Value::as_str)
    }

    /// 제목 요소 여부
    pub fn is_title(&self) -> bool {
        self.category() == Some(CATEGORY_TITLE)
    }

    /// 벡터 저장소에 넣을 수 있도록 메타데이터를 평탄화한 사본
    pub fn sanitized(&self) -> Self {
        Self {
            id: self.id.clone(),
            content: self.content.clone(),
            metadata: flatten_metadata(&self.metadata),
        }
    }
}

// ============================================================================
// Metadata Flattening
// ============================================================================

/// 메타데이터 평탄화
///
/// 벡터 저장소는 스칼라 값만 받습니다.
/// - 리스트 → `LIST_DELIMITER`로 합친 문자열
/// - 객체 → JSON 문자열
/// - null → 제거
pub fn flatten_metadata(metadata: &Metadata) -> Metadata {
    let mut flat = Metadata::new();

    for (key, value) in metadata {
        let flattened = match value {
            Value::Null => continue,
            Value::Array(items) => Value::String(
                items
                    .iter()
                    .filter(|v| !v.is_null())
                    .map(scalar_text)
                    .collect::<Vec<_>>()
                    .join(LIST_DELIMITER),
            ),
            Value::Object(_) => Value::String(value.to_string()),
            scalar => scalar.clone(),
        };
        flat.insert(key.clone(), flattened);
    }

    flat
}

/// 평탄화 여부 확인
pub fn is_flat(metadata: &Metadata) -> bool {
    metadata
        .values()
        .all(|v| !matches!(v, Value::Array(_) | Value::Object(_) | Value::Null))
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ============================================================================
// Stable Ids
// ============================================================================

/// 내용 기반 id (SHA-256 hex)
pub fn content_id(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    format!("{:x}", hasher.finalize())
}

// ============================================================================
// Tests
// ============================================================================
