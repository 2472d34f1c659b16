//! 에러 타입 정의
//!
//! 조립/검색/수집 단계에서 복구할 수 없는 조건들입니다.
//! 모든 함수는 `anyhow::Result`를 반환하고, 이 타입은 `anyhow::Error`로 감싸져 전파됩니다.
//! 호출자는 `err.downcast_ref::<RagError>()`로 원래 조건을 확인할 수 있습니다.

use thiserror::Error;

use crate::registry::Category;

/// RAG 파이프라인 에러
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RagError {
    /// 레지스트리에 등록되지 않은 식별자
    #[error("{category} '{identifier}' not found in registry")]
    NotFound {
        category: Category,
        identifier: String,
    },

    /// add_docs 호출 시 사용할 청커가 없음
    #[error("no chunker supplied and the retriever has no default chunker")]
    MissingChunker,

    /// 구조적으로 잘못된 설정
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// strict 컬럼 이름 변경 시 행에 없는 키
    #[error("key '{0}' not found in dataset row")]
    KeyNotFound(String),

    /// 지원하지 않는 파일 확장자
    #[error("invalid file type: {0}")]
    InvalidFileType(String),
}

impl RagError {
    /// InvalidConfig 생성 헬퍼
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }
}

/// anyhow 에러에서 RagError 추출
pub fn rag_error(err: &anyhow::Error) -> Option<&RagError> {
    err.downcast_ref::<RagError>()
}
