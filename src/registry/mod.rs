//! 컴포넌트 레지스트리
//!
//! (카테고리, 식별자) → 생성자 매핑을 보관합니다.
//! 카테고리마다 닫힌 생성자 타입을 사용하고, 모든 생성자는 `&Params`를 받는
//! 동일한 호출 규약을 따릅니다 (리트리버는 추가로 청커 인스턴스를 받음).
//!
//! - 같은 식별자를 다시 등록하면 마지막 등록이 이깁니다.
//! - 등록되지 않은 식별자 조회는 항상 `RagError::NotFound`로 실패합니다.

mod discovery;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use serde::de::DeserializeOwned;

use crate::chunking::Chunker;
use crate::error::RagError;
use crate::evaluation::Scorer;
use crate::generation::Generator;
use crate::ingestion::Ingestor;
use crate::retrieval::Retriever;

pub use discovery::{
    builtin_manifest, builtin_registry, discover, ComponentModule, DiscoveryReport, RegisterFn,
};

// ============================================================================
// Types
// ============================================================================

/// 컴포넌트 파라미터 (설정 파일의 `params`를 그대로 전달)
pub type Params = serde_json::Map<String, serde_json::Value>;

pub type RetrieverCtor = fn(&Params, Option<Arc<dyn Chunker>>) -> Result<Arc<dyn Retriever>>;
pub type GeneratorCtor = fn(&Params) -> Result<Arc<dyn Generator>>;
pub type ChunkerCtor = fn(&Params) -> Result<Arc<dyn Chunker>>;
pub type IngestorCtor = fn(&Params) -> Result<Arc<dyn Ingestor>>;
pub type ScorerCtor = fn(&Params) -> Result<Arc<dyn Scorer>>;

/// 레지스트리 카테고리
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Retrievers,
    Generators,
    Chunkers,
    Ingestors,
    Scorers,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::Retrievers,
        Category::Generators,
        Category::Chunkers,
        Category::Ingestors,
        Category::Scorers,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Retrievers => "retrievers",
            Category::Generators => "generators",
            Category::Chunkers => "chunkers",
            Category::Ingestors => "ingestors",
            Category::Scorers => "scorers",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 카테고리별 생성자
///
/// 변형(variant)이 카테고리를 결정하므로 카테고리와 생성자 타입이 어긋날 수 없습니다.
#[derive(Clone, Copy)]
pub enum Constructor {
    Retriever(RetrieverCtor),
    Generator(GeneratorCtor),
    Chunker(ChunkerCtor),
    Ingestor(IngestorCtor),
    Scorer(ScorerCtor),
}

impl Constructor {
    pub fn category(&self) -> Category {
        match self {
            Constructor::Retriever(_) => Category::Retrievers,
            Constructor::Generator(_) => Category::Generators,
            Constructor::Chunker(_) => Category::Chunkers,
            Constructor::Ingestor(_) => Category::Ingestors,
            Constructor::Scorer(_) => Category::Scorers,
        }
    }
}

impl fmt::Debug for Constructor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Constructor({})", self.category())
    }
}

// ============================================================================
// Registry
// ============================================================================

/// 컴포넌트 레지스트리
///
/// 프로세스 실행 단위로 생성해서 조립 계층에 넘깁니다. 전역 상태가 아니므로
/// 테스트마다 독립된 인스턴스를 사용할 수 있습니다.
#[derive(Default)]
pub struct Registry {
    retrievers: HashMap<String, RetrieverCtor>,
    generators: HashMap<String, GeneratorCtor>,
    chunkers: HashMap<String, ChunkerCtor>,
    ingestors: HashMap<String, IngestorCtor>,
    scorers: HashMap<String, ScorerCtor>,
}

impl Registry {
    /// 빈 레지스트리
    pub fn new() -> Self {
        Self::default()
    }

    /// 생성자 등록
    ///
    /// 등록한 생성자를 그대로 반환합니다. 같은 식별자가 이미 있으면 덮어씁니다.
    pub fn register(&mut self, identifier: impl Into<String>, ctor: Constructor) -> Constructor {
        let identifier = identifier.into();
        let replaced = match ctor {
            Constructor::Retriever(f) => self.retrievers.insert(identifier.clone(), f).is_some(),
            Constructor::Generator(f) => self.generators.insert(identifier.clone(), f).is_some(),
            Constructor::Chunker(f) => self.chunkers.insert(identifier.clone(), f).is_some(),
            Constructor::Ingestor(f) => self.ingestors.insert(identifier.clone(), f).is_some(),
            Constructor::Scorer(f) => self.scorers.insert(identifier.clone(), f).is_some(),
        };

        if replaced {
            tracing::debug!("Re-registered {}: {}", ctor.category(), identifier);
        } else {
            tracing::debug!("Registered {}: {}", ctor.category(), identifier);
        }

        ctor
    }

    pub fn register_retriever(&mut self, identifier: &str, ctor: RetrieverCtor) -> RetrieverCtor {
        self.register(identifier, Constructor::Retriever(ctor));
        ctor
    }

    pub fn register_generator(&mut self, identifier: &str, ctor: GeneratorCtor) -> GeneratorCtor {
        self.register(identifier, Constructor::Generator(ctor));
        ctor
    }

    pub fn register_chunker(&mut self, identifier: &str, ctor: ChunkerCtor) -> ChunkerCtor {
        self.register(identifier, Constructor::Chunker(ctor));
        ctor
    }

    pub fn register_ingestor(&mut self, identifier: &str, ctor: IngestorCtor) -> IngestorCtor {
        self.register(identifier, Constructor::Ingestor(ctor));
        ctor
    }

    pub fn register_scorer(&mut self, identifier: &str, ctor: ScorerCtor) -> ScorerCtor {
        self.register(identifier, Constructor::Scorer(ctor));
        ctor
    }

    /// 생성자 조회
    pub fn resolve(&self, category: Category, identifier: &str) -> Result<Constructor> {
        let found = match category {
            Category::Retrievers => self.retrievers.get(identifier).map(|f| Constructor::Retriever(*f)),
            Category::Generators => self.generators.get(identifier).map(|f| Constructor::Generator(*f)),
            Category::Chunkers => self.chunkers.get(identifier).map(|f| Constructor::Chunker(*f)),
            Category::Ingestors => self.ingestors.get(identifier).map(|f| Constructor::Ingestor(*f)),
            Category::Scorers => self.scorers.get(identifier).map(|f| Constructor::Scorer(*f)),
        };

        found.ok_or_else(|| not_found(category, identifier))
    }

    pub fn get_retriever(&self, identifier: &str) -> Result<RetrieverCtor> {
        lookup(&self.retrievers, Category::Retrievers, identifier)
    }

    pub fn get_generator(&self, identifier: &str) -> Result<GeneratorCtor> {
        lookup(&self.generators, Category::Generators, identifier)
    }

    pub fn get_chunker(&self, identifier: &str) -> Result<ChunkerCtor> {
        lookup(&self.chunkers, Category::Chunkers, identifier)
    }

    pub fn get_ingestor(&self, identifier: &str) -> Result<IngestorCtor> {
        lookup(&self.ingestors, Category::Ingestors, identifier)
    }

    pub fn get_scorer(&self, identifier: &str) -> Result<ScorerCtor> {
        lookup(&self.scorers, Category::Scorers, identifier)
    }

    /// 카테고리에 등록된 식별자 목록 (정렬됨)
    pub fn identifiers(&self, category: Category) -> Vec<String> {
        let mut ids: Vec<String> = match category {
            Category::Retrievers => self.retrievers.keys().cloned().collect(),
            Category::Generators => self.generators.keys().cloned().collect(),
            Category::Chunkers => self.chunkers.keys().cloned().collect(),
            Category::Ingestors => self.ingestors.keys().cloned().collect(),
            Category::Scorers => self.scorers.keys().cloned().collect(),
        };
        ids.sort();
        ids
    }

    /// 등록된 전체 엔트리 수
    pub fn len(&self) -> usize {
        self.retrievers.len()
            + self.generators.len()
            + self.chunkers.len()
            + self.ingestors.len()
            + self.scorers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn lookup<F: Copy>(map: &HashMap<String, F>, category: Category, identifier: &str) -> Result<F> {
    map.get(identifier)
        .copied()
        .ok_or_else(|| not_found(category, identifier))
}

fn not_found(category: Category, identifier: &str) -> anyhow::Error {
    RagError::NotFound {
        category,
        identifier: identifier.to_string(),
    }
    .into()
}

// ============================================================================
// Params Helper
// ============================================================================

/// 컴포넌트 파라미터를 타입이 있는 구조체로 변환
///
/// 형식이 맞지 않으면 컴포넌트 이름을 담은 InvalidConfig로 실패합니다.
pub fn parse_params<T: DeserializeOwned>(component: &str, params: &Params) -> Result<T> {
    serde_json::from_value(serde_json::Value::Object(params.clone())).map_err(|e| {
        RagError::invalid_config(format!("bad params for '{}': {}", component, e)).into()
    })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::{BasicChunking, ByTitleChunking};
    use crate::error::rag_error;

    fn make_basic(_: &Params) -> Result<Arc<dyn Chunker>> {
        Ok(Arc::new(BasicChunking::default()))
    }

    fn make_by_title(_: &Params) -> Result<Arc<dyn Chunker>> {
        Ok(Arc::new(ByTitleChunking::default()))
    }

    #[test]
    fn test_last_registration_wins() {
        let mut registry = Registry::new();
        registry.register_chunker("x", make_basic);
        registry.register_chunker("x", make_by_title);

        let ctor = registry.get_chunker("x").unwrap();
        let chunker = ctor(&Params::new()).unwrap();
        assert_eq!(chunker.name(), "by_title_chunking");
        assert_eq!(registry.identifiers(Category::Chunkers), vec!["x".to_string()]);
    }

    #[test]
    fn test_resolve_unregistered_fails_with_not_found() {
        let registry = Registry::new();
        let err = registry.resolve(Category::Chunkers, "missing").unwrap_err();

        assert_eq!(
            rag_error(&err),
            Some(&RagError::NotFound {
                category: Category::Chunkers,
                identifier: "missing".to_string(),
            })
        );
    }

    #[test]
    fn test_register_returns_constructor_unchanged() {
        let mut registry = Registry::new();
        let returned = registry.register("basic", Constructor::Chunker(make_basic));
        assert_eq!(returned.category(), Category::Chunkers);

        match registry.resolve(Category::Chunkers, "basic").unwrap() {
            Constructor::Chunker(f) => {
                assert_eq!(f(&Params::new()).unwrap().name(), "basic_chunking")
            }
            other => panic!("unexpected constructor: {:?}", other),
        }
    }

    #[test]
    fn test_categories_are_independent() {
        let mut registry = Registry::new();
        registry.register_chunker("shared", make_basic);

        assert!(registry.get_chunker("shared").is_ok());
        assert!(registry.get_retriever("shared").is_err());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_parse_params_invalid_shape() {
        #[derive(serde::Deserialize, Debug)]
        struct P {
            #[allow(dead_code)]
            k: usize,
        }

        let mut params = Params::new();
        params.insert("k".to_string(), serde_json::json!("three"));

        let err = parse_params::<P>("simple", &params).unwrap_err();
        assert!(matches!(rag_error(&err), Some(RagError::InvalidConfig(msg)) if msg.contains("simple")));
    }
}
