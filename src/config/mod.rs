//! 설정 모듈 - YAML 평가/파이프라인 설정
//!
//! ```yaml
//! evaluation_name: demo
//! retriever:
//!   name: simple
//!   params:
//!     model: nomic-embed-text
//!     k: 3
//!     chunker:
//!       name: basic_chunking
//!       params: { max_characters: 250 }
//! generator: { name: ResponseGenerator, params: { model: "qwen2.5:3b" } }
//! ingestor: { name: SimpleIngestor, params: {} }
//! scorers: { retriever: [contextual_recall], generator: [faithfulness] }
//! dataset: { path: ../datasets/sample.jsonl, column_mapping: { input: question } }
//! corpus: { path: ../corpus }
//! ```
//!
//! 상대 경로(dataset/corpus)는 설정 파일이 있는 디렉터리 기준으로 해석합니다.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::RagError;
use crate::registry::Params;

/// 기본 설정 파일 경로
pub const DEFAULT_CONFIG_PATH: &str = "configs/evaluate.yaml";

/// 로컬 상태 디렉터리 (~/.local/share/.ragkit 등)
pub fn get_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".ragkit")
}

// ============================================================================
// Component Configs
// ============================================================================

/// 레지스트리 식별자 + 파라미터
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentConfig {
    pub name: String,
    #[serde(default)]
    pub params: Params,
}

pub type GeneratorConfig = ComponentConfig;
pub type IngestorConfig = ComponentConfig;
pub type ChunkerConfig = ComponentConfig;

/// 리트리버 설정
///
/// 파일에서는 `params.chunker`에 중첩되어 있고, 로드 시 분리됩니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ComponentConfig", into = "ComponentConfig")]
pub struct RetrieverConfig {
    pub name: String,
    /// `chunker`를 뺀 나머지 파라미터
    pub params: Params,
    pub chunker: Option<ChunkerConfig>,
}

impl TryFrom<ComponentConfig> for RetrieverConfig {
    type Error = String;

    fn try_from(raw: ComponentConfig) -> std::result::Result<Self, Self::Error> {
        let mut params = raw.params;
        let chunker = match params.remove("chunker") {
            None | Some(serde_json::Value::Null) => None,
            Some(value) => Some(
                serde_json::from_value::<ChunkerConfig>(value)
                    .map_err(|e| format!("retriever '{}': invalid chunker: {}", raw.name, e))?,
            ),
        };
        Ok(Self {
            name: raw.name,
            params,
            chunker,
        })
    }
}

impl From<RetrieverConfig> for ComponentConfig {
    fn from(config: RetrieverConfig) -> Self {
        let mut params = config.params;
        if let Some(chunker) = config.chunker {
            if let Ok(value) = serde_json::to_value(chunker) {
                params.insert("chunker".to_string(), value);
            }
        }
        Self {
            name: config.name,
            params,
        }
    }
}

/// 스코어러 설정 (리트리버용/생성기용 식별자 목록)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScorerConfig {
    #[serde(default)]
    pub retriever: Option<Vec<String>>,
    #[serde(default)]
    pub generator: Option<Vec<String>>,
}

impl ScorerConfig {
    pub fn retriever_scorers(&self) -> &[String] {
        self.retriever.as_deref().unwrap_or_default()
    }

    pub fn generator_scorers(&self) -> &[String] {
        self.generator.as_deref().unwrap_or_default()
    }

    /// 최소 한쪽 목록은 비어 있지 않아야 함
    pub fn validate(&self) -> Result<()> {
        if self.retriever_scorers().is_empty() && self.generator_scorers().is_empty() {
            return Err(RagError::invalid_config(
                "scorers: at least one of 'retriever' or 'generator' must be a non-empty list",
            )
            .into());
        }
        Ok(())
    }
}

/// 데이터셋 설정
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetConfig {
    pub path: PathBuf,
    /// 표준 컬럼 이름 → 데이터셋의 실제 컬럼 이름
    #[serde(default)]
    pub column_mapping: Option<BTreeMap<String, String>>,
    /// 매핑된 컬럼이 행에 없으면 실패
    #[serde(default)]
    pub strict: bool,
}

/// 코퍼스 경로 (단일 경로 또는 목록)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CorpusPath {
    Single(PathBuf),
    Many(Vec<PathBuf>),
}

/// 코퍼스 설정
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorpusConfig {
    pub path: CorpusPath,
}

impl CorpusConfig {
    pub fn paths(&self) -> Vec<&Path> {
        match &self.path {
            CorpusPath::Single(p) => vec![p.as_path()],
            CorpusPath::Many(ps) => ps.iter().map(PathBuf::as_path).collect(),
        }
    }
}

// ============================================================================
// Config
// ============================================================================

/// 전체 설정
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub generator: GeneratorConfig,
    pub ingestor: IngestorConfig,
    pub retriever: RetrieverConfig,
    pub scorers: ScorerConfig,
    pub dataset: DatasetConfig,
    pub corpus: CorpusConfig,
    #[serde(default)]
    pub evaluation_name: Option<String>,
}

impl Config {
    /// 파일에서 로드 (검증 + 상대 경로 해석)
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;

        let mut config = Self::from_yaml_str(&text)?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        config.resolve_paths(base);

        tracing::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// YAML 문자열에서 파싱 (경로는 그대로)
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(text)
            .map_err(|e| RagError::invalid_config(format!("config: {}", e)))?;
        config.scorers.validate()?;
        Ok(config)
    }

    /// 상대 경로를 `base` 기준으로 변환
    pub fn resolve_paths(&mut self, base: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };

        resolve(&mut self.dataset.path);
        match &mut self.corpus.path {
            CorpusPath::Single(p) => resolve(p),
            CorpusPath::Many(ps) => ps.iter_mut().for_each(resolve),
        }
    }

    /// 평가 실행 이름의 기본 부분
    pub fn evaluation_name(&self) -> &str {
        self.evaluation_name.as_deref().unwrap_or("evaluation")
    }

    /// 콘솔 출력용 JSON
    pub fn to_pretty_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize config")
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::rag_error;
    use serde_json::json;
    use tempfile::TempDir;

    const YAML: &str = r#"
evaluation_name: demo
generator:
  name: ResponseGenerator
  params:
    model: "qwen2.5:3b"
ingestor:
  name: SimpleIngestor
retriever:
  name: mmr
  params:
    model: nomic-embed-text
    k: 2
    fetch_k: 4
    chunker:
      name: by_title_chunking
      params:
        max_characters: 300
scorers:
  retriever: [contextual_recall]
dataset:
  path: data/eval.jsonl
  column_mapping:
    input: question
corpus:
  path: [a.md, /abs/b.txt]
"#;

    #[test]
    fn test_parse_full_config() {
        let config = Config::from_yaml_str(YAML).unwrap();

        assert_eq!(config.evaluation_name(), "demo");
        assert_eq!(config.generator.params["model"], json!("qwen2.5:3b"));
        assert!(config.ingestor.params.is_empty());

        assert_eq!(config.retriever.name, "mmr");
        assert_eq!(config.retriever.params["k"], json!(2));
        assert!(!config.retriever.params.contains_key("chunker"));
        let chunker = config.retriever.chunker.as_ref().unwrap();
        assert_eq!(chunker.name, "by_title_chunking");
        assert_eq!(chunker.params["max_characters"], json!(300));

        assert_eq!(config.scorers.retriever_scorers(), ["contextual_recall".to_string()]);
        assert!(config.scorers.generator_scorers().is_empty());
        assert!(!config.dataset.strict);
        assert_eq!(
            config.dataset.column_mapping.as_ref().unwrap()["input"],
            "question"
        );
    }

    #[test]
    fn test_scorers_need_one_list() {
        let yaml = YAML.replace("  retriever: [contextual_recall]", "  retriever: []");
        let err = Config::from_yaml_str(&yaml).unwrap_err();
        assert!(matches!(rag_error(&err), Some(RagError::InvalidConfig(_))));

        let yaml = YAML.replace("  retriever: [contextual_recall]", "  generator: [faithfulness]");
        assert!(Config::from_yaml_str(&yaml).is_ok());
    }

    #[test]
    fn test_missing_section_is_invalid_config() {
        let yaml = YAML.replace("ingestor:\n  name: SimpleIngestor\n", "");
        let err = Config::from_yaml_str(&yaml).unwrap_err();
        assert!(matches!(rag_error(&err), Some(RagError::InvalidConfig(_))));
    }

    #[test]
    fn test_load_resolves_relative_paths() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("evaluate.yaml");
        std::fs::write(&path, YAML).unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.dataset.path, dir.path().join("data/eval.jsonl"));
        assert_eq!(
            config.corpus.paths(),
            vec![dir.path().join("a.md").as_path(), Path::new("/abs/b.txt")]
        );
    }

    #[test]
    fn test_retriever_chunker_serializes_back_nested() {
        let config = Config::from_yaml_str(YAML).unwrap();
        let value = serde_json::to_value(&config.retriever).unwrap();
        assert_eq!(value["params"]["chunker"]["name"], json!("by_title_chunking"));
    }
}
