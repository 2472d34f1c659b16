//! 테스트 전용 대역 구현
//!
//! 네트워크 없이 임베딩/LLM/cross-encoder/리트리버/스코어러를 흉내냅니다.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;

use crate::chunking::Chunker;
use crate::document::Document;
use crate::embedding::EmbeddingProvider;
use crate::evaluation::{row_str, Output, Row, Score, Scorer};
use crate::generation::Generator;
use crate::llm::LlmClient;
use crate::retrieval::{CrossEncoder, Retriever};

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}

// ============================================================================
// Embeddings
// ============================================================================

/// 단어 빈도 벡터 임베딩
///
/// 처음 본 단어마다 새 차원을 배정하므로 단어가 겹치지 않는 텍스트의 유사도는 정확히 0입니다.
pub struct BagOfWordsEmbedding {
    vocabulary: Mutex<HashMap<String, usize>>,
    dimension: usize,
}

impl Default for BagOfWordsEmbedding {
    fn default() -> Self {
        Self {
            vocabulary: Mutex::new(HashMap::new()),
            dimension: 512,
        }
    }
}

#[async_trait]
impl EmbeddingProvider for BagOfWordsEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vocabulary = self.vocabulary.lock().unwrap();
        let mut vector = vec![0.0; self.dimension];
        for token in tokens(text) {
            let next = vocabulary.len();
            let slot = *vocabulary.entry(token).or_insert(next);
            vector[slot % self.dimension] += 1.0;
        }
        Ok(vector)
    }

    fn name(&self) -> &str {
        "bag-of-words"
    }
}

/// 텍스트별로 고정된 벡터를 돌려주는 임베딩
pub struct StaticEmbedding {
    vectors: HashMap<String, Vec<f32>>,
}

impl StaticEmbedding {
    pub fn new<'a>(vectors: impl IntoIterator<Item = (&'a str, Vec<f32>)>) -> Self {
        Self {
            vectors: vectors
                .into_iter()
                .map(|(text, v)| (text.to_string(), v))
                .collect(),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for StaticEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.vectors
            .get(text)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no static vector for '{}'", text))
    }

    fn name(&self) -> &str {
        "static"
    }
}

// ============================================================================
// Cross-encoder
// ============================================================================

/// 쿼리 단어가 passage에 몇 개 나오는지로 점수를 매기는 cross-encoder
pub struct KeywordCrossEncoder;

#[async_trait]
impl CrossEncoder for KeywordCrossEncoder {
    async fn score(&self, query: &str, passages: &[String]) -> Result<Vec<f32>> {
        let query: Vec<String> = tokens(query).collect();
        Ok(passages
            .iter()
            .map(|p| {
                let words: Vec<String> = tokens(p).collect();
                query.iter().filter(|q| words.contains(q)).count() as f32
            })
            .collect())
    }

    fn model(&self) -> &str {
        "keyword"
    }
}

// ============================================================================
// LLM
// ============================================================================

/// 프롬프트를 그대로 돌려주는 LLM
pub struct EchoLlm;

#[async_trait]
impl LlmClient for EchoLlm {
    async fn complete(&self, prompt: &str) -> Result<String> {
        Ok(prompt.to_string())
    }

    fn model(&self) -> &str {
        "echo"
    }
}

/// 고정 응답 + 마지막 프롬프트 기록
pub struct ScriptedLlm {
    reply: String,
    last_prompt: Mutex<Option<String>>,
}

impl ScriptedLlm {
    pub fn new(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            last_prompt: Mutex::new(None),
        }
    }

    pub fn last_prompt(&self) -> Option<String> {
        self.last_prompt.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn complete(&self, prompt: &str) -> Result<String> {
        *self.last_prompt.lock().unwrap() = Some(prompt.to_string());
        Ok(self.reply.clone())
    }

    fn model(&self) -> &str {
        "scripted"
    }
}

// ============================================================================
// Pipeline components
// ============================================================================

/// 항상 같은 본문 목록을 돌려주는 리트리버
pub struct FixedRetriever {
    contents: Vec<String>,
}

impl FixedRetriever {
    pub fn new(contents: Vec<String>) -> Self {
        Self { contents }
    }
}

#[async_trait]
impl Retriever for FixedRetriever {
    async fn init(&self, _docs: Option<Vec<Document>>) -> Result<()> {
        Ok(())
    }

    async fn add_docs(&self, _docs: &[Document], _chunker: Option<Arc<dyn Chunker>>) -> Result<()> {
        Ok(())
    }

    async fn query(&self, _text: &str) -> Result<Vec<Document>> {
        Ok(self.contents.iter().map(|c| Document::new(c.as_str())).collect())
    }

    fn name(&self) -> &'static str {
        "fixed"
    }
}

/// 받은 컨텍스트를 줄바꿈으로 이어 답하는 생성기
pub struct ContextGenerator;

#[async_trait]
impl Generator for ContextGenerator {
    async fn query(&self, _query: &str, context: &[String]) -> Result<String> {
        Ok(context.join("\n"))
    }

    fn name(&self) -> &'static str {
        "context"
    }
}

// ============================================================================
// Scorers
// ============================================================================

/// 고정 점수 스코어러 (호출 횟수 기록, 특정 입력에서 실패 가능)
pub struct RecordingScorer {
    name: String,
    value: f64,
    fail_on: Option<String>,
    calls: AtomicUsize,
}

impl RecordingScorer {
    pub fn new(name: &str, value: f64) -> Self {
        Self {
            name: name.to_string(),
            value,
            fail_on: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing_on(name: &str, value: f64, input: &str) -> Self {
        Self {
            fail_on: Some(input.to_string()),
            ..Self::new(name, value)
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Scorer for RecordingScorer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn score(&self, row: &Row, _output: &Output) -> Result<Score> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_on.as_deref().is_some() && self.fail_on.as_deref() == row_str(row, "input") {
            anyhow::bail!("{} failed", self.name);
        }
        Ok(Score {
            score: self.value,
            reason: None,
        })
    }
}
