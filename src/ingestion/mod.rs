//! Ingestion 모듈 - 파일/텍스트를 정규화 문서(요소)로 변환
//!
//! 지원 형식: `txt`, `md`, `pdf`, `html`/`htm` (대소문자 무시)
//!
//! ## 파티셔닝 규칙
//! - 빈 줄로 구분된 블록 단위
//! - Markdown 헤더 줄 → `Title` 요소
//! - 나머지 블록 → 마침표 기준 문장 분리 후 `NarrativeText` 요소
//!
//! 요소 id는 (출처, 순번, 텍스트)의 SHA-256이므로 같은 파일을 다시 읽어도 같습니다.

mod collector;
mod html;
mod pdf;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use serde_json::json;

use crate::document::{content_id, Document, Metadata, CATEGORY_TEXT, CATEGORY_TITLE};
use crate::error::RagError;
use crate::registry::{parse_params, Params, Registry};

pub use collector::{CollectedFile, CollectorConfig, FileCollector};

// ============================================================================
// File Types
// ============================================================================

/// 지원하는 파일 타입
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Text,
    Markdown,
    Pdf,
    Html,
}

impl FileType {
    /// 확장자로 파일 타입 결정
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "txt" => Some(FileType::Text),
            "md" => Some(FileType::Markdown),
            "pdf" => Some(FileType::Pdf),
            "html" | "htm" => Some(FileType::Html),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_extension)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Text => "txt",
            FileType::Markdown => "md",
            FileType::Pdf => "pdf",
            FileType::Html => "html",
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 지원 타입 확인 (아니면 InvalidFileType)
fn require_file_type(path: &Path) -> Result<FileType> {
    FileType::from_path(path)
        .ok_or_else(|| RagError::InvalidFileType(path.display().to_string()).into())
}

// ============================================================================
// Ingestor Trait
// ============================================================================

/// 수집기 트레이트
#[async_trait]
pub trait Ingestor: Send + Sync {
    /// 단일 파일
    async fn load_file(&self, path: &Path) -> Result<Vec<Document>>;

    /// 여러 파일 (모든 확장자를 먼저 검증한 뒤 읽음)
    async fn load_files(&self, paths: &[PathBuf]) -> Result<Vec<Document>> {
        for path in paths {
            require_file_type(path)?;
        }
        let mut docs = Vec::new();
        for path in paths {
            docs.extend(self.load_file(path).await?);
        }
        Ok(docs)
    }

    /// 업로드된 파일 (이름의 확장자로 형식 결정)
    async fn load_bytes(&self, name: &str, bytes: &[u8]) -> Result<Vec<Document>>;

    /// 디렉터리 재귀 (지원하지 않는 확장자는 건너뜀)
    async fn load_dir(&self, dir: &Path) -> Result<Vec<Document>>;

    /// 원시 텍스트
    fn load_text(&self, text: &str) -> Vec<Document>;

    fn name(&self) -> &'static str;
}

/// 레지스트리 등록
pub fn register(registry: &mut Registry) -> Result<()> {
    registry.register_ingestor("SimpleIngestor", create);
    Ok(())
}

fn create(params: &Params) -> Result<Arc<dyn Ingestor>> {
    let params: SimpleIngestorParams = parse_params("SimpleIngestor", params)?;
    Ok(Arc::new(SimpleIngestor::new(params)))
}

// ============================================================================
// Partitioning
// ============================================================================

/// 파티셔닝 전 블록
#[derive(Debug, Clone, PartialEq)]
pub enum Block {
    Heading(String),
    Text(String),
}

/// Markdown 헤더 (`# Title`, 닫는 `#` 허용)
fn heading_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s{0,3}#{1,6}\s+(.*?)[\s#]*$").expect("valid heading regex"))
}

/// 텍스트를 빈 줄 기준 블록으로 분리
fn text_blocks(text: &str, markdown: bool) -> Vec<Block> {
    let mut blocks = Vec::new();
    let mut paragraph: Vec<&str> = Vec::new();

    fn flush(paragraph: &mut Vec<&str>, blocks: &mut Vec<Block>) {
        if !paragraph.is_empty() {
            blocks.push(Block::Text(paragraph.join(" ")));
            paragraph.clear();
        }
    }

    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            flush(&mut paragraph, &mut blocks);
            continue;
        }
        if markdown {
            if let Some(caps) = heading_re().captures(line) {
                flush(&mut paragraph, &mut blocks);
                let title = caps.get(1).map(|m| m.as_str().trim()).unwrap_or_default();
                if !title.is_empty() {
                    blocks.push(Block::Heading(title.to_string()));
                }
                continue;
            }
        }
        paragraph.push(trimmed);
    }
    flush(&mut paragraph, &mut blocks);

    blocks
}

/// 마침표 기준 문장 분리 (마침표 유지, 뒤가 공백이거나 끝일 때만 경계)
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut start = 0;

    for (i, c) in text.char_indices() {
        if c != '.' {
            continue;
        }
        let boundary = text[i + 1..]
            .chars()
            .next()
            .map_or(true, char::is_whitespace);
        if boundary {
            let sentence = text[start..=i].trim();
            if !sentence.is_empty() {
                sentences.push(sentence.to_string());
            }
            start = i + 1;
        }
    }

    let rest = text[start..].trim();
    if !rest.is_empty() {
        sentences.push(rest.to_string());
    }
    sentences
}

/// 요소 출처 정보
#[derive(Debug, Clone, Default)]
struct SourceInfo {
    source: Option<String>,
    filename: Option<String>,
    file_type: Option<FileType>,
    /// 문서 제목 (HTML `<title>`)
    title: Option<String>,
}

impl SourceInfo {
    fn for_name(name: &str, file_type: FileType) -> Self {
        Self {
            source: Some(name.to_string()),
            filename: Path::new(name)
                .file_name()
                .map(|f| f.to_string_lossy().into_owned()),
            file_type: Some(file_type),
            title: None,
        }
    }
}

/// 블록 → 요소 변환기
struct ElementWriter {
    info: SourceInfo,
    split_sentences: bool,
    elements: Vec<Document>,
}

impl ElementWriter {
    fn new(info: SourceInfo, split_sentences: bool) -> Self {
        Self {
            info,
            split_sentences,
            elements: Vec::new(),
        }
    }

    fn write_blocks(&mut self, blocks: Vec<Block>, page_number: Option<usize>) {
        for block in blocks {
            match block {
                Block::Heading(text) => self.push(text, CATEGORY_TITLE, page_number),
                Block::Text(text) if self.split_sentences => {
                    for sentence in split_sentences(&text) {
                        self.push(sentence, CATEGORY_TEXT, page_number);
                    }
                }
                Block::Text(text) => self.push(text, CATEGORY_TEXT, page_number),
            }
        }
    }

    fn push(&mut self, text: String, category: &str, page_number: Option<usize>) {
        let index = self.elements.len();

        let mut metadata = Metadata::new();
        if let Some(source) = &self.info.source {
            metadata.insert("source".into(), json!(source));
        }
        if let Some(filename) = &self.info.filename {
            metadata.insert("filename".into(), json!(filename));
        }
        if let Some(file_type) = self.info.file_type {
            metadata.insert("file_type".into(), json!(file_type.as_str()));
        }
        if let Some(title) = &self.info.title {
            metadata.insert("title".into(), json!(title));
        }
        metadata.insert("category".into(), json!(category));
        metadata.insert("element_index".into(), json!(index));
        if let Some(page) = page_number {
            metadata.insert("page_number".into(), json!(page));
        }

        let id = content_id(&[
            self.info.source.as_deref().unwrap_or_default(),
            &index.to_string(),
            &text,
        ]);
        self.elements.push(Document::with_metadata(text, metadata).with_id(id));
    }

    fn finish(self) -> Vec<Document> {
        self.elements
    }
}

// ============================================================================
// SimpleIngestor
// ============================================================================

/// SimpleIngestor 파라미터
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SimpleIngestorParams {
    /// 블록을 문장 단위 요소로 분리
    pub split_sentences: bool,
    /// 디렉터리 수집 시 .gitignore 존중
    pub respect_gitignore: bool,
}

impl Default for SimpleIngestorParams {
    fn default() -> Self {
        Self {
            split_sentences: true,
            respect_gitignore: true,
        }
    }
}

/// txt / md / pdf / html 수집기
pub struct SimpleIngestor {
    params: SimpleIngestorParams,
}

impl SimpleIngestor {
    pub fn new(params: SimpleIngestorParams) -> Self {
        Self { params }
    }

    async fn partition(&self, mut info: SourceInfo, file_type: FileType, bytes: Vec<u8>) -> Result<Vec<Document>> {
        let label = info.source.clone().unwrap_or_default();

        if file_type == FileType::Html {
            info.title = html::extract_title(&String::from_utf8_lossy(&bytes));
        }

        let mut writer = ElementWriter::new(info, self.params.split_sentences);
        match file_type {
            FileType::Text => writer.write_blocks(text_blocks(&String::from_utf8_lossy(&bytes), false), None),
            FileType::Markdown => writer.write_blocks(text_blocks(&String::from_utf8_lossy(&bytes), true), None),
            FileType::Html => writer.write_blocks(html::extract_blocks(&String::from_utf8_lossy(&bytes)), None),
            FileType::Pdf => {
                for (page, text) in pdf::extract_pages(&label, bytes).await? {
                    writer.write_blocks(text_blocks(&text, false), Some(page));
                }
            }
        }

        let elements = writer.finish();
        tracing::debug!("Partitioned {} into {} elements", label, elements.len());
        Ok(elements)
    }
}

impl Default for SimpleIngestor {
    fn default() -> Self {
        Self::new(SimpleIngestorParams::default())
    }
}

#[async_trait]
impl Ingestor for SimpleIngestor {
    async fn load_file(&self, path: &Path) -> Result<Vec<Document>> {
        let file_type = require_file_type(path)?;
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read file: {:?}", path))?;

        let name = path.display().to_string();
        self.partition(SourceInfo::for_name(&name, file_type), file_type, bytes)
            .await
    }

    async fn load_bytes(&self, name: &str, bytes: &[u8]) -> Result<Vec<Document>> {
        let file_type = require_file_type(Path::new(name))?;
        self.partition(SourceInfo::for_name(name, file_type), file_type, bytes.to_vec())
            .await
    }

    async fn load_dir(&self, dir: &Path) -> Result<Vec<Document>> {
        let collector = FileCollector::new(CollectorConfig {
            respect_gitignore: self.params.respect_gitignore,
            ..Default::default()
        });

        let mut docs = Vec::new();
        for file in collector.collect(dir)? {
            docs.extend(self.load_file(&file.path).await?);
        }
        tracing::info!("Loaded {} elements from {:?}", docs.len(), dir);
        Ok(docs)
    }

    fn load_text(&self, text: &str) -> Vec<Document> {
        let mut writer = ElementWriter::new(SourceInfo::default(), self.params.split_sentences);
        writer.write_blocks(text_blocks(text, false), None);
        writer.finish()
    }

    fn name(&self) -> &'static str {
        "SimpleIngestor"
    }
}

// ============================================================================
// Tests
// ============================================================================
