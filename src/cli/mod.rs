//! CLI 모듈
//!
//! ragkit 명령어 정의 및 구현
//!
//! - 서브커맨드 없음: 설정 파일 기반 평가 실행
//! - `chat`: 디렉터리 수집 후 대화형 질의
//! - `ask`: 한 번 수집 + 질의
//! - `runs`: 기록된 평가 실행 목록

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::assembly::Assembler;
use crate::config::{Config, DEFAULT_CONFIG_PATH};
use crate::evaluation::RunTracker;
use crate::llm::has_api_key;
use crate::pipeline::{IngestRequest, RagPipeline};
use crate::registry::{builtin_registry, DiscoveryReport};

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "ragkit")]
#[command(version, about = "설정 기반 RAG 파이프라인 및 평가 도구", long_about = None)]
pub struct Cli {
    /// 설정 파일 경로
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    pub file: PathBuf,

    /// 평가 결과를 로컬 실행 기록(runs.db)에 저장 (`-wb`도 허용)
    #[arg(long = "enable_wandb")]
    pub enable_wandb: bool,

    /// 탐색에서 제외할 컴포넌트 모듈 (예: scorers.judge)
    #[arg(long, global = true, value_name = "MODULE", num_args = 1.., value_delimiter = ',')]
    pub exclude: Vec<String>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// 디렉터리를 수집한 뒤 표준 입력으로 질문 (exit 입력 시 종료)
    Chat {
        /// 수집할 디렉터리
        dir: PathBuf,
    },

    /// 코퍼스를 수집하고 질문 하나에 답변
    Ask {
        /// 수집할 파일 또는 디렉터리
        #[arg(long)]
        corpus: PathBuf,

        /// 질문
        question: String,
    },

    /// 기록된 평가 실행 목록
    Runs {
        /// 결과 개수 제한
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
}

/// `-wb` 단축 플래그를 `--enable_wandb`로 변환
///
/// clap의 short 플래그는 한 글자만 허용하므로 파싱 전에 치환합니다.
pub fn normalize_args<I, S>(args: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    args.into_iter()
        .map(Into::into)
        .map(|arg| {
            if arg == "-wb" {
                "--enable_wandb".to_string()
            } else {
                arg
            }
        })
        .collect()
}

// ============================================================================
// CLI Runner
// ============================================================================

/// CLI 명령어 실행
pub async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        None => cmd_evaluate(&cli.file, cli.enable_wandb, &cli.exclude).await,
        Some(Commands::Chat { ref dir }) => cmd_chat(&cli.file, &cli.exclude, dir).await,
        Some(Commands::Ask {
            ref corpus,
            ref question,
        }) => cmd_ask(&cli.file, &cli.exclude, corpus, question).await,
        Some(Commands::Runs { limit }) => cmd_runs(limit),
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

/// 평가 명령어 (기본)
async fn cmd_evaluate(path: &Path, enable_tracking: bool, exclude: &[String]) -> Result<()> {
    let assembler = discover(exclude);
    let config = load_config(path)?;

    let judge_loaded = !exclude.iter().any(|m| m == "scorers.judge");
    if judge_loaded && !has_api_key() {
        println!(
            "[!] Gemini API 키가 없습니다. judge 스코어러를 쓰려면 설정하세요:\n    \
             export GEMINI_API_KEY=your-api-key"
        );
    }

    println!("[*] 설정:");
    println!("{}", config.to_pretty_json()?);
    println!();

    let tracker = if enable_tracking {
        let tracker = RunTracker::open_default().context("실행 기록 저장소 열기 실패")?;
        println!("[*] 실행 기록: {}", tracker.db_path().display());
        Some(tracker)
    } else {
        None
    };

    println!("[*] 평가 실행 중: {}", config.evaluation_name());
    let outcome = assembler.run_evaluation(&config, tracker.as_ref()).await?;

    println!();
    for summary in outcome.summaries() {
        print!("{}", summary.report());
    }
    for id in &outcome.run_ids {
        println!("[OK] 기록됨: {}", id);
    }
    println!("[OK] 평가 완료");
    Ok(())
}

/// 대화형 질의 (chat)
async fn cmd_chat(path: &Path, exclude: &[String], dir: &Path) -> Result<()> {
    let pipeline = build_pipeline(path, exclude)?;

    println!("[*] 수집 중: {}", dir.display());
    pipeline.retriever().init(None).await?;
    let count = pipeline.ingest(IngestRequest::dir(dir)).await?;
    println!("[OK] {} 요소 수집 완료. 질문을 입력하세요 (종료: exit)", count);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    loop {
        stdout.write_all(b"\n> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if question == "exit" {
            break;
        }

        match pipeline.query(question).await {
            Ok((answer, sources)) => print_answer(&answer, &sources),
            Err(e) => println!("[!] 질의 실패: {:#}", e),
        }
    }
    Ok(())
}

/// 단일 질의 (ask)
async fn cmd_ask(path: &Path, exclude: &[String], corpus: &Path, question: &str) -> Result<()> {
    let pipeline = build_pipeline(path, exclude)?;

    let request = if corpus.is_dir() {
        IngestRequest::dir(corpus)
    } else {
        IngestRequest::filepath(corpus)
    };

    println!("[*] 수집 중: {}", corpus.display());
    pipeline.retriever().init(None).await?;
    let count = pipeline.ingest(request).await?;
    println!("[OK] {} 요소 수집 완료", count);

    println!("[*] 질의 중: \"{}\"", question);
    let (answer, sources) = pipeline.query(question).await?;
    print_answer(&answer, &sources);
    Ok(())
}

/// 기록된 평가 실행 목록 (runs)
fn cmd_runs(limit: usize) -> Result<()> {
    let tracker = RunTracker::open_default()?;
    let runs = tracker.recent_runs(limit)?;

    if runs.is_empty() {
        println!("[!] 기록된 실행이 없습니다.");
        return Ok(());
    }

    println!("[OK] 최근 실행 ({} 건):\n", runs.len());
    for run in runs {
        println!("  {} {}", run.created_at.format("%Y-%m-%d %H:%M:%S"), run.name);
        println!("        id: {}", run.id);
        println!(
            "        대상: {} ({}), {} 행",
            run.target, run.component, run.rows
        );
    }
    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

fn discover(exclude: &[String]) -> Assembler {
    let (registry, report) = builtin_registry(exclude);
    print_discovery(&report);
    Assembler::new(registry)
}

fn load_config(path: &Path) -> Result<Config> {
    Config::load(path).with_context(|| format!("설정 로드 실패: {}", path.display()))
}

fn build_pipeline(path: &Path, exclude: &[String]) -> Result<RagPipeline> {
    let assembler = discover(exclude);
    let config = load_config(path)?;
    assembler.build_pipeline(&config)
}

fn print_discovery(report: &DiscoveryReport) {
    for module in &report.skipped {
        println!("[*] 제외된 모듈: {}", module);
    }
    for (module, reason) in &report.failed {
        println!("[!] 모듈 로드 실패: {} ({})", module, reason);
    }
}

fn print_answer(answer: &str, sources: &[String]) {
    println!("\n{}\n", answer.trim());
    if sources.is_empty() {
        return;
    }
    println!("출처 ({} 건):", sources.len());
    for (i, source) in sources.iter().enumerate() {
        println!("  {}. {}", i + 1, truncate_text(source, 200));
    }
}

/// 텍스트 자르기 (UTF-8 안전)
fn truncate_text(text: &str, max_chars: usize) -> String {
    let text = text.replace('\n', " ");
    if text.chars().count() <= max_chars {
        text
    } else {
        let truncated: String = text.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(normalize_args(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_normalize_short_wandb_flag() {
        assert_eq!(
            normalize_args(["ragkit", "-wb", "-f", "x.yaml"]),
            vec!["ragkit", "--enable_wandb", "-f", "x.yaml"]
        );
    }

    #[test]
    fn test_default_evaluate() {
        let cli = parse(&["ragkit"]);
        assert!(cli.command.is_none());
        assert_eq!(cli.file, PathBuf::from(DEFAULT_CONFIG_PATH));
        assert!(!cli.enable_wandb);
        assert!(cli.exclude.is_empty());
    }

    #[test]
    fn test_evaluate_flags() {
        let cli = parse(&["ragkit", "-f", "my.yaml", "-wb", "--exclude", "scorers.judge"]);
        assert_eq!(cli.file, PathBuf::from("my.yaml"));
        assert!(cli.enable_wandb);
        assert_eq!(cli.exclude, vec!["scorers.judge"]);

        let cli = parse(&["ragkit", "--enable_wandb", "--exclude", "a,b"]);
        assert!(cli.enable_wandb);
        assert_eq!(cli.exclude, vec!["a", "b"]);
    }

    #[test]
    fn test_subcommands() {
        let cli = parse(&["ragkit", "chat", "docs", "-f", "c.yaml"]);
        assert_eq!(cli.file, PathBuf::from("c.yaml"));
        assert!(matches!(cli.command, Some(Commands::Chat { ref dir }) if dir == Path::new("docs")));

        let cli = parse(&["ragkit", "ask", "--corpus", "notes.md", "Who?"]);
        match cli.command {
            Some(Commands::Ask { corpus, question }) => {
                assert_eq!(corpus, PathBuf::from("notes.md"));
                assert_eq!(question, "Who?");
            }
            other => panic!("unexpected command: {:?}", other),
        }

        let cli = parse(&["ragkit", "runs"]);
        assert!(matches!(cli.command, Some(Commands::Runs { limit: 20 })));
    }

    #[test]
    fn test_truncate_text() {
        assert_eq!(truncate_text("hello", 10), "hello");
        assert_eq!(truncate_text("hello world", 5), "hello...");
        assert_eq!(truncate_text("hello\nworld", 20), "hello world");
    }

    #[test]
    fn test_truncate_unicode() {
        assert_eq!(truncate_text("안녕하세요 세계", 5), "안녕하세요...");
    }
}
