//! 컴포넌트 등록 매니페스트
//!
//! 파일 시스템을 스캔하는 대신, 컴포넌트 모듈 목록(매니페스트)을 명시하고
//! 시작 시점에 각 모듈의 `register` 함수를 한 번씩 실행합니다.
//! 등록 순서에 의존하는 컴포넌트는 없어야 합니다.

use std::collections::HashSet;

use anyhow::Result;

use super::Registry;

/// 모듈 등록 함수
pub type RegisterFn = fn(&mut Registry) -> Result<()>;

/// 매니페스트 엔트리
#[derive(Clone, Copy)]
pub struct ComponentModule {
    /// 모듈 경로 (예: "retrievers.mmr")
    pub path: &'static str,
    /// 등록 함수
    pub register: RegisterFn,
}

impl ComponentModule {
    pub const fn new(path: &'static str, register: RegisterFn) -> Self {
        Self { path, register }
    }
}

/// 탐색 결과
#[derive(Debug, Default, Clone, PartialEq)]
pub struct DiscoveryReport {
    /// 등록에 성공한 모듈
    pub loaded: Vec<String>,
    /// 제외 목록으로 건너뛴 모듈
    pub skipped: Vec<String>,
    /// 등록에 실패한 모듈 (모듈 경로, 에러 메시지)
    pub failed: Vec<(String, String)>,
}

/// 내장 컴포넌트 매니페스트
pub fn builtin_manifest() -> Vec<ComponentModule> {
    vec![
        ComponentModule::new("retrievers.similarity", crate::retrieval::similarity::register),
        ComponentModule::new("retrievers.mmr", crate::retrieval::mmr::register),
        ComponentModule::new("retrievers.rerank", crate::retrieval::rerank::register),
        ComponentModule::new("chunkers.unstructured", crate::chunking::register),
        ComponentModule::new("generators.response", crate::generation::register),
        ComponentModule::new("ingestors.simple", crate::ingestion::register),
        ComponentModule::new("scorers.judge", crate::evaluation::scorer::register),
    ]
}

/// 매니페스트의 모듈을 등록
///
/// - 같은 경로는 한 번만 실행합니다.
/// - 제외 목록의 모듈은 건너뜁니다.
/// - 한 모듈의 실패는 보고만 하고 나머지 모듈은 계속 등록합니다.
pub fn discover(
    registry: &mut Registry,
    manifest: &[ComponentModule],
    exclude: &[String],
) -> DiscoveryReport {
    let mut report = DiscoveryReport::default();
    let mut seen: HashSet<&str> = HashSet::new();

    for module in manifest {
        if !seen.insert(module.path) {
            continue;
        }

        if exclude.iter().any(|e| e == module.path) {
            tracing::debug!("Skipping excluded module: {}", module.path);
            report.skipped.push(module.path.to_string());
            continue;
        }

        match (module.register)(registry) {
            Ok(()) => report.loaded.push(module.path.to_string()),
            Err(e) => {
                tracing::warn!("Failed to register module {}: {:#}", module.path, e);
                report.failed.push((module.path.to_string(), format!("{:#}", e)));
            }
        }
    }

    tracing::info!(
        "Discovery: {} loaded, {} skipped, {} failed",
        report.loaded.len(),
        report.skipped.len(),
        report.failed.len()
    );

    report
}

/// 내장 매니페스트로 채운 새 레지스트리
pub fn builtin_registry(exclude: &[String]) -> (Registry, DiscoveryReport) {
    let mut registry = Registry::new();
    let report = discover(&mut registry, &builtin_manifest(), exclude);
    (registry, report)
}

// ============================================================================
// Tests
// ============================================================================
