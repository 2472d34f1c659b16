//! 디렉터리 수집
//!
//! `ignore` 크레이트로 .gitignore를 존중하며 재귀 탐색하고,
//! 지원 확장자 파일만 경로순으로 돌려줍니다.

use std::path::{Path, PathBuf};

use anyhow::Result;
use ignore::WalkBuilder;

use super::FileType;

/// 수집 옵션
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    pub respect_gitignore: bool,
    pub include_hidden: bool,
    /// 최대 파일 크기 (바이트, 0이면 제한 없음)
    pub max_file_size: u64,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            respect_gitignore: true,
            include_hidden: false,
            max_file_size: 10 * 1024 * 1024, // 10MB
        }
    }
}

/// 수집된 파일
#[derive(Debug, Clone, PartialEq)]
pub struct CollectedFile {
    pub path: PathBuf,
    pub file_type: FileType,
    pub size: u64,
}

/// 디렉터리 수집기
#[derive(Debug, Clone, Default)]
pub struct FileCollector {
    config: CollectorConfig,
}

impl FileCollector {
    pub fn new(config: CollectorConfig) -> Self {
        Self { config }
    }

    /// 재귀 수집 (지원하지 않는 확장자는 조용히 건너뜀)
    pub fn collect(&self, dir: &Path) -> Result<Vec<CollectedFile>> {
        if !dir.exists() {
            anyhow::bail!("Directory not found: {:?}", dir);
        }
        if !dir.is_dir() {
            anyhow::bail!("Not a directory: {:?}", dir);
        }

        let walker = WalkBuilder::new(dir)
            .hidden(!self.config.include_hidden)
            .git_ignore(self.config.respect_gitignore)
            .git_global(self.config.respect_gitignore)
            .git_exclude(self.config.respect_gitignore)
            .require_git(false)
            .build();

        let mut files = Vec::new();
        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    tracing::warn!("Failed to read entry: {}", e);
                    continue;
                }
            };

            if !entry.file_type().map(|ft| ft.is_file()).unwrap_or(false) {
                continue;
            }

            let Some(file_type) = FileType::from_path(entry.path()) else {
                continue;
            };

            let size = match entry.metadata() {
                Ok(m) => m.len(),
                Err(e) => {
                    tracing::warn!("Failed to read metadata for {:?}: {}", entry.path(), e);
                    continue;
                }
            };
            if self.config.max_file_size > 0 && size > self.config.max_file_size {
                tracing::debug!("Skipping large file: {:?} ({} bytes)", entry.path(), size);
                continue;
            }

            files.push(CollectedFile {
                path: entry.path().to_path_buf(),
                file_type,
                size,
            });
        }

        files.sort_by(|a, b| a.path.cmp(&b.path));
        tracing::info!("Collected {} files from {:?}", files.len(), dir);
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_collect_skips_unsupported_and_ignored() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("nested")).unwrap();
        std::fs::create_dir_all(root.join("build")).unwrap();
        std::fs::write(root.join("a.txt"), "alpha").unwrap();
        std::fs::write(root.join("nested/b.MD"), "# beta").unwrap();
        std::fs::write(root.join("image.png"), [0u8; 4]).unwrap();
        std::fs::write(root.join("build/c.txt"), "ignored").unwrap();
        std::fs::write(root.join(".gitignore"), "build/\n").unwrap();

        let files = FileCollector::default().collect(root).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|f| f.path.strip_prefix(root).unwrap().to_path_buf())
            .collect();

        assert_eq!(names, vec![PathBuf::from("a.txt"), PathBuf::from("nested/b.MD")]);
        assert_eq!(files[1].file_type, FileType::Markdown);
    }

    #[test]
    fn test_collect_missing_dir() {
        let dir = TempDir::new().unwrap();
        assert!(FileCollector::default().collect(&dir.path().join("nope")).is_err());
    }
}
