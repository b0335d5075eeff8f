//! 源文件发现模块
//!
//! 遍历目录树，收集受支持语言的源文件，应用排除规则和大小上限。

use crate::error::{Result, SemChunkError};
use crate::parser::{AdapterFactory, SupportedLanguage};
use regex::Regex;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// 单个文件超过此大小直接跳过，不进入解析流水线
pub const MAX_FILE_SIZE: u64 = 50 * 1024 * 1024;

/// 默认排除的目录名
const DEFAULT_EXCLUDED_DIRS: &[&str] = &[
    ".git",
    "node_modules",
    "__pycache__",
    ".venv",
    "venv",
    "vendor",
    "target",
    "dist",
    "build",
    ".idea",
    ".vscode",
];

/// 发现的源文件
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub path: PathBuf,
    pub language: SupportedLanguage,
    pub byte_len: u64,
}

/// 源文件遍历器
///
/// 稳定的字典序输出，保证同一目录树的多次遍历产生相同顺序。
pub struct SourceWalker {
    root: PathBuf,
    exclude_patterns: Vec<Regex>,
    languages: Option<Vec<SupportedLanguage>>,
}

impl SourceWalker {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            exclude_patterns: Vec::new(),
            languages: None,
        }
    }

    /// 设置排除路径的正则模式
    pub fn with_exclude_patterns(mut self, patterns: &[String]) -> Result<Self> {
        self.exclude_patterns = patterns
            .iter()
            .map(|pattern| {
                Regex::new(pattern).map_err(|e| {
                    SemChunkError::ConfigError(format!("Invalid exclude pattern '{pattern}': {e}"))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(self)
    }

    /// 限定只收集指定语言的文件
    pub fn with_languages(mut self, languages: Vec<SupportedLanguage>) -> Self {
        self.languages = Some(languages);
        self
    }

    /// 遍历目录，返回按路径排序的源文件列表
    pub fn walk(&self) -> Result<Vec<SourceFile>> {
        if !self.root.exists() {
            return Err(SemChunkError::ConfigError(format!(
                "Source root does not exist: {}",
                self.root.display()
            )));
        }

        let mut files = Vec::new();
        let walker = WalkDir::new(&self.root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| !is_excluded_dir(entry.path()));

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable entry: {e}");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();

            let Some(language) = AdapterFactory::detect_language(path) else {
                continue;
            };
            if let Some(wanted) = &self.languages {
                if !wanted.contains(&language) {
                    continue;
                }
            }
            if self.matches_exclude(path) {
                debug!("Excluded by pattern: {}", path.display());
                continue;
            }

            let metadata = entry.metadata().map_err(|e| {
                SemChunkError::ConfigError(format!(
                    "Failed to read metadata for {}: {e}",
                    path.display()
                ))
            })?;
            if metadata.len() > MAX_FILE_SIZE {
                warn!(
                    "Skipping oversized file ({} bytes): {}",
                    metadata.len(),
                    path.display()
                );
                continue;
            }

            files.push(SourceFile {
                path: path.to_path_buf(),
                language,
                byte_len: metadata.len(),
            });
        }

        files.sort_by(|a, b| a.path.cmp(&b.path));
        debug!("Discovered {} source files under {}", files.len(), self.root.display());
        Ok(files)
    }

    fn matches_exclude(&self, path: &Path) -> bool {
        let text = path.to_string_lossy();
        self.exclude_patterns
            .iter()
            .any(|pattern| pattern.is_match(&text))
    }
}

fn is_excluded_dir(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(|name| DEFAULT_EXCLUDED_DIRS.contains(&name))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::TempDir;

    fn setup_tree() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("main.go"), "package main\n").unwrap();
        fs::write(dir.path().join("app.py"), "x = 1\n").unwrap();
        fs::write(dir.path().join("notes.txt"), "ignore me\n").unwrap();
        fs::create_dir(dir.path().join("node_modules")).unwrap();
        fs::write(dir.path().join("node_modules").join("dep.js"), "x\n").unwrap();
        fs::create_dir(dir.path().join("lib")).unwrap();
        fs::write(dir.path().join("lib").join("util.js"), "const a = 1;\n").unwrap();
        dir
    }

    #[test]
    fn test_walk_discovers_supported_files_in_order() {
        let dir = setup_tree();
        let files = SourceWalker::new(dir.path()).walk().unwrap();

        let names: Vec<String> = files
            .iter()
            .map(|file| {
                file.path
                    .strip_prefix(dir.path())
                    .unwrap()
                    .to_string_lossy()
                    .to_string()
            })
            .collect();
        // 字典序稳定输出，排除目录和不支持的扩展名不出现
        assert_eq!(names, vec!["app.py", "lib/util.js", "main.go"]);
    }

    #[test]
    fn test_exclude_patterns_filter_files() {
        let dir = setup_tree();
        let files = SourceWalker::new(dir.path())
            .with_exclude_patterns(&[r"\.js$".to_string()])
            .unwrap()
            .walk()
            .unwrap();

        assert!(files.iter().all(|file| {
            file.path.extension().and_then(|e| e.to_str()) != Some("js")
        }));
    }

    #[test]
    fn test_language_filter() {
        let dir = setup_tree();
        let files = SourceWalker::new(dir.path())
            .with_languages(vec![SupportedLanguage::Python])
            .walk()
            .unwrap();

        assert_eq!(files.len(), 1);
        assert_eq!(files[0].language, SupportedLanguage::Python);
    }

    #[test]
    fn test_invalid_exclude_pattern_is_config_error() {
        let result = SourceWalker::new(".").with_exclude_patterns(&["[unclosed".to_string()]);
        assert!(matches!(result, Err(SemChunkError::ConfigError(_))));
    }

    #[test]
    fn test_missing_root_is_config_error() {
        let result = SourceWalker::new("/definitely/not/a/real/path").walk();
        assert!(matches!(result, Err(SemChunkError::ConfigError(_))));
    }
}
