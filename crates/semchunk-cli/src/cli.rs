//! 命令行接口模块
//!
//! 提供命令行参数解析和配置转换

use clap::{Parser, Subcommand, ValueEnum};
use semchunk_core::{PipelineConfig, Result, SemChunkError, SupportedLanguage};
use std::path::PathBuf;
use std::time::Duration;

/// semchunk - 语义代码分块与差异检测工具
///
/// 基于 Tree-sitter 的代码分块工具，把源码树切成语义完整的块，
/// 并能在 Git 修订版之间检测函数和类级别的语义变更。
#[derive(Parser, Debug)]
#[command(name = "semchunk")]
#[command(author = "semchunk contributors")]
#[command(version = "0.1.0")]
#[command(about = "Semantic code chunking and structural diff detection")]
#[command(
    long_about = "semchunk splits source trees into semantically complete chunks along function and class boundaries, and detects element-level semantic changes between Git revisions."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// 详细输出
    #[arg(
        short = 'v',
        long = "verbose",
        global = true,
        help = "Enable verbose logging output"
    )]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// 把目录树切分为语义块
    Chunk(ChunkArgs),
    /// 检测两个修订版之间的语义变更
    Diff(DiffArgs),
}

#[derive(Parser, Debug)]
pub struct ChunkArgs {
    /// 要处理的源码根目录
    #[arg(default_value = ".", value_name = "PATH", help = "Source root to chunk")]
    pub root: PathBuf,

    /// 单块大小上限（字节）
    #[arg(
        long = "max-chunk-size",
        env = "SEMCHUNK_MAX_CHUNK_SIZE",
        default_value_t = 4096,
        value_name = "BYTES",
        help = "Maximum chunk size in bytes"
    )]
    pub max_chunk_size: usize,

    /// 内存预算（MiB）
    #[arg(
        long = "memory-ceiling",
        env = "SEMCHUNK_MEMORY_CEILING_MIB",
        default_value_t = 256,
        value_name = "MIB",
        help = "Pipeline memory budget in MiB; producers block when it is reached"
    )]
    pub memory_ceiling_mib: usize,

    /// 单文件内存界限（MiB），估算超出的文件整体输出为不透明块
    #[arg(
        long = "per-file-memory-bound",
        default_value_t = 64,
        value_name = "MIB",
        help = "Per-file memory bound in MiB; files estimated above it degrade to opaque chunks"
    )]
    pub per_file_memory_bound_mib: usize,

    /// 工作线程数，默认为 CPU 核数
    #[arg(
        short = 'j',
        long = "threads",
        env = "SEMCHUNK_THREADS",
        value_name = "N",
        help = "Number of worker threads (defaults to the number of CPUs)"
    )]
    pub threads: Option<usize>,

    /// 单文件解析耗时上限（秒）
    #[arg(
        long = "parse-timeout",
        default_value_t = 10,
        value_name = "SECONDS",
        help = "Per-file parse timeout in seconds"
    )]
    pub parse_timeout_secs: u64,

    /// 排除路径的正则模式，可重复
    #[arg(
        short = 'e',
        long = "exclude",
        value_name = "REGEX",
        help = "Exclude paths matching this regex (repeatable)"
    )]
    pub exclude: Vec<String>,

    /// 限定语言，可重复
    #[arg(
        short = 'l',
        long = "language",
        value_enum,
        value_name = "LANG",
        help = "Only process these languages (repeatable)"
    )]
    pub languages: Vec<LanguageArg>,

    /// 输出格式
    #[arg(
        short = 'f',
        long = "format",
        value_enum,
        default_value_t = ChunkFormatArg::Text,
        help = "Output format for emitted chunks"
    )]
    pub format: ChunkFormatArg,

    /// 输出到文件
    #[arg(
        short = 'o',
        long = "output",
        value_name = "FILE",
        help = "Write output to a file instead of stdout"
    )]
    pub output_file: Option<PathBuf>,

    /// 结束时打印运行统计
    #[arg(long = "stats", help = "Print a processing summary after chunking")]
    pub stats: bool,
}

#[derive(Parser, Debug)]
pub struct DiffArgs {
    /// 旧修订版引用
    #[arg(value_name = "OLD", help = "Old revision (commit hash, branch, or tag)")]
    pub old: String,

    /// 新修订版引用，省略时与工作区比较
    #[arg(
        value_name = "NEW",
        help = "New revision; compares against the working tree when omitted"
    )]
    pub new: Option<String>,

    /// 仓库路径
    #[arg(
        short = 'r',
        long = "repo",
        default_value = ".",
        value_name = "PATH",
        help = "Path to the Git repository"
    )]
    pub repo_path: PathBuf,

    /// 输出格式
    #[arg(
        short = 'f',
        long = "format",
        value_enum,
        default_value_t = DiffFormatArg::Text,
        help = "Output format for detected changes"
    )]
    pub format: DiffFormatArg,

    /// 输出到文件
    #[arg(
        short = 'o',
        long = "output",
        value_name = "FILE",
        help = "Write output to a file instead of stdout"
    )]
    pub output_file: Option<PathBuf>,
}

/// 语言命令行参数
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LanguageArg {
    #[value(name = "go")]
    Go,
    #[value(name = "python")]
    Python,
    #[value(name = "javascript")]
    JavaScript,
}

impl From<LanguageArg> for SupportedLanguage {
    fn from(arg: LanguageArg) -> Self {
        match arg {
            LanguageArg::Go => SupportedLanguage::Go,
            LanguageArg::Python => SupportedLanguage::Python,
            LanguageArg::JavaScript => SupportedLanguage::JavaScript,
        }
    }
}

/// 分块输出格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ChunkFormatArg {
    /// 人类可读的分段文本
    #[value(name = "text")]
    Text,
    /// 单个 JSON 数组
    #[value(name = "json")]
    Json,
    /// 每行一个 JSON 对象
    #[value(name = "jsonl")]
    Jsonl,
}

/// 差异输出格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DiffFormatArg {
    #[value(name = "text")]
    Text,
    #[value(name = "json")]
    Json,
}

impl Cli {
    /// 解析命令行参数
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// 校验参数组合
    pub fn validate(&self) -> Result<()> {
        match &self.command {
            Commands::Chunk(args) => {
                if args.max_chunk_size == 0 {
                    return Err(SemChunkError::ConfigError(
                        "--max-chunk-size must be greater than zero".to_string(),
                    ));
                }
                if args.memory_ceiling_mib == 0 {
                    return Err(SemChunkError::ConfigError(
                        "--memory-ceiling must be greater than zero".to_string(),
                    ));
                }
                if args.per_file_memory_bound_mib == 0 {
                    return Err(SemChunkError::ConfigError(
                        "--per-file-memory-bound must be greater than zero".to_string(),
                    ));
                }
                if let Some(0) = args.threads {
                    return Err(SemChunkError::ConfigError(
                        "--threads must be greater than zero".to_string(),
                    ));
                }
            }
            Commands::Diff(args) => {
                if args.old.is_empty() {
                    return Err(SemChunkError::ConfigError(
                        "OLD revision must not be empty".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }
}

impl ChunkArgs {
    /// 转换为流水线配置
    pub fn pipeline_config(&self) -> PipelineConfig {
        let mut config = PipelineConfig::new()
            .with_max_chunk_size(self.max_chunk_size)
            .with_memory_ceiling(self.memory_ceiling_mib * 1024 * 1024)
            .with_per_file_memory_bound(self.per_file_memory_bound_mib * 1024 * 1024)
            .with_parse_timeout(Duration::from_secs(self.parse_timeout_secs))
            .with_exclude_patterns(self.exclude.clone());
        if let Some(threads) = self.threads {
            config = config.with_worker_threads(threads);
        }
        if !self.languages.is_empty() {
            config = config.with_languages(
                self.languages.iter().map(|lang| (*lang).into()).collect(),
            );
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_args_to_pipeline_config() {
        let cli = Cli::parse_from([
            "semchunk", "chunk", "src", "--max-chunk-size", "1024", "--memory-ceiling", "64",
            "-j", "2", "-l", "python", "-e", r"test_.*\.py",
        ]);
        let Commands::Chunk(args) = &cli.command else {
            panic!("expected chunk subcommand");
        };

        let config = args.pipeline_config();
        assert_eq!(config.max_chunk_size, 1024);
        assert_eq!(config.memory_ceiling, 64 * 1024 * 1024);
        assert_eq!(config.per_file_memory_bound, 64 * 1024 * 1024);
        assert_eq!(config.worker_threads, 2);
        assert_eq!(config.languages, Some(vec![SupportedLanguage::Python]));
        assert_eq!(config.exclude_patterns, vec![r"test_.*\.py".to_string()]);
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        let cli = Cli::parse_from(["semchunk", "chunk", ".", "--max-chunk-size", "0"]);
        assert!(cli.validate().is_err());
    }

    #[test]
    fn test_diff_defaults() {
        let cli = Cli::parse_from(["semchunk", "diff", "HEAD~1"]);
        let Commands::Diff(args) = &cli.command else {
            panic!("expected diff subcommand");
        };
        assert_eq!(args.old, "HEAD~1");
        assert!(args.new.is_none());
        assert_eq!(args.format, DiffFormatArg::Text);
    }
}
