use std::path::PathBuf;
use thiserror::Error;

/// semchunk 工具的错误类型定义
///
/// 内存上限触顶与超大元素不属于错误：前者通过生产者阻塞（背压）解决，
/// 后者通过语句边界子切分并在 Chunk 上打标记处理。
#[derive(Error, Debug)]
pub enum SemChunkError {
    #[error("Source parsing error: {0}")]
    ParseError(String),

    #[error("Tree-sitter parsing failed: {0}")]
    TreeSitterError(String),

    #[error("Git repository error: {0}")]
    GitError(String),

    #[error("Invalid revision reference: {0}")]
    InvalidRef(String),

    #[error("Failed to read {path} at revision {reference}")]
    RevisionRead { path: PathBuf, reference: String },

    #[error("Unsupported file type: {0}")]
    UnsupportedFileType(String),

    #[error("File I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// 项目通用的 Result 类型别名
pub type Result<T> = std::result::Result<T, SemChunkError>;
