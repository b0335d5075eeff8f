//! semchunk-core - 语义代码分块核心库
//!
//! 这是一个基于 Tree-sitter 的代码分块与语义差异检测核心库，
//! 把源码树切成语义完整的块，并在 Git 修订版之间比较语义元素。

pub mod aggregator;
pub mod chunker;
pub mod differ;
pub mod error;
pub mod git;
pub mod parser;
pub mod pipeline;
pub mod walker;

// 重新导出主要的公共 API
pub use aggregator::{AggregatedFile, ClassStructure, ElementAggregator, SemanticElement};
pub use chunker::{Chunk, ChunkBuilder, ContainedUnit};
pub use differ::{ChangeKind, DiffFailure, DiffReport, SemanticChange, SemanticDiffDetector};
pub use error::{Result, SemChunkError};
pub use git::{FileChangeStatus, GixRepository, RevisionStore};
// 导出多语言解析器架构
pub use parser::{
    AdapterFactory, GoAdapter, JavaScriptAdapter, LanguageAdapter, PythonAdapter, RawElement,
    RawElementKind, SupportedLanguage,
};
// 导出流水线组件
pub use pipeline::{
    ChunkPipeline, ChunkStream, FileFailure, PipelineConfig, PipelineReport,
};
pub use walker::{SourceFile, SourceWalker, MAX_FILE_SIZE};
