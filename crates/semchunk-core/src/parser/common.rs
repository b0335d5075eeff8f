//! 通用适配器接口和数据结构
//!
//! 定义多语言适配器的通用接口和共享数据结构。每种语言一个实现，
//! 通过语言标签查表分发，不使用继承层次。

use crate::error::{Result, SemChunkError};
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::path::Path;
use std::time::Duration;
use tree_sitter::Node;

/// 支持的编程语言枚举
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SupportedLanguage {
    Go,
    Python,
    JavaScript,
}

impl SupportedLanguage {
    /// 获取语言名称
    pub fn name(&self) -> &'static str {
        match self {
            SupportedLanguage::Go => "Go",
            SupportedLanguage::Python => "Python",
            SupportedLanguage::JavaScript => "JavaScript",
        }
    }

    /// 获取该语言的文件扩展名
    pub fn file_extensions(&self) -> &'static [&'static str] {
        match self {
            SupportedLanguage::Go => &["go"],
            SupportedLanguage::Python => &["py", "pyw", "pyi"],
            SupportedLanguage::JavaScript => &["js", "jsx", "mjs", "cjs"],
        }
    }
}

/// 原始语法元素的种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RawElementKind {
    Module,
    Class,
    Function,
    Method,
}

impl RawElementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RawElementKind::Module => "module",
            RawElementKind::Class => "class",
            RawElementKind::Function => "function",
            RawElementKind::Method => "method",
        }
    }
}

/// 适配器产出的原始语法元素
///
/// 字节范围 `[start, end)` 必须是输入源码的合法子范围，行号从 1 开始。
#[derive(Debug, Clone)]
pub struct RawElement {
    pub kind: RawElementKind,
    pub name: String,
    pub byte_range: Range<usize>,
    pub start_line: u32,
    pub end_line: u32,
    /// 声明的首行文本，用于结构化差异的签名比较
    pub signature: Option<String>,
    pub docstring: Option<String>,
    /// 类元素的属性/字段名列表
    pub attributes: Vec<String>,
}

/// 通用语言适配器接口
///
/// 每个实现封装一个 tree-sitter 解析器，产出扁平的原始元素列表。
/// 聚合为包含树的工作属于上层，不在适配器内完成。
pub trait LanguageAdapter: Send {
    /// 从源码中提取原始语法元素
    fn extract(&mut self, source: &str) -> Result<Vec<RawElement>>;

    /// 返回指定字节范围内（某个元素体内）顶层语句的起始字节偏移
    ///
    /// 超大元素只允许在这些边界处子切分，绝不在表达式或词法单元中间。
    fn statement_boundaries(&mut self, source: &str, range: Range<usize>) -> Result<Vec<usize>>;

    /// 设置解析调用的耗时上限；被打断的解析报解析错误而不是部分结果
    fn set_parse_timeout(&mut self, timeout: Duration);

    /// 获取语言名称
    fn language_name(&self) -> &'static str;

    /// 获取支持的文件扩展名
    fn file_extensions(&self) -> &'static [&'static str];
}

/// 适配器工厂 - 语言标签到适配器实现的查表分发
pub struct AdapterFactory;

impl AdapterFactory {
    /// 根据语言类型创建适配器
    pub fn create_adapter(language: SupportedLanguage) -> Result<Box<dyn LanguageAdapter>> {
        match language {
            SupportedLanguage::Go => Ok(Box::new(super::go::GoAdapter::new()?)),
            SupportedLanguage::Python => Ok(Box::new(super::python::PythonAdapter::new()?)),
            SupportedLanguage::JavaScript => {
                Ok(Box::new(super::javascript::JavaScriptAdapter::new()?))
            }
        }
    }

    /// 根据文件路径检测语言类型
    pub fn detect_language(file_path: &Path) -> Option<SupportedLanguage> {
        let ext = file_path.extension()?.to_str()?;
        for language in [
            SupportedLanguage::Go,
            SupportedLanguage::Python,
            SupportedLanguage::JavaScript,
        ] {
            if language.file_extensions().contains(&ext) {
                return Some(language);
            }
        }
        None
    }

    /// 根据文件路径创建对应的适配器
    pub fn create_adapter_for_file(file_path: &Path) -> Result<Box<dyn LanguageAdapter>> {
        let language = Self::detect_language(file_path).ok_or_else(|| {
            SemChunkError::UnsupportedFileType(file_path.to_string_lossy().to_string())
        })?;
        Self::create_adapter(language)
    }
}

/// 获取节点的行号范围（从 1 开始）
pub(crate) fn node_line_range(node: Node) -> (u32, u32) {
    let start_line = node.start_position().row as u32 + 1;
    let end_line = node.end_position().row as u32 + 1;
    (start_line, end_line)
}

/// 提取声明的签名：从声明起点到体开始处的文本，退化为首行
pub(crate) fn declaration_signature(node: Node, body: Option<Node>, source: &str) -> String {
    let head = match body {
        Some(body_node) if body_node.start_byte() > node.start_byte() => {
            &source[node.start_byte()..body_node.start_byte()]
        }
        _ => &source[node.byte_range()],
    };
    head.lines().next().unwrap_or("").trim().to_string()
}

/// 查找指定字节范围对应的元素体节点，返回其中顶层语句的起始偏移
///
/// `body_kinds` 是该语言中作为语句容器的节点种类。
pub(crate) fn body_statement_starts(
    root: Node,
    source: &str,
    range: &Range<usize>,
    body_kinds: &[&str],
) -> Vec<usize> {
    let Some(element) = root.descendant_for_byte_range(range.start, range.end.saturating_sub(1))
    else {
        return Vec::new();
    };

    // 向上回溯到完整覆盖请求范围的节点
    let mut node = element;
    while node.start_byte() > range.start || node.end_byte() < range.end {
        match node.parent() {
            Some(parent) => node = parent,
            None => break,
        }
    }

    // 在元素的直接子节点中查找语句容器
    let mut cursor = node.walk();
    let body = node
        .children(&mut cursor)
        .find(|child| body_kinds.contains(&child.kind()));

    let Some(body) = body else {
        return Vec::new();
    };

    let mut starts = Vec::new();
    let mut body_cursor = body.walk();
    for statement in body.named_children(&mut body_cursor) {
        let start = align_to_line_start(source, statement.start_byte());
        if start > range.start && start < range.end {
            starts.push(start);
        }
    }
    starts.dedup();
    starts
}

/// 语句起点前只有缩进空白时，把边界回退到行首，使切点落在整行之间
pub(crate) fn align_to_line_start(source: &str, start: usize) -> usize {
    let bytes = source.as_bytes();
    let line_start = bytes[..start]
        .iter()
        .rposition(|byte| *byte == b'\n')
        .map(|pos| pos + 1)
        .unwrap_or(0);
    if bytes[line_start..start]
        .iter()
        .all(|byte| *byte == b' ' || *byte == b'\t')
    {
        line_start
    } else {
        start
    }
}

/// 校验元素范围是输入的合法子范围，越界即为解析缺陷
pub(crate) fn validate_ranges(elements: &[RawElement], source_len: usize) -> Result<()> {
    for element in elements {
        if element.byte_range.start > element.byte_range.end
            || element.byte_range.end > source_len
        {
            return Err(SemChunkError::ParseError(format!(
                "Element {} has invalid byte range {:?} for input of {} bytes",
                element.name, element.byte_range, source_len
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_language_detection() {
        // 测试各语言的扩展名检测
        assert_eq!(
            AdapterFactory::detect_language(&PathBuf::from("main.go")),
            Some(SupportedLanguage::Go)
        );
        assert_eq!(
            AdapterFactory::detect_language(&PathBuf::from("app.py")),
            Some(SupportedLanguage::Python)
        );
        assert_eq!(
            AdapterFactory::detect_language(&PathBuf::from("index.mjs")),
            Some(SupportedLanguage::JavaScript)
        );

        // 测试不支持的文件类型
        assert_eq!(AdapterFactory::detect_language(&PathBuf::from("file.txt")), None);

        // 测试没有扩展名的文件
        assert_eq!(AdapterFactory::detect_language(&PathBuf::from("README")), None);
    }

    #[test]
    fn test_adapter_creation() {
        let adapter = AdapterFactory::create_adapter(SupportedLanguage::Python);
        assert!(adapter.is_ok());

        let adapter = adapter.unwrap();
        assert_eq!(adapter.language_name(), "Python");
        assert_eq!(adapter.file_extensions(), &["py", "pyw", "pyi"]);
    }

    #[test]
    fn test_adapter_creation_for_file() {
        let adapter = AdapterFactory::create_adapter_for_file(&PathBuf::from("test.go"));
        assert!(adapter.is_ok());

        let adapter = AdapterFactory::create_adapter_for_file(&PathBuf::from("test.txt"));
        assert!(adapter.is_err());

        if let Err(SemChunkError::UnsupportedFileType(path)) = adapter {
            assert_eq!(path, "test.txt");
        } else {
            panic!("Expected UnsupportedFileType error");
        }
    }

    #[test]
    fn test_validate_ranges_rejects_out_of_bounds() {
        let element = RawElement {
            kind: RawElementKind::Function,
            name: "f".to_string(),
            byte_range: 0..100,
            start_line: 1,
            end_line: 5,
            signature: None,
            docstring: None,
            attributes: Vec::new(),
        };

        assert!(validate_ranges(&[element.clone()], 200).is_ok());
        assert!(validate_ranges(&[element], 50).is_err());
    }
}
