//! Python 语言适配器实现

use crate::error::{Result, SemChunkError};
use crate::parser::common::{
    body_statement_starts, declaration_signature, node_line_range, validate_ranges,
    LanguageAdapter, RawElement, RawElementKind,
};
use std::ops::Range;
use std::time::Duration;
use tree_sitter::{Node, Parser};

/// Python 语言适配器
///
/// 提取模块顶层和类体内的函数与类定义。函数体内的嵌套定义不单独
/// 提取，保证产出的元素除类包含方法外互不重叠。
pub struct PythonAdapter {
    parser: Parser,
}

impl PythonAdapter {
    /// 创建新的 Python 适配器
    pub fn new() -> Result<Self> {
        let mut parser = Parser::new();
        parser
            .set_language(&tree_sitter_python::LANGUAGE.into())
            .map_err(|e| {
                SemChunkError::TreeSitterError(format!("Failed to set Python language: {e}"))
            })?;
        Ok(Self { parser })
    }

    fn parse_tree(&mut self, source: &str) -> Result<tree_sitter::Tree> {
        let tree = self.parser.parse(source, None).ok_or_else(|| {
            SemChunkError::ParseError(
                "Tree-sitter returned no tree for Python source (parse timed out or was cancelled)"
                    .to_string(),
            )
        })?;
        if tree.root_node().has_error() {
            return Err(SemChunkError::ParseError(
                "Python source contains syntax errors".to_string(),
            ));
        }
        Ok(tree)
    }

    /// 遍历一个语句容器，收集其中的类和函数定义
    ///
    /// `inside_class` 控制函数元素的种类标记。进入类体继续递归，
    /// 进入函数体则停止。
    fn collect(node: Node, source: &str, inside_class: bool, elements: &mut Vec<RawElement>) {
        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            match child.kind() {
                "function_definition" => {
                    if let Some(element) = Self::extract_function(child, source, inside_class) {
                        elements.push(element);
                    }
                }
                "decorated_definition" => {
                    // 装饰器定义整体作为元素范围，内部定义决定种类
                    if let Some(inner) = child.child_by_field_name("definition") {
                        match inner.kind() {
                            "function_definition" => {
                                if let Some(mut element) =
                                    Self::extract_function(inner, source, inside_class)
                                {
                                    element.byte_range = child.byte_range();
                                    element.start_line = child.start_position().row as u32 + 1;
                                    elements.push(element);
                                }
                            }
                            "class_definition" => {
                                Self::extract_class(inner, Some(child), source, elements);
                            }
                            _ => {}
                        }
                    }
                }
                "class_definition" => {
                    Self::extract_class(child, None, source, elements);
                }
                _ => {}
            }
        }
    }

    fn extract_function(node: Node, source: &str, inside_class: bool) -> Option<RawElement> {
        let name_node = node.child_by_field_name("name")?;
        let body = node.child_by_field_name("body");
        let (start_line, end_line) = node_line_range(node);

        Some(RawElement {
            kind: if inside_class {
                RawElementKind::Method
            } else {
                RawElementKind::Function
            },
            name: source[name_node.byte_range()].to_string(),
            byte_range: node.byte_range(),
            start_line,
            end_line,
            signature: Some(declaration_signature(node, body, source)),
            docstring: body.and_then(|b| leading_docstring(b, source)),
            attributes: Vec::new(),
        })
    }

    fn extract_class(
        node: Node,
        wrapper: Option<Node>,
        source: &str,
        elements: &mut Vec<RawElement>,
    ) {
        let Some(name_node) = node.child_by_field_name("name") else {
            return;
        };
        let body = node.child_by_field_name("body");
        let outer = wrapper.unwrap_or(node);
        let (start_line, end_line) = node_line_range(outer);

        elements.push(RawElement {
            kind: RawElementKind::Class,
            name: source[name_node.byte_range()].to_string(),
            byte_range: outer.byte_range(),
            start_line,
            end_line,
            signature: Some(declaration_signature(node, body, source)),
            docstring: body.and_then(|b| leading_docstring(b, source)),
            attributes: body.map(|b| class_attributes(b, source)).unwrap_or_default(),
        });

        // 类体内的方法继续提取，嵌套类同理
        if let Some(body) = body {
            Self::collect(body, source, true, elements);
        }
    }
}

/// 提取体块开头的文档字符串
fn leading_docstring(body: Node, source: &str) -> Option<String> {
    let first = body.named_child(0)?;
    if first.kind() != "expression_statement" {
        return None;
    }
    let expr = first.named_child(0)?;
    if expr.kind() != "string" {
        return None;
    }
    Some(source[expr.byte_range()].to_string())
}

/// 收集类体内顶层的属性赋值名
fn class_attributes(body: Node, source: &str) -> Vec<String> {
    let mut attributes = Vec::new();
    let mut cursor = body.walk();
    for statement in body.named_children(&mut cursor) {
        let target = match statement.kind() {
            "expression_statement" => statement
                .named_child(0)
                .filter(|expr| expr.kind() == "assignment")
                .and_then(|assignment| assignment.child_by_field_name("left")),
            _ => None,
        };
        if let Some(target) = target {
            if target.kind() == "identifier" {
                attributes.push(source[target.byte_range()].to_string());
            }
        }
    }
    attributes
}

impl LanguageAdapter for PythonAdapter {
    fn extract(&mut self, source: &str) -> Result<Vec<RawElement>> {
        let tree = self.parse_tree(source)?;
        let mut elements = Vec::new();
        Self::collect(tree.root_node(), source, false, &mut elements);
        validate_ranges(&elements, source.len())?;
        Ok(elements)
    }

    fn statement_boundaries(&mut self, source: &str, range: Range<usize>) -> Result<Vec<usize>> {
        let tree = self.parse_tree(source)?;
        Ok(body_statement_starts(
            tree.root_node(),
            source,
            &range,
            &["block"],
        ))
    }

    fn set_parse_timeout(&mut self, timeout: Duration) {
        #[allow(deprecated)]
        self.parser.set_timeout_micros(timeout.as_micros() as u64);
    }

    fn language_name(&self) -> &'static str {
        "Python"
    }

    fn file_extensions(&self) -> &'static [&'static str] {
        &["py", "pyw", "pyi"]
    }
}
