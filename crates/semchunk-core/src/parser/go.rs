//! Go 语言适配器实现

use crate::error::{Result, SemChunkError};
use crate::parser::common::{
    body_statement_starts, declaration_signature, node_line_range, validate_ranges,
    LanguageAdapter, RawElement, RawElementKind,
};
use std::ops::Range;
use std::time::Duration;
use tree_sitter::{Node, Parser};

/// Go 语言适配器
///
/// 从 Go 源码中提取函数、方法和结构体定义。方法在字节布局上位于
/// 结构体范围之外，因此这里直接用接收者限定方法名（`Recv.Name`），
/// 聚合阶段按名字归并而不是按包含关系归并。
pub struct GoAdapter {
    parser: Parser,
}

impl GoAdapter {
    /// 创建新的 Go 适配器
    pub fn new() -> Result<Self> {
        let mut parser = Parser::new();
        parser
            .set_language(&tree_sitter_go::LANGUAGE.into())
            .map_err(|e| {
                SemChunkError::TreeSitterError(format!("Failed to set Go language: {e}"))
            })?;
        Ok(Self { parser })
    }

    fn parse_tree(&mut self, source: &str) -> Result<tree_sitter::Tree> {
        let tree = self.parser.parse(source, None).ok_or_else(|| {
            SemChunkError::ParseError(
                "Tree-sitter returned no tree for Go source (parse timed out or was cancelled)"
                    .to_string(),
            )
        })?;
        if tree.root_node().has_error() {
            return Err(SemChunkError::ParseError(
                "Go source contains syntax errors".to_string(),
            ));
        }
        Ok(tree)
    }

    /// 提取方法接收者的类型名，剥掉指针和泛型参数
    fn receiver_type_name(receiver: Node, source: &str) -> Option<String> {
        let mut cursor = receiver.walk();
        let param = receiver
            .named_children(&mut cursor)
            .find(|child| child.kind() == "parameter_declaration")?;
        let type_node = param.child_by_field_name("type")?;
        let raw = &source[type_node.byte_range()];
        let name = raw
            .trim_start_matches('*')
            .split('[')
            .next()
            .unwrap_or(raw)
            .trim();
        Some(name.to_string())
    }

    fn extract_function(node: Node, source: &str) -> Option<RawElement> {
        let name_node = node.child_by_field_name("name")?;
        let name = source[name_node.byte_range()].to_string();
        let body = node.child_by_field_name("body");
        let (start_line, end_line) = node_line_range(node);

        Some(RawElement {
            kind: RawElementKind::Function,
            name,
            byte_range: node.byte_range(),
            start_line,
            end_line,
            signature: Some(declaration_signature(node, body, source)),
            docstring: preceding_comment(node, source),
            attributes: Vec::new(),
        })
    }

    fn extract_method(node: Node, source: &str) -> Option<RawElement> {
        let name_node = node.child_by_field_name("name")?;
        let name = source[name_node.byte_range()].to_string();
        let qualified = match node
            .child_by_field_name("receiver")
            .and_then(|receiver| Self::receiver_type_name(receiver, source))
        {
            Some(receiver) => format!("{receiver}.{name}"),
            None => name,
        };
        let body = node.child_by_field_name("body");
        let (start_line, end_line) = node_line_range(node);

        Some(RawElement {
            kind: RawElementKind::Method,
            name: qualified,
            byte_range: node.byte_range(),
            start_line,
            end_line,
            signature: Some(declaration_signature(node, body, source)),
            docstring: preceding_comment(node, source),
            attributes: Vec::new(),
        })
    }

    /// 提取 type 声明中的结构体和接口定义
    fn extract_types(node: Node, source: &str, elements: &mut Vec<RawElement>) {
        let mut cursor = node.walk();
        for spec in node.named_children(&mut cursor) {
            if spec.kind() != "type_spec" {
                continue;
            }
            let Some(name_node) = spec.child_by_field_name("name") else {
                continue;
            };
            let Some(type_node) = spec.child_by_field_name("type") else {
                continue;
            };
            if type_node.kind() != "struct_type" && type_node.kind() != "interface_type" {
                continue;
            }

            let (start_line, end_line) = node_line_range(node);
            elements.push(RawElement {
                kind: RawElementKind::Class,
                name: source[name_node.byte_range()].to_string(),
                byte_range: node.byte_range(),
                start_line,
                end_line,
                signature: Some(declaration_signature(node, Some(type_node), source)),
                docstring: preceding_comment(node, source),
                attributes: struct_field_names(type_node, source),
            });
        }
    }
}

/// 提取紧邻声明之前的注释文本
fn preceding_comment(node: Node, source: &str) -> Option<String> {
    let prev = node.prev_named_sibling()?;
    if prev.kind() != "comment" {
        return None;
    }
    // 注释与声明之间不能有空行
    if node.start_position().row > prev.end_position().row + 1 {
        return None;
    }
    Some(source[prev.byte_range()].to_string())
}

/// 收集结构体字段名
fn struct_field_names(type_node: Node, source: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let Some(field_list) = type_node
        .named_children(&mut type_node.walk())
        .find(|child| child.kind() == "field_declaration_list")
    else {
        return fields;
    };

    let mut cursor = field_list.walk();
    for declaration in field_list.named_children(&mut cursor) {
        if declaration.kind() != "field_declaration" {
            continue;
        }
        let mut decl_cursor = declaration.walk();
        for child in declaration.named_children(&mut decl_cursor) {
            if child.kind() == "field_identifier" {
                fields.push(source[child.byte_range()].to_string());
            }
        }
    }
    fields
}

impl LanguageAdapter for GoAdapter {
    fn extract(&mut self, source: &str) -> Result<Vec<RawElement>> {
        let tree = self.parse_tree(source)?;
        let root = tree.root_node();
        let mut elements = Vec::new();

        // 只遍历顶层声明，不进入函数体
        let mut cursor = root.walk();
        for child in root.named_children(&mut cursor) {
            match child.kind() {
                "function_declaration" => {
                    if let Some(element) = Self::extract_function(child, source) {
                        elements.push(element);
                    }
                }
                "method_declaration" => {
                    if let Some(element) = Self::extract_method(child, source) {
                        elements.push(element);
                    }
                }
                "type_declaration" => {
                    Self::extract_types(child, source, &mut elements);
                }
                _ => {}
            }
        }

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
        "Go"
    }

    fn file_extensions(&self) -> &'static [&'static str] {
        &["go"]
    }
}
