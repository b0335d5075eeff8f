//! JavaScript 语言适配器实现

use crate::error::{Result, SemChunkError};
use crate::parser::common::{
    body_statement_starts, declaration_signature, node_line_range, validate_ranges,
    LanguageAdapter, RawElement, RawElementKind,
};
use std::ops::Range;
use std::time::Duration;
use tree_sitter::{Node, Parser};

/// JavaScript 语言适配器
///
/// 提取函数声明、类声明、类方法，以及绑定到 const/let/var 的
/// 函数表达式和箭头函数。export 包装的声明同样提取。
pub struct JavaScriptAdapter {
    parser: Parser,
}

impl JavaScriptAdapter {
    /// 创建新的 JavaScript 适配器
    pub fn new() -> Result<Self> {
        let mut parser = Parser::new();
        parser
            .set_language(&tree_sitter_javascript::LANGUAGE.into())
            .map_err(|e| {
                SemChunkError::TreeSitterError(format!("Failed to set JavaScript language: {e}"))
            })?;
        Ok(Self { parser })
    }

    fn parse_tree(&mut self, source: &str) -> Result<tree_sitter::Tree> {
        let tree = self.parser.parse(source, None).ok_or_else(|| {
            SemChunkError::ParseError(
                "Tree-sitter returned no tree for JavaScript source (parse timed out or was cancelled)"
                    .to_string(),
            )
        })?;
        if tree.root_node().has_error() {
            return Err(SemChunkError::ParseError(
                "JavaScript source contains syntax errors".to_string(),
            ));
        }
        Ok(tree)
    }

    /// 遍历模块顶层语句，收集函数和类定义
    fn collect_top_level(root: Node, source: &str, elements: &mut Vec<RawElement>) {
        let mut cursor = root.walk();
        for child in root.named_children(&mut cursor) {
            match child.kind() {
                "function_declaration" | "generator_function_declaration" => {
                    if let Some(element) =
                        Self::extract_function(child, child, source, RawElementKind::Function)
                    {
                        elements.push(element);
                    }
                }
                "class_declaration" => {
                    Self::extract_class(child, child, source, elements);
                }
                "lexical_declaration" | "variable_declaration" => {
                    Self::extract_bound_functions(child, source, elements);
                }
                "export_statement" => {
                    // export 包装：元素范围取整个 export 语句
                    if let Some(declaration) = child.child_by_field_name("declaration") {
                        match declaration.kind() {
                            "function_declaration" | "generator_function_declaration" => {
                                if let Some(element) = Self::extract_function(
                                    declaration,
                                    child,
                                    source,
                                    RawElementKind::Function,
                                ) {
                                    elements.push(element);
                                }
                            }
                            "class_declaration" => {
                                Self::extract_class(declaration, child, source, elements);
                            }
                            "lexical_declaration" | "variable_declaration" => {
                                Self::extract_bound_functions(declaration, source, elements);
                            }
                            _ => {}
                        }
                    }
                }
                _ => {}
            }
        }
    }

    fn extract_function(
        node: Node,
        outer: Node,
        source: &str,
        kind: RawElementKind,
    ) -> Option<RawElement> {
        let name_node = node.child_by_field_name("name")?;
        let body = node.child_by_field_name("body");
        let (start_line, end_line) = node_line_range(outer);

        Some(RawElement {
            kind,
            name: source[name_node.byte_range()].to_string(),
            byte_range: outer.byte_range(),
            start_line,
            end_line,
            signature: Some(declaration_signature(node, body, source)),
            docstring: preceding_jsdoc(outer, source),
            attributes: Vec::new(),
        })
    }

    fn extract_class(node: Node, outer: Node, source: &str, elements: &mut Vec<RawElement>) {
        let Some(name_node) = node.child_by_field_name("name") else {
            return;
        };
        let body = node.child_by_field_name("body");
        let (start_line, end_line) = node_line_range(outer);

        elements.push(RawElement {
            kind: RawElementKind::Class,
            name: source[name_node.byte_range()].to_string(),
            byte_range: outer.byte_range(),
            start_line,
            end_line,
            signature: Some(declaration_signature(node, body, source)),
            docstring: preceding_jsdoc(outer, source),
            attributes: body.map(|b| field_names(b, source)).unwrap_or_default(),
        });

        // 类体内的方法定义
        if let Some(body) = body {
            let mut cursor = body.walk();
            for member in body.named_children(&mut cursor) {
                if member.kind() != "method_definition" {
                    continue;
                }
                let Some(method_name) = member.child_by_field_name("name") else {
                    continue;
                };
                let method_body = member.child_by_field_name("body");
                let (m_start, m_end) = node_line_range(member);
                elements.push(RawElement {
                    kind: RawElementKind::Method,
                    name: source[method_name.byte_range()].to_string(),
                    byte_range: member.byte_range(),
                    start_line: m_start,
                    end_line: m_end,
                    signature: Some(declaration_signature(member, method_body, source)),
                    docstring: preceding_jsdoc(member, source),
                    attributes: Vec::new(),
                });
            }
        }
    }

    /// 提取 `const f = () => {}` 和 `const f = function() {}` 形式的绑定
    fn extract_bound_functions(declaration: Node, source: &str, elements: &mut Vec<RawElement>) {
        let mut cursor = declaration.walk();
        for declarator in declaration.named_children(&mut cursor) {
            if declarator.kind() != "variable_declarator" {
                continue;
            }
            let Some(name_node) = declarator.child_by_field_name("name") else {
                continue;
            };
            let Some(value) = declarator.child_by_field_name("value") else {
                continue;
            };
            if !matches!(
                value.kind(),
                "arrow_function" | "function_expression" | "generator_function"
            ) {
                continue;
            }

            let (start_line, end_line) = node_line_range(declaration);
            elements.push(RawElement {
                kind: RawElementKind::Function,
                name: source[name_node.byte_range()].to_string(),
                byte_range: declaration.byte_range(),
                start_line,
                end_line,
                signature: Some(declaration_signature(
                    declaration,
                    value.child_by_field_name("body"),
                    source,
                )),
                docstring: preceding_jsdoc(declaration, source),
                attributes: Vec::new(),
            });
        }
    }
}

/// 提取紧邻声明之前的 JSDoc 或行注释
fn preceding_jsdoc(node: Node, source: &str) -> Option<String> {
    let prev = node.prev_named_sibling()?;
    if prev.kind() != "comment" {
        return None;
    }
    if node.start_position().row > prev.end_position().row + 1 {
        return None;
    }
    Some(source[prev.byte_range()].to_string())
}

/// 收集类体内的字段定义名
fn field_names(body: Node, source: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut cursor = body.walk();
    for member in body.named_children(&mut cursor) {
        if member.kind() != "field_definition" {
            continue;
        }
        if let Some(property) = member.child_by_field_name("property") {
            fields.push(source[property.byte_range()].to_string());
        }
    }
    fields
}

impl LanguageAdapter for JavaScriptAdapter {
    fn extract(&mut self, source: &str) -> Result<Vec<RawElement>> {
        let tree = self.parse_tree(source)?;
        let mut elements = Vec::new();
        Self::collect_top_level(tree.root_node(), source, &mut elements);
        validate_ranges(&elements, source.len())?;
        Ok(elements)
    }

    fn statement_boundaries(&mut self, source: &str, range: Range<usize>) -> Result<Vec<usize>> {
        let tree = self.parse_tree(source)?;
        Ok(body_statement_starts(
            tree.root_node(),
            source,
            &range,
            &["statement_block", "class_body"],
        ))
    }

    fn set_parse_timeout(&mut self, timeout: Duration) {
        #[allow(deprecated)]
        self.parser.set_timeout_micros(timeout.as_micros() as u64);
    }

    fn language_name(&self) -> &'static str {
        "JavaScript"
    }

    fn file_extensions(&self) -> &'static [&'static str] {
        &["js", "jsx", "mjs", "cjs"]
    }
}
