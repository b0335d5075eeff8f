//! 元素聚合模块
//!
//! 把适配器产出的扁平元素列表聚合为文件级的包含结构：
//! 方法归并到最小包含类，其余作为顶层函数。

use crate::parser::{RawElement, RawElementKind, SupportedLanguage};
use serde::Serialize;
use std::collections::HashMap;
use std::ops::Range;
use std::path::PathBuf;

/// 聚合后的语义元素
#[derive(Debug, Clone, Serialize)]
pub struct SemanticElement {
    pub kind: RawElementKind,
    pub name: String,
    /// 限定名：方法为 `Class.method`，顶层元素即自身名字
    pub qualified_name: String,
    #[serde(skip)]
    pub byte_range: Range<usize>,
    pub start_line: u32,
    pub end_line: u32,
    pub signature: Option<String>,
    pub docstring: Option<String>,
}

/// 聚合后的类结构
#[derive(Debug, Clone, Serialize)]
pub struct ClassStructure {
    pub element: SemanticElement,
    pub attributes: Vec<String>,
    pub methods: Vec<SemanticElement>,
}

/// 单个源文件的聚合结果
#[derive(Debug, Clone, Serialize)]
pub struct AggregatedFile {
    pub file_path: PathBuf,
    pub language: SupportedLanguage,
    pub classes: Vec<ClassStructure>,
    pub functions: Vec<SemanticElement>,
}

impl AggregatedFile {
    /// 按起始字节顺序返回文件中所有顶层元素（类和函数）
    pub fn top_level_elements(&self) -> Vec<&SemanticElement> {
        let mut elements: Vec<&SemanticElement> = self
            .classes
            .iter()
            .map(|class| &class.element)
            .chain(self.functions.iter())
            .collect();
        elements.sort_by_key(|element| element.byte_range.start);
        elements
    }

    /// 遍历文件中的全部元素，包括类方法
    pub fn all_elements(&self) -> impl Iterator<Item = &SemanticElement> {
        self.classes
            .iter()
            .flat_map(|class| {
                std::iter::once(&class.element).chain(class.methods.iter())
            })
            .chain(self.functions.iter())
    }
}

/// 元素聚合器
pub struct ElementAggregator;

impl ElementAggregator {
    pub fn new() -> Self {
        Self
    }

    /// 把扁平元素列表聚合为文件级结构
    ///
    /// 包含关系按字节范围判定，方法归属于范围最小的包含类。
    /// 按（限定名，起始行）去重，重复上报只保留一份并合并元数据。
    pub fn aggregate(
        &self,
        file_path: PathBuf,
        language: SupportedLanguage,
        elements: Vec<RawElement>,
    ) -> AggregatedFile {
        let elements = dedup_elements(elements);

        let mut class_elements: Vec<RawElement> = Vec::new();
        let mut others: Vec<RawElement> = Vec::new();
        for element in elements {
            if element.kind == RawElementKind::Class {
                class_elements.push(element);
            } else {
                others.push(element);
            }
        }

        let mut classes: Vec<ClassStructure> = class_elements
            .iter()
            .map(|raw| ClassStructure {
                element: SemanticElement {
                    kind: RawElementKind::Class,
                    name: raw.name.clone(),
                    qualified_name: raw.name.clone(),
                    byte_range: raw.byte_range.clone(),
                    start_line: raw.start_line,
                    end_line: raw.end_line,
                    signature: raw.signature.clone(),
                    docstring: raw.docstring.clone(),
                },
                attributes: raw.attributes.clone(),
                methods: Vec::new(),
            })
            .collect();

        // 嵌套类用外层类名限定
        qualify_nested_classes(&mut classes);

        let mut functions: Vec<SemanticElement> = Vec::new();
        for raw in others {
            match minimal_enclosing_class(&classes, &raw.byte_range) {
                Some(index) => {
                    let qualified =
                        format!("{}.{}", classes[index].element.qualified_name, raw.name);
                    classes[index].methods.push(SemanticElement {
                        kind: RawElementKind::Method,
                        name: raw.name,
                        qualified_name: qualified,
                        byte_range: raw.byte_range,
                        start_line: raw.start_line,
                        end_line: raw.end_line,
                        signature: raw.signature,
                        docstring: raw.docstring,
                    });
                }
                None => {
                    functions.push(SemanticElement {
                        kind: raw.kind,
                        qualified_name: raw.name.clone(),
                        name: raw.name,
                        byte_range: raw.byte_range,
                        start_line: raw.start_line,
                        end_line: raw.end_line,
                        signature: raw.signature,
                        docstring: raw.docstring,
                    });
                }
            }
        }

        classes.sort_by_key(|class| class.element.byte_range.start);
        for class in &mut classes {
            class.methods.sort_by_key(|method| method.byte_range.start);
        }
        functions.sort_by_key(|function| function.byte_range.start);

        AggregatedFile {
            file_path,
            language,
            classes,
            functions,
        }
    }
}

impl Default for ElementAggregator {
    fn default() -> Self {
        Self::new()
    }
}

/// 按（名字，起始行）去重，保留元数据更完整的一份
fn dedup_elements(elements: Vec<RawElement>) -> Vec<RawElement> {
    let mut seen: HashMap<(String, u32), usize> = HashMap::new();
    let mut result: Vec<RawElement> = Vec::new();

    for element in elements {
        let key = (element.name.clone(), element.start_line);
        match seen.get(&key) {
            Some(&index) => {
                let kept = &mut result[index];
                if kept.signature.is_none() {
                    kept.signature = element.signature;
                }
                if kept.docstring.is_none() {
                    kept.docstring = element.docstring;
                }
                if kept.attributes.is_empty() {
                    kept.attributes = element.attributes;
                }
                // 范围取并集，覆盖装饰器等外扩差异
                kept.byte_range.start = kept.byte_range.start.min(element.byte_range.start);
                kept.byte_range.end = kept.byte_range.end.max(element.byte_range.end);
                kept.end_line = kept.end_line.max(element.end_line);
            }
            None => {
                seen.insert(key, result.len());
                result.push(element);
            }
        }
    }
    result
}

/// 找到完整包含给定范围的最小类，返回索引
fn minimal_enclosing_class(classes: &[ClassStructure], range: &Range<usize>) -> Option<usize> {
    classes
        .iter()
        .enumerate()
        .filter(|(_, class)| {
            let class_range = &class.element.byte_range;
            class_range.start <= range.start
                && range.end <= class_range.end
                && class_range != range
        })
        .min_by_key(|(_, class)| class.element.byte_range.end - class.element.byte_range.start)
        .map(|(index, _)| index)
}

/// 给嵌套类加上外层类名前缀
fn qualify_nested_classes(classes: &mut [ClassStructure]) {
    // 按范围大小从大到小处理，保证外层先定名
    let mut order: Vec<usize> = (0..classes.len()).collect();
    order.sort_by_key(|&i| {
        std::cmp::Reverse(classes[i].element.byte_range.end - classes[i].element.byte_range.start)
    });

    for &i in &order {
        let range = classes[i].element.byte_range.clone();
        let enclosing = classes
            .iter()
            .enumerate()
            .filter(|(j, class)| {
                *j != i
                    && class.element.byte_range.start <= range.start
                    && range.end <= class.element.byte_range.end
                    && class.element.byte_range != range
            })
            .min_by_key(|(_, class)| {
                class.element.byte_range.end - class.element.byte_range.start
            })
            .map(|(_, class)| class.element.qualified_name.clone());

        if let Some(outer) = enclosing {
            classes[i].element.qualified_name =
                format!("{}.{}", outer, classes[i].element.name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn raw(kind: RawElementKind, name: &str, range: Range<usize>, start_line: u32) -> RawElement {
        RawElement {
            kind,
            name: name.to_string(),
            byte_range: range,
            start_line,
            end_line: start_line + 3,
            signature: Some(format!("def {name}():")),
            docstring: None,
            attributes: Vec::new(),
        }
    }

    #[test]
    fn test_methods_attach_to_minimal_enclosing_class() {
        let aggregator = ElementAggregator::new();
        let elements = vec![
            raw(RawElementKind::Class, "Outer", 0..200, 1),
            raw(RawElementKind::Class, "Inner", 50..150, 5),
            raw(RawElementKind::Method, "deep", 60..100, 6),
            raw(RawElementKind::Method, "shallow", 160..190, 15),
            raw(RawElementKind::Function, "free", 210..260, 20),
        ];

        let file = aggregator.aggregate(
            PathBuf::from("sample.py"),
            SupportedLanguage::Python,
            elements,
        );

        assert_eq!(file.classes.len(), 2);
        assert_eq!(file.functions.len(), 1);
        assert_eq!(file.functions[0].qualified_name, "free");

        let outer = &file.classes[0];
        assert_eq!(outer.element.qualified_name, "Outer");
        assert_eq!(outer.methods.len(), 1);
        assert_eq!(outer.methods[0].qualified_name, "Outer.shallow");

        let inner = &file.classes[1];
        assert_eq!(inner.element.qualified_name, "Outer.Inner");
        assert_eq!(inner.methods.len(), 1);
        assert_eq!(inner.methods[0].qualified_name, "Outer.Inner.deep");
    }

    #[test]
    fn test_duplicate_reports_merge_into_one() {
        let aggregator = ElementAggregator::new();
        let mut first = raw(RawElementKind::Function, "handler", 10..80, 2);
        first.signature = None;
        let mut second = raw(RawElementKind::Function, "handler", 5..80, 2);
        second.docstring = Some("\"\"\"doc\"\"\"".to_string());

        let file = aggregator.aggregate(
            PathBuf::from("sample.py"),
            SupportedLanguage::Python,
            vec![first, second],
        );

        assert_eq!(file.functions.len(), 1);
        let merged = &file.functions[0];
        // 合并保留更完整的元数据，范围取并集
        assert_eq!(merged.byte_range, 5..80);
        assert!(merged.signature.is_some());
        assert!(merged.docstring.is_some());
    }

    #[test]
    fn test_top_level_elements_ordered_by_position() {
        let aggregator = ElementAggregator::new();
        let elements = vec![
            raw(RawElementKind::Function, "late", 300..400, 30),
            raw(RawElementKind::Class, "Mid", 100..250, 10),
            raw(RawElementKind::Function, "early", 0..80, 1),
        ];

        let file = aggregator.aggregate(
            PathBuf::from("sample.py"),
            SupportedLanguage::Python,
            elements,
        );

        let names: Vec<&str> = file
            .top_level_elements()
            .iter()
            .map(|element| element.qualified_name.as_str())
            .collect();
        assert_eq!(names, vec!["early", "Mid", "late"]);
    }
}
