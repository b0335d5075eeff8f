//! 语义分块模块
//!
//! 把聚合后的文件结构打包成大小受限的块。块是源文件的连续字节区间，
//! 全部块按序拼接必须逐字节还原原文件；文件内的空隙文本（导入、
//! 注释、空行）归属于紧随其后的单元，文件尾部文本归属最后一个块。

use crate::aggregator::{AggregatedFile, ClassStructure, SemanticElement};
use crate::error::Result;
use crate::parser::{LanguageAdapter, RawElementKind, SupportedLanguage};
use serde::Serialize;
use std::ops::Range;
use std::path::PathBuf;

/// 完整落在某个块内的语义单元
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainedUnit {
    pub kind: RawElementKind,
    pub qualified_name: String,
}

impl ContainedUnit {
    fn of(element: &SemanticElement) -> Self {
        Self {
            kind: element.kind,
            qualified_name: element.qualified_name.clone(),
        }
    }
}

/// 语义块
#[derive(Debug, Clone, Serialize)]
pub struct Chunk {
    pub file_path: PathBuf,
    pub language: Option<SupportedLanguage>,
    pub start_line: u32,
    pub end_line: u32,
    pub content: String,
    /// 完整落在块内的语义单元
    pub contained_units: Vec<ContainedUnit>,
    /// 块内是否只有完整单元；语句级子切分产生的块为 false
    pub is_complete_unit: bool,
    /// 被切分类的上下文头：所属类的签名，不拼入 content
    pub class_context: Option<String>,
    pub size_bytes: usize,
}

/// 块构建器
///
/// 贪心打包：按顺序累积单元区间，超过大小上限即封块。单个超限
/// 单元先尝试按方法边界（类）或语句边界（函数）子切分。
pub struct ChunkBuilder {
    max_chunk_size: usize,
}

impl ChunkBuilder {
    pub fn new(max_chunk_size: usize) -> Self {
        Self { max_chunk_size }
    }

    /// 为解析失败或超出资源预算的文件构造整文件不透明块
    pub fn opaque_chunk(
        file_path: PathBuf,
        language: Option<SupportedLanguage>,
        source: &str,
    ) -> Chunk {
        let line_count = source.lines().count().max(1) as u32;
        Chunk {
            file_path,
            language,
            start_line: 1,
            end_line: line_count,
            content: source.to_string(),
            contained_units: Vec::new(),
            is_complete_unit: true,
            class_context: None,
            size_bytes: source.len(),
        }
    }

    /// 把聚合文件打包为块序列
    pub fn build_chunks(
        &self,
        file: &AggregatedFile,
        source: &str,
        adapter: &mut dyn LanguageAdapter,
    ) -> Result<Vec<Chunk>> {
        let units = file.top_level_elements();
        if units.is_empty() {
            return Ok(vec![Self::opaque_chunk(
                file.file_path.clone(),
                Some(file.language),
                source,
            )]);
        }

        let line_starts = build_line_starts(source);
        let mut chunks: Vec<Chunk> = Vec::new();

        // 每个单元的归属区间：从上一单元结束到本单元结束
        let mut spans: Vec<(Range<usize>, usize)> = Vec::with_capacity(units.len());
        let mut previous_end = 0usize;
        for (index, unit) in units.iter().enumerate() {
            let end = unit.byte_range.end.max(previous_end);
            spans.push((previous_end..end, index));
            previous_end = end;
        }
        // 尾部文本并入最后一个单元的区间
        if previous_end < source.len() {
            if let Some((last_span, _)) = spans.last_mut() {
                last_span.end = source.len();
            }
        }

        let mut group_start: Option<usize> = None;
        let mut group_end = 0usize;
        let mut group_units: Vec<ContainedUnit> = Vec::new();

        for (span, unit_index) in spans {
            let unit = units[unit_index];
            let span_len = span.end - span.start;

            if span_len > self.max_chunk_size {
                // 超限单元：先封当前组，再子切分
                if let Some(start) = group_start.take() {
                    chunks.push(self.make_chunk(
                        file,
                        source,
                        &line_starts,
                        start..group_end,
                        std::mem::take(&mut group_units),
                        true,
                        None,
                    ));
                }
                self.split_oversized(file, source, &line_starts, &span, unit_index, adapter, &mut chunks)?;
                continue;
            }

            match group_start {
                Some(start) if span.end - start <= self.max_chunk_size => {
                    group_end = span.end;
                    group_units.push(ContainedUnit::of(unit));
                }
                Some(start) => {
                    chunks.push(self.make_chunk(
                        file,
                        source,
                        &line_starts,
                        start..group_end,
                        std::mem::take(&mut group_units),
                        true,
                        None,
                    ));
                    group_start = Some(span.start);
                    group_end = span.end;
                    group_units.push(ContainedUnit::of(unit));
                }
                None => {
                    group_start = Some(span.start);
                    group_end = span.end;
                    group_units.push(ContainedUnit::of(unit));
                }
            }
        }

        if let Some(start) = group_start {
            chunks.push(self.make_chunk(
                file,
                source,
                &line_starts,
                start..group_end,
                group_units,
                true,
                None,
            ));
        }

        debug_assert_eq!(
            chunks.iter().map(|chunk| chunk.size_bytes).sum::<usize>(),
            source.len()
        );
        Ok(chunks)
    }

    /// 子切分一个超限单元的区间
    ///
    /// 类按方法起点切，每个类块都带上下文头。仍超限的方法片段和
    /// 普通函数继续按体内顶层语句起点切，这类片段标记为不完整。
    /// 没有任何可用边界时整个区间作为一个超限块输出。
    #[allow(clippy::too_many_arguments)]
    fn split_oversized(
        &self,
        file: &AggregatedFile,
        source: &str,
        line_starts: &[usize],
        span: &Range<usize>,
        unit_index: usize,
        adapter: &mut dyn LanguageAdapter,
        chunks: &mut Vec<Chunk>,
    ) -> Result<()> {
        let unit = (*file.top_level_elements()[unit_index]).clone();
        let class = file
            .classes
            .iter()
            .find(|class| class.element.qualified_name == unit.qualified_name)
            .filter(|class| !class.methods.is_empty());

        if let Some(class) = class {
            let mut starts: Vec<usize> = class
                .methods
                .iter()
                .map(|method| {
                    crate::parser::common::align_to_line_start(source, method.byte_range.start)
                })
                .filter(|start| *start > span.start && *start < span.end)
                .collect();
            starts.dedup();

            let context = Some(
                class
                    .element
                    .signature
                    .clone()
                    .unwrap_or_else(|| class.element.qualified_name.clone()),
            );

            for piece in cut_at_boundaries(&starts, span, self.max_chunk_size) {
                if piece.end - piece.start > self.max_chunk_size {
                    // 单个方法仍超限：降级到语句边界
                    self.split_method_piece(
                        file, source, line_starts, &piece, class, adapter, &context, chunks,
                    )?;
                } else {
                    let contained = contained_units_in(file, &piece);
                    let units = if contained.is_empty() {
                        vec![ContainedUnit::of(&unit)]
                    } else {
                        contained
                    };
                    chunks.push(self.make_chunk(
                        file,
                        source,
                        line_starts,
                        piece,
                        units,
                        true,
                        context.clone(),
                    ));
                }
            }
            return Ok(());
        }

        let boundaries = adapter.statement_boundaries(source, unit.byte_range.clone())?;
        if boundaries.is_empty() {
            chunks.push(self.make_chunk(
                file,
                source,
                line_starts,
                span.clone(),
                vec![ContainedUnit::of(&unit)],
                false,
                None,
            ));
            return Ok(());
        }
        for piece in cut_at_boundaries(&boundaries, span, self.max_chunk_size) {
            chunks.push(self.make_chunk(
                file,
                source,
                line_starts,
                piece,
                vec![ContainedUnit::of(&unit)],
                false,
                None,
            ));
        }
        Ok(())
    }

    /// 按片段内方法的语句边界继续切分仍超限的方法片段
    #[allow(clippy::too_many_arguments)]
    fn split_method_piece(
        &self,
        file: &AggregatedFile,
        source: &str,
        line_starts: &[usize],
        piece: &Range<usize>,
        class: &ClassStructure,
        adapter: &mut dyn LanguageAdapter,
        context: &Option<String>,
        chunks: &mut Vec<Chunk>,
    ) -> Result<()> {
        let overlapping: Vec<&SemanticElement> = class
            .methods
            .iter()
            .filter(|method| {
                method.byte_range.start < piece.end && method.byte_range.end > piece.start
            })
            .collect();

        let mut boundaries: Vec<usize> = Vec::new();
        for method in &overlapping {
            boundaries.extend(adapter.statement_boundaries(source, method.byte_range.clone())?);
        }
        boundaries.retain(|boundary| *boundary > piece.start && *boundary < piece.end);
        boundaries.sort_unstable();
        boundaries.dedup();

        let fallback: Vec<ContainedUnit> = if overlapping.is_empty() {
            vec![ContainedUnit::of(&class.element)]
        } else {
            overlapping
                .iter()
                .map(|method| ContainedUnit::of(method))
                .collect()
        };

        if boundaries.is_empty() {
            chunks.push(self.make_chunk(
                file,
                source,
                line_starts,
                piece.clone(),
                fallback,
                false,
                context.clone(),
            ));
            return Ok(());
        }
        for sub in cut_at_boundaries(&boundaries, piece, self.max_chunk_size) {
            let contained = contained_units_in(file, &sub);
            let units = if contained.is_empty() {
                fallback.clone()
            } else {
                contained
            };
            chunks.push(self.make_chunk(
                file,
                source,
                line_starts,
                sub,
                units,
                false,
                context.clone(),
            ));
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn make_chunk(
        &self,
        file: &AggregatedFile,
        source: &str,
        line_starts: &[usize],
        range: Range<usize>,
        contained_units: Vec<ContainedUnit>,
        is_complete_unit: bool,
        class_context: Option<String>,
    ) -> Chunk {
        let content = source[range.clone()].to_string();
        let start_line = line_at(line_starts, range.start);
        let end_line = if range.is_empty() {
            start_line
        } else {
            line_at(line_starts, range.end - 1)
        };
        Chunk {
            file_path: file.file_path.clone(),
            language: Some(file.language),
            start_line,
            end_line,
            size_bytes: content.len(),
            content,
            contained_units,
            is_complete_unit,
            class_context,
        }
    }
}

/// 贪心选切点：尽量装满，不超过上限；切点之外的区间不丢字节
fn cut_at_boundaries(boundaries: &[usize], span: &Range<usize>, max: usize) -> Vec<Range<usize>> {
    let mut pieces: Vec<Range<usize>> = Vec::new();
    let mut piece_start = span.start;
    let mut last_boundary: Option<usize> = None;
    for boundary in boundaries
        .iter()
        .copied()
        .filter(|boundary| *boundary > span.start && *boundary < span.end)
    {
        if boundary - piece_start > max {
            let cut = last_boundary.filter(|b| *b > piece_start).unwrap_or(boundary);
            pieces.push(piece_start..cut);
            piece_start = cut;
        }
        last_boundary = Some(boundary);
    }
    if span.end - piece_start > max {
        if let Some(cut) = last_boundary.filter(|b| *b > piece_start) {
            pieces.push(piece_start..cut);
            piece_start = cut;
        }
    }
    pieces.push(piece_start..span.end);
    pieces
}

/// 收集完整落在区间内的语义单元（包括方法）
fn contained_units_in(file: &AggregatedFile, range: &Range<usize>) -> Vec<ContainedUnit> {
    let mut units: Vec<(usize, ContainedUnit)> = file
        .all_elements()
        .filter(|element| {
            range.start <= element.byte_range.start && element.byte_range.end <= range.end
        })
        .map(|element| (element.byte_range.start, ContainedUnit::of(element)))
        .collect();
    units.sort_by_key(|(start, _)| *start);
    units.into_iter().map(|(_, unit)| unit).collect()
}

fn build_line_starts(source: &str) -> Vec<usize> {
    let mut starts = vec![0];
    for (index, byte) in source.bytes().enumerate() {
        if byte == b'\n' {
            starts.push(index + 1);
        }
    }
    starts
}

/// 返回字节偏移所在的行号（从 1 开始）
fn line_at(line_starts: &[usize], byte: usize) -> u32 {
    line_starts.partition_point(|start| *start <= byte) as u32
}
