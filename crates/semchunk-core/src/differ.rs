//! 语义差异检测模块
//!
//! 在文件级状态差异之上做元素级比较：按限定名对齐新旧两侧的
//! 语义元素，比较签名和函数体，产出新增、删除、修改三类变更。

use crate::aggregator::ElementAggregator;
use crate::error::Result;
use crate::git::{FileChangeStatus, RevisionStore};
use crate::parser::{AdapterFactory, RawElementKind, SupportedLanguage};
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// 重命名文件按行集合 Jaccard 相似度判定：不低于该值按修改处理，
/// 否则拆成整体删除加整体新增
const RENAME_SIMILARITY_THRESHOLD: f64 = 0.85;

/// 元素级变更类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChangeKind {
    Added,
    Removed,
    Modified,
}

/// 单个元素的语义变更
#[derive(Debug, Clone, Serialize)]
pub struct SemanticChange {
    pub file_path: PathBuf,
    pub change_type: ChangeKind,
    pub element_kind: RawElementKind,
    pub qualified_name: String,
    pub old_signature: Option<String>,
    pub new_signature: Option<String>,
    /// 旧修订版中的行范围
    pub old_range: Option<(u32, u32)>,
    /// 新修订版中的行范围
    pub new_range: Option<(u32, u32)>,
    /// 文件重命名时的旧路径
    pub renamed_from: Option<PathBuf>,
}

/// 单文件比较失败记录
#[derive(Debug, Clone, Serialize)]
pub struct DiffFailure {
    pub path: PathBuf,
    pub reason: String,
}

/// 差异检测结果
#[derive(Debug, Clone, Serialize)]
pub struct DiffReport {
    pub changes: Vec<SemanticChange>,
    pub failures: Vec<DiffFailure>,
    pub files_compared: usize,
    pub generated_at: DateTime<Utc>,
}

impl DiffReport {
    pub fn failure_count(&self) -> usize {
        self.failures.len()
    }
}

/// 一侧文件里参与比较的元素视图
#[derive(Debug)]
struct ElementView {
    kind: RawElementKind,
    signature: Option<String>,
    body: String,
    line_range: (u32, u32),
}

/// 语义差异检测器
pub struct SemanticDiffDetector<'a> {
    store: &'a dyn RevisionStore,
}

impl<'a> SemanticDiffDetector<'a> {
    pub fn new(store: &'a dyn RevisionStore) -> Self {
        Self { store }
    }

    /// 检测两个修订版之间的语义变更
    ///
    /// `new` 为 None 时与工作区比较。文件级状态在任何内容读取之前
    /// 一次性算出：新增文件只读新侧，删除文件只读旧侧。
    pub fn detect(&self, old: &str, new: Option<&str>) -> Result<DiffReport> {
        let statuses = self.store.status_diff(old, new)?;
        let relevant: Vec<(PathBuf, FileChangeStatus, SupportedLanguage)> = statuses
            .into_iter()
            .filter_map(|(path, status)| {
                AdapterFactory::detect_language(&path).map(|language| (path, status, language))
            })
            .collect();
        info!(
            "Comparing {} source files between {old} and {}",
            relevant.len(),
            new.unwrap_or("worktree")
        );

        let files_compared = relevant.len();
        let results: Vec<(Vec<SemanticChange>, Option<DiffFailure>)> = relevant
            .par_iter()
            .map(|(path, status, language)| {
                match self.diff_file(old, new, path, status, *language) {
                    Ok(changes) => (changes, None),
                    Err(e) => {
                        warn!("Skipping {}: {e}", path.display());
                        (
                            Vec::new(),
                            Some(DiffFailure {
                                path: path.clone(),
                                reason: e.to_string(),
                            }),
                        )
                    }
                }
            })
            .collect();

        let mut changes = Vec::new();
        let mut failures = Vec::new();
        for (file_changes, failure) in results {
            changes.extend(file_changes);
            failures.extend(failure);
        }
        // 稳定输出顺序：按文件路径，文件内按声明位置
        changes.sort_by(|a, b| {
            let a_line = a.new_range.or(a.old_range).map_or(0, |range| range.0);
            let b_line = b.new_range.or(b.old_range).map_or(0, |range| range.0);
            (&a.file_path, a_line, &a.qualified_name)
                .cmp(&(&b.file_path, b_line, &b.qualified_name))
        });
        failures.sort_by(|a, b| a.path.cmp(&b.path));

        Ok(DiffReport {
            changes,
            failures,
            files_compared,
            generated_at: Utc::now(),
        })
    }

    fn read_new(&self, new: Option<&str>, path: &Path) -> Result<String> {
        match new {
            Some(reference) => self.store.read_at_revision(reference, path),
            None => self.store.read_working_copy(path),
        }
    }

    fn diff_file(
        &self,
        old: &str,
        new: Option<&str>,
        path: &Path,
        status: &FileChangeStatus,
        language: SupportedLanguage,
    ) -> Result<Vec<SemanticChange>> {
        match status {
            FileChangeStatus::Added => {
                let content = self.read_new(new, path)?;
                let elements = extract_views(&content, path, language)?;
                Ok(whole_file_changes(path, elements, ChangeKind::Added, None))
            }
            FileChangeStatus::Deleted => {
                let content = self.store.read_at_revision(old, path)?;
                let elements = extract_views(&content, path, language)?;
                Ok(whole_file_changes(path, elements, ChangeKind::Removed, None))
            }
            FileChangeStatus::Modified => {
                let old_content = self.store.read_at_revision(old, path)?;
                let new_content = self.read_new(new, path)?;
                let old_elements = extract_views(&old_content, path, language)?;
                let new_elements = extract_views(&new_content, path, language)?;
                Ok(keyed_compare(path, old_elements, new_elements, None))
            }
            FileChangeStatus::Renamed { old_path } => {
                let old_content = self.store.read_at_revision(old, old_path)?;
                let new_content = self.read_new(new, path)?;

                let similarity = line_set_similarity(&old_content, &new_content);
                debug!(
                    "Rename {} -> {} similarity {similarity:.2}",
                    old_path.display(),
                    path.display()
                );
                let old_elements = extract_views(&old_content, old_path, language)?;
                let new_elements = extract_views(&new_content, path, language)?;

                if similarity >= RENAME_SIMILARITY_THRESHOLD {
                    Ok(keyed_compare(
                        path,
                        old_elements,
                        new_elements,
                        Some(old_path.clone()),
                    ))
                } else {
                    // 内容相似度过低：按旧文件整体删除加新文件整体新增处理
                    let mut changes =
                        whole_file_changes(old_path, old_elements, ChangeKind::Removed, None);
                    changes.extend(whole_file_changes(
                        path,
                        new_elements,
                        ChangeKind::Added,
                        None,
                    ));
                    Ok(changes)
                }
            }
        }
    }
}

/// 解析单侧内容并提取元素视图表
fn extract_views(
    content: &str,
    path: &Path,
    language: SupportedLanguage,
) -> Result<BTreeMap<String, ElementView>> {
    let mut adapter = AdapterFactory::create_adapter(language)?;
    let elements = adapter.extract(content)?;
    let aggregated =
        ElementAggregator::new().aggregate(path.to_path_buf(), language, elements);

    let mut views = BTreeMap::new();
    for element in aggregated.all_elements() {
        views.entry(element.qualified_name.clone()).or_insert_with(|| ElementView {
            kind: element.kind,
            signature: element.signature.clone(),
            body: normalized_body(&content[element.byte_range.clone()]),
            line_range: (element.start_line, element.end_line),
        });
    }
    Ok(views)
}

/// 去掉行尾空白的元素体文本，用于内容比较
fn normalized_body(text: &str) -> String {
    text.lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
}

/// 一侧文件的全部元素生成同类变更
fn whole_file_changes(
    path: &Path,
    elements: BTreeMap<String, ElementView>,
    kind: ChangeKind,
    renamed_from: Option<PathBuf>,
) -> Vec<SemanticChange> {
    elements
        .into_iter()
        .map(|(qualified_name, view)| {
            let (old_signature, new_signature, old_range, new_range) = match kind {
                ChangeKind::Removed => (view.signature, None, Some(view.line_range), None),
                _ => (None, view.signature, None, Some(view.line_range)),
            };
            SemanticChange {
                file_path: path.to_path_buf(),
                change_type: kind,
                element_kind: view.kind,
                qualified_name,
                old_signature,
                new_signature,
                old_range,
                new_range,
                renamed_from: renamed_from.clone(),
            }
        })
        .collect()
}

/// 按限定名对齐两侧元素并比较
fn keyed_compare(
    path: &Path,
    mut old_elements: BTreeMap<String, ElementView>,
    new_elements: BTreeMap<String, ElementView>,
    renamed_from: Option<PathBuf>,
) -> Vec<SemanticChange> {
    let mut changes = Vec::new();

    for (qualified_name, new_view) in new_elements {
        match old_elements.remove(&qualified_name) {
            None => {
                changes.push(SemanticChange {
                    file_path: path.to_path_buf(),
                    change_type: ChangeKind::Added,
                    element_kind: new_view.kind,
                    qualified_name,
                    old_signature: None,
                    new_signature: new_view.signature,
                    old_range: None,
                    new_range: Some(new_view.line_range),
                    renamed_from: renamed_from.clone(),
                });
            }
            Some(old_view) => {
                let signature_changed = old_view.signature != new_view.signature;
                let body_changed = old_view.body != new_view.body;
                if signature_changed || body_changed {
                    changes.push(SemanticChange {
                        file_path: path.to_path_buf(),
                        change_type: ChangeKind::Modified,
                        element_kind: new_view.kind,
                        qualified_name,
                        old_signature: old_view.signature,
                        new_signature: new_view.signature,
                        old_range: Some(old_view.line_range),
                        new_range: Some(new_view.line_range),
                        renamed_from: renamed_from.clone(),
                    });
                }
            }
        }
    }

    // 剩下的旧元素在新侧不存在
    for (qualified_name, old_view) in old_elements {
        changes.push(SemanticChange {
            file_path: path.to_path_buf(),
            change_type: ChangeKind::Removed,
            element_kind: old_view.kind,
            qualified_name,
            old_signature: old_view.signature,
            new_signature: None,
            old_range: Some(old_view.line_range),
            new_range: None,
            renamed_from: renamed_from.clone(),
        });
    }

    changes
}

/// 两段文本的行集合 Jaccard 相似度
fn line_set_similarity(old: &str, new: &str) -> f64 {
    let old_lines: HashSet<&str> = old.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
    let new_lines: HashSet<&str> = new.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
    if old_lines.is_empty() && new_lines.is_empty() {
        return 1.0;
    }
    let intersection = old_lines.intersection(&new_lines).count();
    let union = old_lines.union(&new_lines).count();
    intersection as f64 / union as f64
}
