//! Git 仓库交互模块
//!
//! 提供修订版内容读取和文件级状态差异。状态差异在任何内容读取之前
//! 一次性算出，新增文件不会对旧修订版发起读取。

use crate::error::{Result, SemChunkError};
use gix::ThreadSafeRepository;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// 文件级变更状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileChangeStatus {
    Added,
    Modified,
    Deleted,
    Renamed { old_path: PathBuf },
}

/// 修订版存储接口
///
/// 语义差异检测只通过这个接口接触仓库，测试可以用内存实现替换。
pub trait RevisionStore: Send + Sync {
    /// 计算两个修订版之间的文件级状态差异
    ///
    /// `new` 为 None 时与工作区比较。返回按路径排序的状态表。
    fn status_diff(
        &self,
        old: &str,
        new: Option<&str>,
    ) -> Result<Vec<(PathBuf, FileChangeStatus)>>;

    /// 读取指定修订版下某个文件的内容
    fn read_at_revision(&self, reference: &str, path: &Path) -> Result<String>;

    /// 读取工作区中某个文件的内容
    fn read_working_copy(&self, path: &Path) -> Result<String>;
}

/// 基于 gix 的仓库实现
pub struct GixRepository {
    repo: ThreadSafeRepository,
    root: PathBuf,
}

impl GixRepository {
    /// 打开位于给定工作区根目录的仓库
    pub fn open(repo_path: impl Into<PathBuf>) -> Result<Self> {
        let root = repo_path.into();
        let repo = ThreadSafeRepository::open(root.clone()).map_err(|e| {
            SemChunkError::GitError(format!(
                "Failed to open repository at {}: {e}",
                root.display()
            ))
        })?;
        Ok(Self { repo, root })
    }

    /// 解析修订版引用为提交对象的树
    fn resolve_tree<'repo>(
        &self,
        repo: &'repo gix::Repository,
        reference: &str,
    ) -> Result<gix::Tree<'repo>> {
        if reference.is_empty() {
            return Err(SemChunkError::InvalidRef("Empty revision".to_string()));
        }
        let id = repo.rev_parse_single(reference).map_err(|e| {
            SemChunkError::InvalidRef(format!("Failed to resolve revision {reference}: {e}"))
        })?;
        let commit = repo
            .find_object(id)
            .map_err(|e| {
                SemChunkError::GitError(format!("Failed to find object for {reference}: {e}"))
            })?
            .try_into_commit()
            .map_err(|e| {
                SemChunkError::InvalidRef(format!("{reference} is not a commit: {e}"))
            })?;
        let tree_id = commit.tree_id().map_err(|e| {
            SemChunkError::GitError(format!("Failed to get tree for {reference}: {e}"))
        })?;
        Ok(repo
            .find_object(tree_id)
            .map_err(|e| SemChunkError::GitError(format!("Failed to find tree: {e}")))?
            .into_tree())
    }

    /// 两棵提交树之间的状态差异
    fn tree_status_diff(
        &self,
        repo: &gix::Repository,
        old: &str,
        new: &str,
    ) -> Result<Vec<(PathBuf, FileChangeStatus)>> {
        let old_tree = self.resolve_tree(repo, old)?;
        let new_tree = self.resolve_tree(repo, new)?;

        let mut statuses = Vec::new();
        old_tree
            .changes()
            .map_err(|e| {
                SemChunkError::GitError(format!("Failed to create tree changes iterator: {e}"))
            })?
            .for_each_to_obtain_tree(&new_tree, |change| {
                use gix::object::tree::diff::Change;
                match change {
                    Change::Addition { location, .. } => {
                        statuses.push((
                            PathBuf::from(location.to_string()),
                            FileChangeStatus::Added,
                        ));
                    }
                    Change::Deletion { location, .. } => {
                        statuses.push((
                            PathBuf::from(location.to_string()),
                            FileChangeStatus::Deleted,
                        ));
                    }
                    Change::Modification { location, .. } => {
                        statuses.push((
                            PathBuf::from(location.to_string()),
                            FileChangeStatus::Modified,
                        ));
                    }
                    Change::Rewrite {
                        source_location,
                        location,
                        copy,
                        ..
                    } => {
                        let path = PathBuf::from(location.to_string());
                        if copy {
                            // 拷贝的目标文件视作新增
                            statuses.push((path, FileChangeStatus::Added));
                        } else {
                            statuses.push((
                                path,
                                FileChangeStatus::Renamed {
                                    old_path: PathBuf::from(source_location.to_string()),
                                },
                            ));
                        }
                    }
                }
                Ok::<_, gix::object::tree::diff::for_each::Error>(
                    gix::object::tree::diff::Action::Continue,
                )
            })
            .map_err(|e| {
                SemChunkError::GitError(format!("Failed to process tree changes: {e}"))
            })?;

        statuses.sort_by(|a, b| a.0.cmp(&b.0));
        debug!("{} file-level changes between {old} and {new}", statuses.len());
        Ok(statuses)
    }

    /// 提交树与工作区之间的状态差异
    fn worktree_status_diff(
        &self,
        repo: &gix::Repository,
        old: &str,
    ) -> Result<Vec<(PathBuf, FileChangeStatus)>> {
        let old_tree = self.resolve_tree(repo, old)?;

        // 旧树中的全部文件及其 blob 内容
        let mut old_files: BTreeMap<PathBuf, Vec<u8>> = BTreeMap::new();
        let entries = old_tree
            .traverse()
            .breadthfirst
            .files()
            .map_err(|e| SemChunkError::GitError(format!("Failed to traverse tree: {e}")))?;
        for entry in entries {
            let blob = repo
                .find_object(entry.oid)
                .map_err(|e| SemChunkError::GitError(format!("Failed to find blob: {e}")))?
                .into_blob();
            old_files.insert(PathBuf::from(entry.filepath.to_string()), blob.data.clone());
        }

        let mut statuses = Vec::new();
        let mut seen: Vec<PathBuf> = Vec::new();
        for entry in WalkDir::new(&self.root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| entry.file_name() != ".git")
            .filter_map(|entry| entry.ok())
        {
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(&self.root)
                .unwrap_or(entry.path())
                .to_path_buf();
            let on_disk = std::fs::read(entry.path())?;
            match old_files.get(&relative) {
                Some(old_data) if *old_data == on_disk => {}
                Some(_) => statuses.push((relative.clone(), FileChangeStatus::Modified)),
                None => statuses.push((relative.clone(), FileChangeStatus::Added)),
            }
            seen.push(relative);
        }
        for path in old_files.keys() {
            if !seen.contains(path) {
                statuses.push((path.clone(), FileChangeStatus::Deleted));
            }
        }

        statuses.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(statuses)
    }
}

impl RevisionStore for GixRepository {
    fn status_diff(
        &self,
        old: &str,
        new: Option<&str>,
    ) -> Result<Vec<(PathBuf, FileChangeStatus)>> {
        let repo = self.repo.to_thread_local();
        match new {
            Some(new) => self.tree_status_diff(&repo, old, new),
            None => self.worktree_status_diff(&repo, old),
        }
    }

    fn read_at_revision(&self, reference: &str, path: &Path) -> Result<String> {
        let repo = self.repo.to_thread_local();
        let tree = self.resolve_tree(&repo, reference)?;
        let entry = tree
            .lookup_entry_by_path(path)
            .map_err(|e| SemChunkError::GitError(format!("Failed to look up path: {e}")))?
            .ok_or_else(|| SemChunkError::RevisionRead {
                path: path.to_path_buf(),
                reference: reference.to_string(),
            })?;
        let blob = repo
            .find_object(entry.oid().to_owned())
            .map_err(|e| SemChunkError::GitError(format!("Failed to find blob: {e}")))?
            .into_blob();
        Ok(String::from_utf8_lossy(&blob.data).into_owned())
    }

    fn read_working_copy(&self, path: &Path) -> Result<String> {
        Ok(std::fs::read_to_string(self.root.join(path))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;
    use std::process::Command;
    use tempfile::TempDir;

    fn run_git(dir: &Path, args: &[&str]) {
        let output = Command::new("git")
            .args(args)
            .current_dir(dir)
            .output()
            .expect("failed to run git");
        assert!(
            output.status.success(),
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
    }

    fn create_test_repo() -> TempDir {
        let dir = TempDir::new().unwrap();
        run_git(dir.path(), &["init"]);
        run_git(dir.path(), &["config", "user.name", "Test"]);
        run_git(dir.path(), &["config", "user.email", "test@example.com"]);
        dir
    }

    fn commit_all(dir: &Path, message: &str) {
        run_git(dir, &["add", "."]);
        run_git(dir, &["commit", "-m", message]);
    }

    #[test]
    fn test_status_diff_between_commits() {
        let dir = create_test_repo();
        fs::write(dir.path().join("keep.py"), "def keep():\n    pass\n").unwrap();
        fs::write(dir.path().join("gone.py"), "def gone():\n    pass\n").unwrap();
        commit_all(dir.path(), "initial");

        fs::write(dir.path().join("keep.py"), "def keep():\n    return 1\n").unwrap();
        fs::write(dir.path().join("fresh.py"), "def fresh():\n    pass\n").unwrap();
        fs::remove_file(dir.path().join("gone.py")).unwrap();
        commit_all(dir.path(), "second");

        let store = GixRepository::open(dir.path()).unwrap();
        let statuses = store.status_diff("HEAD~1", Some("HEAD")).unwrap();

        let expected = vec![
            (PathBuf::from("fresh.py"), FileChangeStatus::Added),
            (PathBuf::from("gone.py"), FileChangeStatus::Deleted),
            (PathBuf::from("keep.py"), FileChangeStatus::Modified),
        ];
        assert_eq!(statuses, expected);
    }

    #[test]
    fn test_read_at_revision_returns_old_content() {
        let dir = create_test_repo();
        fs::write(dir.path().join("app.py"), "version = 1\n").unwrap();
        commit_all(dir.path(), "v1");
        fs::write(dir.path().join("app.py"), "version = 2\n").unwrap();
        commit_all(dir.path(), "v2");

        let store = GixRepository::open(dir.path()).unwrap();
        assert_eq!(
            store.read_at_revision("HEAD~1", Path::new("app.py")).unwrap(),
            "version = 1\n"
        );
        assert_eq!(
            store.read_at_revision("HEAD", Path::new("app.py")).unwrap(),
            "version = 2\n"
        );
    }

    #[test]
    fn test_read_at_revision_missing_path() {
        let dir = create_test_repo();
        fs::write(dir.path().join("app.py"), "x = 1\n").unwrap();
        commit_all(dir.path(), "initial");

        let store = GixRepository::open(dir.path()).unwrap();
        let result = store.read_at_revision("HEAD", Path::new("nope.py"));
        assert!(matches!(result, Err(SemChunkError::RevisionRead { .. })));
    }

    #[test]
    fn test_invalid_revision_is_rejected() {
        let dir = create_test_repo();
        fs::write(dir.path().join("app.py"), "x = 1\n").unwrap();
        commit_all(dir.path(), "initial");

        let store = GixRepository::open(dir.path()).unwrap();
        assert!(matches!(
            store.status_diff("not-a-ref", Some("HEAD")),
            Err(SemChunkError::InvalidRef(_))
        ));
    }

    #[test]
    fn test_worktree_status_diff() {
        let dir = create_test_repo();
        fs::write(dir.path().join("app.py"), "x = 1\n").unwrap();
        commit_all(dir.path(), "initial");

        fs::write(dir.path().join("app.py"), "x = 2\n").unwrap();
        fs::write(dir.path().join("new.py"), "y = 1\n").unwrap();

        let store = GixRepository::open(dir.path()).unwrap();
        let statuses = store.status_diff("HEAD", None).unwrap();

        let expected = vec![
            (PathBuf::from("app.py"), FileChangeStatus::Modified),
            (PathBuf::from("new.py"), FileChangeStatus::Added),
        ];
        assert_eq!(statuses, expected);
    }
}
