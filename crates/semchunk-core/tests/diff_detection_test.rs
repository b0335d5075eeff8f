//! 语义差异检测集成测试
//!
//! 使用真实的 Git 仓库测试从文件级状态到元素级变更的完整流程

use pretty_assertions::assert_eq;
use semchunk_core::{ChangeKind, GixRepository, RawElementKind, SemanticDiffDetector};
use std::fs;
use std::path::Path;
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
    let dir = TempDir::new().expect("Failed to create temp directory");
    run_git(dir.path(), &["init"]);
    run_git(dir.path(), &["config", "user.name", "Test User"]);
    run_git(dir.path(), &["config", "user.email", "test@example.com"]);
    dir
}

fn commit_all(dir: &Path, message: &str) {
    run_git(dir, &["add", "."]);
    run_git(dir, &["commit", "-m", message]);
}

/// 搭建两个提交：第二个提交包含修改、新增函数、新增文件和删除文件
fn create_history(dir: &Path) {
    fs::write(
        dir.join("api.py"),
        r#"def existing(request):
    return request


def stays_put():
    return 42
"#,
    )
    .unwrap();
    fs::write(
        dir.join("legacy.py"),
        "def obsolete():\n    return None\n",
    )
    .unwrap();
    fs::write(
        dir.join("handler.go"),
        "package main\n\nfunc Handle(x int) int {\n\treturn x\n}\n",
    )
    .unwrap();
    commit_all(dir, "initial");

    fs::write(
        dir.join("api.py"),
        r#"def existing(request, timeout):
    return request


def stays_put():
    return 42


def foo():
    return "new"
"#,
    )
    .unwrap();
    fs::remove_file(dir.join("legacy.py")).unwrap();
    fs::write(
        dir.join("metrics.py"),
        "def record(event):\n    print(event)\n",
    )
    .unwrap();
    commit_all(dir, "second");
}

#[test]
fn test_detect_changes_between_commits() {
    let dir = create_test_repo();
    create_history(dir.path());

    let store = GixRepository::open(dir.path()).unwrap();
    let detector = SemanticDiffDetector::new(&store);
    let report = detector.detect("HEAD~1", Some("HEAD")).unwrap();

    assert_eq!(report.failure_count(), 0);

    let summary: Vec<(String, String, ChangeKind)> = report
        .changes
        .iter()
        .map(|change| {
            (
                change.file_path.to_string_lossy().to_string(),
                change.qualified_name.clone(),
                change.change_type,
            )
        })
        .collect();
    let expected = vec![
        (
            "api.py".to_string(),
            "existing".to_string(),
            ChangeKind::Modified,
        ),
        ("api.py".to_string(), "foo".to_string(), ChangeKind::Added),
        (
            "legacy.py".to_string(),
            "obsolete".to_string(),
            ChangeKind::Removed,
        ),
        (
            "metrics.py".to_string(),
            "record".to_string(),
            ChangeKind::Added,
        ),
    ];
    assert_eq!(summary, expected);

    // 修改的函数携带两侧签名
    let modified = &report.changes[0];
    assert_eq!(modified.element_kind, RawElementKind::Function);
    assert_eq!(modified.old_signature.as_deref(), Some("def existing(request):"));
    assert_eq!(
        modified.new_signature.as_deref(),
        Some("def existing(request, timeout):")
    );

    // 未变更的函数不产生任何记录
    assert!(!report
        .changes
        .iter()
        .any(|change| change.qualified_name == "stays_put"));
    assert!(!report
        .changes
        .iter()
        .any(|change| change.qualified_name == "Handle"));
}

#[test]
fn test_detect_is_stable_across_runs() {
    let dir = create_test_repo();
    create_history(dir.path());

    let store = GixRepository::open(dir.path()).unwrap();
    let detector = SemanticDiffDetector::new(&store);
    let first = detector.detect("HEAD~1", Some("HEAD")).unwrap();
    let second = detector.detect("HEAD~1", Some("HEAD")).unwrap();

    let names = |report: &semchunk_core::DiffReport| {
        report
            .changes
            .iter()
            .map(|change| change.qualified_name.clone())
            .collect::<Vec<_>>()
    };
    assert_eq!(names(&first), names(&second));
}

#[test]
fn test_detect_against_working_tree() {
    let dir = create_test_repo();
    fs::write(
        dir.path().join("app.py"),
        "def base():\n    return 1\n",
    )
    .unwrap();
    commit_all(dir.path(), "initial");

    fs::write(
        dir.path().join("app.py"),
        "def base():\n    return 2\n\n\ndef fresh():\n    return 3\n",
    )
    .unwrap();

    let store = GixRepository::open(dir.path()).unwrap();
    let detector = SemanticDiffDetector::new(&store);
    let report = detector.detect("HEAD", None).unwrap();

    let summary: Vec<(&str, ChangeKind)> = report
        .changes
        .iter()
        .map(|change| (change.qualified_name.as_str(), change.change_type))
        .collect();
    assert_eq!(
        summary,
        vec![("base", ChangeKind::Modified), ("fresh", ChangeKind::Added)]
    );
}

#[test]
fn test_class_method_changes_use_qualified_names() {
    let dir = create_test_repo();
    fs::write(
        dir.path().join("model.py"),
        r#"class Account:
    def balance(self):
        return 0

    def close(self):
        pass
"#,
    )
    .unwrap();
    commit_all(dir.path(), "initial");

    fs::write(
        dir.path().join("model.py"),
        r#"class Account:
    def balance(self):
        return self.total

    def close(self):
        pass

    def reopen(self):
        pass
"#,
    )
    .unwrap();
    commit_all(dir.path(), "second");

    let store = GixRepository::open(dir.path()).unwrap();
    let report = SemanticDiffDetector::new(&store)
        .detect("HEAD~1", Some("HEAD"))
        .unwrap();

    let summary: Vec<(&str, ChangeKind)> = report
        .changes
        .iter()
        .map(|change| (change.qualified_name.as_str(), change.change_type))
        .collect();
    // 类本身的字节范围变了也会报修改，方法用限定名区分
    assert!(summary.contains(&("Account.balance", ChangeKind::Modified)));
    assert!(summary.contains(&("Account.reopen", ChangeKind::Added)));
    assert!(!summary
        .iter()
        .any(|(name, _)| *name == "Account.close"));
}

#[test]
fn test_nonexistent_revision_errors() {
    let dir = create_test_repo();
    fs::write(dir.path().join("a.py"), "x = 1\n").unwrap();
    commit_all(dir.path(), "initial");

    let store = GixRepository::open(dir.path()).unwrap();
    let result = SemanticDiffDetector::new(&store).detect("no-such-ref", Some("HEAD"));
    assert!(result.is_err());
}
