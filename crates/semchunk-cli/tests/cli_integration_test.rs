//! CLI 集成测试
//!
//! 测试命令行接口的各种功能和参数组合

use std::fs;
use std::path::Path;
use std::process::Command;
use tempfile::TempDir;

/// 获取编译后的二进制文件路径
fn get_binary_path() -> String {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // 移除测试可执行文件名
    if path.ends_with("deps") {
        path.pop(); // 移除 deps 目录
    }
    path.push("semchunk");
    path.to_string_lossy().to_string()
}

fn run_git(dir: &Path, args: &[&str]) {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .expect("Failed to run git");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
}

/// 创建测试用的源码目录
fn create_source_tree() -> TempDir {
    let dir = TempDir::new().expect("Failed to create temp directory");
    fs::write(
        dir.path().join("app.py"),
        "def greet(name):\n    return f\"hello {name}\"\n\n\ndef farewell(name):\n    return f\"bye {name}\"\n",
    )
    .expect("Failed to write Python file");
    fs::write(
        dir.path().join("main.go"),
        "package main\n\nfunc Run() {}\n",
    )
    .expect("Failed to write Go file");
    dir
}

/// 创建测试用的临时 Git 仓库
fn create_test_repo() -> TempDir {
    let dir = TempDir::new().expect("Failed to create temp directory");
    run_git(dir.path(), &["init"]);
    run_git(dir.path(), &["config", "user.name", "Test User"]);
    run_git(dir.path(), &["config", "user.email", "test@example.com"]);

    fs::write(dir.path().join("app.py"), "def original():\n    return 1\n")
        .expect("Failed to write file");
    run_git(dir.path(), &["add", "."]);
    run_git(dir.path(), &["commit", "-m", "initial"]);

    fs::write(
        dir.path().join("app.py"),
        "def original():\n    return 2\n\n\ndef added_later():\n    return 3\n",
    )
    .expect("Failed to write file");
    run_git(dir.path(), &["add", "."]);
    run_git(dir.path(), &["commit", "-m", "second"]);

    dir
}

#[test]
fn test_help_output() {
    let output = Command::new(get_binary_path())
        .arg("--help")
        .output()
        .expect("Failed to execute binary");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("chunk"));
    assert!(stdout.contains("diff"));
}

#[test]
fn test_chunk_text_output() {
    let dir = create_source_tree();
    let output = Command::new(get_binary_path())
        .args(["chunk", dir.path().to_str().unwrap()])
        .output()
        .expect("Failed to execute binary");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("app.py"));
    assert!(stdout.contains("def greet(name):"));
    assert!(stdout.contains("units: greet, farewell") || stdout.contains("greet"));
}

#[test]
fn test_chunk_json_output_is_valid() {
    let dir = create_source_tree();
    let output = Command::new(get_binary_path())
        .args(["chunk", dir.path().to_str().unwrap(), "--format", "json"])
        .output()
        .expect("Failed to execute binary");

    assert!(output.status.success());
    let chunks: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("stdout is not valid JSON");
    let array = chunks.as_array().expect("expected a JSON array");
    assert!(!array.is_empty());
    assert!(array[0].get("content").is_some());
    assert!(array[0].get("contained_units").is_some());
}

#[test]
fn test_chunk_language_filter() {
    let dir = create_source_tree();
    let output = Command::new(get_binary_path())
        .args([
            "chunk",
            dir.path().to_str().unwrap(),
            "--format",
            "jsonl",
            "-l",
            "go",
        ])
        .output()
        .expect("Failed to execute binary");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("main.go"));
    assert!(!stdout.contains("app.py"));
}

#[test]
fn test_chunk_output_file() {
    let dir = create_source_tree();
    let out_path = dir.path().join("chunks.jsonl");
    let output = Command::new(get_binary_path())
        .args([
            "chunk",
            dir.path().to_str().unwrap(),
            "--format",
            "jsonl",
            "-o",
            out_path.to_str().unwrap(),
            "-e",
            r"chunks\.jsonl",
        ])
        .output()
        .expect("Failed to execute binary");

    assert!(output.status.success());
    let written = fs::read_to_string(&out_path).expect("output file missing");
    assert!(written.lines().count() >= 2);
}

#[test]
fn test_diff_text_output() {
    let repo = create_test_repo();
    let output = Command::new(get_binary_path())
        .args([
            "diff",
            "HEAD~1",
            "HEAD",
            "--repo",
            repo.path().to_str().unwrap(),
        ])
        .output()
        .expect("Failed to execute binary");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("~ app.py original"));
    assert!(stdout.contains("+ app.py added_later"));
}

#[test]
fn test_diff_json_output() {
    let repo = create_test_repo();
    let output = Command::new(get_binary_path())
        .args([
            "diff",
            "HEAD~1",
            "HEAD",
            "--repo",
            repo.path().to_str().unwrap(),
            "--format",
            "json",
        ])
        .output()
        .expect("Failed to execute binary");

    assert!(output.status.success());
    let report: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("stdout is not valid JSON");
    let changes = report["changes"].as_array().expect("expected changes array");
    assert_eq!(changes.len(), 2);
    assert_eq!(report["failures"].as_array().unwrap().len(), 0);
}

#[test]
fn test_invalid_revision_exits_nonzero() {
    let repo = create_test_repo();
    let output = Command::new(get_binary_path())
        .args([
            "diff",
            "does-not-exist",
            "HEAD",
            "--repo",
            repo.path().to_str().unwrap(),
        ])
        .output()
        .expect("Failed to execute binary");

    assert!(!output.status.success());
}

#[test]
fn test_missing_directory_exits_nonzero() {
    let output = Command::new(get_binary_path())
        .args(["chunk", "/definitely/not/a/real/path"])
        .output()
        .expect("Failed to execute binary");

    assert!(!output.status.success());
}
