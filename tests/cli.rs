use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn codemend_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("codemend");
    path
}

fn setup_test_env(chunking: &str) -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/codemend.sqlite"

[chunking]
{}

[indexing]
include_globs = ["**/*.py", "**/*.rs"]
"#,
        root.display(),
        chunking
    );

    let config_path = config_dir.join("codemend.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_codemend(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = codemend_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run codemend binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env("chunk_size = 400\noverlap_size = 40");

    let (stdout, stderr, success) = run_codemend(&config_path, &["init"]);
    assert!(success, "init failed: {}", stderr);
    assert!(stdout.contains("Database initialized successfully."));
    assert!(tmp.path().join("data").join("codemend.sqlite").exists());
}

#[test]
fn test_init_is_idempotent() {
    let (_tmp, config_path) = setup_test_env("chunk_size = 400\noverlap_size = 40");

    let (_, stderr, success) = run_codemend(&config_path, &["init"]);
    assert!(success, "first init failed: {}", stderr);
    let (_, stderr, success) = run_codemend(&config_path, &["init"]);
    assert!(success, "second init failed: {}", stderr);
}

#[test]
fn test_overlap_not_smaller_than_chunk_is_rejected() {
    let (tmp, config_path) = setup_test_env("chunk_size = 40\noverlap_size = 40");

    let (_, stderr, success) = run_codemend(&config_path, &["init"]);
    assert!(!success);
    assert!(stderr.contains("must be greater than chunking.overlap_size"), "stderr: {}", stderr);
    assert!(!tmp.path().join("data").exists());
}

#[test]
fn test_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let missing = tmp.path().join("nope.toml");

    let (_, stderr, success) = run_codemend(&missing, &["init"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"), "stderr: {}", stderr);
}

#[test]
fn test_reconstruct_requires_indexed_revision() {
    let (_tmp, config_path) = setup_test_env("chunk_size = 400\noverlap_size = 40");
    let (_, stderr, success) = run_codemend(&config_path, &["init"]);
    assert!(success, "init failed: {}", stderr);

    let (_, stderr, success) = run_codemend(
        &config_path,
        &["reconstruct", "acme/widgets", "a.py", "--revision", "abc123"],
    );
    assert!(!success);
    assert!(stderr.contains("is not indexed at abc123"), "stderr: {}", stderr);
}

#[test]
fn test_completions_need_no_config() {
    let tmp = TempDir::new().unwrap();
    let missing = tmp.path().join("nope.toml");

    let (stdout, stderr, success) = run_codemend(&missing, &["completions", "bash"]);
    assert!(success, "completions failed: {}", stderr);
    assert!(stdout.contains("codemend"));
}
