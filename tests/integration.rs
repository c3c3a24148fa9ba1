use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn setup_test_env(llm: &str) -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let config_content = format!(
        r#"[storage]
root = "{}/data"

[llm]
{}

[search]
default_limit = 5

[index]
source_url = "http://127.0.0.1:9/simple/"
fetch_timeout_secs = 1
"#,
        root.display(),
        llm
    );

    let config_path = config_dir.join("mirage.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_mirage(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = env!("CARGO_BIN_EXE_mirage");
    let output = Command::new(binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env_remove("RUST_LOG")
        .env_remove("PKGMIRAGE_CLI_TEST_KEY")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run mirage binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_init_creates_storage() {
    let (tmp, config_path) = setup_test_env(r#"provider = "disabled""#);

    let (stdout, stderr, success) = run_mirage(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data/cache.sqlite").exists());
    assert!(tmp.path().join("data/index.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env(r#"provider = "disabled""#);

    let (_, _, success1) = run_mirage(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_mirage(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_cache_stats_on_fresh_storage() {
    let (_tmp, config_path) = setup_test_env(r#"provider = "disabled""#);
    run_mirage(&config_path, &["init"]);

    let (stdout, stderr, success) = run_mirage(&config_path, &["cache", "stats"]);
    assert!(success, "cache stats failed: {}", stderr);
    assert!(stdout.contains("Searches:    0"));
    assert!(stdout.contains("READMEs:     0"));
    assert!(stdout.contains("Packages:    0"));
}

#[test]
fn test_index_status_reports_empty_snapshot() {
    let (_tmp, config_path) = setup_test_env(r#"provider = "disabled""#);
    run_mirage(&config_path, &["init"]);

    let (stdout, stderr, success) = run_mirage(&config_path, &["index", "status"]);
    assert!(success, "index status failed: {}", stderr);
    assert!(stdout.contains("Names:       0"));
    assert!(stdout.contains("Status:      empty"));
}

#[test]
fn test_cache_history_empty() {
    let (_tmp, config_path) = setup_test_env(r#"provider = "disabled""#);

    let (stdout, _, success) = run_mirage(&config_path, &["cache", "history"]);
    assert!(success);
    assert!(stdout.contains("No searches cached."));
}

#[test]
fn test_clear_rejects_unknown_type() {
    let (_tmp, config_path) = setup_test_env(r#"provider = "disabled""#);

    let (_, stderr, success) = run_mirage(&config_path, &["cache", "clear", "--type", "everything"]);
    assert!(!success);
    assert!(stderr.contains("Unknown cache type"));
}

#[test]
fn test_search_without_provider_is_misconfiguration() {
    let (_tmp, config_path) = setup_test_env(r#"provider = "disabled""#);

    let (stdout, stderr, success) = run_mirage(&config_path, &["search", "terminal text editors"]);
    assert!(!success, "search should fail: stdout={}", stdout);
    assert!(stderr.contains("configuration error"), "stderr={}", stderr);
}

#[test]
fn test_missing_api_key_is_misconfiguration() {
    let (_tmp, config_path) = setup_test_env(
        r#"provider = "openai"
api_key_env = "PKGMIRAGE_CLI_TEST_KEY""#,
    );

    let (_, stderr, success) = run_mirage(&config_path, &["search", "anything"]);
    assert!(!success);
    assert!(
        stderr.contains("PKGMIRAGE_CLI_TEST_KEY environment variable not set"),
        "stderr={}",
        stderr
    );
}

#[test]
fn test_invalid_config_rejected() {
    let (_tmp, config_path) = setup_test_env(r#"provider = "carrier-pigeon""#);

    let (_, stderr, success) = run_mirage(&config_path, &["init"]);
    assert!(!success);
    assert!(stderr.contains("Unknown llm provider"));
}

#[test]
fn test_completions_need_no_config() {
    let binary = env!("CARGO_BIN_EXE_mirage");
    let output = Command::new(binary)
        .args(["--config", "/nonexistent/mirage.toml", "completions", "bash"])
        .output()
        .unwrap();
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("mirage"));
}
