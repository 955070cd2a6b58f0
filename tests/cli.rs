//! Tests for the `docchat` binary that need no network access.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn docchat_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_docchat"))
}

/// Config pointing at temp folders, with embeddings disabled and an LLM
/// endpoint nobody listens on.
fn write_config(root: &Path) -> PathBuf {
    let docs = root.join("docs");
    fs::create_dir_all(&docs).unwrap();
    let config = root.join("docchat.toml");
    fs::write(
        &config,
        format!(
            r#"
[documents]
folder = "{}"

[index]
path = "{}"
delete_retry_delay_ms = 10

[embedding]
provider = "disabled"

[llm]
url = "http://127.0.0.1:9"
model = "stub-model"
timeout_secs = 1
"#,
            docs.display(),
            root.join("index").display()
        ),
    )
    .unwrap();
    config
}

fn run(config: &Path, args: &[&str]) -> (String, String, bool) {
    let output = Command::new(docchat_binary())
        .arg("--config")
        .arg(config)
        .args(["--progress", "json"])
        .args(args)
        .output()
        .expect("failed to run docchat");
    (
        String::from_utf8_lossy(&output.stdout).to_string(),
        String::from_utf8_lossy(&output.stderr).to_string(),
        output.status.success(),
    )
}

#[test]
fn list_prints_sorted_names() {
    let tmp = TempDir::new().unwrap();
    let config = write_config(tmp.path());
    fs::write(tmp.path().join("docs/zeta.txt"), "z").unwrap();
    fs::write(tmp.path().join("docs/alpha.txt"), "a").unwrap();
    fs::write(tmp.path().join("docs/image.png"), "ignored").unwrap();

    let (stdout, _, ok) = run(&config, &["list"]);
    assert!(ok);
    let names: Vec<&str> = stdout.lines().map(|l| l.trim()).collect();
    assert_eq!(names, vec!["alpha", "zeta"]);
}

#[test]
fn ask_unknown_document_fails_with_not_found() {
    let tmp = TempDir::new().unwrap();
    let config = write_config(tmp.path());

    let (stdout, stderr, ok) = run(&config, &["ask", "missing", "What is this?"]);
    assert!(!ok);
    assert!(stdout.is_empty());
    assert!(stderr.contains(r#""kind":"not_found""#), "stderr: {}", stderr);
    assert!(stderr.contains(r#"{"event":"finished"}"#));
}

#[test]
fn setup_reports_provider_failure_when_every_document_fails() {
    let tmp = TempDir::new().unwrap();
    let config = write_config(tmp.path());
    fs::write(tmp.path().join("docs/a.txt"), "Hello world").unwrap();

    let (_, stderr, ok) = run(&config, &["setup"]);
    assert!(!ok);
    assert!(stderr.contains(r#""event":"status""#));
    assert!(stderr.contains(r#""kind":"provider_failure""#), "stderr: {}", stderr);
    assert!(!tmp.path().join("index/a").exists());
}

#[test]
fn setup_with_empty_folder_succeeds() {
    let tmp = TempDir::new().unwrap();
    let config = write_config(tmp.path());

    let (_, stderr, ok) = run(&config, &["setup"]);
    assert!(ok);
    assert!(stderr.contains("no documents found"));
}

#[test]
fn delete_unknown_document_fails() {
    let tmp = TempDir::new().unwrap();
    let config = write_config(tmp.path());

    let (_, stderr, ok) = run(&config, &["delete", "ghost"]);
    assert!(!ok);
    assert!(stderr.contains(r#""kind":"not_found""#));
}

#[test]
fn models_with_empty_url_prints_nothing() {
    let tmp = TempDir::new().unwrap();
    let config = write_config(tmp.path());

    let (stdout, _, ok) = run(&config, &["models", "--url", ""]);
    assert!(ok);
    assert!(stdout.is_empty());
}
