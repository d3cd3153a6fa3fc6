//! Integration tests for `cascade build --json` output.
//!
//! These tests verify:
//! - JSON output is always valid JSON with `schema_version` and `ok`
//! - A compile error exits 1 and reports the failed stage
//! - A failing linter never changes the exit code
//! - An unreadable config exits 2 with an `error` field

use std::path::Path;
use std::process::{Command, Output};
use tempfile::tempdir;

fn cargo_bin() -> Command {
    let mut cmd = Command::new(env!("CARGO"));
    cmd.args(["run", "-q", "-p", "cascade-cli", "--bin", "cascade", "--"]);
    cmd.env_remove("CASCADE_ENV").env_remove("NODE_ENV");
    cmd
}

fn write(root: &Path, rel: &str, contents: &str) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, contents).unwrap();
}

fn build_json(root: &Path, extra: &[&str]) -> (Output, serde_json::Value) {
    let output = cargo_bin()
        .args(["build", "--json", "--cwd"])
        .arg(root)
        .args(extra)
        .output()
        .expect("Failed to run build command");
    let stdout = String::from_utf8_lossy(&output.stdout);
    let json: serde_json::Value =
        serde_json::from_str(&stdout).expect("Output should be valid JSON");
    (output, json)
}

#[test]
fn test_build_json_success() {
    let dir = tempdir().unwrap();
    write(dir.path(), "scss/cascade.scss", "a { color: red; }\n");

    let (output, json) = build_json(dir.path(), &["--no-lint"]);

    assert!(output.status.success());
    assert_eq!(json["schema_version"], 1);
    assert_eq!(json["ok"], true);
    assert_eq!(json["environment"], "static");
    assert_eq!(json["mode"], "development");
    assert_eq!(json["plugins"], serde_json::json!(["postcss-pxv", "autoprefixer"]));
    assert!(json.get("lint").is_none(), "lint was skipped");
    assert!(json["notes"].is_array());

    let stylesheet = json["build"]["stylesheet"].as_str().unwrap();
    assert!(Path::new(stylesheet).is_file());
    assert!(dir.path().join("test/styles.css.map").is_file());
}

#[test]
fn test_build_json_compile_error_exits_one() {
    let dir = tempdir().unwrap();
    write(dir.path(), "scss/cascade.scss", "a { color: red;\n");

    let (output, json) = build_json(dir.path(), &["--no-lint"]);

    assert_eq!(output.status.code(), Some(1));
    assert_eq!(json["ok"], false);
    assert_eq!(json["build"]["failedStage"], "compiling");
    assert!(json["build"]["error"].as_str().unwrap().contains("cascade.scss"));
    assert!(!dir.path().join("test/styles.css").exists());
}

#[cfg(unix)]
#[test]
fn test_build_json_lint_failure_still_succeeds() {
    let dir = tempdir().unwrap();
    write(dir.path(), "scss/cascade.scss", "a { color: red; }\n");
    write(
        dir.path(),
        "cascade.config.json",
        r#"{ "stylelint": { "command": ["sh", "-c", "echo 'scss/cascade.scss ✖ bad'; exit 2", "lint"] } }"#,
    );

    let (output, json) = build_json(dir.path(), &[]);

    assert!(output.status.success());
    assert_eq!(json["ok"], true);
    assert_eq!(json["lint"]["ok"], false);
    assert_eq!(json["lint"]["exitCode"], 2);
    assert!(json["lint"]["stdout"].as_str().unwrap().contains("✖ bad"));
}

#[test]
fn test_build_json_production_mode_from_node_env() {
    let dir = tempdir().unwrap();
    write(dir.path(), "scss/cascade.scss", "a {\n  color: red;\n}\n");

    let output = cargo_bin()
        .env("NODE_ENV", "production")
        .args(["build", "--json", "--no-lint", "--cwd"])
        .arg(dir.path())
        .output()
        .unwrap();
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();

    assert!(output.status.success());
    assert_eq!(json["mode"], "production");
    let css = std::fs::read_to_string(dir.path().join("test/styles.css")).unwrap();
    assert!(css.starts_with("a{color:red}"), "{css}");
}

#[test]
fn test_build_json_malformed_config() {
    let dir = tempdir().unwrap();
    write(dir.path(), "scss/cascade.scss", "a { color: red; }\n");
    write(dir.path(), "cascade.config.json", "{ not json");

    let (output, json) = build_json(dir.path(), &["--no-lint"]);

    assert_eq!(output.status.code(), Some(2));
    assert_eq!(json["ok"], false);
    assert!(json["error"].as_str().unwrap().contains("cascade.config.json"));
}
