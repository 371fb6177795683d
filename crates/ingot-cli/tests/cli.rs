use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

/// A mirror root with a config file and a registry snapshot
struct TestContext {
    temp_dir: TempDir,
}

impl TestContext {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let root = temp_dir.path();

        std::fs::write(root.join("ingot.toml"), "repo_name = \"quarry\"\n").unwrap();
        std::fs::create_dir_all(root.join("snapshot")).unwrap();
        std::fs::write(
            root.join("snapshot/stable.json"),
            r#"{
                "rack": [
                    {"version": "1.0"},
                    {"version": "1.1"},
                    {"version": "1.2"},
                    {"version": "2.0"}
                ]
            }"#,
        )
        .unwrap();
        std::fs::write(
            root.join("snapshot/prerelease.json"),
            r#"{"rack": [{"version": "3.0.0.beta1"}]}"#,
        )
        .unwrap();

        Self { temp_dir }
    }

    fn root(&self) -> &Path {
        self.temp_dir.path()
    }

    fn storage(&self) -> PathBuf {
        self.root().join("index")
    }

    fn ingot(&self, args: &[&str]) -> Output {
        let bin_path = env!("CARGO_BIN_EXE_ingot");
        Command::new(bin_path)
            .arg("--config")
            .arg(self.root().join("ingot.toml"))
            .args(args)
            .env("NO_COLOR", "1")
            .env_remove("RUST_LOG")
            .output()
            .expect("failed to run ingot")
    }
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn test_help_command() {
    let output = Command::new(env!("CARGO_BIN_EXE_ingot"))
        .arg("--help")
        .output()
        .expect("failed to run ingot");
    assert!(output.status.success());
    let text = stdout(&output);
    assert!(text.contains("Usage:"));
    for sub in ["update", "plan", "cleanup", "slot"] {
        assert!(text.contains(sub), "help is missing {sub}");
    }
}

#[test]
fn test_version_command() {
    let output = Command::new(env!("CARGO_BIN_EXE_ingot"))
        .arg("--version")
        .output()
        .expect("failed to run ingot");
    assert!(output.status.success());
    assert!(stdout(&output).contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_slot_below_newest_is_slotted() {
    let ctx = TestContext::new();
    let output = ctx.ingot(&["slot", "rack", ">= 1.1, < 2.0"]);
    assert!(output.status.success(), "{output:?}");
    assert_eq!(stdout(&output).trim(), "rack 1.2 -> ruby-rack-1");
}

#[test]
fn test_slot_newest_is_head() {
    let ctx = TestContext::new();
    let output = ctx.ingot(&["slot", "rack", ">= 2.0"]);
    assert!(output.status.success(), "{output:?}");
    assert_eq!(stdout(&output).trim(), "rack 2.0 -> ruby-rack");
}

#[test]
fn test_slot_prerelease_constraint() {
    let ctx = TestContext::new();
    let output = ctx.ingot(&["slot", "rack", ">= 3.0.0.a"]);
    assert!(output.status.success(), "{output:?}");
    assert_eq!(
        stdout(&output).trim(),
        "rack 3.0.0.beta1 -> ruby-rack-3.0.0.beta1"
    );
}

#[test]
fn test_slot_unresolvable_fails() {
    let ctx = TestContext::new();
    let output = ctx.ingot(&["slot", "rack", "~> 5.0"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("rack"), "{stderr}");
}

#[test]
fn test_plan_requires_whitelist() {
    let ctx = TestContext::new();
    let output = ctx.ingot(&["plan"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("whitelist_packages"), "{stderr}");
}

#[test]
fn test_cleanup_lists_then_removes_orphans() {
    let ctx = TestContext::new();
    std::fs::write(ctx.root().join("whitelist_packages"), "rack\n").unwrap();
    std::fs::create_dir_all(ctx.storage()).unwrap();
    let orphan = ctx.storage().join("ruby-gone-1.0-1-any.pkg.tar.xz");
    std::fs::write(&orphan, "stale").unwrap();
    std::fs::write(ctx.storage().join("README"), "kept").unwrap();

    let output = ctx.ingot(&["cleanup"]);
    assert!(output.status.success(), "{output:?}");
    assert!(stdout(&output).contains("ruby-gone-1.0-1-any.pkg.tar.xz"));
    assert!(orphan.exists());

    let output = ctx.ingot(&["cleanup", "--apply"]);
    assert!(output.status.success(), "{output:?}");
    assert!(!orphan.exists());
    assert!(ctx.storage().join("README").exists());
}
