//! Integration tests for Stowage

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    /// Temp workspace with a config file pointing every path inside it
    struct Workspace {
        dir: TempDir,
    }

    impl Workspace {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let root = dir.path();
            let config = format!(
                r#"[general]
environment = "local"

[disk]
dir = "{stores}"
flush_threshold = 1

[blob]
bucket = "test-bucket"
root = "{buckets}"
local_mirror = false

[registry]
path = "{registry}"
"#,
                stores = root.join("stores").display(),
                buckets = root.join("buckets").display(),
                registry = root.join("versions.json").display(),
            );
            std::fs::write(root.join("config.toml"), config).unwrap();
            Self { dir }
        }

        fn path(&self) -> &Path {
            self.dir.path()
        }

        fn config_path(&self) -> PathBuf {
            self.path().join("config.toml")
        }

        fn stowage(&self) -> Command {
            let mut cmd = cargo_bin_cmd!("stowage");
            cmd.env("STOWAGE_CONFIG", self.config_path())
                .env_remove("STOWAGE_ENVIRONMENT");
            cmd
        }
    }

    fn stowage() -> Command {
        cargo_bin_cmd!("stowage")
    }

    #[test]
    fn help_displays() {
        stowage()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("content-addressed version registry"));
    }

    #[test]
    fn version_displays() {
        stowage()
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("stowage"));
    }

    #[test]
    fn config_path() {
        let ws = Workspace::new();
        ws.stowage()
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("config.toml"));
    }

    #[test]
    fn config_show() {
        let ws = Workspace::new();
        ws.stowage()
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[general]"))
            .stdout(predicate::str::contains("test-bucket"));
    }

    #[test]
    fn config_init_refuses_to_overwrite() {
        let ws = Workspace::new();
        ws.stowage()
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("already exists"));

        let content = std::fs::read_to_string(ws.config_path()).unwrap();
        assert!(content.contains("test-bucket"));
    }

    #[test]
    fn config_init_force_repairs_broken_file() {
        let ws = Workspace::new();
        std::fs::write(ws.config_path(), "[registry]\nttl_hours = \"soon\"").unwrap();

        ws.stowage()
            .args(["config", "show"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid configuration"))
            .stderr(predicate::str::contains("config init --force"));

        ws.stowage()
            .args(["config", "init", "--force"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Configuration initialized"));
    }

    #[test]
    fn unknown_environment_rejected() {
        let ws = Workspace::new();
        ws.stowage()
            .args(["--environment", "moon", "config", "show"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("unknown environment"));
    }

    #[test]
    fn blob_put_get_exists() {
        let ws = Workspace::new();
        let input = ws.path().join("payload.json");
        std::fs::write(&input, r#"{"words": ["a", "b"], "size": 2}"#).unwrap();

        let output = ws
            .stowage()
            .args(["blob", "put"])
            .arg(&input)
            .assert()
            .success()
            .get_output()
            .stdout
            .clone();
        let hash = String::from_utf8(output).unwrap().trim().to_string();
        assert_eq!(hash.len(), 64);
        assert!(ws
            .path()
            .join("buckets/test-bucket/items")
            .join(format!("{hash}.json"))
            .exists());

        ws.stowage()
            .args(["blob", "get", &hash])
            .assert()
            .success()
            .stdout(predicate::str::contains("\"words\""));

        ws.stowage()
            .args(["blob", "exists", &hash])
            .assert()
            .success()
            .stdout(predicate::str::contains("present"));
    }

    #[test]
    fn blob_put_is_content_addressed() {
        let ws = Workspace::new();
        let first = ws.path().join("first.json");
        let second = ws.path().join("second.json");
        std::fs::write(&first, r#"{"a": 1, "b": 2}"#).unwrap();
        std::fs::write(&second, r#"{"b": 2, "a": 1}"#).unwrap();

        let hash_of = |file: &Path| {
            let out = ws
                .stowage()
                .args(["blob", "put"])
                .arg(file)
                .assert()
                .success()
                .get_output()
                .stdout
                .clone();
            String::from_utf8(out).unwrap()
        };

        assert_eq!(hash_of(&first), hash_of(&second));
    }

    #[test]
    fn blob_get_unknown_hash() {
        let ws = Workspace::new();
        ws.stowage()
            .args(["blob", "get", &"0".repeat(64)])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Object not found"));
    }

    #[test]
    fn blob_get_rejects_bad_hash() {
        let ws = Workspace::new();
        ws.stowage()
            .args(["blob", "get", "../../secrets"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Not a content hash"));
    }

    #[test]
    fn registry_list_empty() {
        let ws = Workspace::new();
        ws.stowage()
            .args(["registry", "list"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No versions recorded"));
    }

    #[test]
    fn registry_list_and_show() {
        let ws = Workspace::new();
        std::fs::write(
            ws.path().join("versions.json"),
            r#"{
  "nlu.vocabulary": {"result_hash": "abc123", "last_run_timestamp": "2026-01-01T00:00:00Z", "owner": "nlu"},
  "search.index": {"hash_version": "def456", "last_run_timestamp": "2026-01-02T08:30:00"}
}"#,
        )
        .unwrap();

        ws.stowage()
            .args(["registry", "list"])
            .assert()
            .success()
            .stdout(predicate::str::contains("nlu.vocabulary"))
            .stdout(predicate::str::contains("def456"))
            .stdout(predicate::str::contains("Total: 2 version(s)"));

        ws.stowage()
            .args(["registry", "list", "--format", "plain"])
            .assert()
            .success()
            .stdout("nlu.vocabulary\nsearch.index\n");

        ws.stowage()
            .args(["registry", "show", "nlu.vocabulary"])
            .assert()
            .success()
            .stdout(predicate::str::contains("abc123"))
            .stdout(predicate::str::contains("owner"));
    }

    #[test]
    fn registry_show_unknown() {
        let ws = Workspace::new();
        ws.stowage()
            .args(["registry", "show", "nope.missing"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Unknown registry identifier"))
            .stderr(predicate::str::contains("stowage registry list"));
    }

    #[test]
    fn store_inspect_and_flush() {
        let ws = Workspace::new();
        let stores = ws.path().join("stores");
        std::fs::create_dir_all(&stores).unwrap();
        std::fs::write(
            stores.join("lookups.json"),
            r#"{"\"a\"": 1, "\"b\"": {"nested": true}}"#,
        )
        .unwrap();

        ws.stowage()
            .args(["store", "inspect", "lookups", "--keys"])
            .assert()
            .success()
            .stdout(predicate::str::contains("entries"))
            .stdout(predicate::str::contains("\"b\""));

        ws.stowage()
            .args(["store", "flush", "lookups"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Rewrote 2 entries"));
    }

    #[test]
    fn store_inspect_missing_cache() {
        let ws = Workspace::new();
        ws.stowage()
            .args(["store", "inspect", "never-written"])
            .assert()
            .success()
            .stdout(predicate::str::contains("no"));
    }

    #[test]
    fn store_rejects_path_names() {
        let ws = Workspace::new();
        ws.stowage()
            .args(["store", "flush", "../escape"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid cache name"));
    }
}
