#![allow(missing_docs)]

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::cargo::cargo_bin_cmd;
use serde_json::Value;
use tempfile::TempDir;

struct Workspace {
    _dir: TempDir,
    config: PathBuf,
    db: PathBuf,
}

impl Workspace {
    fn new() -> Self {
        let dir = TempDir::new().expect("tempdir");
        let config = dir.path().join("cli.toml");
        let db = dir.path().join("cli.ipt");
        fs::write(
            &config,
            format!(
                r#"
default_profile = "test"

[profiles.test]
database = "{}"
page_size = 512
order = 4
synchronous = "off"
"#,
                db.display()
            ),
        )
        .expect("write config");
        Self {
            _dir: dir,
            config,
            db,
        }
    }

    fn cmd(&self) -> assert_cmd::Command {
        let mut cmd = cargo_bin_cmd!("iptree");
        cmd.env_remove("IPTREE_DB")
            .env_remove("IPTREE_PROFILE")
            .arg("--config")
            .arg(&self.config);
        cmd
    }

    fn json(&self, args: &[&str]) -> Value {
        let output = self
            .cmd()
            .args(["--format", "json"])
            .args(args)
            .assert()
            .success()
            .get_output()
            .stdout
            .clone();
        serde_json::from_slice(&output).expect("valid json")
    }
}

fn write_csv(path: &Path, rows: impl IntoIterator<Item = (u32, u16, u32, u16)>) {
    let mut body = String::from("key_block,key_offset,value_block,value_offset\n");
    for (kb, ko, vb, vo) in rows {
        body.push_str(&format!("{kb},{ko},{vb},{vo}\n"));
    }
    fs::write(path, body).expect("write csv");
}

#[test]
fn init_insert_search_round_trip() {
    let ws = Workspace::new();
    let init = ws.json(&["init"]);
    assert_eq!(init["order"], 4);
    assert_eq!(init["page_size"], 512);
    assert!(ws.db.exists());

    ws.cmd().args(["insert", "12:3", "900:1"]).assert().success();
    let found = ws.json(&["search", "12:3"]);
    assert_eq!(found["value"], "900:1");

    let output = ws
        .cmd()
        .args(["search", "12:3"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    assert_eq!(String::from_utf8_lossy(&output).trim(), "900:1");
}

#[test]
fn missing_key_exits_with_failure() {
    let ws = Workspace::new();
    ws.cmd().arg("init").assert().success();
    let output = ws
        .cmd()
        .args(["search", "1:1"])
        .assert()
        .failure()
        .get_output()
        .stderr
        .clone();
    assert!(String::from_utf8_lossy(&output).contains("not found"));
}

#[test]
fn delete_reports_unsupported() {
    let ws = Workspace::new();
    ws.cmd().arg("init").assert().success();
    ws.cmd().args(["insert", "5:1", "6:1"]).assert().success();
    let output = ws
        .cmd()
        .args(["delete", "5:1"])
        .assert()
        .failure()
        .get_output()
        .stderr
        .clone();
    assert!(String::from_utf8_lossy(&output).contains("unsupported"));
    assert_eq!(ws.json(&["search", "5:1"])["value"], "6:1");
}

#[test]
fn import_then_verify_and_stats() {
    let ws = Workspace::new();
    ws.cmd().arg("init").assert().success();
    let csv = ws.db.with_file_name("rows.csv");
    write_csv(&csv, (0..250u32).map(|b| (b, 1, b + 10_000, 2)));

    let imported = ws.json(&["import", csv.to_str().expect("utf8 path"), "--checkpoint"]);
    assert_eq!(imported["rows"], 250);
    assert!(imported["checkpoint_lsn"].is_number());

    let report = ws.json(&["verify"]);
    assert_eq!(report["keys"], 250);
    assert_eq!(report["duplicate_keys"], 0);
    assert!(report["depth"].as_u64().unwrap_or(0) >= 3);

    let stats = ws.json(&["stats"]);
    assert_eq!(stats["order"], 4);
    assert!(stats["page_count"].as_u64().unwrap_or(0) > 2);
    assert_eq!(ws.json(&["search", "249:1"])["value"], "10249:2");
}

#[test]
fn import_rejects_malformed_rows() {
    let ws = Workspace::new();
    ws.cmd().arg("init").assert().success();
    let csv = ws.db.with_file_name("bad.csv");
    fs::write(
        &csv,
        "key_block,key_offset,value_block,value_offset\n1,1,2,2\nx,1,2,2\n",
    )
    .expect("write csv");
    ws.cmd().arg("import").arg(&csv).assert().failure();
}

#[test]
fn explicit_db_overrides_profile() {
    let ws = Workspace::new();
    let other = ws.db.with_file_name("other.ipt");
    let init = ws.json(&["--db", other.to_str().expect("utf8 path"), "init"]);
    assert_eq!(init["path"], other.to_str().expect("utf8 path"));
    assert!(other.exists());
    assert!(!ws.db.exists());
}

#[test]
fn checkpoint_and_bad_arguments() {
    let ws = Workspace::new();
    ws.cmd().arg("init").assert().success();
    ws.cmd().args(["insert", "1:1", "2:2"]).assert().success();
    let out = ws.json(&["checkpoint"]);
    assert!(out["lsn"].is_number());
    ws.cmd().args(["insert", "1", "2:2"]).assert().failure();
    ws.cmd().args(["--profile", "ghost", "stats"]).assert().failure();
}
