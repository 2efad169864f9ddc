#![allow(deprecated)] // cargo_bin is deprecated but still functional

use assert_cmd::Command;
use predicates::prelude::*;
use predicates::str::contains;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

struct Workspace {
    dir: TempDir,
    config: PathBuf,
}

impl Workspace {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let config = dir.path().join("strata.toml");
        fs::write(
            &config,
            format!(
                r#"
[storage]
type = "filesystem"
path = "{blobs}"

[metadata]
type = "sqlite"
path = "{db}"

[hashing]
algorithm = "sha256"
"#,
                blobs = dir.path().join("blobs").display(),
                db = dir.path().join("metadata.db").display(),
            ),
        )
        .unwrap();
        Self { dir, config }
    }

    fn file(&self, name: &str, body: &[u8]) -> PathBuf {
        let path = self.dir.path().join(name);
        fs::write(&path, body).unwrap();
        path
    }

    fn strata(&self) -> Command {
        let mut cmd = Command::cargo_bin("strata").unwrap();
        cmd.arg("--config")
            .arg(&self.config)
            .env("RUST_LOG", "warn")
            .env_remove("STRATA_PRINCIPAL");
        cmd
    }
}

fn hash_column(stdout: &[u8]) -> String {
    let line = String::from_utf8_lossy(stdout);
    line.split('\t').nth(3).unwrap().to_string()
}

fn put(ws: &Workspace, path: &str, file: &Path) -> Vec<u8> {
    ws.strata()
        .args(["put", path])
        .arg(file)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone()
}

#[test]
fn put_cat_update_and_history() {
    let ws = Workspace::new();
    let v1 = ws.file("report.pdf", b"%PDF-1.4 draft");
    let v2 = ws.file("final.pdf", b"%PDF-1.4 final");

    let created = put(&ws, "/docs/42", &v1);
    let created = String::from_utf8(created).unwrap();
    assert!(created.contains("\tcreated\t"));
    assert!(created.contains("\tanonymous\t/docs/42"));

    ws.strata()
        .args(["cat", "/docs/42"])
        .assert()
        .success()
        .stdout("%PDF-1.4 draft");

    ws.strata()
        .args(["--principal", "alice", "update", "/docs/42"])
        .arg(&v2)
        .assert()
        .success()
        .stdout(contains("\tupdated\t").and(contains("\talice\t")));

    ws.strata()
        .args(["history", "/docs/42"])
        .assert()
        .success()
        .stdout(contains("created").and(contains("updated")));

    ws.strata()
        .args(["put", "/docs/42"])
        .arg(&v1)
        .assert()
        .failure()
        .stderr(contains("already exists"));
}

#[test]
fn rm_undelete_and_restore() {
    let ws = Workspace::new();
    let first = ws.file("a.txt", b"first");
    let second = ws.file("b.txt", b"second");

    let first_hash = hash_column(&put(&ws, "/notes/a", &first));
    assert!(first_hash.starts_with("sha256:"));
    ws.strata()
        .args(["update", "/notes/a"])
        .arg(&second)
        .assert()
        .success();

    ws.strata()
        .args(["rm", "/notes/a", "--reason", "cleanup"])
        .assert()
        .success()
        .stdout(contains("reason=cleanup"));
    ws.strata()
        .args(["cat", "/notes/a"])
        .assert()
        .failure()
        .stderr(contains("not found"));

    ws.strata().args(["undelete", "/notes/a"]).assert().success();
    ws.strata()
        .args(["cat", "/notes/a"])
        .assert()
        .success()
        .stdout("second");

    ws.strata()
        .args(["restore", "/notes/a", &first_hash])
        .assert()
        .success()
        .stdout(contains("\trestored\t"));
    ws.strata()
        .args(["cat", "/notes/a"])
        .assert()
        .success()
        .stdout("first");
}

#[test]
fn ls_hides_deleted_children_unless_all() {
    let ws = Workspace::new();
    let body = ws.file("x.txt", b"x");
    put(&ws, "/dir/keep", &body);
    put(&ws, "/dir/gone", &body);
    ws.strata().args(["rm", "/dir/gone"]).assert().success();

    ws.strata()
        .args(["ls", "/dir"])
        .assert()
        .success()
        .stdout(contains("/dir/keep").and(contains("/dir/gone").not()));
    ws.strata()
        .args(["ls", "/dir", "--all"])
        .assert()
        .success()
        .stdout(contains("/dir/keep").and(contains("/dir/gone")));
}

#[test]
fn locks_and_reap_with_nothing_held() {
    let ws = Workspace::new();
    ws.strata()
        .arg("locks")
        .assert()
        .success()
        .stdout(contains("No active locks."));
    ws.strata()
        .arg("reap-locks")
        .assert()
        .success()
        .stdout(contains("Released 0 expired lock group(s)."));
}

#[test]
fn rejects_invalid_input() {
    let ws = Workspace::new();
    let body = ws.file("x.txt", b"x");
    ws.strata()
        .args(["put", "/"])
        .arg(&body)
        .assert()
        .failure()
        .stderr(contains("root"));
    ws.strata()
        .args(["cat", "/a/../b"])
        .assert()
        .failure()
        .stderr(contains("invalid path"));
    ws.strata()
        .args(["restore", "/a", "md5:abc"])
        .assert()
        .failure()
        .stderr(contains("invalid content hash"));
}
