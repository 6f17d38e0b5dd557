use std::fs;
use std::path::PathBuf;

use assert_cmd::cargo::cargo_bin_cmd;
use cloudtier_core::queue::{PathEntry, Queue, QueueOptions};
use predicates::prelude::*;

struct Workspace {
    _root: tempfile::TempDir,
    config: PathBuf,
    local: PathBuf,
    segments: PathBuf,
}

const QUEUE: &str = "cloudtier-download-primary";

fn workspace(capacity: usize) -> Workspace {
    let root = tempfile::tempdir().expect("tempdir");
    let local = root.path().join("local");
    let remote = root.path().join("remote");
    let segments = root.path().join("segments");
    for dir in [&local, &remote, &segments] {
        fs::create_dir_all(dir).expect("create dir");
    }

    let config = root.path().join("cloudtier.toml");
    fs::write(
        &config,
        format!(
            r#"
            [scan]
            root = "{}"

            [storage]
            remote_root = "{}"

            [queues]
            segment_dir = "{}"
            download_primary_capacity = {capacity}
            "#,
            local.display(),
            remote.display(),
            segments.display()
        ),
    )
    .expect("write config");

    Workspace {
        _root: root,
        config,
        local,
        segments,
    }
}

fn drain(ws: &Workspace) -> Vec<PathEntry> {
    let options = QueueOptions::shared(8, 4096, &ws.segments, QUEUE);
    let queue = Queue::create(options).expect("attach to segment");
    let mut entries = Vec::new();
    while let Some(entry) = queue.try_pop().expect("pop") {
        entries.push(entry);
    }
    queue.destroy();
    entries
}

#[test]
fn help_lists_subcommands() {
    cargo_bin_cmd!("cloudtierctl")
        .arg("--help")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("promote")
                .and(predicate::str::contains("status"))
                .and(predicate::str::contains("unlink")),
        );
}

#[test]
fn status_before_daemon_start_reports_not_created() {
    let ws = workspace(8);
    cargo_bin_cmd!("cloudtierctl")
        .arg("--config")
        .arg(&ws.config)
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("not created"));
    assert!(!ws.segments.join(QUEUE).exists());
}

#[test]
fn promote_enqueues_on_shared_segment() {
    let ws = workspace(8);
    let first = ws.local.join("a.bin");
    let second = ws.local.join("nested/b.bin");

    cargo_bin_cmd!("cloudtierctl")
        .arg("--config")
        .arg(&ws.config)
        .arg("promote")
        .arg(&first)
        .arg(&second)
        .assert()
        .success()
        .stdout(predicate::str::contains("queued"));

    cargo_bin_cmd!("cloudtierctl")
        .arg("--config")
        .arg(&ws.config)
        .args(["status", "--json"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("\"len\":2")
                .and(predicate::str::contains("\"capacity\":8")),
        );

    let drained = drain(&ws);
    assert_eq!(
        drained,
        vec![
            PathEntry::new(&first).expect("entry"),
            PathEntry::new(&second).expect("entry")
        ]
    );
}

#[test]
fn promote_rejects_paths_outside_governed_tree() {
    let ws = workspace(8);
    cargo_bin_cmd!("cloudtierctl")
        .arg("--config")
        .arg(&ws.config)
        .args(["promote", "/etc/passwd"])
        .assert()
        .failure();
    assert!(!ws.segments.join(QUEUE).exists());
}

#[test]
fn promote_times_out_on_full_queue() {
    let ws = workspace(1);
    cargo_bin_cmd!("cloudtierctl")
        .arg("--config")
        .arg(&ws.config)
        .args(["promote", "--timeout-ms", "100"])
        .arg(ws.local.join("one"))
        .arg(ws.local.join("two"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("1 of 2 paths queued"));
}

#[test]
fn unlink_removes_segment_once() {
    let ws = workspace(8);
    cargo_bin_cmd!("cloudtierctl")
        .arg("--config")
        .arg(&ws.config)
        .arg("promote")
        .arg(ws.local.join("x"))
        .assert()
        .success();
    assert!(ws.segments.join(QUEUE).exists());

    cargo_bin_cmd!("cloudtierctl")
        .arg("--config")
        .arg(&ws.config)
        .arg("unlink")
        .assert()
        .success()
        .stdout(predicate::str::contains("removed"));
    assert!(!ws.segments.join(QUEUE).exists());

    cargo_bin_cmd!("cloudtierctl")
        .arg("--config")
        .arg(&ws.config)
        .arg("unlink")
        .assert()
        .failure();
}
