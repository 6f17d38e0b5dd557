use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use assert_cmd::cargo::{cargo_bin, cargo_bin_cmd};
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use predicates::prelude::*;

struct Layout {
    _root: tempfile::TempDir,
    config: PathBuf,
    segments: PathBuf,
}

fn layout() -> Layout {
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
            download_primary_capacity = 8

            [supervisor]
            check_interval_ms = 50
            "#,
            local.display(),
            remote.display(),
            segments.display()
        ),
    )
    .expect("write config");

    Layout {
        _root: root,
        config,
        segments,
    }
}

fn wait_for(path: &Path, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if path.exists() {
            return true;
        }
        thread::sleep(Duration::from_millis(20));
    }
    false
}

#[test]
fn help_describes_config_argument() {
    let mut cmd = cargo_bin_cmd!("cloudtierd");
    let assert = cmd.arg("--help").assert().success();
    let output = assert.get_output().stdout.clone();
    let text = String::from_utf8_lossy(&output);
    assert!(text.contains("<CONFIG>"), "help missing config argument");
    assert!(text.contains("--check"), "help missing --check flag");
}

#[test]
fn requires_exactly_one_argument() {
    cargo_bin_cmd!("cloudtierd").assert().failure();
    cargo_bin_cmd!("cloudtierd")
        .args(["a.toml", "b.toml"])
        .assert()
        .failure();
}

#[test]
fn unreadable_config_exits_non_zero() {
    let dir = tempfile::tempdir().expect("tempdir");
    cargo_bin_cmd!("cloudtierd")
        .arg(dir.path().join("missing.toml"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to load configuration"));
}

#[test]
fn check_validates_without_starting() {
    let layout = layout();
    cargo_bin_cmd!("cloudtierd")
        .arg(&layout.config)
        .arg("--check")
        .assert()
        .success()
        .stdout(predicate::str::contains("configuration OK"));
    assert!(!layout.segments.join("cloudtier-download-primary").exists());
}

#[test]
fn incompatible_segment_fails_startup() {
    let layout = layout();
    fs::write(
        layout.segments.join("cloudtier-download-primary"),
        vec![0x5a; 4096],
    )
    .expect("write foreign segment");

    cargo_bin_cmd!("cloudtierd")
        .arg(&layout.config)
        .env("RUST_LOG", "error")
        .assert()
        .failure();
}

#[test]
fn sigterm_shuts_down_cleanly() {
    let layout = layout();
    let mut child = Command::new(cargo_bin!("cloudtierd"))
        .arg(&layout.config)
        .env("RUST_LOG", "warn")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn daemon");

    let segment = layout.segments.join("cloudtier-download-primary");
    assert!(
        wait_for(&segment, Duration::from_secs(10)),
        "segment never created"
    );
    thread::sleep(Duration::from_millis(200));

    let pid = Pid::from_raw(i32::try_from(child.id()).expect("pid fits"));
    kill(pid, Signal::SIGTERM).expect("send SIGTERM");

    let deadline = Instant::now() + Duration::from_secs(10);
    let status = loop {
        if let Some(status) = child.try_wait().expect("poll daemon") {
            break status;
        }
        if Instant::now() > deadline {
            let _ = child.kill();
            panic!("daemon did not exit after SIGTERM");
        }
        thread::sleep(Duration::from_millis(20));
    };

    assert!(status.success(), "daemon exited with {status}");
    assert!(segment.exists(), "shared segment must outlive the daemon");
}
