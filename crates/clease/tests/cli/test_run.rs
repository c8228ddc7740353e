use crate::helpers::TestHost;
use predicates::prelude::*;
use std::process::Stdio;
use std::time::{Duration, Instant};

#[test]
fn test_run_exports_lease_and_releases() {
    let host = TestHost::new(4);

    host.cmd()
        .args(["run", "--count", "2", "--random-session", "--"])
        .args(["sh", "-c", "echo \"$CORELEASE_CPUS\"; test -n \"$CORELEASE_SESSION\""])
        .assert()
        .success()
        .stdout("0-1\n");

    assert!(host.leased().is_empty());
}

#[test]
fn test_run_sees_other_leases() {
    let host = TestHost::new(4);
    host.cmd()
        .args(["acquire", "--cpus", "0", "-s", "holder"])
        .assert()
        .success();

    host.cmd()
        .args(["run", "--count", "2", "--", "sh", "-c", "echo $CORELEASE_CPUS"])
        .assert()
        .success()
        .stdout("1-2\n");

    assert_eq!(host.leased(), vec![0]);
}

#[test]
fn test_run_propagates_exit_code() {
    let host = TestHost::new(2);
    host.cmd()
        .args(["run", "-c", "1", "--", "sh", "-c", "exit 3"])
        .assert()
        .code(3);
    assert!(host.leased().is_empty());
}

#[test]
fn test_run_keeps_child_code_when_release_fails() {
    let host = TestHost::new(2);
    let corrupt = format!("printf garbage > '{}'; exit 3", host.state_file().display());

    host.cmd()
        .args(["run", "-c", "1", "--", "sh", "-c", &corrupt])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("lease is leaked"));
}

#[test]
fn test_run_unknown_program_releases() {
    let host = TestHost::new(2);
    host.cmd()
        .args(["run", "-c", "1", "--", "/nonexistent/clease-test-binary"])
        .assert()
        .code(127)
        .stderr(predicate::str::contains("failed to start"));
    assert!(host.leased().is_empty());
}

#[test]
fn test_run_without_free_cores_does_not_start() {
    let host = TestHost::new(2);
    host.cmd()
        .args(["acquire", "-c", "2", "-s", "holder"])
        .assert()
        .success();

    host.cmd()
        .args(["run", "-c", "1", "--", "sh", "-c", "echo started"])
        .assert()
        .code(3)
        .stdout(predicate::str::contains("started").not());
}

#[test]
fn test_run_releases_on_sigterm() {
    let host = TestHost::new(4);

    let mut child = std::process::Command::new(assert_cmd::cargo::cargo_bin("clease"))
        .env("CONFIG_PATH", host.dir.path())
        .env("RUST_LOG", "warn")
        .args(host.global_args())
        .args(["run", "--count", "2", "--", "sleep", "30"])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();
    let session = child.id().to_string();

    let status = host.wait_for(|status| !status["owners"][&session].is_null());
    assert_eq!(status["owners"][&session]["cores"], serde_json::json!([0, 1]));

    let rc = unsafe { libc::kill(child.id() as libc::pid_t, libc::SIGTERM) };
    assert_eq!(rc, 0);

    let deadline = Instant::now() + Duration::from_secs(10);
    let exit = loop {
        if let Some(exit) = child.try_wait().unwrap() {
            break exit;
        }
        assert!(Instant::now() < deadline, "clease did not stop on SIGTERM");
        std::thread::sleep(Duration::from_millis(50));
    };
    assert_eq!(exit.code(), Some(143));
    assert!(host.leased().is_empty());
}
