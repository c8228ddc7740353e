use crate::helpers::{stdout_cores, TestHost};
use predicates::prelude::*;
use std::collections::BTreeSet;

#[test]
fn test_acquire_status_release() {
    let host = TestHost::new(8);

    host.cmd()
        .args(["acquire", "--count", "3", "--session", "a"])
        .assert()
        .success()
        .stdout("0,1,2\n");
    host.cmd()
        .args(["acquire", "--cpus", "6-7", "--session", "b"])
        .assert()
        .success()
        .stdout("6,7\n");

    let status = host.status();
    assert_eq!(status["total_cores"], 8);
    assert_eq!(status["leased"], serde_json::json!([0, 1, 2, 6, 7]));
    assert_eq!(status["free"], serde_json::json!([3, 4, 5]));
    assert_eq!(status["owners"]["a"]["cores"], serde_json::json!([0, 1, 2]));
    assert_eq!(status["owners"]["b"]["cores"], serde_json::json!([6, 7]));

    host.cmd()
        .args(["release", "--session", "a"])
        .assert()
        .success()
        .stdout("0,1,2\n");
    assert_eq!(host.leased(), vec![6, 7]);

    // second release of the same session frees nothing
    host.cmd()
        .args(["release", "--session", "a"])
        .assert()
        .success()
        .stdout("\n");
}

#[test]
fn test_status_table() {
    let host = TestHost::new(4);
    host.cmd()
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("No active leases (4 cores free)"));

    host.cmd()
        .args(["acquire", "-c", "2", "-s", "job-17"])
        .assert()
        .success();
    host.cmd()
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("job-17"))
        .stdout(predicate::str::contains("0-1"))
        .stdout(predicate::str::contains("2 of 4 cores leased"));
}

#[test]
fn test_default_session_is_calling_process() {
    let host = TestHost::new(4);
    let session = std::process::id().to_string();

    host.cmd().args(["acquire", "-c", "1"]).assert().success();
    let status = host.status();
    assert_eq!(status["owners"][&session]["cores"], serde_json::json!([0]));

    host.cmd().arg("release").assert().success().stdout("0\n");
    assert!(host.leased().is_empty());
}

#[test]
fn test_failures_map_to_exit_codes() {
    let host = TestHost::new(4);
    host.cmd()
        .args(["acquire", "--cpus", "0-1", "-s", "a"])
        .assert()
        .success();

    // invalid
    host.cmd()
        .args(["acquire", "--cpus", "4", "-s", "b"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("error:"));
    // insufficient
    host.cmd()
        .args(["acquire", "--count", "3", "-s", "b"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("error:"));
    // conflict
    host.cmd()
        .args(["acquire", "--cpus", "1-2", "-s", "b"])
        .assert()
        .code(4)
        .stderr(predicate::str::contains("error:"));

    assert_eq!(host.leased(), vec![0, 1]);
}

#[test]
fn test_malformed_cpu_list_is_a_usage_error() {
    let host = TestHost::new(4);
    host.cmd()
        .args(["acquire", "--cpus", "3-1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--cpus"));
    host.cmd()
        .args(["acquire", "--count", "1", "--cpus", "1"])
        .assert()
        .failure();
}

#[test]
fn test_corrupt_state_is_reported() {
    let host = TestHost::new(4);
    std::fs::create_dir_all(host.state_dir()).unwrap();
    std::fs::write(host.state_dir().join("leases.json"), "{ not json").unwrap();

    host.cmd()
        .args(["acquire", "-c", "1", "-s", "a"])
        .assert()
        .code(6)
        .stderr(predicate::str::contains("error:"));
    assert_eq!(
        std::fs::read_to_string(host.state_dir().join("leases.json")).unwrap(),
        "{ not json"
    );
}

#[test]
fn test_clear_requires_confirmation() {
    let host = TestHost::new(4);
    host.cmd()
        .args(["acquire", "-c", "2", "-s", "a"])
        .assert()
        .success();

    host.cmd().arg("clear").assert().code(2);
    assert_eq!(host.leased(), vec![0, 1]);

    host.cmd()
        .args(["clear", "--yes"])
        .assert()
        .success()
        .stdout("a 0,1\n");
    assert!(host.leased().is_empty());
}

#[test]
fn test_concurrent_processes_get_disjoint_cores() {
    let host = TestHost::new(8);

    let grants: Vec<Vec<u32>> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let host = &host;
                s.spawn(move || {
                    let session = format!("s{}", i);
                    let output = host
                        .cmd()
                        .args(["acquire", "--count", "1", "--session", &session])
                        .output()
                        .unwrap();
                    assert!(output.status.success(), "acquire failed: {:?}", output);
                    stdout_cores(&output)
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let cores: BTreeSet<u32> = grants.iter().flatten().copied().collect();
    assert_eq!(cores, (0..8).collect::<BTreeSet<u32>>());
    assert!(grants.iter().all(|g| g.len() == 1));

    host.cmd()
        .args(["acquire", "--count", "1", "--session", "late"])
        .assert()
        .code(3);
}

#[test]
fn test_lock_timeout_exit_code() {
    let host = TestHost::new(4);
    host.cmd()
        .args(["acquire", "-c", "1", "-s", "a"])
        .assert()
        .success();

    let store = corelease::LeaseStore::open(&host.state_dir(), 4).unwrap();
    let held = store.lock(None).unwrap();
    host.cmd_with_timeout(1)
        .args(["acquire", "-c", "1", "-s", "b"])
        .assert()
        .code(5)
        .stderr(predicate::str::contains("Timed out"));
    host.cmd_with_timeout(1)
        .args(["release", "-s", "a"])
        .assert()
        .code(5);
    drop(held);

    assert_eq!(host.leased(), vec![0]);
}
