//! Start/stop lifecycle of mock servers through the instance registry
#![cfg(unix)]

use std::time::{Duration, Instant};

use mockyard_daemon::errors::DaemonError;
use mockyard_daemon::process::{TerminateOutcome, is_process_alive};
use mockyard_tests::{
    MockScript, TestDaemonHarness, wait_for_log_line, wait_for_not_running,
    wait_until,
};
use serde_json::json;

const WAIT: Duration = Duration::from_secs(5);

fn harness(script: MockScript) -> TestDaemonHarness {
    let harness = TestDaemonHarness::new(script).unwrap();
    harness.upload("users.json", &json!({ "name": "users", "routes": [] }));
    harness
}

#[tokio::test]
async fn mock_server_receives_config_and_port() {
    let harness = harness(MockScript::LongRunning);

    harness.registry().start(9101, "users.json").await.unwrap();

    let config_path = harness.store().configs_dir().join("users.json");
    let expected = format!("[stdout] serving {} on port 9101", config_path.display());
    let log = wait_for_log_line(&harness.log_path(9101), &expected, WAIT)
        .await
        .unwrap();
    assert!(log.contains("[stderr] ready"), "{log}");
    assert!(log.contains("[mockyard] started: "), "{log}");

    harness.registry().stop(9101).await.unwrap();
}

#[tokio::test]
async fn stop_removes_instance_and_kills_process() {
    let harness = harness(MockScript::LongRunning);

    let started = harness.registry().start(9102, "users.json").await.unwrap();
    let pid = started.pid.unwrap();
    assert!(is_process_alive(pid));

    let stopped = harness.registry().stop(9102).await.unwrap();
    assert_eq!(stopped.port, 9102);
    assert_eq!(stopped.config.as_str(), "users.json");
    assert!(matches!(stopped.outcome, TerminateOutcome::Graceful { .. }));

    assert!(harness.registry().status().is_empty());
    assert!(!is_process_alive(pid));

    let log = std::fs::read_to_string(harness.log_path(9102)).unwrap();
    assert!(log.contains("[mockyard] stopped: stopped with code"), "{log}");
}

#[tokio::test]
async fn stop_escalates_to_sigkill() {
    let harness = harness(MockScript::IgnoresTerm);

    let started = harness.registry().start(9103, "users.json").await.unwrap();
    let pid = started.pid.unwrap();
    wait_for_log_line(&harness.log_path(9103), "stubborn on port 9103", WAIT)
        .await
        .unwrap();

    let begun = Instant::now();
    let stopped = harness.registry().stop(9103).await.unwrap();
    assert!(matches!(stopped.outcome, TerminateOutcome::Killed));
    assert!(begun.elapsed() < Duration::from_secs(4), "took {:?}", begun.elapsed());
    assert!(!is_process_alive(pid));

    let log = std::fs::read_to_string(harness.log_path(9103)).unwrap();
    assert!(log.contains("killed after stop timeout"), "{log}");
}

#[tokio::test]
async fn exit_during_startup_is_spawn_failure() {
    let harness = harness(MockScript::FailsImmediately { code: 3 });

    let err = harness.registry().start(9104, "users.json").await.unwrap_err();
    assert!(matches!(err, DaemonError::SpawnFailed { port: 9104, .. }), "{err:?}");
    assert!(harness.registry().status().is_empty());

    wait_for_log_line(&harness.log_path(9104), "[stderr] cannot serve", WAIT)
        .await
        .unwrap();

    // The config is free to delete again
    harness.store().delete("users.json", &**harness.registry()).unwrap();
}

#[tokio::test]
async fn missing_binary_is_spawn_failure() {
    let harness = TestDaemonHarness::with_settings(MockScript::LongRunning, |s| {
        s.mock_bin = s.mock_bin.with_file_name("no-such-mock-server");
    })
    .unwrap();
    harness.upload("users.json", &json!({}));

    let err = harness.registry().start(9105, "users.json").await.unwrap_err();
    assert!(matches!(err, DaemonError::SpawnFailed { port: 9105, .. }), "{err:?}");
    assert!(harness.registry().status().is_empty());
}

#[tokio::test]
async fn crashed_server_is_reconciled() {
    let harness = harness(MockScript::ExitsAfter {
        after: Duration::from_millis(400),
        code: 9,
    });

    harness.registry().start(9106, "users.json").await.unwrap();
    assert_eq!(harness.registry().status().len(), 1);

    wait_for_not_running(harness.registry(), 9106, WAIT).await.unwrap();

    let err = harness.registry().stop(9106).await.unwrap_err();
    assert!(matches!(err, DaemonError::InstanceNotFound(9106)));
    harness.store().delete("users.json", &**harness.registry()).unwrap();

    wait_for_log_line(&harness.log_path(9106), "stopped: exited with code Some(9)", WAIT)
        .await
        .unwrap();
}

#[tokio::test]
async fn restart_on_same_port_appends_log() {
    let harness = harness(MockScript::LongRunning);
    let log_path = harness.log_path(9107);

    for run in 1..=2 {
        harness.registry().start(9107, "users.json").await.unwrap();
        wait_until(WAIT, || {
            let log = std::fs::read_to_string(&log_path).unwrap_or_default();
            log.matches("[stderr] ready").count() == run
        })
        .await
        .unwrap();
        harness.registry().stop(9107).await.unwrap();
    }

    let log = std::fs::read_to_string(&log_path).unwrap();
    assert_eq!(log.matches("[mockyard] started: ").count(), 2, "{log}");
    assert_eq!(log.matches("[mockyard] stopped: ").count(), 2, "{log}");
    assert_eq!(log.matches("[stderr] ready").count(), 2, "{log}");
}

#[tokio::test]
async fn shutdown_stops_everything() {
    let harness = harness(MockScript::LongRunning);

    let mut pids = Vec::new();
    for port in [9110, 9111, 9112] {
        let started = harness.registry().start(port, "users.json").await.unwrap();
        pids.push(started.pid.unwrap());
    }

    assert_eq!(harness.shutdown().await, 3);
    assert!(harness.registry().status().is_empty());
    for pid in pids {
        assert!(!is_process_alive(pid), "pid {pid} survived shutdown");
    }
}
