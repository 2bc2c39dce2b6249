use super::*;
use std::path::PathBuf;

use tempfile::TempDir;

const LONG_RUNNING: &str = "exec sleep 30";

struct Fixture {
    _dir: TempDir,
    registry: Arc<InstanceRegistry>,
}

#[cfg(unix)]
fn write_script(dir: &TempDir, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.path().join("mock-server.sh");
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

#[cfg(unix)]
fn fixture_with_probe(body: &str, probe: Arc<dyn PortProbe>) -> Fixture {
    build_fixture(body, probe, Duration::from_secs(5))
}

#[cfg(unix)]
fn build_fixture(body: &str, probe: Arc<dyn PortProbe>, stop_timeout: Duration) -> Fixture {
    let dir = TempDir::new().unwrap();
    let program = write_script(&dir, body);
    let store = Arc::new(
        ConfigStore::open(dir.path().join("configs"), dir.path().join("uploads")).unwrap(),
    );
    store.upload("a.json", br#"{"routes": []}"#).unwrap();
    store.upload("b.json", br#"{"routes": []}"#).unwrap();

    let supervisor = Supervisor::new(
        program,
        dir.path().join("logs"),
        stop_timeout,
        Duration::from_millis(100),
    );
    let registry = InstanceRegistry::new(supervisor, store, probe);
    Fixture {
        _dir: dir,
        registry,
    }
}

#[cfg(unix)]
fn fixture(body: &str) -> Fixture {
    fixture_with_probe(body, Arc::new(|_port: u16| false))
}

fn ports(registry: &InstanceRegistry) -> Vec<u16> {
    registry.status().iter().map(|s| s.port).collect()
}

#[cfg(unix)]
#[tokio::test]
async fn start_status_stop_scenario() {
    let fx = fixture(LONG_RUNNING);

    let started = fx.registry.start(9050, "a.json").await.unwrap();
    assert_eq!(started.port, 9050);
    assert_eq!(started.config.as_str(), "a.json");
    assert!(started.pid.is_some());

    let status = fx.registry.status();
    assert_eq!(status.len(), 1);
    assert_eq!(status[0].port, 9050);
    assert_eq!(status[0].to_status().config_file, "a.json");

    fx.registry.stop(9050).await.unwrap();
    assert!(fx.registry.status().is_empty());
}

#[cfg(unix)]
#[tokio::test]
async fn start_out_of_range_is_invalid_port() {
    let fx = fixture(LONG_RUNNING);

    for port in [80, 9000, 10000, -1, 70000] {
        let err = fx.registry.start(port, "a.json").await.unwrap_err();
        assert!(matches!(err, DaemonError::InvalidPort(p) if p == port), "got {err:?}");
    }
    assert!(fx.registry.status().is_empty());
}

#[cfg(unix)]
#[tokio::test]
async fn start_on_registered_port_is_port_in_use() {
    let fx = fixture(LONG_RUNNING);

    fx.registry.start(9051, "a.json").await.unwrap();
    let err = fx.registry.start(9051, "b.json").await.unwrap_err();
    assert!(matches!(err, DaemonError::PortInUse(9051)));

    // The original instance is untouched
    let status = fx.registry.status();
    assert_eq!(status.len(), 1);
    assert_eq!(status[0].config.as_str(), "a.json");

    fx.registry.shutdown_all().await;
}

#[cfg(unix)]
#[tokio::test]
async fn start_on_port_occupied_by_host_is_port_in_use() {
    let fx = fixture_with_probe(LONG_RUNNING, Arc::new(|port: u16| port == 9052));

    let err = fx.registry.start(9052, "a.json").await.unwrap_err();
    assert!(matches!(err, DaemonError::PortInUse(9052)));
    assert!(fx.registry.status().is_empty());
    assert!(!fx.registry.is_config_in_use(&ConfigName::parse("a.json").unwrap()));
}

#[cfg(unix)]
#[tokio::test]
async fn occupied_port_is_reported_before_bad_config_name() {
    let fx = fixture_with_probe(LONG_RUNNING, Arc::new(|port: u16| port == 9052));

    for name in ["../etc/passwd", "missing.json", ""] {
        let err = fx.registry.start(9052, name).await.unwrap_err();
        assert!(matches!(err, DaemonError::PortInUse(9052)), "{name}: got {err:?}");
    }

    fx.registry.start(9061, "a.json").await.unwrap();
    let err = fx.registry.start(9061, "../etc/passwd").await.unwrap_err();
    assert!(matches!(err, DaemonError::PortInUse(9061)), "got {err:?}");

    fx.registry.shutdown_all().await;
}

#[cfg(unix)]
#[tokio::test]
async fn start_with_unknown_config_leaves_no_entry() {
    let fx = fixture(LONG_RUNNING);

    let err = fx.registry.start(9053, "missing.json").await.unwrap_err();
    assert!(matches!(err, DaemonError::ConfigNotFound(_)));

    let err = fx.registry.start(9053, "../etc/passwd").await.unwrap_err();
    assert!(matches!(err, DaemonError::ConfigNotFound(_)));

    // Port is free again
    fx.registry.start(9053, "a.json").await.unwrap();
    fx.registry.shutdown_all().await;
}

#[cfg(unix)]
#[tokio::test]
async fn concurrent_starts_on_one_port_admit_exactly_one() {
    let fx = fixture(LONG_RUNNING);

    let (first, second) = tokio::join!(
        fx.registry.start(9054, "a.json"),
        fx.registry.start(9054, "b.json"),
    );

    let results = [first, second];
    let ok = results.iter().filter(|r| r.is_ok()).count();
    let in_use = results
        .iter()
        .filter(|r| matches!(r, Err(DaemonError::PortInUse(9054))))
        .count();
    assert_eq!((ok, in_use), (1, 1));
    assert_eq!(ports(&fx.registry), vec![9054]);

    fx.registry.shutdown_all().await;
}

#[cfg(unix)]
#[tokio::test]
async fn spawn_failure_leaves_no_entry() {
    let fx = fixture("exit 1");

    let err = fx.registry.start(9055, "a.json").await.unwrap_err();
    assert!(matches!(err, DaemonError::SpawnFailed { port: 9055, .. }), "got {err:?}");
    assert!(fx.registry.status().is_empty());
    assert!(!fx.registry.is_config_in_use(&ConfigName::parse("a.json").unwrap()));
}

#[cfg(unix)]
#[tokio::test]
async fn stop_unregistered_port_is_not_found() {
    let fx = fixture(LONG_RUNNING);
    fx.registry.start(9056, "a.json").await.unwrap();

    for port in [9057, 80, -5, 1 << 40] {
        let err = fx.registry.stop(port).await.unwrap_err();
        assert!(matches!(err, DaemonError::InstanceNotFound(p) if p == port));
    }
    assert_eq!(ports(&fx.registry), vec![9056]);

    fx.registry.shutdown_all().await;
}

#[cfg(unix)]
#[tokio::test]
async fn status_is_sorted_by_port() {
    let fx = fixture(LONG_RUNNING);

    for port in [9300, 9100, 9200] {
        fx.registry.start(port, "a.json").await.unwrap();
    }
    assert_eq!(ports(&fx.registry), vec![9100, 9200, 9300]);
    assert_eq!(fx.registry.shutdown_all().await, 3);
    assert!(fx.registry.status().is_empty());
}

#[cfg(unix)]
#[tokio::test]
async fn config_in_use_blocks_delete_until_stopped() {
    let fx = fixture(LONG_RUNNING);
    let store = fx.registry.store().clone();

    fx.registry.start(9058, "a.json").await.unwrap();
    assert!(fx.registry.is_config_in_use(&ConfigName::parse("a.json").unwrap()));

    let err = store.delete("a.json", &*fx.registry).unwrap_err();
    assert!(matches!(err, DaemonError::ConfigInUse(_)));
    assert!(store.resolve("a.json").is_ok());

    let listed = store.list(&*fx.registry).unwrap();
    assert!(listed.iter().any(|c| c.name.as_str() == "a.json" && c.in_use));
    assert!(listed.iter().any(|c| c.name.as_str() == "b.json" && !c.in_use));

    fx.registry.stop(9058).await.unwrap();
    store.delete("a.json", &*fx.registry).unwrap();
}

#[cfg(unix)]
#[tokio::test]
async fn crashed_instance_is_reconciled() {
    let fx = fixture("sleep 0.5\nexit 2");

    fx.registry.start(9059, "a.json").await.unwrap();
    assert_eq!(ports(&fx.registry), vec![9059]);

    let deadline = Instant::now() + Duration::from_secs(5);
    while !fx.registry.status().is_empty() {
        assert!(Instant::now() < deadline, "crashed instance still listed");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    assert!(!fx.registry.is_config_in_use(&ConfigName::parse("a.json").unwrap()));
    let err = fx.registry.stop(9059).await.unwrap_err();
    assert!(matches!(err, DaemonError::InstanceNotFound(9059)));
}

#[cfg(unix)]
#[tokio::test]
async fn stale_exit_event_does_not_evict_new_instance() {
    let fx = fixture(LONG_RUNNING);

    let started = fx.registry.start(9060, "a.json").await.unwrap();
    fx.registry.handle_process_exit(&ProcessExitEvent {
        port: started.port,
        instance_id: u64::MAX,
        exit_code: Some(1),
    });
    assert_eq!(ports(&fx.registry), vec![9060]);

    fx.registry.shutdown_all().await;
}

#[cfg(unix)]
#[tokio::test]
async fn stopping_instance_keeps_port_and_config_until_reaped() {
    let fx = build_fixture(
        "trap '' TERM\nexec sleep 30",
        Arc::new(|_port: u16| false),
        Duration::from_secs(1),
    );
    let store = fx.registry.store().clone();
    let a = ConfigName::parse("a.json").unwrap();

    fx.registry.start(9062, "a.json").await.unwrap();

    let registry = fx.registry.clone();
    let stopping = tokio::spawn(async move { registry.stop(9062).await });
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(!stopping.is_finished());

    let err = fx.registry.start(9062, "b.json").await.unwrap_err();
    assert!(matches!(err, DaemonError::PortInUse(9062)), "got {err:?}");
    assert!(fx.registry.is_config_in_use(&a));
    let err = store.delete("a.json", &*fx.registry).unwrap_err();
    assert!(matches!(err, DaemonError::ConfigInUse(_)), "got {err:?}");
    assert!(fx.registry.status().is_empty());
    let err = fx.registry.stop(9062).await.unwrap_err();
    assert!(matches!(err, DaemonError::InstanceNotFound(9062)), "got {err:?}");

    let stopped = stopping.await.unwrap().unwrap();
    assert_eq!(stopped.outcome, TerminateOutcome::Killed);

    assert!(!fx.registry.is_config_in_use(&a));
    store.delete("a.json", &*fx.registry).unwrap();
    fx.registry.start(9062, "b.json").await.unwrap();
    fx.registry.shutdown_all().await;
}

#[cfg(unix)]
#[tokio::test]
async fn shutdown_keeps_ports_taken_until_processes_are_gone() {
    let fx = build_fixture(
        "trap '' TERM\nexec sleep 30",
        Arc::new(|_port: u16| false),
        Duration::from_secs(1),
    );

    fx.registry.start(9063, "a.json").await.unwrap();

    let registry = fx.registry.clone();
    let shutdown = tokio::spawn(async move { registry.shutdown_all().await });
    tokio::time::sleep(Duration::from_millis(300)).await;

    let err = fx.registry.start(9063, "a.json").await.unwrap_err();
    assert!(matches!(err, DaemonError::PortInUse(9063)), "got {err:?}");
    assert!(fx.registry.is_config_in_use(&ConfigName::parse("a.json").unwrap()));

    assert_eq!(shutdown.await.unwrap(), 1);
    assert!(!fx.registry.is_config_in_use(&ConfigName::parse("a.json").unwrap()));
}

#[tokio::test]
async fn failed_terminate_removes_entry_and_maps_to_server_error() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(
        ConfigStore::open(dir.path().join("configs"), dir.path().join("uploads")).unwrap(),
    );
    store.upload("a.json", br#"{"routes": []}"#).unwrap();
    let supervisor = Supervisor::new(
        dir.path().join("missing-mock-server"),
        dir.path().join("logs"),
        Duration::from_secs(1),
        Duration::ZERO,
    );
    let registry = InstanceRegistry::new(supervisor, store, Arc::new(|_port: u16| false));
    let a = ConfigName::parse("a.json").unwrap();

    let handle = ProcessHandle::answering(
        9064,
        Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "process survived SIGKILL")),
    );
    registry.slots.lock().insert(
        9064,
        Slot::Running(Instance {
            id: 7,
            config: a.clone(),
            started_at: Utc::now(),
            started: Instant::now(),
            handle,
        }),
    );
    assert_eq!(ports(&registry), vec![9064]);

    let err = registry.stop(9064).await.unwrap_err();
    assert!(matches!(err, DaemonError::TerminateFailed { port: 9064, .. }), "got {err:?}");
    assert!(registry.status().is_empty());
    assert!(!registry.is_config_in_use(&a));

    let api = crate::api::ApiError::from_daemon(err, false);
    assert_eq!(api.status, axum::http::StatusCode::INTERNAL_SERVER_ERROR);
}
