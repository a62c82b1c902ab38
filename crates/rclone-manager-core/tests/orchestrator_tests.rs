//! End-to-end tests for the orchestrator with real child processes.
//!
//! The rclone binary is replaced by a script that sleeps, and the rc API by
//! an in-memory fake, so these run without rclone or FUSE.

mod common;

use common::{fake_rclone, fast_settings, wait_until, FakeControl};
use rclone_manager_core::platform::{is_mounted, is_process_alive, signal_process, ProcessSignal};
use rclone_manager_core::{
    DesiredState, ManagerError, MountSpec, Orchestrator, Phase, ServeSpec, YamlConfigSource,
};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;

fn orchestrator(control: Arc<FakeControl>) -> Orchestrator {
    Orchestrator::with_control(fast_settings(), control)
}

fn serves(names: &[&str]) -> DesiredState {
    let serves = names
        .iter()
        .enumerate()
        .map(|(i, name)| ServeSpec::new(*name, "webdav", format!(":{}", 8080 + i)))
        .collect();
    DesiredState::new(Vec::new(), serves)
}

fn serve_pids(orchestrator: &Orchestrator) -> Vec<(String, u32)> {
    orchestrator
        .status()
        .serves
        .into_iter()
        .map(|s| (s.backend, s.pid))
        .collect()
}

fn all_pids(orchestrator: &Orchestrator) -> Vec<u32> {
    let status = orchestrator.status();
    status
        .mounts
        .iter()
        .chain(status.serves.iter())
        .map(|s| s.pid)
        .chain(status.daemon_pid)
        .collect()
}

#[tokio::test]
async fn test_mount_path_change_replaces_workload() {
    let temp_dir = TempDir::new().unwrap();
    let b1 = temp_dir.path().join("b1");
    let b2 = temp_dir.path().join("b2");
    let control = Arc::new(FakeControl::default());
    let orchestrator = orchestrator(Arc::clone(&control));

    orchestrator
        .initialize(DesiredState::new(vec![MountSpec::new("b1", &b1)], Vec::new()))
        .await
        .unwrap();
    assert_eq!(orchestrator.phase(), Phase::Running);
    assert!(b1.is_dir());

    let status = orchestrator.status();
    assert_eq!(status.mounts.len(), 1);
    assert_eq!(status.mounts[0].backend, "b1");
    assert_eq!(Path::new(&status.mounts[0].destination), b1.as_path());
    let old_pid = status.mounts[0].pid;

    let outcome = orchestrator
        .reconcile(DesiredState::new(vec![MountSpec::new("b1", &b2)], Vec::new()))
        .await
        .unwrap();
    assert_eq!(outcome.mounts.unwrap().replaced, vec!["b1".to_string()]);

    let status = orchestrator.status();
    assert_eq!(status.mounts.len(), 1);
    assert_eq!(Path::new(&status.mounts[0].destination), b2.as_path());
    assert_ne!(status.mounts[0].pid, old_pid);
    assert!(!is_process_alive(old_pid));
    assert!(!is_mounted(&b1).await);
    // Mount processes own their mounts; the daemon is never asked to release them.
    assert_eq!(control.calls(), vec!["options/get"]);

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_removed_mount_is_released_without_daemon() {
    let temp_dir = TempDir::new().unwrap();
    let m1 = temp_dir.path().join("m1");
    let control = Arc::new(FakeControl::default());
    let orchestrator = orchestrator(Arc::clone(&control));
    orchestrator
        .initialize(DesiredState::new(vec![MountSpec::new("m1", &m1)], Vec::new()))
        .await
        .unwrap();
    let pid = orchestrator.status().mounts[0].pid;

    let outcome = orchestrator.reconcile(DesiredState::default()).await.unwrap();
    assert_eq!(outcome.mounts.unwrap().stopped, vec!["m1".to_string()]);
    assert!(orchestrator.status().mounts.is_empty());
    assert!(!is_process_alive(pid));
    assert!(!is_mounted(&m1).await);
    assert_eq!(control.calls(), vec!["options/get"]);

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_reconcile_from_empty_yields_exactly_desired() {
    let temp_dir = TempDir::new().unwrap();
    let orchestrator = orchestrator(Arc::new(FakeControl::default()));
    orchestrator.initialize(DesiredState::default()).await.unwrap();
    assert!(orchestrator.status().serves.is_empty());

    let desired = DesiredState::new(
        vec![
            MountSpec::new("m1", temp_dir.path().join("m1")),
            MountSpec::new("m2", temp_dir.path().join("m2")),
        ],
        serves(&["s1", "s2", "s3"]).serves,
    );
    orchestrator.reconcile(desired).await.unwrap();

    let status = orchestrator.status();
    let mounts: BTreeSet<_> = status.mounts.iter().map(|s| s.backend.as_str()).collect();
    let serves: BTreeSet<_> = status.serves.iter().map(|s| s.backend.as_str()).collect();
    assert_eq!(mounts, BTreeSet::from(["m1", "m2"]));
    assert_eq!(serves, BTreeSet::from(["s1", "s2", "s3"]));

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_reconcile_twice_starts_nothing_new() {
    let orchestrator = orchestrator(Arc::new(FakeControl::default()));
    orchestrator.initialize(serves(&["a", "b"])).await.unwrap();
    let before = serve_pids(&orchestrator);

    let outcome = orchestrator.reconcile(serves(&["a", "b"])).await.unwrap();
    assert!(!outcome.changed());
    assert_eq!(outcome.serves.unwrap().unchanged.len(), 2);
    assert_eq!(serve_pids(&orchestrator), before);

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_removed_identities_are_stopped() {
    let orchestrator = orchestrator(Arc::new(FakeControl::default()));
    orchestrator.initialize(serves(&["a", "b", "c"])).await.unwrap();
    let before = serve_pids(&orchestrator);

    let outcome = orchestrator.reconcile(serves(&["a"])).await.unwrap();
    let report = outcome.serves.unwrap();
    assert_eq!(report.stopped, vec!["b".to_string(), "c".to_string()]);

    let after = serve_pids(&orchestrator);
    assert_eq!(after, vec![before[0].clone()]);
    for (_, pid) in &before[1..] {
        assert!(!is_process_alive(*pid));
    }

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_removing_every_entry_empties_kind() {
    let orchestrator = orchestrator(Arc::new(FakeControl::default()));
    orchestrator.initialize(serves(&["a", "b"])).await.unwrap();
    let pids: Vec<u32> = serve_pids(&orchestrator).into_iter().map(|(_, p)| p).collect();

    orchestrator.reconcile(DesiredState::default()).await.unwrap();

    assert!(orchestrator.status().serves.is_empty());
    assert!(pids.iter().all(|pid| !is_process_alive(*pid)));
    // The daemon keeps running with nothing configured.
    assert!(orchestrator.daemon().is_running());

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_environment_change_replaces_workload() {
    let orchestrator = orchestrator(Arc::new(FakeControl::default()));
    orchestrator.initialize(serves(&["a"])).await.unwrap();
    let old_pid = serve_pids(&orchestrator)[0].1;

    let mut desired = serves(&["a"]);
    desired.serves[0] = desired.serves[0].clone().with_env("RCLONE_READ_ONLY", "true");
    let outcome = orchestrator.reconcile(desired).await.unwrap();

    assert_eq!(outcome.serves.unwrap().replaced, vec!["a".to_string()]);
    assert_ne!(serve_pids(&orchestrator)[0].1, old_pid);

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_invalid_reconcile_changes_nothing() {
    let orchestrator = orchestrator(Arc::new(FakeControl::default()));
    orchestrator.initialize(serves(&["a"])).await.unwrap();
    let before = serve_pids(&orchestrator);

    let duplicate = DesiredState::new(
        Vec::new(),
        vec![
            ServeSpec::new("a", "webdav", ":8080"),
            ServeSpec::new("a", "http", ":8081"),
        ],
    );
    let err = orchestrator.reconcile(duplicate).await.unwrap_err();
    assert!(matches!(err, ManagerError::DuplicateBackend { .. }));
    assert_eq!(serve_pids(&orchestrator), before);
    assert_eq!(orchestrator.desired_state(), serves(&["a"]));

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_dead_workload_restarted_after_grace() {
    let settings = fast_settings().with_supervisor(
        fast_settings()
            .supervisor
            .with_grace_period(Duration::from_millis(200))
            .with_monitor_interval(Duration::from_millis(50)),
    );
    let orchestrator = Orchestrator::with_control(settings, Arc::new(FakeControl::default()));
    orchestrator.initialize(serves(&["a"])).await.unwrap();
    let old_pid = serve_pids(&orchestrator)[0].1;

    tokio::time::sleep(Duration::from_millis(250)).await;
    signal_process(old_pid, ProcessSignal::Kill).unwrap();

    let restarted = wait_until(Duration::from_secs(5), || {
        serve_pids(&orchestrator)
            .first()
            .is_some_and(|(_, pid)| *pid != old_pid)
    })
    .await;
    assert!(restarted);
    assert!(is_process_alive(serve_pids(&orchestrator)[0].1));

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_death_within_grace_is_not_restarted() {
    let settings = fast_settings().with_supervisor(
        fast_settings()
            .supervisor
            .with_grace_period(Duration::from_secs(60))
            .with_monitor_interval(Duration::from_millis(50)),
    );
    let orchestrator = Orchestrator::with_control(settings, Arc::new(FakeControl::default()));
    orchestrator.initialize(serves(&["a"])).await.unwrap();
    let old_pid = serve_pids(&orchestrator)[0].1;

    signal_process(old_pid, ProcessSignal::Kill).unwrap();
    tokio::time::sleep(Duration::from_millis(400)).await;

    let status = orchestrator.status();
    assert_eq!(status.serves[0].pid, old_pid);
    assert!(status.serves[0].exited);
    assert!(status.serves[0].in_grace_period);

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_daemon_never_ready_fails_startup() {
    let control = Arc::new(FakeControl::default());
    control.fail_ping.store(true, Ordering::SeqCst);
    let orchestrator = orchestrator(Arc::clone(&control));

    let err = orchestrator.initialize(serves(&["a"])).await.unwrap_err();
    assert!(matches!(err, ManagerError::DaemonNotReady { attempts: 3 }));
    assert_eq!(control.pings.load(Ordering::SeqCst), 3);
    assert!(orchestrator.status().serves.is_empty());

    let daemon_pid = orchestrator.daemon().pid().unwrap();
    orchestrator.shutdown().await;
    assert!(!is_process_alive(daemon_pid));
    assert_eq!(orchestrator.phase(), Phase::Stopped);
}

#[tokio::test]
async fn test_shutdown_mid_startup_does_not_block() {
    let control = Arc::new(FakeControl::default());
    control.fail_ping.store(true, Ordering::SeqCst);
    let settings = fast_settings()
        .with_ready_attempts(1_000)
        .with_ready_interval(Duration::from_millis(50));
    let orchestrator = Arc::new(Orchestrator::with_control(settings, control));

    let mut phases = orchestrator.subscribe_phase();
    let startup = tokio::spawn({
        let orchestrator = Arc::clone(&orchestrator);
        async move { orchestrator.initialize(serves(&["a"])).await }
    });

    tokio::time::timeout(
        Duration::from_secs(5),
        phases.wait_for(|phase| *phase == Phase::WaitingReady),
    )
    .await
    .unwrap()
    .unwrap();
    let daemon_pid = orchestrator.daemon().pid().unwrap();

    tokio::time::timeout(Duration::from_secs(10), orchestrator.shutdown())
        .await
        .unwrap();

    let result = tokio::time::timeout(Duration::from_secs(5), startup)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(result, Err(ManagerError::Cancelled)));
    assert!(!is_process_alive(daemon_pid));
    assert!(orchestrator.status().serves.is_empty());
    assert_eq!(orchestrator.phase(), Phase::Stopped);
}

#[tokio::test]
async fn test_shutdown_stops_everything_and_is_idempotent() {
    let temp_dir = TempDir::new().unwrap();
    let control = Arc::new(FakeControl::default());
    let orchestrator = orchestrator(Arc::clone(&control));
    orchestrator
        .initialize(DesiredState::new(
            vec![MountSpec::new("m1", temp_dir.path().join("m1"))],
            serves(&["a", "b"]).serves,
        ))
        .await
        .unwrap();
    let pids = all_pids(&orchestrator);
    assert_eq!(pids.len(), 4);

    orchestrator.shutdown().await;
    orchestrator.shutdown().await;

    assert!(pids.iter().all(|pid| !is_process_alive(*pid)));
    assert_eq!(orchestrator.phase(), Phase::Stopped);
    assert!(orchestrator.daemon().pid().is_none());
    assert_eq!(control.calls(), vec!["options/get"]);
    assert!(temp_dir.path().join("m1").is_dir());

    let err = orchestrator.reconcile(serves(&["a"])).await.unwrap_err();
    assert!(matches!(err, ManagerError::Cancelled));
}

#[tokio::test]
async fn test_failed_start_leaves_others_running() {
    let temp_dir = TempDir::new().unwrap();
    // A regular file where the mount point should be cannot be prepared.
    let blocked = temp_dir.path().join("blocked");
    std::fs::write(&blocked, b"").unwrap();

    let orchestrator = orchestrator(Arc::new(FakeControl::default()));
    orchestrator
        .initialize(DesiredState::new(
            vec![
                MountSpec::new("bad", &blocked),
                MountSpec::new("good", temp_dir.path().join("good")),
            ],
            Vec::new(),
        ))
        .await
        .unwrap();

    let mounts: Vec<String> = orchestrator
        .status()
        .mounts
        .into_iter()
        .map(|s| s.backend)
        .collect();
    assert_eq!(mounts, vec!["good".to_string()]);

    orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_reconfiguration_trigger_reloads_file() {
    let temp_dir = TempDir::new().unwrap();
    let config = temp_dir.path().join("config.yaml");
    std::fs::write(&config, "serves:\n  - backendName: a\n    protocol: webdav\n    addr: \":8080\"\n")
        .unwrap();

    let orchestrator = Arc::new(orchestrator(Arc::new(FakeControl::default())));
    orchestrator
        .initialize(DesiredState::load(&config).await.unwrap())
        .await
        .unwrap();

    let (tx, rx) = mpsc::channel(8);
    orchestrator
        .spawn_reconfiguration_trigger(Arc::new(YamlConfigSource::new(&config)), rx)
        .await;

    // Broken document: logged and ignored.
    std::fs::write(&config, "serves: [ {").unwrap();
    tx.send(()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(serve_pids(&orchestrator).len(), 1);

    std::fs::write(
        &config,
        "serves:\n  - backendName: a\n    protocol: webdav\n    addr: \":8080\"\n  - backendName: b\n    protocol: http\n    addr: \":8081\"\n",
    )
    .unwrap();
    tx.send(()).await.unwrap();
    tx.send(()).await.unwrap();

    let reloaded = wait_until(Duration::from_secs(5), || serve_pids(&orchestrator).len() == 2).await;
    assert!(reloaded);

    tokio::time::timeout(Duration::from_secs(10), orchestrator.shutdown())
        .await
        .unwrap();
    assert!(serve_pids(&orchestrator).is_empty());
}

#[tokio::test]
async fn test_shutdown_before_initialize() {
    let orchestrator = Orchestrator::new(fast_settings()).unwrap();
    assert_eq!(orchestrator.phase(), Phase::Created);
    assert!(orchestrator.daemon().pid().is_none());
    assert!(orchestrator.mount_supervisor().is_none());
    assert!(fake_rclone().exists());

    orchestrator.shutdown().await;
    assert_eq!(orchestrator.phase(), Phase::Stopped);
}
