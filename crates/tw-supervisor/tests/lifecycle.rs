//! Tunnel lifecycle integration tests
//!
//! Runs the supervisor against a fake tunnel binary: a shell script that
//! loops forever, so real processes are started, found, killed and
//! restarted through the host process table.

#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tempfile::TempDir;

use tw_core::config::WardenConfig;
use tw_core::error::{TunnelError, WardenError};
use tw_core::TunnelSpec;
use tw_supervisor::process::signal;
use tw_supervisor::{Convergence, Fleet, Reconciler, StartOutcome, StopOutcome};

/// Each test gets its own tunnel names; the process table is shared
static NAME_COUNTER: AtomicU16 = AtomicU16::new(0);

fn unique_name(prefix: &str) -> String {
    let n = NAME_COUNTER.fetch_add(1, Ordering::SeqCst);
    format!("{}-{}-{}", prefix, std::process::id(), n)
}

fn script(name: &str, body: &str) -> PathBuf {
    let dir = Path::new(env!("CARGO_TARGET_TMPDIR")).join(format!("fake-{}", std::process::id()));
    fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Scripts are written once, before any test spawns from them
struct FakeBinaries {
    looping: PathBuf,
    crashing: PathBuf,
}

fn binaries() -> &'static FakeBinaries {
    static BINARIES: OnceLock<FakeBinaries> = OnceLock::new();
    BINARIES.get_or_init(|| FakeBinaries {
        looping: script("cloudflared", "while :; do sleep 1; done"),
        crashing: script(
            "crashing-cloudflared",
            "echo \"ERR failed to connect to the edge\" >&2\nexit 1",
        ),
    })
}

fn fake_cloudflared() -> &'static Path {
    &binaries().looping
}

fn crashing_cloudflared() -> &'static Path {
    &binaries().crashing
}

fn test_config(dir: &TempDir, binary: &Path) -> WardenConfig {
    let mut config = WardenConfig::rooted_at(dir.path());
    config.binary = binary.display().to_string();
    config.settle_delay = Duration::from_millis(300);
    config.stop_grace = Duration::from_secs(2);
    config
}

/// Write a config document and credentials for `name`
async fn configure(fleet: &Fleet, name: &str) {
    let spec = TunnelSpec::new(name, format!("{}.example.com", name), "8080");
    fleet.create(&spec, false).await.unwrap();
    fs::write(fleet.config().credentials_path(name), "{}").unwrap();
}

async fn wait_until_stopped(fleet: &Fleet, name: &str) {
    for _ in 0..50 {
        if !fleet.supervisor().is_running(name).await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("tunnel {} still running", name);
}

#[tokio::test]
async fn test_start_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let fleet = Fleet::new(test_config(&dir, fake_cloudflared()));
    let name = unique_name("idem");
    configure(&fleet, &name).await;

    let pid = match fleet.enable(&name).await.unwrap() {
        StartOutcome::Started { pid } => pid,
        other => panic!("unexpected outcome {:?}", other),
    };

    assert_eq!(
        fleet.start(&name).await.unwrap(),
        StartOutcome::AlreadyRunning { pids: vec![pid] }
    );
    assert_eq!(fleet.supervisor().find_processes(&name).await, vec![pid]);

    let status = fleet.status_of(&name).await.unwrap();
    assert!(status.enabled && status.running);
    assert!(status.started_at.is_some());

    let log = fs::read_to_string(fleet.config().log_path(&name)).unwrap();
    assert!(log.contains(&format!("=== Tunnel {} started at", name)));

    fleet.stop(&name).await.unwrap();
    wait_until_stopped(&fleet, &name).await;
}

#[tokio::test]
async fn test_concurrent_stops_both_succeed() {
    let dir = TempDir::new().unwrap();
    let fleet = Fleet::new(test_config(&dir, fake_cloudflared()));
    let name = unique_name("stop");
    configure(&fleet, &name).await;
    fleet.start(&name).await.unwrap();

    let (a, b) = tokio::join!(fleet.stop(&name), fleet.stop(&name));
    let outcomes = [a.unwrap(), b.unwrap()];
    assert_eq!(
        outcomes.iter().filter(|o| **o == StopOutcome::NotRunning).count(),
        1,
        "{:?}",
        outcomes
    );
    assert!(fleet.supervisor().find_processes(&name).await.is_empty());

    // Stopping a stopped tunnel keeps succeeding
    assert_eq!(fleet.stop(&name).await.unwrap(), StopOutcome::NotRunning);
}

#[tokio::test]
async fn test_killed_tunnel_is_restarted_by_next_sweep() {
    let dir = TempDir::new().unwrap();
    let fleet = Arc::new(Fleet::new(test_config(&dir, fake_cloudflared())));
    let name = unique_name("crash");
    configure(&fleet, &name).await;

    let StartOutcome::Started { pid } = fleet.enable(&name).await.unwrap() else {
        panic!("tunnel was already running");
    };
    let reconciler = Reconciler::new(Arc::clone(&fleet));
    assert_eq!(reconciler.sweep().await.started, 0);

    signal::force_kill(pid).unwrap();
    wait_until_stopped(&fleet, &name).await;

    let report = reconciler.sweep().await;
    assert_eq!(report.started, 1, "{:?}", report);
    let pids = fleet.supervisor().find_processes(&name).await;
    assert_eq!(pids.len(), 1);
    assert_ne!(pids[0], pid);

    fleet.disable(&name).await.unwrap();
    wait_until_stopped(&fleet, &name).await;
}

#[tokio::test]
async fn test_disabled_tunnel_stays_stopped() {
    let dir = TempDir::new().unwrap();
    let fleet = Arc::new(Fleet::new(test_config(&dir, fake_cloudflared())));
    let name = unique_name("off");
    configure(&fleet, &name).await;
    fleet.enable(&name).await.unwrap();

    assert!(matches!(
        fleet.disable(&name).await.unwrap(),
        StopOutcome::Stopped { .. }
    ));
    assert!(!fleet.store().is_enabled(&name).await);

    let report = Reconciler::new(Arc::clone(&fleet)).sweep().await;
    assert_eq!(report.checked, 0);
    assert!(!fleet.supervisor().is_running(&name).await);
}

#[tokio::test]
async fn test_new_supervisor_adopts_running_tunnel() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir, fake_cloudflared());
    let first = Fleet::new(config.clone());
    let name = unique_name("adopt");
    configure(&first, &name).await;
    first.enable(&name).await.unwrap();

    // A restarted supervisor has no runtime handles, only the process table
    let second = Fleet::new(config);
    assert_eq!(second.initialize().await.unwrap(), 0);
    assert!(matches!(
        second.start(&name).await.unwrap(),
        StartOutcome::AlreadyRunning { .. }
    ));
    let status = second.status_of(&name).await.unwrap();
    assert!(status.running && status.started_at.is_none());

    second.disable(&name).await.unwrap();
    wait_until_stopped(&first, &name).await;
}

#[tokio::test]
async fn test_exited_process_fails_verification_with_log_tail() {
    let dir = TempDir::new().unwrap();
    let fleet = Fleet::new(test_config(&dir, crashing_cloudflared()));
    let name = unique_name("fail");
    configure(&fleet, &name).await;

    match fleet.start(&name).await {
        Err(WardenError::Tunnel(TunnelError::StartVerificationFailed { name: n, log_tail })) => {
            assert_eq!(n, name);
            assert!(log_tail.contains("failed to connect to the edge"), "{}", log_tail);
            assert!(log_tail.contains("=== Tunnel"));
        }
        other => panic!("unexpected result {:?}", other),
    }
    assert!(fleet.supervisor().runtime(&name).is_none());
}

#[tokio::test]
async fn test_missing_binary_is_spawn_failure() {
    let dir = TempDir::new().unwrap();
    let fleet = Fleet::new(test_config(&dir, Path::new("/nonexistent/cloudflared")));
    let name = unique_name("nobin");
    configure(&fleet, &name).await;

    let err = fleet.start(&name).await.unwrap_err();
    assert!(
        matches!(err, WardenError::Tunnel(TunnelError::SpawnFailure { .. })),
        "{:?}",
        err
    );
}

#[tokio::test]
async fn test_delete_stops_and_removes_tunnel() {
    let dir = TempDir::new().unwrap();
    let fleet = Fleet::new(test_config(&dir, fake_cloudflared()));
    let name = unique_name("del");
    configure(&fleet, &name).await;
    fleet.enable(&name).await.unwrap();

    fleet.delete(&name).await.unwrap();
    assert!(!fleet.supervisor().is_running(&name).await);
    assert!(fleet.store().get(&name).await.is_none());
    assert!(!fleet.config().tunnel_config_path(&name).exists());
    // Credentials belong to the tunnel backend and are left alone
    assert!(fleet.config().credentials_path(&name).exists());
}

/// The daemon and an admin command share files, not memory
fn daemon_and_admin(dir: &TempDir) -> (Arc<Fleet>, Arc<Fleet>) {
    let config = test_config(dir, fake_cloudflared());
    (
        Arc::new(Fleet::new(config.clone())),
        Arc::new(Fleet::new(config)),
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_disable_waits_for_sweep_started_by_another_fleet() {
    let dir = TempDir::new().unwrap();
    let (daemon, admin) = daemon_and_admin(&dir);
    let name = unique_name("race");
    configure(&admin, &name).await;
    admin.store().enable(&name, serde_json::json!({})).await.unwrap();

    let sweep = {
        let daemon = Arc::clone(&daemon);
        let name = name.clone();
        tokio::spawn(async move { daemon.ensure_running(&name).await })
    };
    // Land inside the sweep's settle delay
    tokio::time::sleep(Duration::from_millis(100)).await;
    let disabled = admin.disable(&name).await.unwrap();
    let converged = sweep.await.unwrap().unwrap();

    if let Convergence::Started { pid } = converged {
        match disabled {
            StopOutcome::Stopped { terminated, .. } => assert_eq!(terminated, vec![pid]),
            other => panic!("disable missed the tunnel started by the sweep: {:?}", other),
        }
    }
    assert!(!admin.store().is_enabled(&name).await);
    assert!(admin.supervisor().find_processes(&name).await.is_empty());
    assert_eq!(
        daemon.ensure_running(&name).await.unwrap(),
        Convergence::NotWanted
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_sweep_after_disable_from_another_fleet_does_not_start() {
    let dir = TempDir::new().unwrap();
    let (daemon, admin) = daemon_and_admin(&dir);
    let name = unique_name("late");
    configure(&admin, &name).await;
    admin.enable(&name).await.unwrap();

    let (disabled, converged) = tokio::join!(admin.disable(&name), daemon.ensure_running(&name));
    assert!(matches!(disabled.unwrap(), StopOutcome::Stopped { .. }));
    // Whichever ran second saw the other's result
    assert!(matches!(
        converged.unwrap(),
        Convergence::NotWanted | Convergence::AlreadyRunning
    ));
    assert!(daemon.supervisor().find_processes(&name).await.is_empty());
}
