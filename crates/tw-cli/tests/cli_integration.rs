//! CLI integration tests
//!
//! Tests the tunnel-warden CLI using assert_cmd. Every test points the CLI at
//! a configuration rooted in its own temporary directory.

use std::fs;
use std::path::PathBuf;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn tunnel_warden() -> Command {
    let mut cmd = Command::cargo_bin("tunnel-warden")
        .expect("Failed to locate tunnel-warden binary - ensure it's built before running tests");
    cmd.env_remove("TUNNEL_WARDEN_CONFIG").env_remove("RUST_LOG");
    cmd
}

/// Temporary installation with its own config file
struct Sandbox {
    dir: TempDir,
    config: PathBuf,
}

impl Sandbox {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let root = dir.path().display().to_string();
        let config = dir.path().join("config.toml");
        fs::write(
            &config,
            format!(
                "config_dir = '{root}/tunnels'\n\
                 state_file = '{root}/tunnels/tunnel-state.json'\n\
                 log_dir = '{root}/logs'\n\
                 pid_file = '{root}/warden.pid'\n\
                 binary = '/nonexistent/cloudflared'\n\
                 settle_delay = 100\n"
            ),
        )
        .unwrap();
        Self { dir, config }
    }

    fn cmd(&self) -> Command {
        let mut cmd = tunnel_warden();
        cmd.arg("--config").arg(&self.config);
        cmd
    }

    fn tunnel_doc(&self, name: &str) -> PathBuf {
        self.dir.path().join("tunnels").join(format!("{}.yml", name))
    }

    fn create_web(&self) {
        self.cmd()
            .args(["create", "web", "--hostname", "web.example.com", "--service", "8080"])
            .assert()
            .success();
    }
}

#[test]
fn test_cli_help() {
    tunnel_warden()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("tunnel-warden"))
        .stdout(predicate::str::contains("cloudflared tunnels running"));
}

#[test]
fn test_cli_version() {
    tunnel_warden()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("tunnel-warden"));
}

#[test]
fn test_cli_serve_help() {
    tunnel_warden()
        .args(["serve", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("supervisor"));
}

#[test]
fn test_cli_create_help() {
    tunnel_warden()
        .args(["create", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--hostname"))
        .stdout(predicate::str::contains("--service"));
}

#[test]
fn test_cli_invalid_command() {
    tunnel_warden()
        .arg("not-a-real-command")
        .assert()
        .failure()
        .stderr(predicate::str::contains("error"));
}

#[test]
fn test_config_path_prints_explicit_path() {
    let sandbox = Sandbox::new();
    sandbox
        .cmd()
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("config.toml"));
}

#[test]
fn test_config_show_merges_defaults() {
    let sandbox = Sandbox::new();
    sandbox
        .cmd()
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("binary = \"/nonexistent/cloudflared\""))
        .stdout(predicate::str::contains("reconcile_interval = 30"))
        .stdout(predicate::str::contains("[backoff]"));
}

#[test]
fn test_missing_explicit_config_fails() {
    tunnel_warden()
        .args(["--config", "/nonexistent/tunnel-warden.toml", "status"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load config"));
}

#[test]
fn test_config_init_does_not_overwrite() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("fresh.toml");

    tunnel_warden()
        .arg("--config")
        .arg(&path)
        .args(["config", "init"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Created config file"));
    assert!(fs::read_to_string(&path).unwrap().contains("binary"));

    tunnel_warden()
        .arg("--config")
        .arg(&path)
        .args(["config", "init"])
        .assert()
        .success()
        .stderr(predicate::str::contains("already exists"));
}

#[test]
fn test_create_writes_document() {
    let sandbox = Sandbox::new();
    sandbox
        .cmd()
        .args(["create", "web", "--hostname", "web.example.com", "--service", "8080"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Created tunnel web"));

    let doc = fs::read_to_string(sandbox.tunnel_doc("web")).unwrap();
    assert!(doc.contains("tunnel: web"));
    assert!(doc.contains("hostname: web.example.com"));
    assert!(doc.contains("service: http://localhost:8080"));
    assert!(doc.contains("service: http_status:404"));
}

#[test]
fn test_create_with_extra_routes() {
    let sandbox = Sandbox::new();
    sandbox
        .cmd()
        .args(["create", "web", "--hostname", "web.example.com", "--service", "8080"])
        .args(["--route", "api.example.com=9090", "--route", "ssh.example.com=ssh://localhost:22"])
        .assert()
        .success();

    let doc = fs::read_to_string(sandbox.tunnel_doc("web")).unwrap();
    let web = doc.find("hostname: web.example.com").unwrap();
    let api = doc.find("hostname: api.example.com").unwrap();
    let ssh = doc.find("hostname: ssh.example.com").unwrap();
    let catch_all = doc.find("service: http_status:404").unwrap();
    assert!(web < api && api < ssh && ssh < catch_all, "{}", doc);
    assert!(doc.contains("service: http://localhost:9090"));
}

#[test]
fn test_create_rejects_malformed_route() {
    let sandbox = Sandbox::new();
    sandbox
        .cmd()
        .args(["create", "web", "--hostname", "web.example.com", "--service", "8080"])
        .args(["--route", "api.example.com"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("HOSTNAME=SERVICE"));
    assert!(!sandbox.tunnel_doc("web").exists());
}

#[test]
fn test_create_rejects_bad_port() {
    let sandbox = Sandbox::new();
    sandbox
        .cmd()
        .args(["create", "web", "--hostname", "web.example.com", "--service", "99999"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid port"));
    assert!(!sandbox.tunnel_doc("web").exists());
}

#[test]
fn test_create_rejects_bad_name() {
    let sandbox = Sandbox::new();
    sandbox
        .cmd()
        .args(["create", "../web", "--hostname", "web.example.com", "--service", "80"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid tunnel name"));
}

#[test]
fn test_status_of_empty_fleet() {
    let sandbox = Sandbox::new();
    sandbox
        .cmd()
        .args(["status", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("[]"));

    sandbox
        .cmd()
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("No tunnels configured"));
}

#[test]
fn test_status_lists_created_tunnel() {
    let sandbox = Sandbox::new();
    sandbox.create_web();

    sandbox
        .cmd()
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("web.example.com"))
        .stdout(predicate::str::contains("stopped"));

    sandbox
        .cmd()
        .args(["status", "web", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"hasConfig\": true"))
        .stdout(predicate::str::contains("\"running\": false"))
        .stdout(predicate::str::contains("cloudflared-web.log"));
}

#[test]
fn test_enable_without_credentials_keeps_intent() {
    let sandbox = Sandbox::new();
    sandbox.create_web();

    sandbox
        .cmd()
        .args(["enable", "web"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Credentials file not found"));

    sandbox
        .cmd()
        .args(["status", "web", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"enabled\": true"))
        .stdout(predicate::str::contains("\"phase\": \"pending\""));

    let state = fs::read_to_string(sandbox.dir.path().join("tunnels/tunnel-state.json")).unwrap();
    assert!(state.contains("\"autoRestart\": true"));
}

#[test]
fn test_stop_and_disable_are_idempotent() {
    let sandbox = Sandbox::new();
    sandbox.create_web();

    for command in ["stop", "disable", "stop", "disable"] {
        sandbox
            .cmd()
            .args([command, "web"])
            .assert()
            .success()
            .stdout(predicate::str::contains("not running"));
    }
}

#[test]
fn test_delete_removes_document() {
    let sandbox = Sandbox::new();
    sandbox.create_web();

    sandbox
        .cmd()
        .args(["delete", "web"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Tunnel web deleted"));
    assert!(!sandbox.tunnel_doc("web").exists());
}

#[test]
fn test_logs_of_quiet_tunnel() {
    let sandbox = Sandbox::new();
    sandbox
        .cmd()
        .args(["logs", "web"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No log output"));

    let logs = sandbox.dir.path().join("logs");
    fs::create_dir_all(&logs).unwrap();
    fs::write(logs.join("cloudflared-web.log"), "one\ntwo\nthree\n").unwrap();
    sandbox
        .cmd()
        .args(["logs", "web", "-n", "2"])
        .assert()
        .success()
        .stdout(predicate::str::diff("two\nthree\n"));
}
