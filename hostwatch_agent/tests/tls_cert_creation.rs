//! `--enableSSL` generates its certificate under XDG_CONFIG_HOME and keeps it across restarts.
use assert_cmd::prelude::*;
use std::path::Path;
use std::process::{Child, Command};
use std::time::{Duration, Instant};

use hostwatch_agent::tls::TlsFiles;

fn spawn_tls_agent(config_home: &Path, workdir: &Path) -> Child {
    Command::cargo_bin("hostwatch_agent")
        .expect("binary exists")
        .current_dir(workdir)
        .env("XDG_CONFIG_HOME", config_home)
        .env("HOSTWATCH_GPU", "0")
        .env("HOSTWATCH_CONTAINERS", "0")
        .env("HOSTWATCH_ALERT_LOG", workdir.join("alerts.log"))
        .args(["--enableSSL", "-p", "0"])
        .spawn()
        .expect("spawn agent")
}

fn wait_until(deadline: Duration, mut ready: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if ready() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    ready()
}

fn stop(mut child: Child) {
    let _ = child.kill();
    let _ = child.wait();
}

#[test]
fn enable_ssl_creates_and_then_reuses_certificate() {
    let config_home = tempfile::tempdir().expect("config home");
    let workdir = tempfile::tempdir().expect("workdir");
    let files = TlsFiles::under(config_home.path());

    let agent = spawn_tls_agent(config_home.path(), workdir.path());
    let written = wait_until(Duration::from_secs(5), || {
        std::fs::metadata(&files.cert).map_or(false, |m| m.len() > 0)
            && std::fs::metadata(&files.key).map_or(false, |m| m.len() > 0)
    });
    stop(agent);
    assert!(written, "no PEM pair under {}", config_home.path().display());

    let cert = std::fs::read_to_string(&files.cert).expect("read cert");
    assert!(cert.starts_with("-----BEGIN CERTIFICATE-----"));

    // a second start must not regenerate
    let agent = spawn_tls_agent(config_home.path(), workdir.path());
    std::thread::sleep(Duration::from_millis(500));
    stop(agent);
    assert_eq!(std::fs::read_to_string(&files.cert).expect("reread cert"), cert);
}
