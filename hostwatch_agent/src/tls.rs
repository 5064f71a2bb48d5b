//! Self-signed TLS material for `--enableSSL`, generated on first use and
//! reused on later starts.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::info;

/// Where the PEM pair lives for this agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsFiles {
    pub cert: PathBuf,
    pub key: PathBuf,
}

impl TlsFiles {
    /// `<config home>/hostwatch_agent/tls/{cert,key}.pem`, where config home
    /// is `$XDG_CONFIG_HOME`, else `$HOME/.config`, else the working directory.
    pub fn locate() -> Self {
        let config_home = non_empty_env("XDG_CONFIG_HOME")
            .or_else(|| non_empty_env("HOME").map(|home| home.join(".config")))
            .unwrap_or_default();
        Self::under(&config_home)
    }

    pub fn under(config_home: &Path) -> Self {
        let dir = config_home.join("hostwatch_agent").join("tls");
        Self {
            cert: dir.join("cert.pem"),
            key: dir.join("key.pem"),
        }
    }

    fn present(&self) -> bool {
        self.cert.is_file() && self.key.is_file()
    }
}

fn non_empty_env(var: &str) -> Option<PathBuf> {
    std::env::var_os(var)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

/// Generate a certificate for this host unless one already exists.
pub fn ensure_self_signed_cert() -> anyhow::Result<TlsFiles> {
    let files = TlsFiles::locate();
    if files.present() {
        return Ok(files);
    }
    write_self_signed(&files)?;
    Ok(files)
}

fn write_self_signed(files: &TlsFiles) -> anyhow::Result<()> {
    if let Some(dir) = files.cert.parent() {
        fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }

    let mut names = vec![
        "localhost".to_string(),
        "127.0.0.1".to_string(),
        "::1".to_string(),
    ];
    if let Some(host) = hostname::get().ok().and_then(|h| h.into_string().ok()) {
        if !names.contains(&host) {
            names.insert(0, host);
        }
    }
    let rcgen::CertifiedKey { cert, key_pair } =
        rcgen::generate_simple_self_signed(names).context("generating self-signed certificate")?;

    fs::write(&files.cert, cert.pem())
        .with_context(|| format!("writing {}", files.cert.display()))?;
    fs::write(&files.key, key_pair.serialize_pem())
        .with_context(|| format!("writing {}", files.key.display()))?;

    info!(cert = %files.cert.display(), key = %files.key.display(), "generated self-signed TLS certificate");
    Ok(())
}
