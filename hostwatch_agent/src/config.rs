//! Agent settings: defaults, then the credentials file, then `HOSTWATCH_*`
//! environment overrides, then command-line flags.
//!
//! The credentials file uses the simple `KEY=VALUE` format:
//!
//! ```text
//! EMAIL=ops@example.com
//! PASSWORD=app-password
//! SMTP_HOST=smtp.gmail.com
//! SMTP_PORT=587
//! EMAIL_TO=oncall@example.com
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::normalize::GpuSelection;
use crate::notify::{EmailConfig, DEFAULT_SMTP_HOST, DEFAULT_SMTP_PORT};
use crate::scheduler::SchedulerConfig;

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_ALERT_LOG: &str = "alerts.log";
pub const DEFAULT_CREDENTIALS_FILE: &str = "config.txt";

pub const USAGE: &str =
    "Usage: hostwatch_agent [--port PORT|-p PORT] [--enableSSL] [--config FILE|-c FILE]";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: String, value: String },

    #[error("{0}\n{usage}", usage = USAGE)]
    BadArgument(String),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CliArgs {
    pub port: Option<u16>,
    pub enable_ssl: bool,
    pub config: Option<PathBuf>,
    pub help: bool,
}

pub fn parse_args<I: IntoIterator<Item = String>>(args: I) -> Result<CliArgs, ConfigError> {
    let mut it = args.into_iter();
    let _ = it.next(); // program name
    let mut out = CliArgs::default();
    while let Some(a) = it.next() {
        match a.as_str() {
            "-h" | "--help" => out.help = true,
            "--enableSSL" => out.enable_ssl = true,
            "--port" | "-p" => {
                let v = it
                    .next()
                    .ok_or_else(|| ConfigError::BadArgument(format!("{a} needs a value")))?;
                out.port = Some(parse_value("--port", &v)?);
            }
            "--config" | "-c" => {
                let v = it
                    .next()
                    .ok_or_else(|| ConfigError::BadArgument(format!("{a} needs a value")))?;
                out.config = Some(PathBuf::from(v));
            }
            _ if a.starts_with("--port=") => {
                if let Some((_, v)) = a.split_once('=') {
                    out.port = Some(parse_value("--port", v)?);
                }
            }
            _ if a.starts_with("--config=") => {
                if let Some((_, v)) = a.split_once('=') {
                    out.config = Some(PathBuf::from(v));
                }
            }
            _ => return Err(ConfigError::BadArgument(format!("unexpected argument {a:?}"))),
        }
    }
    Ok(out)
}

/// Parse `KEY=VALUE` lines. Blank lines, `#` comments and lines without
/// `=` are ignored; only the first `=` splits, so values may contain `=`.
pub fn parse_credentials(text: &str) -> HashMap<String, String> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .filter_map(|l| l.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .filter(|(k, v)| !k.is_empty() && !v.is_empty())
        .collect()
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub port: u16,
    pub enable_ssl: bool,
    pub alert_log: PathBuf,
    pub scheduler: SchedulerConfig,
    // None means alerts are only written to the log output
    pub email: Option<EmailConfig>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            enable_ssl: false,
            alert_log: PathBuf::from(DEFAULT_ALERT_LOG),
            scheduler: SchedulerConfig::default(),
            email: None,
        }
    }
}

impl Settings {
    /// Build settings from the process environment.
    pub fn from_env(args: &CliArgs) -> Result<Self, ConfigError> {
        Self::load(args, |k| std::env::var(k).ok())
    }

    pub fn load<F>(args: &CliArgs, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut s = Settings::default();

        let creds = match args.config.as_deref() {
            Some(path) => read_credentials(path)?,
            // the default file is optional
            None => read_credentials(Path::new(DEFAULT_CREDENTIALS_FILE)).unwrap_or_default(),
        };
        s.email = email_config(&creds)?;

        if let Some(v) = env("HOSTWATCH_SAMPLE_SECS") {
            let secs: u64 = parse_value("HOSTWATCH_SAMPLE_SECS", &v)?;
            if secs == 0 {
                return Err(ConfigError::InvalidValue {
                    key: "HOSTWATCH_SAMPLE_SECS".into(),
                    value: v,
                });
            }
            s.scheduler.period = Duration::from_secs(secs);
        }
        if let Some(v) = env("HOSTWATCH_THROTTLE_MINS") {
            let mins: u64 = parse_value("HOSTWATCH_THROTTLE_MINS", &v)?;
            let secs = mins.checked_mul(60).ok_or_else(|| ConfigError::InvalidValue {
                key: "HOSTWATCH_THROTTLE_MINS".into(),
                value: v.clone(),
            })?;
            s.scheduler.throttle_window = Duration::from_secs(secs);
            s.scheduler.retry_backoff = s.scheduler.throttle_window;
        }
        if let Some(v) = env("HOSTWATCH_ALERT_LOG") {
            s.alert_log = PathBuf::from(v);
        }
        if let Some(v) = env("HOSTWATCH_GPU_PICK") {
            s.scheduler.gpu_selection =
                GpuSelection::parse(&v).ok_or_else(|| ConfigError::InvalidValue {
                    key: "HOSTWATCH_GPU_PICK".into(),
                    value: v.clone(),
                })?;
        }

        let th = &mut s.scheduler.thresholds;
        for (key, slot) in [
            ("HOSTWATCH_CPU_THRESHOLD", &mut th.cpu_load_percent),
            ("HOSTWATCH_CPU_TEMP_THRESHOLD", &mut th.cpu_temp_c),
            ("HOSTWATCH_MEMORY_THRESHOLD", &mut th.memory_percent),
            ("HOSTWATCH_DISK_THRESHOLD", &mut th.disk_percent),
            ("HOSTWATCH_GPU_TEMP_THRESHOLD", &mut th.gpu_temp_c),
            (
                "HOSTWATCH_CONTAINER_MEMORY_THRESHOLD",
                &mut th.container_memory_percent,
            ),
        ] {
            if let Some(v) = env(key) {
                let limit: f64 = parse_value(key, &v)?;
                // NaN would never compare greater, silently disabling the check
                if !limit.is_finite() {
                    return Err(ConfigError::InvalidValue {
                        key: key.into(),
                        value: v,
                    });
                }
                *slot = limit;
            }
        }

        if let Some(port) = args.port {
            s.port = port;
        }
        s.enable_ssl = args.enable_ssl;
        Ok(s)
    }
}

fn read_credentials(path: &Path) -> Result<HashMap<String, String>, ConfigError> {
    std::fs::read_to_string(path)
        .map(|text| parse_credentials(&text))
        .map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
}

fn email_config(creds: &HashMap<String, String>) -> Result<Option<EmailConfig>, ConfigError> {
    let (Some(user), Some(pass)) = (creds.get("EMAIL"), creds.get("PASSWORD")) else {
        return Ok(None);
    };
    let smtp_port = match creds.get("SMTP_PORT") {
        Some(v) => parse_value("SMTP_PORT", v)?,
        None => DEFAULT_SMTP_PORT,
    };
    Ok(Some(EmailConfig {
        smtp_host: creds
            .get("SMTP_HOST")
            .cloned()
            .unwrap_or_else(|| DEFAULT_SMTP_HOST.to_string()),
        smtp_port,
        username: user.clone(),
        password: pass.clone(),
        to: creds.get("EMAIL_TO").cloned(),
    }))
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}
