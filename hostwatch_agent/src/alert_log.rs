//! Append-only alert log. One entry per breach tick, written whether or
//! not a notification goes out.

use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use tokio::io::AsyncWriteExt;

const ENTRY_SEPARATOR: &str = "---";

#[derive(Debug, thiserror::Error)]
pub enum AlertLogError {
    #[error("failed to append to alert log {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct AlertLogEntry {
    pub timestamp: DateTime<Utc>,
    pub lines: Vec<String>,
}

impl AlertLogEntry {
    pub fn new<I, S>(timestamp: DateTime<Utc>, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            timestamp,
            lines: lines.into_iter().map(Into::into).collect(),
        }
    }

    pub fn render(&self) -> String {
        format!(
            "Alert at {}:\n{}\n{ENTRY_SEPARATOR}\n",
            self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            self.lines.join("\n")
        )
    }
}

#[derive(Debug, Clone)]
pub struct AlertLog {
    path: PathBuf,
}

impl AlertLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one entry in a single write. Failures are returned, never retried.
    pub async fn append(&self, entry: &AlertLogEntry) -> Result<(), AlertLogError> {
        let io_err = |source| AlertLogError::Io {
            path: self.path.clone(),
            source,
        };
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(io_err)?;
        file.write_all(entry.render().as_bytes())
            .await
            .map_err(io_err)?;
        file.flush().await.map_err(io_err)?;
        Ok(())
    }
}

/// Split an alert log back into raw entry bodies (header and lines, separator removed).
pub fn split_entries(contents: &str) -> Vec<&str> {
    contents
        .split(&format!("{ENTRY_SEPARATOR}\n"))
        .map(|e| e.trim_end_matches('\n'))
        .filter(|e| !e.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn entry_renders_header_lines_and_separator() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let entry = AlertLogEntry::new(ts, ["CPU Usage: *85.00%* (exceeds 80%)", "Memory: 50.00%"]);
        assert_eq!(
            entry.render(),
            "Alert at 2024-05-01T12:00:00.000Z:\nCPU Usage: *85.00%* (exceeds 80%)\nMemory: 50.00%\n---\n"
        );
    }

    #[tokio::test]
    async fn appends_preserve_order() {
        let dir = tempfile::tempdir().unwrap();
        let log = AlertLog::new(dir.path().join("alerts.log"));
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        log.append(&AlertLogEntry::new(ts, ["first"])).await.unwrap();
        log.append(&AlertLogEntry::new(ts, ["second"])).await.unwrap();

        let contents = std::fs::read_to_string(log.path()).unwrap();
        let entries = split_entries(&contents);
        assert_eq!(entries.len(), 2);
        assert!(entries[0].ends_with("first"));
        assert!(entries[1].ends_with("second"));
    }

    #[tokio::test]
    async fn unwritable_path_reports_error() {
        let dir = tempfile::tempdir().unwrap();
        let log = AlertLog::new(dir.path().join("missing").join("alerts.log"));
        let err = log
            .append(&AlertLogEntry::new(Utc::now(), ["x"]))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("failed to append"));
    }
}
