//! Container stats from the docker CLI.
//!
//! `docker stats --no-stream --format '{{json .}}'` prints one JSON object
//! per running container. A missing or failing docker yields an empty
//! list: no containers is a normal state, not an error.

use std::process::Command;

use serde::Deserialize;
use tracing::debug;

use crate::types::RawContainer;

#[derive(Debug, Deserialize)]
struct DockerStatsLine {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "CPUPerc", default)]
    cpu_perc: String,
    #[serde(rename = "MemPerc", default)]
    mem_perc: String,
}

pub fn collect_containers() -> Vec<RawContainer> {
    let output = match Command::new("docker")
        .args(["stats", "--no-stream", "--format", "{{json .}}"])
        .output()
    {
        Ok(o) => o,
        Err(e) => {
            debug!(error = %e, "docker not available");
            return Vec::new();
        }
    };
    if !output.status.success() {
        debug!(
            status = %output.status,
            stderr = %String::from_utf8_lossy(&output.stderr).trim(),
            "docker stats failed"
        );
        return Vec::new();
    }
    parse_stats_output(&String::from_utf8_lossy(&output.stdout))
}

/// Parse `docker stats` JSON lines, keeping docker's order. Malformed lines are skipped.
pub fn parse_stats_output(stdout: &str) -> Vec<RawContainer> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .filter_map(|line| match serde_json::from_str::<DockerStatsLine>(line) {
            Ok(s) => Some(RawContainer {
                name: s.name,
                cpu_percent: parse_percent(&s.cpu_perc),
                memory_percent: parse_percent(&s.mem_perc),
            }),
            Err(e) => {
                debug!(error = %e, line, "unparseable docker stats line");
                None
            }
        })
        .collect()
}

// "12.34%" -> 12.34; docker prints "--" for containers that are starting
fn parse_percent(s: &str) -> f64 {
    s.trim().trim_end_matches('%').trim().parse().unwrap_or(0.0)
}
