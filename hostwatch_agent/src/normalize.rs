//! Turns raw provider data into a `MetricsSnapshot`.
//!
//! `normalize` is total: every missing sub-value maps to a defined default
//! or to `Reading::Unavailable`, never to an error.

use chrono::{DateTime, Utc};

use crate::types::{
    ContainerStat, GpuController, MetricsSnapshot, ProcessMemory, RawMetrics, RawProcess, Reading,
};

const TOP_PROCESSES: usize = 5;
const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Which GPU controller the snapshot reports when the host has several.
///
/// Providers usually list the integrated GPU before a discrete one, so the
/// default picks the last controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GpuSelection {
    First,
    #[default]
    Last,
}

impl GpuSelection {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "first" => Some(GpuSelection::First),
            "last" => Some(GpuSelection::Last),
            _ => None,
        }
    }

    fn pick(self, gpus: &[GpuController]) -> Option<&GpuController> {
        match self {
            GpuSelection::First => gpus.first(),
            GpuSelection::Last => gpus.last(),
        }
    }
}

pub fn normalize(raw: &RawMetrics, now: DateTime<Utc>, gpu: GpuSelection) -> MetricsSnapshot {
    let gpu = gpu.pick(&raw.gpus);

    // Only the first reported volume counts; no volume at all reads as 0%.
    let disk_used_percent = raw
        .volumes
        .first()
        .map(|v| percent_of(v.used, v.size))
        .unwrap_or(0.0);

    MetricsSnapshot {
        timestamp: now,
        cpu_load_percent: round_to(clamp_percent(raw.cpu_load_percent), 2),
        cpu_temp_c: temperature(raw.cpu_temp_c),
        memory_used_percent: percent_of(raw.memory.used, raw.memory.total),
        disk_used_percent,
        gpu_model: gpu.map(|g| g.model.clone()),
        gpu_temp_c: temperature(gpu.and_then(|g| g.temperature_c)),
        top_processes_by_memory: top_by_memory(&raw.processes),
        containers: raw
            .containers
            .iter()
            .map(|c| ContainerStat {
                name: c.name.clone(),
                cpu_percent: round_to(c.cpu_percent, 2),
                memory_percent: round_to(c.memory_percent, 2),
            })
            .collect(),
    }
}

fn top_by_memory(processes: &[RawProcess]) -> Vec<ProcessMemory> {
    let mut ranked: Vec<&RawProcess> = processes.iter().collect();
    // sort_by is stable: equal memory keeps provider order
    ranked.sort_by(|a, b| {
        b.resident_bytes
            .unwrap_or(0)
            .cmp(&a.resident_bytes.unwrap_or(0))
    });
    ranked
        .into_iter()
        .take(TOP_PROCESSES)
        .map(|p| ProcessMemory {
            name: p.name.clone(),
            memory_mb: round_to(p.resident_bytes.unwrap_or(0) as f64 / BYTES_PER_MB, 1),
        })
        .collect()
}

// Only a missing or non-finite reading is a sentinel; 0.0 °C is a real value.
fn temperature(v: Option<f64>) -> Reading {
    match v {
        Some(t) if t.is_finite() => Reading::Present(round_to(t, 1)),
        _ => Reading::Unavailable,
    }
}

fn percent_of(used: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    round_to(clamp_percent(used as f64 / total as f64 * 100.0), 2)
}

fn clamp_percent(v: f64) -> f64 {
    if v.is_finite() {
        v.clamp(0.0, 100.0)
    } else {
        0.0
    }
}

pub(crate) fn round_to(v: f64, places: i32) -> f64 {
    let f = 10f64.powi(places);
    (v * f).round() / f
}
