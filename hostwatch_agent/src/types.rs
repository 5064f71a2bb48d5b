//! Raw provider data and the normalized snapshot pushed to subscribers.
//! `MetricsSnapshot` is the wire format; keep it minimal and stable.

use chrono::{DateTime, Utc};
use serde::Serialize;

// ---------- Raw provider data ----------

#[derive(Debug, Clone, Default)]
pub struct MemoryUsage {
    pub used: u64,
    pub total: u64,
}

#[derive(Debug, Clone)]
pub struct VolumeUsage {
    pub mount: String,
    pub used: u64,
    pub size: u64,
}

#[derive(Debug, Clone)]
pub struct GpuController {
    pub model: String,
    pub temperature_c: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct RawProcess {
    pub name: String,
    // resident set size in bytes; None when the provider could not read it
    pub resident_bytes: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct RawContainer {
    pub name: String,
    pub cpu_percent: f64,
    pub memory_percent: f64,
}

/// Everything one provider pass produced. Each category is independent:
/// an absent sensor or an empty list is a valid value, not an error.
#[derive(Debug, Clone, Default)]
pub struct RawMetrics {
    pub cpu_load_percent: f64,
    pub cpu_temp_c: Option<f64>,
    pub memory: MemoryUsage,
    pub volumes: Vec<VolumeUsage>,
    pub gpus: Vec<GpuController>,
    pub processes: Vec<RawProcess>,
    pub containers: Vec<RawContainer>,
}

// ---------- Normalized snapshot ----------

/// A reading from a sensor that may not exist on this host.
/// Serializes as a number or `null`, so "no sensor" never reads as 0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Reading {
    Present(f64),
    Unavailable,
}

impl Reading {
    pub fn value(self) -> Option<f64> {
        match self {
            Reading::Present(v) => Some(v),
            Reading::Unavailable => None,
        }
    }

    pub fn is_available(self) -> bool {
        matches!(self, Reading::Present(_))
    }
}

impl From<Option<f64>> for Reading {
    fn from(v: Option<f64>) -> Self {
        v.map_or(Reading::Unavailable, Reading::Present)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessMemory {
    pub name: String,
    pub memory_mb: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContainerStat {
    pub name: String,
    pub cpu_percent: f64,
    pub memory_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub timestamp: DateTime<Utc>,
    pub cpu_load_percent: f64,
    pub cpu_temp_c: Reading,
    pub memory_used_percent: f64,
    // 0 when the provider reported no volume at all
    pub disk_used_percent: f64,
    pub gpu_model: Option<String>,
    pub gpu_temp_c: Reading,
    pub top_processes_by_memory: Vec<ProcessMemory>,
    pub containers: Vec<ContainerStat>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unavailable_reading_serializes_as_null_not_zero() {
        let v = serde_json::to_value(Reading::Unavailable).unwrap();
        assert!(v.is_null());
        let v = serde_json::to_value(Reading::Present(0.0)).unwrap();
        assert_eq!(v, serde_json::json!(0.0));
    }

    #[test]
    fn reading_from_option() {
        assert_eq!(Reading::from(Some(41.5)), Reading::Present(41.5));
        assert_eq!(Reading::from(None), Reading::Unavailable);
        assert!(!Reading::Unavailable.is_available());
        assert_eq!(Reading::Present(3.0).value(), Some(3.0));
    }
}
