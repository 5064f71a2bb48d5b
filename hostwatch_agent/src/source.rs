//! Metrics source: one synchronous "collect everything" pass over the host.
//!
//! Every category is collected independently. A missing sensor, GPU or
//! docker daemon shows up as `None` or an empty list in `RawMetrics`; only
//! a provider that cannot be queried at all is an error.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};

use once_cell::sync::OnceCell;
use sysinfo::{Components, Disks, ProcessRefreshKind, ProcessesToUpdate, System};
use tracing::warn;

use crate::containers::collect_containers;
use crate::gpu::GpuProbe;
use crate::types::{MemoryUsage, RawMetrics, RawProcess, VolumeUsage};

#[derive(Debug, thiserror::Error)]
pub enum CollectError {
    #[error("metrics provider unavailable: {0}")]
    Unavailable(String),

    #[error("metrics provider panicked: {0}")]
    ProviderPanicked(String),

    #[error("collection task failed: {0}")]
    Task(String),
}

pub trait MetricsSource: Send {
    fn collect(&mut self) -> Result<RawMetrics, CollectError>;
}

pub type SharedSource = Arc<Mutex<Box<dyn MetricsSource>>>;

pub fn shared<S: MetricsSource + 'static>(source: S) -> SharedSource {
    let boxed: Box<dyn MetricsSource> = Box::new(source);
    Arc::new(Mutex::new(boxed))
}

/// Run one collection pass on the blocking pool so provider calls never
/// stall the async runtime.
pub async fn collect_blocking(source: &SharedSource) -> Result<RawMetrics, CollectError> {
    let source = Arc::clone(source);
    tokio::task::spawn_blocking(move || {
        source
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .collect()
    })
    .await
    .map_err(|e| CollectError::Task(e.to_string()))?
}

// Runtime toggles (read once)
fn env_enabled(cell: &'static OnceCell<bool>, var: &str) -> bool {
    *cell.get_or_init(|| std::env::var(var).map(|v| v != "0").unwrap_or(true))
}
fn gpu_enabled() -> bool {
    static ON: OnceCell<bool> = OnceCell::new();
    env_enabled(&ON, "HOSTWATCH_GPU")
}
fn temp_enabled() -> bool {
    static ON: OnceCell<bool> = OnceCell::new();
    env_enabled(&ON, "HOSTWATCH_TEMP")
}
fn containers_enabled() -> bool {
    static ON: OnceCell<bool> = OnceCell::new();
    env_enabled(&ON, "HOSTWATCH_CONTAINERS")
}

/// sysinfo-backed source. Handles persist across passes so CPU usage is a
/// delta since the previous collection.
pub struct SysinfoSource {
    sys: System,
    components: Components,
    disks: Disks,
    gpus: Option<GpuProbe>,
}

impl Default for SysinfoSource {
    fn default() -> Self {
        Self::new()
    }
}

impl SysinfoSource {
    pub fn new() -> Self {
        let mut sys = System::new();
        // baseline so the first real pass has a usage delta
        sys.refresh_cpu_usage();
        Self {
            sys,
            components: Components::new_with_refreshed_list(),
            disks: Disks::new_with_refreshed_list(),
            gpus: gpu_enabled().then(GpuProbe::new),
        }
    }

    fn cpu_temp(&mut self) -> Option<f64> {
        if !temp_enabled() {
            return None;
        }
        self.components.refresh(false);
        self.components
            .iter()
            .filter(|c| {
                let l = c.label().to_ascii_lowercase();
                l.contains("cpu") || l.contains("package") || l.contains("tctl") || l.contains("tdie")
            })
            .filter_map(|c| c.temperature())
            .filter(|t| reported_temp(f64::from(*t)))
            .max_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
            .map(f64::from)
    }
}

impl MetricsSource for SysinfoSource {
    fn collect(&mut self) -> Result<RawMetrics, CollectError> {
        let refreshed = catch_unwind(AssertUnwindSafe(|| {
            self.sys.refresh_cpu_usage();
            self.sys.refresh_memory();
            self.sys.refresh_processes_specifics(
                ProcessesToUpdate::All,
                true,
                ProcessRefreshKind::nothing().with_memory(),
            );
            self.disks.refresh(true);
        }));
        if let Err(payload) = refreshed {
            return Err(CollectError::ProviderPanicked(panic_message(&*payload)));
        }
        if self.sys.cpus().is_empty() && self.sys.total_memory() == 0 {
            return Err(CollectError::Unavailable(
                "no CPUs and no memory reported".into(),
            ));
        }

        let cpu_temp_c = match catch_unwind(AssertUnwindSafe(|| self.cpu_temp())) {
            Ok(t) => t,
            Err(payload) => {
                warn!(error = %panic_message(&*payload), "temperature probe panicked");
                None
            }
        };

        let volumes = self
            .disks
            .list()
            .iter()
            .map(|d| VolumeUsage {
                mount: d.mount_point().display().to_string(),
                used: d.total_space().saturating_sub(d.available_space()),
                size: d.total_space(),
            })
            .collect();

        // pid order is the stable "provider order" for equal-memory ties
        let mut procs: Vec<_> = self.sys.processes().iter().collect();
        procs.sort_by_key(|(pid, _)| **pid);
        let processes = procs
            .into_iter()
            .map(|(_, p)| RawProcess {
                name: p.name().to_string_lossy().into_owned(),
                resident_bytes: Some(p.memory()),
            })
            .collect();

        let gpus = self
            .gpus
            .as_ref()
            .map(GpuProbe::controllers)
            .unwrap_or_default();

        let containers = if containers_enabled() {
            collect_containers()
        } else {
            Vec::new()
        };

        Ok(RawMetrics {
            cpu_load_percent: f64::from(self.sys.global_cpu_usage()),
            cpu_temp_c,
            memory: MemoryUsage {
                used: self.sys.used_memory(),
                total: self.sys.total_memory(),
            },
            volumes,
            gpus,
            processes,
            containers,
        })
    }
}

/// Some drivers expose a sensor that always reads 0 °C; treat that as no sensor.
pub(crate) fn reported_temp(celsius: f64) -> bool {
    celsius.is_finite() && celsius > 0.0
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".into()
    }
}
