//! GPU controller enumeration.
//!
//! NVML is tried first because it reports temperatures. Hosts without NVIDIA
//! drivers fall back to gfxinfo, which only knows the active GPU's model.

use gfxinfo::active_gpu;
use nvml_wrapper::enum_wrappers::device::TemperatureSensor;
use nvml_wrapper::Nvml;
use tracing::{debug, info, warn};

use crate::source::reported_temp;
use crate::types::GpuController;

pub struct GpuProbe {
    // None when NVML could not be initialised (no drivers / no NVIDIA GPU)
    nvml: Option<Nvml>,
}

impl Default for GpuProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl GpuProbe {
    pub fn new() -> Self {
        let nvml = match Nvml::init() {
            Ok(nvml) => {
                info!("NVML initialised");
                Some(nvml)
            }
            Err(e) => {
                debug!(error = %e, "NVML unavailable, falling back to gfxinfo");
                None
            }
        };
        Self { nvml }
    }

    /// All controllers in provider order. Probe failures yield an empty list.
    pub fn controllers(&self) -> Vec<GpuController> {
        if let Some(nvml) = self.nvml.as_ref() {
            match nvml_controllers(nvml) {
                Ok(v) if !v.is_empty() => return v,
                Ok(_) => {}
                Err(e) => warn!(error = %e, "NVML device query failed"),
            }
        }
        match active_gpu() {
            Ok(gpu) => vec![GpuController {
                model: gpu.model().to_string(),
                temperature_c: None,
            }],
            Err(e) => {
                debug!(error = %e, "no GPU reported by gfxinfo");
                Vec::new()
            }
        }
    }
}

fn nvml_controllers(nvml: &Nvml) -> Result<Vec<GpuController>, nvml_wrapper::error::NvmlError> {
    let count = nvml.device_count()?;
    let mut out = Vec::with_capacity(count as usize);
    for idx in 0..count {
        let device = match nvml.device_by_index(idx) {
            Ok(d) => d,
            Err(e) => {
                warn!(gpu_index = idx, error = %e, "skipping GPU");
                continue;
            }
        };
        let model = device.name().unwrap_or_else(|_| format!("GPU {idx}"));
        // Not every board exposes a temperature sensor.
        let temperature_c = device
            .temperature(TemperatureSensor::Gpu)
            .ok()
            .map(f64::from)
            .filter(|t| reported_temp(*t));
        out.push(GpuController {
            model,
            temperature_c,
        });
    }
    Ok(out)
}
