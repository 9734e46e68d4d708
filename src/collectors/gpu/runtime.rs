use super::diagnostics::{self, DiagnosticsReading};
use crate::collectors::memory::collect_memory;
use crate::format::percent_of;
use crate::probe::{try_capability, CapabilitySource, GPU_DIAGNOSTICS};
use crate::stats::{DeviceStatus, GpuDevice, GpuProvider, GpuReport};
use tracing::debug;

/// Utilisation above this marks an integrated device as active.
const ACTIVE_UTIL_PERCENT: f64 = 5.0;
/// VRAM share above this is used as a utilisation estimate.
const PROXY_MIN_PERCENT: f64 = 1.0;

/// Memory counters of a unified-memory accelerator, in bytes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IntegratedCounters {
    pub recommended_max_memory: u64,
    pub driver_allocated_memory: u64,
    pub current_allocated_memory: u64,
}

/// Device layer of a compute runtime.
///
/// Lower fidelity than a vendor management library: no utilisation or
/// temperature for discrete devices. Memory counters are `None` when the
/// runtime has nothing to measure them from.
pub trait AcceleratorRuntime {
    fn discrete_available(&self) -> bool;
    fn device_count(&self) -> Result<u32, String>;
    fn device_name(&self, index: u32) -> Result<String, String>;
    fn memory_allocated(&self, index: u32) -> Result<Option<u64>, String>;
    fn memory_reserved(&self, index: u32) -> Result<Option<u64>, String>;

    fn integrated_available(&self) -> bool {
        false
    }

    fn integrated_name(&self) -> String {
        "Apple GPU".to_string()
    }

    fn integrated_counters(&self) -> Result<IntegratedCounters, String> {
        Err("no integrated accelerator".to_string())
    }
}

#[cfg(target_os = "macos")]
pub fn load_platform_runtime() -> Result<Box<dyn AcceleratorRuntime>, String> {
    super::metal::MetalRuntime::load().map(|rt| Box::new(rt) as Box<dyn AcceleratorRuntime>)
}

#[cfg(all(feature = "cuda", not(target_os = "macos")))]
pub fn load_platform_runtime() -> Result<Box<dyn AcceleratorRuntime>, String> {
    super::cuda::CudaDriver::load().map(|rt| Box::new(rt) as Box<dyn AcceleratorRuntime>)
}

#[cfg(all(not(feature = "cuda"), not(target_os = "macos")))]
pub fn load_platform_runtime() -> Result<Box<dyn AcceleratorRuntime>, String> {
    Err("built without CUDA support".to_string())
}

pub(crate) fn runtime_report(
    caps: &dyn CapabilitySource,
    rt: &dyn AcceleratorRuntime,
) -> Result<GpuReport, String> {
    if rt.discrete_available() {
        let devices = (0..rt.device_count()?)
            .map(|index| {
                Ok(GpuDevice {
                    index,
                    name: rt.device_name(index)?,
                    allocated_bytes: rt.memory_allocated(index)?,
                    reserved_bytes: rt.memory_reserved(index)?,
                    ..GpuDevice::default()
                })
            })
            .collect::<Result<Vec<_>, String>>()?;
        return Ok(GpuReport::devices(GpuProvider::AcceleratorRuntime, devices));
    }

    if rt.integrated_available() {
        let counters = rt.integrated_counters()?;
        let diagnostics = try_capability(
            GPU_DIAGNOSTICS,
            || caps.gpu_diagnostics(),
            |text| {
                diagnostics::parse_diagnostics(&text)
                    .ok_or_else(|| "no GPU metrics in tool output".to_string())
            },
        );
        let diagnostics = match diagnostics {
            Ok(reading) => Some(reading),
            Err(err) => {
                debug!(error = %err, "falling back to VRAM-based GPU estimate");
                None
            }
        };
        let system_total = || {
            collect_memory(caps)
                .map(|mem| mem.total_bytes)
                .unwrap_or(0)
        };
        let device = integrated_device(
            rt.integrated_name(),
            &counters,
            system_total,
            diagnostics.as_ref(),
        );
        return Ok(GpuReport::devices(GpuProvider::AppleIntegrated, vec![device]));
    }

    Ok(GpuReport::devices(GpuProvider::AcceleratorRuntime, Vec::new()))
}

/// Builds the single device record of a unified-memory accelerator.
///
/// The VRAM ceiling is the runtime's recommended working set, or total system
/// memory when the runtime does not report one. Without a measured
/// utilisation the VRAM share stands in as an estimate.
pub fn integrated_device(
    name: String,
    counters: &IntegratedCounters,
    system_total: impl FnOnce() -> u64,
    diagnostics: Option<&DiagnosticsReading>,
) -> GpuDevice {
    let vram_total = if counters.recommended_max_memory > 0 {
        counters.recommended_max_memory
    } else {
        system_total()
    };
    let vram_used = if counters.driver_allocated_memory > 0 {
        counters.driver_allocated_memory
    } else {
        counters.current_allocated_memory
    };
    let util_mem = percent_of(vram_used, vram_total);

    let measured = diagnostics.and_then(|d| d.utilization_percent);
    let (util_gpu, estimated) = match measured {
        Some(v) => (Some(v), false),
        None if util_mem > PROXY_MIN_PERCENT => (Some(util_mem), true),
        None => (None, false),
    };

    let active = util_gpu.unwrap_or(0.0) > ACTIVE_UTIL_PERCENT
        || counters.current_allocated_memory > 0;

    GpuDevice {
        index: 0,
        name,
        util_gpu_percent: util_gpu,
        util_mem_percent: Some(util_mem),
        vram_used_bytes: Some(vram_used),
        vram_total_bytes: Some(vram_total),
        temperature_c: diagnostics.and_then(|d| d.temperature_c),
        status: Some(if active {
            DeviceStatus::Active
        } else {
            DeviceStatus::Idle
        }),
        util_gpu_estimated: estimated,
        ..GpuDevice::default()
    }
}
