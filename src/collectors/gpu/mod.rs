// GPU backends, most precise first: NVML, then the platform accelerator
// runtime (CUDA driver, or Metal plus `ioreg` diagnostics on macOS).

#[cfg(all(feature = "cuda", not(target_os = "macos")))]
pub mod cuda;
pub mod diagnostics;
#[cfg(target_os = "macos")]
pub mod metal;
pub mod nvml;
pub mod runtime;

use crate::format::{format_bytes, percent_of};
use crate::probe::{
    try_capability, CapabilitySource, ProbeError, ACCELERATOR_RUNTIME, VENDOR_MANAGEMENT,
};
use crate::stats::{GpuDevice, GpuProvider, GpuReport};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ManagementReading {
    // not necessarily UTF-8
    pub name: Vec<u8>,
    pub memory_used: u64,
    pub memory_total: u64,
    pub util_gpu: u32,
    pub util_mem: u32,
    pub temperature_c: u32,
}

// Dropping the session shuts the library down.
pub trait VendorManagement {
    fn device_count(&self) -> Result<u32, String>;
    fn read_device(&self, index: u32) -> Result<ManagementReading, String>;
}

pub fn collect_gpu(caps: &dyn CapabilitySource) -> GpuReport {
    if !caps.gpu_enabled() {
        return GpuReport::devices(GpuProvider::None, Vec::new());
    }

    let management = try_capability(
        VENDOR_MANAGEMENT,
        || caps.vendor_management(),
        |session| management_devices(session.as_ref()),
    );
    let management_missing = match management {
        Ok(devices) => return GpuReport::devices(GpuProvider::NvidiaManagement, devices),
        Err(err @ ProbeError::Failed { .. }) => return GpuReport::error(err.to_string()),
        Err(err) => err,
    };

    let runtime = try_capability(
        ACCELERATOR_RUNTIME,
        || caps.accelerator_runtime(),
        |rt| runtime::runtime_report(caps, rt.as_ref()),
    );
    match runtime {
        Ok(report) => report,
        Err(err @ ProbeError::Unavailable { .. }) => {
            GpuReport::error(format!("{management_missing}; {err}"))
        }
        Err(err) => GpuReport::error(err.to_string()),
    }
}

fn management_devices(session: &dyn VendorManagement) -> Result<Vec<GpuDevice>, String> {
    let count = session.device_count()?;
    (0..count)
        .map(|index| {
            let raw = session.read_device(index)?;
            Ok(GpuDevice {
                index,
                name: decode_device_name(&raw.name),
                util_gpu_percent: Some(raw.util_gpu as f64),
                util_mem_percent: Some(raw.util_mem as f64),
                vram_used_bytes: Some(raw.memory_used),
                vram_total_bytes: Some(raw.memory_total),
                temperature_c: Some(raw.temperature_c as f64),
                ..GpuDevice::default()
            })
        })
        .collect()
}

pub fn decode_device_name(raw: &[u8]) -> String {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).trim().to_string()
}

pub fn render_gpu(report: &GpuReport) -> String {
    let (provider, devices) = match report {
        GpuReport::Error { error } => return format!("GPU: {error}"),
        GpuReport::Devices { provider, devices } => (*provider, devices),
    };

    let (header, line): (&str, fn(&GpuDevice) -> String) = match provider {
        GpuProvider::None => return "GPU: collection disabled".to_string(),
        GpuProvider::NvidiaManagement if devices.is_empty() => {
            return "GPU: no NVIDIA devices".to_string()
        }
        GpuProvider::AppleIntegrated if devices.is_empty() => {
            return "GPU: no Apple GPU device".to_string()
        }
        GpuProvider::AcceleratorRuntime if devices.is_empty() => {
            return "GPU: accelerator runtime reports no device".to_string()
        }
        GpuProvider::NvidiaManagement => ("GPU (NVIDIA):", nvidia_line),
        GpuProvider::AppleIntegrated => ("GPU (Apple MPS):", apple_line),
        GpuProvider::AcceleratorRuntime => ("GPU (CUDA runtime):", runtime_line),
    };

    std::iter::once(header.to_string())
        .chain(devices.iter().map(line))
        .collect::<Vec<_>>()
        .join("\n")
}

fn vram_summary(gpu: &GpuDevice) -> String {
    let used = gpu.vram_used_bytes.unwrap_or(0);
    let total = gpu.vram_total_bytes.unwrap_or(0);
    format!(
        "VRAM {:.1}% ({}/{})",
        percent_of(used, total),
        format_bytes(used as f64),
        format_bytes(total as f64)
    )
}

fn or_na(value: Option<f64>, render: impl FnOnce(f64) -> String) -> String {
    value.map(render).unwrap_or_else(|| "N/A".to_string())
}

fn nvidia_line(gpu: &GpuDevice) -> String {
    format!(
        "  [{}] {}: {}% GPU, {}% MEM, {}, {}",
        gpu.index,
        gpu.name,
        or_na(gpu.util_gpu_percent, |v| v.to_string()),
        or_na(gpu.util_mem_percent, |v| v.to_string()),
        vram_summary(gpu),
        or_na(gpu.temperature_c, |v| format!("{v}C")),
    )
}

fn apple_line(gpu: &GpuDevice) -> String {
    let util = match gpu.util_gpu_percent {
        Some(v) if gpu.util_gpu_estimated => format!("~{v:.1}% (est.)"),
        Some(v) => format!("{v:.1}%"),
        None => "N/A".to_string(),
    };
    let mut line = format!(
        "  [{}] {}: GPU {}, {}, temp {}",
        gpu.index,
        gpu.name,
        util,
        vram_summary(gpu),
        or_na(gpu.temperature_c, |v| format!("{v:.1}C")),
    );
    if let Some(status) = gpu.status {
        line.push_str(", ");
        line.push_str(status.as_str());
    }
    line
}

fn runtime_line(gpu: &GpuDevice) -> String {
    let bytes = |v: Option<u64>| or_na(v.map(|b| b as f64), format_bytes);
    format!(
        "  [{}] {}: allocated {}, reserved {}",
        gpu.index,
        gpu.name,
        bytes(gpu.allocated_bytes),
        bytes(gpu.reserved_bytes),
    )
}
