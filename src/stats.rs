use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemoryReading {
    #[serde(rename = "percent")]
    pub percent_used: f64,
    #[serde(rename = "used")]
    pub used_bytes: u64,
    #[serde(rename = "total")]
    pub total_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CpuReading {
    #[serde(rename = "total")]
    pub total_percent: f64,
    #[serde(rename = "per_core")]
    pub per_core_percent: Vec<f64>,
    #[serde(rename = "cores")]
    pub core_count: usize,
    pub memory: MemoryReading,
    pub swap: MemoryReading,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GpuProvider {
    NvidiaManagement,
    AcceleratorRuntime,
    AppleIntegrated,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    Active,
    Idle,
}

impl DeviceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Idle => "idle",
        }
    }
}

/// One accelerator as seen by whichever backend answered.
///
/// Fields a backend cannot measure stay `None`; they are never filled with
/// zeros.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct GpuDevice {
    pub index: u32,
    pub name: String,
    #[serde(rename = "util_gpu", skip_serializing_if = "Option::is_none")]
    pub util_gpu_percent: Option<f64>,
    #[serde(rename = "util_mem", skip_serializing_if = "Option::is_none")]
    pub util_mem_percent: Option<f64>,
    #[serde(rename = "vram_used", skip_serializing_if = "Option::is_none")]
    pub vram_used_bytes: Option<u64>,
    #[serde(rename = "vram_total", skip_serializing_if = "Option::is_none")]
    pub vram_total_bytes: Option<u64>,
    #[serde(rename = "temp", skip_serializing_if = "Option::is_none")]
    pub temperature_c: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<DeviceStatus>,
    #[serde(rename = "allocated", skip_serializing_if = "Option::is_none")]
    pub allocated_bytes: Option<u64>,
    #[serde(rename = "reserved", skip_serializing_if = "Option::is_none")]
    pub reserved_bytes: Option<u64>,
    /// Set when `util_gpu_percent` is the VRAM share rather than a measurement.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub util_gpu_estimated: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum GpuReport {
    Devices {
        provider: GpuProvider,
        #[serde(rename = "gpus")]
        devices: Vec<GpuDevice>,
    },
    Error {
        error: String,
    },
}

impl GpuReport {
    pub fn devices(provider: GpuProvider, devices: Vec<GpuDevice>) -> Self {
        Self::Devices { provider, devices }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            error: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MemorySection {
    Reading(MemoryReading),
    Error { error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsRecord {
    pub ok: bool,
    pub memory: MemorySection,
    pub gpu: GpuReport,
}
