// Guarded access to optional host capabilities. Collectors reach OS counters
// and vendor libraries only through `try_capability`.

use crate::collectors::gpu::diagnostics;
use crate::collectors::gpu::nvml;
use crate::collectors::gpu::runtime::{self, AcceleratorRuntime};
use crate::collectors::gpu::VendorManagement;
use crate::collectors::memory::{OsMetrics, SysinfoMetrics};
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

pub const OS_METRICS: &str = "sysinfo";
pub const VENDOR_MANAGEMENT: &str = "NVML";
pub const ACCELERATOR_RUNTIME: &str = "accelerator runtime";
pub const GPU_DIAGNOSTICS: &str = "gpu diagnostics";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProbeError {
    #[error("{capability} not available ({reason})")]
    Unavailable {
        capability: &'static str,
        reason: String,
    },
    #[error("{capability} error ({detail})")]
    Failed {
        capability: &'static str,
        detail: String,
    },
}

impl ProbeError {
    pub fn capability(&self) -> &'static str {
        match self {
            Self::Unavailable { capability, .. } | Self::Failed { capability, .. } => capability,
        }
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

// The handle is moved into `use_cap` and dropped on return or unwind.
pub fn try_capability<C, T, L, U>(
    capability: &'static str,
    load: L,
    use_cap: U,
) -> Result<T, ProbeError>
where
    L: FnOnce() -> Result<C, String>,
    U: FnOnce(C) -> Result<T, String>,
{
    let handle = match catch_unwind(AssertUnwindSafe(load)) {
        Ok(Ok(handle)) => handle,
        Ok(Err(reason)) => {
            debug!(capability, reason = %reason, "capability unavailable");
            return Err(ProbeError::Unavailable { capability, reason });
        }
        Err(payload) => {
            let reason = panic_message(payload.as_ref());
            warn!(capability, reason = %reason, "capability panicked while loading");
            return Err(ProbeError::Unavailable { capability, reason });
        }
    };

    match catch_unwind(AssertUnwindSafe(move || use_cap(handle))) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(detail)) => {
            warn!(capability, detail = %detail, "capability failed");
            Err(ProbeError::Failed { capability, detail })
        }
        Err(payload) => {
            let detail = panic_message(payload.as_ref());
            warn!(capability, detail = %detail, "capability panicked");
            Err(ProbeError::Failed { capability, detail })
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        return (*s).to_string();
    }
    if let Some(s) = payload.downcast_ref::<String>() {
        return s.clone();
    }
    "panic with non-string payload".to_string()
}

pub trait CapabilitySource: Send + Sync {
    fn os_metrics(&self) -> Result<Box<dyn OsMetrics>, String>;
    fn vendor_management(&self) -> Result<Box<dyn VendorManagement>, String>;
    fn accelerator_runtime(&self) -> Result<Box<dyn AcceleratorRuntime>, String>;
    fn gpu_diagnostics(&self) -> Result<String, String>;

    fn gpu_enabled(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GpuSettings {
    pub enabled: bool,
    pub nvml: bool,
    pub accelerator_runtime: bool,
    pub diagnostics_timeout: Duration,
}

impl Default for GpuSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            nvml: true,
            accelerator_runtime: true,
            diagnostics_timeout: Duration::from_millis(600),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct HostCapabilities {
    gpu: GpuSettings,
}

impl HostCapabilities {
    pub fn new(gpu: GpuSettings) -> Self {
        Self { gpu }
    }
}

impl CapabilitySource for HostCapabilities {
    fn os_metrics(&self) -> Result<Box<dyn OsMetrics>, String> {
        SysinfoMetrics::load().map(|m| Box::new(m) as Box<dyn OsMetrics>)
    }

    fn vendor_management(&self) -> Result<Box<dyn VendorManagement>, String> {
        if !self.gpu.nvml {
            return Err("disabled by configuration".to_string());
        }
        nvml::open_session()
    }

    fn accelerator_runtime(&self) -> Result<Box<dyn AcceleratorRuntime>, String> {
        if !self.gpu.accelerator_runtime {
            return Err("disabled by configuration".to_string());
        }
        runtime::load_platform_runtime()
    }

    fn gpu_diagnostics(&self) -> Result<String, String> {
        diagnostics::run_platform_tool(self.gpu.diagnostics_timeout)
    }

    fn gpu_enabled(&self) -> bool {
        self.gpu.enabled
    }
}
