//! In-process stand-ins for host capabilities.

use crate::collectors::gpu::runtime::{AcceleratorRuntime, IntegratedCounters};
use crate::collectors::gpu::{ManagementReading, VendorManagement};
use crate::collectors::memory::{CpuSample, OsMetrics};
use crate::probe::CapabilitySource;
use crate::stats::MemoryReading;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const GIB: u64 = 1024 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct FakeOs {
    pub memory: MemoryReading,
    pub swap: MemoryReading,
    pub per_core: Vec<f64>,
}

impl Default for FakeOs {
    fn default() -> Self {
        Self {
            memory: MemoryReading {
                percent_used: 25.0,
                used_bytes: 4 * GIB,
                total_bytes: 16 * GIB,
            },
            swap: MemoryReading {
                percent_used: 0.0,
                used_bytes: 0,
                total_bytes: 2 * GIB,
            },
            per_core: vec![10.0, 20.0, 50.0, 70.0],
        }
    }
}

struct FakeOsHandle {
    os: FakeOs,
    window: Arc<Mutex<Option<Duration>>>,
}

impl OsMetrics for FakeOsHandle {
    fn virtual_memory(&mut self) -> Result<MemoryReading, String> {
        Ok(self.os.memory.clone())
    }

    fn swap_memory(&mut self) -> Result<MemoryReading, String> {
        Ok(self.os.swap.clone())
    }

    fn cpu_percent(&mut self, window: Duration) -> Result<CpuSample, String> {
        if let Ok(mut slot) = self.window.lock() {
            *slot = Some(window);
        }
        let total = self.os.per_core.iter().sum::<f64>() / self.os.per_core.len().max(1) as f64;
        Ok(CpuSample {
            total_percent: total,
            per_core_percent: self.os.per_core.clone(),
        })
    }
}

/// Scripted NVML behaviour: the devices it reports and where it breaks.
#[derive(Debug, Clone, Default)]
pub struct ManagementScript {
    pub devices: Vec<ManagementReading>,
    pub fail_on: Option<u32>,
    /// Library loaded but initialisation failed with this message.
    pub init_error: Option<String>,
}

struct FakeSession {
    script: ManagementScript,
    released: Arc<AtomicUsize>,
}

impl VendorManagement for FakeSession {
    fn device_count(&self) -> Result<u32, String> {
        if let Some(err) = &self.script.init_error {
            return Err(err.clone());
        }
        Ok(self.script.devices.len() as u32)
    }

    fn read_device(&self, index: u32) -> Result<ManagementReading, String> {
        if let Some(err) = &self.script.init_error {
            return Err(err.clone());
        }
        if self.script.fail_on == Some(index) {
            return Err("GPU is lost".to_string());
        }
        self.script
            .devices
            .get(index as usize)
            .cloned()
            .ok_or_else(|| "invalid argument".to_string())
    }
}

impl Drop for FakeSession {
    fn drop(&mut self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Default)]
pub struct FakeRuntime {
    /// `(name, allocated, reserved)` per discrete device.
    pub discrete: Vec<(String, Option<u64>, Option<u64>)>,
    pub integrated: Option<IntegratedCounters>,
}

impl AcceleratorRuntime for FakeRuntime {
    fn discrete_available(&self) -> bool {
        !self.discrete.is_empty()
    }

    fn device_count(&self) -> Result<u32, String> {
        Ok(self.discrete.len() as u32)
    }

    fn device_name(&self, index: u32) -> Result<String, String> {
        self.discrete
            .get(index as usize)
            .map(|d| d.0.clone())
            .ok_or_else(|| "invalid device ordinal".to_string())
    }

    fn memory_allocated(&self, index: u32) -> Result<Option<u64>, String> {
        self.discrete
            .get(index as usize)
            .map(|d| d.1)
            .ok_or_else(|| "invalid device ordinal".to_string())
    }

    fn memory_reserved(&self, index: u32) -> Result<Option<u64>, String> {
        self.discrete
            .get(index as usize)
            .map(|d| d.2)
            .ok_or_else(|| "invalid device ordinal".to_string())
    }

    fn integrated_available(&self) -> bool {
        self.integrated.is_some()
    }

    fn integrated_name(&self) -> String {
        "Apple M2 GPU".to_string()
    }

    fn integrated_counters(&self) -> Result<IntegratedCounters, String> {
        self.integrated
            .clone()
            .ok_or_else(|| "no integrated device".to_string())
    }
}

#[derive(Debug, Default)]
pub struct FakeCapabilities {
    pub os: Option<FakeOs>,
    pub management: Option<ManagementScript>,
    pub runtime: Option<FakeRuntime>,
    pub diagnostics: Option<String>,
    pub gpu_disabled: bool,
    pub cpu_window: Arc<Mutex<Option<Duration>>>,
    pub management_released: Arc<AtomicUsize>,
}

impl FakeCapabilities {
    pub fn last_cpu_window(&self) -> Option<Duration> {
        self.cpu_window.lock().ok().and_then(|slot| *slot)
    }

    pub fn releases(&self) -> usize {
        self.management_released.load(Ordering::SeqCst)
    }
}

impl CapabilitySource for FakeCapabilities {
    fn os_metrics(&self) -> Result<Box<dyn OsMetrics>, String> {
        let os = self.os.clone().ok_or_else(|| "simulated absence".to_string())?;
        Ok(Box::new(FakeOsHandle {
            os,
            window: self.cpu_window.clone(),
        }))
    }

    fn vendor_management(&self) -> Result<Box<dyn VendorManagement>, String> {
        let script = self
            .management
            .clone()
            .ok_or_else(|| "libnvidia-ml.so.1: cannot open shared object file".to_string())?;
        Ok(Box::new(FakeSession {
            script,
            released: self.management_released.clone(),
        }))
    }

    fn accelerator_runtime(&self) -> Result<Box<dyn AcceleratorRuntime>, String> {
        let runtime = self
            .runtime
            .clone()
            .ok_or_else(|| "libcuda.so.1: cannot open shared object file".to_string())?;
        Ok(Box::new(runtime))
    }

    fn gpu_diagnostics(&self) -> Result<String, String> {
        self.diagnostics
            .clone()
            .ok_or_else(|| "ioreg timed out".to_string())
    }

    fn gpu_enabled(&self) -> bool {
        !self.gpu_disabled
    }
}
