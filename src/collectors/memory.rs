use crate::format::percent_of;
use crate::probe::{try_capability, CapabilitySource, ProbeError, OS_METRICS};
use crate::stats::MemoryReading;
use std::thread;
use std::time::Duration;
use sysinfo::{CpuExt, System, SystemExt};

#[derive(Debug, Clone, PartialEq)]
pub struct CpuSample {
    pub total_percent: f64,
    pub per_core_percent: Vec<f64>,
}

/// OS counters for memory, swap and CPU load.
pub trait OsMetrics {
    fn virtual_memory(&mut self) -> Result<MemoryReading, String>;
    fn swap_memory(&mut self) -> Result<MemoryReading, String>;
    /// Blocks for `window` while sampling CPU load.
    fn cpu_percent(&mut self, window: Duration) -> Result<CpuSample, String>;
}

pub struct SysinfoMetrics {
    system: System,
}

impl SysinfoMetrics {
    pub fn load() -> Result<Self, String> {
        if !System::IS_SUPPORTED {
            return Err(format!(
                "unsupported platform {}",
                std::env::consts::OS
            ));
        }
        Ok(Self {
            system: System::new(),
        })
    }
}

impl OsMetrics for SysinfoMetrics {
    fn virtual_memory(&mut self) -> Result<MemoryReading, String> {
        self.system.refresh_memory();
        let total = self.system.total_memory();
        let used = self.system.used_memory().min(total);
        Ok(reading(used, total))
    }

    fn swap_memory(&mut self) -> Result<MemoryReading, String> {
        self.system.refresh_memory();
        let total = self.system.total_swap();
        let used = self.system.used_swap().min(total);
        Ok(reading(used, total))
    }

    fn cpu_percent(&mut self, window: Duration) -> Result<CpuSample, String> {
        self.system.refresh_cpu();
        if !window.is_zero() {
            thread::sleep(window);
        }
        self.system.refresh_cpu();

        let per_core_percent: Vec<f64> = self
            .system
            .cpus()
            .iter()
            .map(|c| c.cpu_usage() as f64)
            .collect();
        if per_core_percent.is_empty() {
            return Err("no CPUs reported".to_string());
        }
        Ok(CpuSample {
            total_percent: self.system.global_cpu_info().cpu_usage() as f64,
            per_core_percent,
        })
    }
}

fn reading(used: u64, total: u64) -> MemoryReading {
    MemoryReading {
        percent_used: percent_of(used, total),
        used_bytes: used,
        total_bytes: total,
    }
}

pub fn collect_memory(caps: &dyn CapabilitySource) -> Result<MemoryReading, ProbeError> {
    try_capability(OS_METRICS, || caps.os_metrics(), |mut os| os.virtual_memory())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeCapabilities, FakeOs};

    #[test]
    fn reads_virtual_memory_through_capability() {
        let caps = FakeCapabilities {
            os: Some(FakeOs::default()),
            ..FakeCapabilities::default()
        };
        let mem = collect_memory(&caps).unwrap();
        assert_eq!(mem.total_bytes, 16 * 1024 * 1024 * 1024);
        assert_eq!(mem.percent_used, 25.0);
    }

    #[test]
    fn missing_os_metrics_names_capability() {
        let caps = FakeCapabilities::default();
        let err = collect_memory(&caps).unwrap_err();
        assert!(err.is_unavailable());
        assert_eq!(err.to_string(), "sysinfo not available (simulated absence)");
    }

    #[test]
    fn sysinfo_reports_consistent_memory() {
        let Ok(mut os) = SysinfoMetrics::load() else {
            return;
        };
        let mem = os.virtual_memory().unwrap();
        assert!(mem.used_bytes <= mem.total_bytes);
        assert!((0.0..=100.0).contains(&mem.percent_used));
    }

    #[test]
    fn reading_handles_empty_swap() {
        let swap = reading(0, 0);
        assert_eq!(swap.percent_used, 0.0);
    }
}
