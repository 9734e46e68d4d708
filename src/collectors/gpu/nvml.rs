//! NVIDIA Management Library backend.
//!
//! NVML state is process-global: every successful `nvmlInit` needs exactly one
//! `nvmlShutdown`. [`NvmlSession`] owns that pairing.
//!
//! Only a library that cannot be loaded makes NVML unavailable. A library that
//! loads but fails to initialise (driver not loaded, no permission) yields a
//! session whose every call reports that failure.

use super::VendorManagement;

#[cfg(feature = "nvidia")]
pub use imp::NvmlSession;

#[cfg(feature = "nvidia")]
pub fn open_session() -> Result<Box<dyn VendorManagement>, String> {
    NvmlSession::open().map(|s| Box::new(s) as Box<dyn VendorManagement>)
}

#[cfg(not(feature = "nvidia"))]
pub fn open_session() -> Result<Box<dyn VendorManagement>, String> {
    Err("built without NVML support".to_string())
}

#[cfg(feature = "nvidia")]
mod imp {
    use super::super::{ManagementReading, VendorManagement};
    use nvml_wrapper::enum_wrappers::device::TemperatureSensor;
    use nvml_wrapper::error::NvmlError;
    use nvml_wrapper::Nvml;
    use tracing::debug;

    pub struct NvmlSession {
        nvml: Result<Nvml, String>,
    }

    impl NvmlSession {
        pub fn open() -> Result<Self, String> {
            match Nvml::init() {
                Ok(nvml) => Ok(Self { nvml: Ok(nvml) }),
                Err(err) if is_load_failure(&err) => Err(err.to_string()),
                Err(err) => Ok(Self {
                    nvml: Err(err.to_string()),
                }),
            }
        }

        fn nvml(&self) -> Result<&Nvml, String> {
            self.nvml.as_ref().map_err(Clone::clone)
        }
    }

    pub(super) fn is_load_failure(err: &NvmlError) -> bool {
        matches!(
            err,
            NvmlError::LibloadingError(_) | NvmlError::FailedToLoadSymbol(_)
        )
    }

    impl VendorManagement for NvmlSession {
        fn device_count(&self) -> Result<u32, String> {
            self.nvml()?.device_count().map_err(|e| e.to_string())
        }

        fn read_device(&self, index: u32) -> Result<ManagementReading, String> {
            let device = self
                .nvml()?
                .device_by_index(index)
                .map_err(|e| e.to_string())?;

            let name = match device.name() {
                Ok(name) => name.into_bytes(),
                // The wrapper refuses non-UTF-8 names; keep the device anyway.
                Err(NvmlError::Utf8Error(_)) => format!("GPU {index}").into_bytes(),
                Err(e) => return Err(e.to_string()),
            };
            let memory = device.memory_info().map_err(|e| e.to_string())?;
            let util = device.utilization_rates().map_err(|e| e.to_string())?;
            let temperature = device
                .temperature(TemperatureSensor::Gpu)
                .map_err(|e| e.to_string())?;

            Ok(ManagementReading {
                name,
                memory_used: memory.used,
                memory_total: memory.total,
                util_gpu: util.gpu,
                util_mem: util.memory,
                temperature_c: temperature,
            })
        }
    }

    impl Drop for NvmlSession {
        fn drop(&mut self) {
            let Ok(nvml) = std::mem::replace(&mut self.nvml, Err(String::new())) else {
                return;
            };
            match nvml.shutdown() {
                Ok(()) => debug!("NVML shut down"),
                Err(err) => debug!(error = %err, "NVML shutdown failed"),
            }
        }
    }
}
