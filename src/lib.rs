//! On-demand host telemetry: CPU, memory, swap and GPU, gathered from
//! whichever capabilities the machine actually has.

pub mod collectors;
pub mod config;
pub mod format;
pub mod http;
pub mod metrics;
pub mod node;
pub mod probe;
pub mod report;
pub mod stats;
pub mod subprocess;

#[cfg(test)]
mod testing;

pub use format::format_bytes;
pub use probe::{CapabilitySource, HostCapabilities, ProbeError};
pub use report::{assemble_record, assemble_report};
pub use stats::{GpuReport, StatsRecord};
