//! Composes the collectors into the structured record and the text report.

use crate::collectors::cpu::{collect_cpu, render_cpu};
use crate::collectors::gpu::{collect_gpu, render_gpu};
use crate::collectors::host::HostInfo;
use crate::collectors::memory::collect_memory;
use crate::probe::CapabilitySource;
use crate::stats::{MemorySection, StatsRecord};
use chrono::Local;

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Memory and GPU only; the CPU breakdown is reserved for the text report.
///
/// `_sample_window_ms` is accepted so both assemblers share a call shape, but
/// nothing in the record is sampled over a window.
pub fn assemble_record(caps: &dyn CapabilitySource, _sample_window_ms: i64) -> StatsRecord {
    let memory = match collect_memory(caps) {
        Ok(reading) => MemorySection::Reading(reading),
        Err(err) => MemorySection::Error {
            error: err.to_string(),
        },
    };
    StatsRecord {
        ok: true,
        memory,
        gpu: collect_gpu(caps),
    }
}

/// Header, CPU section and GPU section, newline-joined.
///
/// Blocks for the CPU sampling window.
pub fn assemble_report(caps: &dyn CapabilitySource, sample_window_ms: i64) -> String {
    let host = HostInfo::detect();
    let header = [
        format!("Time: {}", Local::now().format(TIMESTAMP_FORMAT)),
        format!("Host: {}", host.describe()),
    ]
    .join("\n");

    let cpu = render_cpu(&collect_cpu(caps, sample_window_ms));
    let gpu = render_gpu(&collect_gpu(caps));
    [header, cpu, gpu].join("\n")
}
