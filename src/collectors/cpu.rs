use crate::format::format_bytes;
use crate::probe::{try_capability, CapabilitySource, ProbeError, OS_METRICS};
use crate::stats::{CpuReading, MemoryReading};
use std::time::Duration;

/// Negative windows are treated as zero.
pub fn sample_window(sample_window_ms: i64) -> Duration {
    Duration::from_millis(sample_window_ms.max(0) as u64)
}

/// Samples aggregate and per-core CPU load over `sample_window_ms`, then
/// attaches memory and swap usage.
///
/// Blocks the calling thread for the sampling window.
pub fn collect_cpu(
    caps: &dyn CapabilitySource,
    sample_window_ms: i64,
) -> Result<CpuReading, ProbeError> {
    let window = sample_window(sample_window_ms);
    try_capability(OS_METRICS, || caps.os_metrics(), |mut os| {
        let sample = os.cpu_percent(window)?;
        let memory = os.virtual_memory()?;
        let swap = os.swap_memory()?;
        Ok(CpuReading {
            total_percent: sample.total_percent,
            core_count: sample.per_core_percent.len(),
            per_core_percent: sample.per_core_percent,
            memory,
            swap,
        })
    })
}

pub fn render_cpu(result: &Result<CpuReading, ProbeError>) -> String {
    let cpu = match result {
        Ok(cpu) => cpu,
        Err(err) => return format!("CPU: {err}"),
    };

    let per_core = cpu
        .per_core_percent
        .iter()
        .map(|p| format!("{p:.1}%"))
        .collect::<Vec<_>>()
        .join(", ");

    [
        format!("CPU: {:.1}%", cpu.total_percent),
        format!("CPU cores: {}", cpu.core_count),
        format!("CPU per-core: {per_core}"),
        format!("RAM: {}", usage_line(&cpu.memory)),
        format!("Swap: {}", usage_line(&cpu.swap)),
    ]
    .join("\n")
}

fn usage_line(mem: &MemoryReading) -> String {
    format!(
        "{:.1}% ({}/{})",
        mem.percent_used,
        format_bytes(mem.used_bytes as f64),
        format_bytes(mem.total_bytes as f64)
    )
}
