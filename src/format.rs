const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
const STEP: f64 = 1024.0;

/// Renders a byte count with base-1024 scaling and one fractional digit.
///
/// Anything at or above 1024 TB stays in PB, however large.
pub fn format_bytes(num: f64) -> String {
    let mut value = num;
    for unit in UNITS {
        if value < STEP {
            return format!("{value:.1}{unit}");
        }
        value /= STEP;
    }
    format!("{value:.1}PB")
}

pub fn percent_of(used: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (used as f64 / total as f64) * 100.0
}
