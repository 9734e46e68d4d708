//! Best-effort GPU metrics scraped from the platform diagnostic tool.
//!
//! On macOS this is the `PerformanceStatistics` block of
//! `ioreg -r -d 1 -c IOAccelerator`. Values found here are treated as
//! measurements; anything the pattern does not match is simply absent.

#[cfg(target_os = "macos")]
use crate::subprocess::run_with_timeout;
use regex::Regex;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::warn;

const UTILIZATION_PATTERN: &str =
    r#""(?:Device Utilization %|GPU Activity\(%\))"\s*=\s*(\d+(?:\.\d+)?)"#;
const TEMPERATURE_PATTERN: &str = r#"(?i)"[^"]*temp[^"]*"\s*=\s*(\d+(?:\.\d+)?)"#;

/// Raw readings above this are taken to be milli-degrees.
///
/// A heuristic with no documented basis; readings may still be off.
const MILLI_DEGREE_THRESHOLD: f64 = 200.0;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct DiagnosticsReading {
    pub utilization_percent: Option<f64>,
    pub temperature_c: Option<f64>,
}

#[cfg(target_os = "macos")]
pub fn run_platform_tool(timeout: Duration) -> Result<String, String> {
    run_with_timeout("ioreg", &["-r", "-d", "1", "-c", "IOAccelerator"], timeout)
        .into_stdout("ioreg")
}

#[cfg(not(target_os = "macos"))]
pub fn run_platform_tool(_timeout: Duration) -> Result<String, String> {
    Err(format!(
        "no GPU diagnostic tool on {}",
        std::env::consts::OS
    ))
}

/// Returns `None` when neither utilisation nor temperature is present.
pub fn parse_diagnostics(text: &str) -> Option<DiagnosticsReading> {
    static UTILIZATION: OnceLock<Option<Regex>> = OnceLock::new();
    static TEMPERATURE: OnceLock<Option<Regex>> = OnceLock::new();

    let reading = DiagnosticsReading {
        utilization_percent: first_number(&UTILIZATION, UTILIZATION_PATTERN, text),
        temperature_c: first_number(&TEMPERATURE, TEMPERATURE_PATTERN, text)
            .map(normalize_temperature),
    };
    if reading.utilization_percent.is_none() && reading.temperature_c.is_none() {
        return None;
    }
    Some(reading)
}

pub fn normalize_temperature(raw: f64) -> f64 {
    if raw > MILLI_DEGREE_THRESHOLD {
        raw / 1000.0
    } else {
        raw
    }
}

fn compiled(cell: &'static OnceLock<Option<Regex>>, pattern: &str) -> Option<&'static Regex> {
    cell.get_or_init(|| match Regex::new(pattern) {
        Ok(re) => Some(re),
        Err(err) => {
            warn!(pattern, error = %err, "invalid GPU diagnostics pattern");
            None
        }
    })
    .as_ref()
}

fn first_number(
    cell: &'static OnceLock<Option<Regex>>,
    pattern: &str,
    text: &str,
) -> Option<f64> {
    let re = compiled(cell, pattern)?;
    re.captures(text)?.get(1)?.as_str().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const IOREG_SAMPLE: &str = concat!(
        "+-o AGXAcceleratorG14X  <class AGXAcceleratorG14X, id 0x1000003b1>\n",
        "    {\n",
        r#"      "PerformanceStatistics" = {"In use system memory (driver)"=0,"#,
        r#""Alloc system memory"=1447149568,"Tiled Scene Bytes"=917504,"#,
        r#""Device Utilization %"=17,"Renderer Utilization %"=15,"#,
        r#""Tiler Utilization %"=17,"In use system memory"=417775616}"#,
        "\n",
        r#"      "model" = "Apple M2""#,
        "\n    }",
    );

    #[test]
    fn patterns_compile() {
        Regex::new(UTILIZATION_PATTERN).unwrap();
        Regex::new(TEMPERATURE_PATTERN).unwrap();
    }

    #[test]
    fn parses_ioreg_utilization() {
        let reading = parse_diagnostics(IOREG_SAMPLE).unwrap();
        assert_eq!(reading.utilization_percent, Some(17.0));
        assert_eq!(reading.temperature_c, None);
    }

    #[test]
    fn parses_gpu_activity_and_celsius_temperature() {
        let reading =
            parse_diagnostics(r#""GPU Activity(%)" = 42.5, "GPU Temperature" = 57"#).unwrap();
        assert_eq!(reading.utilization_percent, Some(42.5));
        assert_eq!(reading.temperature_c, Some(57.0));
    }

    #[test]
    fn milli_degrees_are_scaled() {
        assert_eq!(normalize_temperature(48_250.0), 48.25);
        assert_eq!(normalize_temperature(200.0), 200.0);
        assert_eq!(normalize_temperature(65.0), 65.0);
    }

    #[test]
    fn output_without_metrics_is_a_miss() {
        assert_eq!(parse_diagnostics("+-o IOAccelerator\n  \"model\" = \"x\""), None);
        assert_eq!(parse_diagnostics(""), None);
    }

    #[cfg(not(target_os = "macos"))]
    #[test]
    fn other_platforms_have_no_tool() {
        let err = run_platform_tool(Duration::from_millis(600)).unwrap_err();
        assert!(err.starts_with("no GPU diagnostic tool"));
    }
}
