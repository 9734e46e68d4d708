use crate::probe::GpuSettings;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

pub const MAX_SAMPLE_MS: u64 = 1000;
const MIN_DIAGNOSTICS_TIMEOUT: Duration = Duration::from_millis(1);
const MAX_DIAGNOSTICS_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default)]
    pub sample: SampleConfig,
    #[serde(default)]
    pub gpu: GpuConfig,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct SampleConfig {
    #[serde(default = "default_sample_ms")]
    pub default_ms: u64,
    #[serde(default = "default_max_sample_ms")]
    pub max_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GpuConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub nvml: bool,
    #[serde(default = "default_true")]
    pub accelerator_runtime: bool,
    #[serde(default = "default_diagnostics_timeout")]
    pub diagnostics_timeout: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            sample: SampleConfig::default(),
            gpu: GpuConfig::default(),
        }
    }
}

impl Default for SampleConfig {
    fn default() -> Self {
        Self {
            default_ms: default_sample_ms(),
            max_ms: default_max_sample_ms(),
        }
    }
}

impl Default for GpuConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            nvml: true,
            accelerator_runtime: true,
            diagnostics_timeout: default_diagnostics_timeout(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse YAML in {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },
    #[error("invalid configuration: {0}")]
    Validation(String),
}

impl Config {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let path_display = path_ref.display().to_string();
        let text = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
            path: path_display.clone(),
            source,
        })?;
        Self::from_yaml(&text, &path_display)
    }

    fn from_yaml(text: &str, path: &str) -> Result<Self, ConfigError> {
        let cfg: Config = serde_yaml::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_string(),
            source,
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listen.trim().is_empty() {
            return Err(ConfigError::Validation("listen is required".to_string()));
        }
        if SocketAddr::from_str(&self.listen).is_err() {
            return Err(ConfigError::Validation(
                "listen must be a host:port socket address".to_string(),
            ));
        }
        if self.sample.max_ms > MAX_SAMPLE_MS {
            return Err(ConfigError::Validation(format!(
                "sample.max_ms must be <= {MAX_SAMPLE_MS}"
            )));
        }
        if self.sample.default_ms > self.sample.max_ms {
            return Err(ConfigError::Validation(
                "sample.default_ms must be <= sample.max_ms".to_string(),
            ));
        }
        self.gpu.diagnostics_timeout()?;
        Ok(())
    }

    pub fn example_yaml() -> &'static str {
        include_str!("../config.yaml.example")
    }
}

impl GpuConfig {
    pub fn diagnostics_timeout(&self) -> Result<Duration, ConfigError> {
        let timeout = humantime::parse_duration(&self.diagnostics_timeout).map_err(|err| {
            ConfigError::Validation(format!(
                "gpu.diagnostics_timeout '{}': {err}",
                self.diagnostics_timeout
            ))
        })?;
        if !(MIN_DIAGNOSTICS_TIMEOUT..=MAX_DIAGNOSTICS_TIMEOUT).contains(&timeout) {
            return Err(ConfigError::Validation(
                "gpu.diagnostics_timeout must be between 1ms and 10s".to_string(),
            ));
        }
        Ok(timeout)
    }

    pub fn settings(&self) -> Result<GpuSettings, ConfigError> {
        Ok(GpuSettings {
            enabled: self.enabled,
            nvml: self.nvml,
            accelerator_runtime: self.accelerator_runtime,
            diagnostics_timeout: self.diagnostics_timeout()?,
        })
    }
}

fn default_listen() -> String {
    "127.0.0.1:9188".to_string()
}

fn default_sample_ms() -> u64 {
    100
}

fn default_max_sample_ms() -> u64 {
    1000
}

fn default_true() -> bool {
    true
}

fn default_diagnostics_timeout() -> String {
    "600ms".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn example_yaml_is_valid_and_matches_defaults() {
        let cfg = Config::from_yaml(Config::example_yaml(), "config.yaml.example")
            .expect("bundled example must load");
        assert_eq!(cfg.listen, "127.0.0.1:9188");
        assert_eq!(cfg.sample.default_ms, 100);
        assert_eq!(cfg.sample.max_ms, 1000);
        assert_eq!(
            cfg.gpu.settings().unwrap(),
            GpuSettings::default(),
        );
    }

    #[test]
    fn missing_sections_use_defaults() {
        let cfg = Config::from_yaml("listen: \"0.0.0.0:9000\"\n", "inline").unwrap();
        assert_eq!(cfg.sample.max_ms, 1000);
        assert!(cfg.gpu.enabled);
    }

    #[test]
    fn default_above_max_is_rejected() {
        let mut cfg = Config::default();
        cfg.sample.default_ms = 2000;
        assert!(matches!(cfg.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn sample_ceiling_is_one_second() {
        let cfg = Config::from_yaml("sample:\n  max_ms: 1000\n", "inline").unwrap();
        assert_eq!(cfg.sample.max_ms, MAX_SAMPLE_MS);

        let err = Config::from_yaml("sample:\n  max_ms: 5000\n", "inline").unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
        assert!(err.to_string().contains("sample.max_ms must be <= 1000"));
    }

    #[test]
    fn bad_listen_is_rejected() {
        let cfg = Config {
            listen: "localhost".to_string(),
            ..Config::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn diagnostics_timeout_bounds() {
        let mut gpu = GpuConfig::default();
        gpu.diagnostics_timeout = "30s".to_string();
        assert!(gpu.settings().is_err());
        gpu.diagnostics_timeout = "soon".to_string();
        assert!(gpu.settings().is_err());
        gpu.diagnostics_timeout = "2s".to_string();
        assert_eq!(gpu.settings().unwrap().diagnostics_timeout, Duration::from_secs(2));
    }

    #[test]
    fn parse_error_names_the_file() {
        let err = Config::from_yaml("sample: [", "broken.yaml").unwrap_err();
        assert!(err.to_string().contains("broken.yaml"));
    }
}
