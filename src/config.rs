//! Configuration management for Sluice.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{Result, SluiceError};

/// Main configuration for Sluice.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SluiceConfig {
    /// Admission limiter configuration
    #[serde(default)]
    pub limiter: LimiterConfig,

    /// Job dispatch configuration
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Sliding-window limiter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Permits per window. Zero disables limiting.
    #[serde(default = "default_limit")]
    pub limit: usize,

    /// Window length in milliseconds
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            window_ms: default_window_ms(),
        }
    }
}

impl LimiterConfig {
    /// The window as a `Duration`.
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

fn default_limit() -> usize {
    10
}

fn default_window_ms() -> u64 {
    60_000
}

/// Configuration for the batch dispatcher driven by the CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Number of jobs to dispatch
    #[serde(default = "default_jobs")]
    pub jobs: usize,

    /// Simulated work time per job, in milliseconds
    #[serde(default = "default_job_ms")]
    pub job_ms: u64,

    /// Per-job admission deadline in milliseconds. Unset means wait forever.
    #[serde(default)]
    pub admit_timeout_ms: Option<u64>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            jobs: default_jobs(),
            job_ms: default_job_ms(),
            admit_timeout_ms: None,
        }
    }
}

fn default_jobs() -> usize {
    20
}

fn default_job_ms() -> u64 {
    50
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    #[serde(default = "default_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}

impl SluiceConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: SluiceConfig = serde_yaml::from_str(yaml)
            .map_err(|e| SluiceError::Config(format!("Failed to parse configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would make the limiter hang instead of limit.
    pub fn validate(&self) -> Result<()> {
        if self.limiter.limit > 0 && self.limiter.window_ms == 0 {
            return Err(SluiceError::Config(format!(
                "window_ms must be greater than zero when limit is {}",
                self.limiter.limit
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SluiceConfig::default();
        assert_eq!(config.limiter.limit, 10);
        assert_eq!(config.limiter.window(), Duration::from_secs(60));
        assert_eq!(config.dispatch.jobs, 20);
        assert_eq!(config.dispatch.admit_timeout_ms, None);
        assert_eq!(config.logging.format, LogFormat::Text);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
limiter:
  limit: 2
  window_ms: 1000
dispatch:
  jobs: 5
  job_ms: 10
  admit_timeout_ms: 3000
logging:
  level: debug
  format: json
"#;
        let config = SluiceConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.limiter.limit, 2);
        assert_eq!(config.limiter.window_ms, 1000);
        assert_eq!(config.dispatch.jobs, 5);
        assert_eq!(config.dispatch.admit_timeout_ms, Some(3000));
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let yaml = r#"
limiter:
  limit: 3
"#;
        let config = SluiceConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.limiter.limit, 3);
        assert_eq!(config.limiter.window_ms, 60_000);
        assert_eq!(config.dispatch.job_ms, 50);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_zero_window_rejected_when_limiting() {
        let yaml = r#"
limiter:
  limit: 5
  window_ms: 0
"#;
        let err = SluiceConfig::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, SluiceError::Config(_)));
    }

    #[test]
    fn test_zero_window_allowed_when_disabled() {
        let yaml = r#"
limiter:
  limit: 0
  window_ms: 0
"#;
        assert!(SluiceConfig::from_yaml(yaml).is_ok());
    }

    #[test]
    fn test_malformed_yaml() {
        let err = SluiceConfig::from_yaml("limiter: [not, a, map]").unwrap_err();
        assert!(matches!(err, SluiceError::Config(_)));
    }

    #[test]
    fn test_missing_file() {
        let err = SluiceConfig::from_file("/nonexistent/sluice.yaml").unwrap_err();
        assert!(matches!(err, SluiceError::Io(_)));
    }
}
