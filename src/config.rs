use crate::error::{AppError, Result};
use crate::matching::{ForeignMatchConfig, MatchingConfig};
use crate::normalizer::NormalizerConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use validator::Validate;

/// Environment variable prefix, e.g. `CRASH_TRIAGE__MATCHING__MAX_DISTANCE=3`
pub const ENV_PREFIX: &str = "CRASH_TRIAGE";

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Candidate ranking
    #[serde(default)]
    pub matching: MatchingConfig,

    /// Foreign-match breadth analysis
    #[serde(default)]
    pub foreign: ForeignMatchConfig,

    /// Trace normalization
    #[serde(default)]
    pub normalizer: NormalizerConfig,

    /// Storage backend
    #[serde(default)]
    pub store: StoreConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Load configuration from the embedded defaults, `CONFIG_PATH` and environment
    pub fn load() -> Result<Self> {
        let config_path =
            std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config/default.toml".to_string());
        Self::load_from(Path::new(&config_path))
    }

    /// Load configuration with an explicit override file
    pub fn load_from(path: &Path) -> Result<Self> {
        let config: Config = config::Config::builder()
            // Start with default values
            .add_source(config::File::from_str(
                include_str!("../config/default.toml"),
                config::FileFormat::Toml,
            ))
            // Override with config file if it exists
            .add_source(config::File::from(path).required(false))
            // Override with environment variables (prefix: CRASH_TRIAGE__)
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate_settings()?;
        Ok(config)
    }

    /// Check cross-field constraints the individual sections cannot express
    pub fn validate_settings(&self) -> Result<()> {
        self.matching.validate()?;
        self.foreign.validate()?;

        if self.foreign.low_watermark > self.foreign.high_watermark {
            return Err(AppError::Configuration(format!(
                "foreign.low_watermark ({}) must not exceed foreign.high_watermark ({})",
                self.foreign.low_watermark, self.foreign.high_watermark
            )));
        }

        if self.normalizer.max_frames == 0 {
            return Err(AppError::Configuration(
                "normalizer.max_frames must be at least 1".to_string(),
            ));
        }

        if self.store.backend == StoreBackend::Sled && self.store.path.is_none() {
            return Err(AppError::Configuration(
                "store.path is required for the sled backend".to_string(),
            ));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Store backend type
    #[serde(default)]
    pub backend: StoreBackend,

    /// Path for the embedded database
    pub path: Option<PathBuf>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            path: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    #[default]
    Memory,
    Sled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level filter used when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Emit logs as JSON lines
    #[serde(default)]
    pub json_logs: bool,

    /// Record Prometheus metrics
    #[serde(default = "default_true")]
    pub prometheus_enabled: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logs: false,
            prometheus_enabled: true,
        }
    }
}

fn default_log_level() -> String {
    "crash_triage=info".to_string()
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::DistanceMetric;
    use std::io::Write;

    #[test]
    fn test_embedded_defaults() {
        let config = Config::load_from(Path::new("does/not/exist.toml")).unwrap();
        assert_eq!(config.matching.max_distance, 5);
        assert_eq!(config.matching.metric, DistanceMetric::EditDistance);
        assert_eq!(config.foreign.display_cap, 15);
        assert_eq!(config.foreign.low_watermark, 25.0);
        assert_eq!(config.foreign.high_watermark, 75.0);
        assert_eq!(config.normalizer.max_frames, 8);
        assert_eq!(config.store.backend, StoreBackend::Memory);
    }

    #[test]
    fn test_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[matching]\nmax_distance = 2\nmetric = \"symmetric_difference\"\n\n\
             [foreign]\ndisplay_cap = 3"
        )
        .unwrap();

        let config = Config::load_from(file.path()).unwrap();
        assert_eq!(config.matching.max_distance, 2);
        assert_eq!(config.matching.metric, DistanceMetric::SymmetricDifference);
        assert_eq!(config.foreign.display_cap, 3);
        assert_eq!(config.foreign.high_watermark, 75.0);
    }

    #[test]
    fn test_inverted_watermarks_rejected() {
        let mut config = Config::default();
        config.foreign.low_watermark = 80.0;
        config.foreign.high_watermark = 20.0;
        assert!(matches!(
            config.validate_settings(),
            Err(AppError::Configuration(_))
        ));
    }

    #[test]
    fn test_sled_without_path_rejected() {
        let mut config = Config::default();
        config.store.backend = StoreBackend::Sled;
        assert!(config.validate_settings().is_err());
    }
}
