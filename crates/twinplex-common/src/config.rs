//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Runtime configuration for the router and historian."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds, DurationSeconds};
use tracing::debug;

use crate::logging::LogFormat;

/// Reserved identifier the router uses for itself.
pub const DEFAULT_SELF_DEVICE_ID: &str = "twinplex";

fn default_self_device_id() -> String {
    DEFAULT_SELF_DEVICE_ID.to_owned()
}

fn default_test_device_ids() -> Vec<String> {
    vec!["Not-Set".to_owned(), "UUID".to_owned()]
}

fn default_historian_root() -> PathBuf {
    PathBuf::from("target/historian")
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

fn default_delay_factor() -> f64 {
    1.0
}

fn default_max_interval() -> Duration {
    Duration::from_secs(60)
}

/// Primary configuration object for the twin runtime.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub plexus: PlexusConfig,
    #[serde(default)]
    pub historian: HistorianConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    pub source: PathBuf,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &str = "TWINPLEX_CONFIG";

    /// Load configuration from disk, respecting the `TWINPLEX_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        contents
            .parse::<AppConfig>()
            .with_context(|| format!("invalid config file {}", path.display()))
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.plexus.validate()?;
        self.historian.validate()?;
        Ok(())
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
        }
    }
}

/// Identity bookkeeping used by the event router.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlexusConfig {
    /// Seeds the known device set and fills blank sync key segments.
    #[serde(default = "default_self_device_id")]
    pub self_device_id: String,
    /// Placeholder identifiers that never count as real devices.
    #[serde(default = "default_test_device_ids")]
    pub test_device_ids: Vec<String>,
}

impl PlexusConfig {
    fn validate(&self) -> Result<()> {
        if self.self_device_id.trim().is_empty() {
            return Err(anyhow!("plexus.self_device_id must not be empty"));
        }
        if self
            .test_device_ids
            .iter()
            .any(|id| id == &self.self_device_id)
        {
            return Err(anyhow!(
                "plexus.self_device_id '{}' cannot also be a test device id",
                self.self_device_id
            ));
        }
        Ok(())
    }
}

impl Default for PlexusConfig {
    fn default() -> Self {
        Self {
            self_device_id: default_self_device_id(),
            test_device_ids: default_test_device_ids(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistorianConfig {
    #[serde(default = "default_historian_root")]
    pub root_path: PathBuf,
    /// Skip connection-state and message records while recording.
    #[serde(default)]
    pub cache_only_data_events: bool,
    #[serde(default)]
    pub loop_at_end: bool,
    #[serde(default)]
    pub playback: PlaybackConfig,
}

impl HistorianConfig {
    fn validate(&self) -> Result<()> {
        if self.root_path.as_os_str().is_empty() {
            return Err(anyhow!("historian.root_path must not be empty"));
        }
        self.playback.validate()
    }
}

impl Default for HistorianConfig {
    fn default() -> Self {
        Self {
            root_path: default_historian_root(),
            cache_only_data_events: false,
            loop_at_end: false,
            playback: PlaybackConfig::default(),
        }
    }
}

/// Playback clock tuning.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackConfig {
    #[serde(default = "default_delay_factor")]
    pub delay_factor: f64,
    /// Fixed cadence between entries. When unset the recorded gap is used.
    #[serde_as(as = "Option<DurationMilliSeconds<u64>>")]
    #[serde(rename = "base_interval_ms")]
    pub base_interval: Option<Duration>,
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "default_max_interval", rename = "max_interval_secs")]
    pub max_interval: Duration,
}

impl PlaybackConfig {
    fn validate(&self) -> Result<()> {
        if self.max_interval.is_zero() {
            return Err(anyhow!("historian.playback.max_interval_secs must be > 0"));
        }
        Ok(())
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            delay_factor: default_delay_factor(),
            base_interval: None,
            max_interval: default_max_interval(),
        }
    }
}
