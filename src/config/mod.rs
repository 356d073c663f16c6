//! Engine configuration loaded from TOML.
//!
//! Every tunable the engine uses is a field here, with defaults matching
//! the constants in [`defaults`]. The configuration is constructed once at
//! startup and handed to the engine explicitly — there is no process-wide
//! config singleton and no first-call-initializes behavior.
//!
//! ## Loading order
//!
//! 1. `AIOLOS_CONFIG` environment variable (path to TOML file)
//! 2. `aiolos.toml` in the current working directory
//! 3. Built-in defaults

pub mod defaults;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Configuration load/parse errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    Io(PathBuf, #[source] std::io::Error),
    #[error("failed to parse config file {0}: {1}")]
    Parse(PathBuf, #[source] toml::de::Error),
}

// ============================================================================
// Top-level config
// ============================================================================

/// Root configuration for an aggregation engine deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Flush scheduler and bucket accumulator tuning.
    #[serde(default)]
    pub aggregation: AggregationConfig,

    /// Catch-up/backfill windows.
    #[serde(default)]
    pub backfill: BackfillConfig,

    /// Broadcast channel tuning.
    #[serde(default)]
    pub broadcast: BroadcastConfig,

    /// Admin HTTP server.
    #[serde(default)]
    pub server: ServerConfig,

    /// Storage paths.
    #[serde(default)]
    pub storage: StorageConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            aggregation: AggregationConfig::default(),
            backfill: BackfillConfig::default(),
            broadcast: BroadcastConfig::default(),
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

/// Flush and rollup tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationConfig {
    /// Flush tick period in seconds (independent of the 1-minute bucket width).
    pub flush_interval_secs: u64,
    /// Tendency threshold in m/s (strict inequality, see `stats::tendency`).
    pub tendency_threshold_mps: f64,
    /// Calm-period threshold in m/s for the hourly rollup.
    pub calm_threshold_mps: f64,
    /// Delay after a boundary before rollup drivers fire, in seconds.
    pub rollup_grace_secs: u64,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            flush_interval_secs: defaults::FLUSH_INTERVAL_SECS,
            tendency_threshold_mps: defaults::TENDENCY_THRESHOLD_MPS,
            calm_threshold_mps: defaults::CALM_THRESHOLD_MPS,
            rollup_grace_secs: defaults::ROLLUP_GRACE_SECS,
        }
    }
}

/// Catch-up/backfill windows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackfillConfig {
    /// Lookback window for ten-minute backfill, in minutes.
    pub ten_minute_lookback_mins: i64,
    /// Lookback window for hourly backfill, in minutes.
    pub hourly_lookback_mins: i64,
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            ten_minute_lookback_mins: defaults::TEN_MINUTE_BACKFILL_LOOKBACK_MINS,
            hourly_lookback_mins: defaults::HOURLY_BACKFILL_LOOKBACK_MINS,
        }
    }
}

/// Broadcast channel tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastConfig {
    /// Bounded channel capacity; lagging subscribers drop events past this.
    pub capacity: usize,
    /// Channel name prefix: `<prefix>:<resolution>:<station>`.
    pub channel_prefix: String,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            capacity: defaults::BROADCAST_CAPACITY,
            channel_prefix: defaults::BROADCAST_CHANNEL_PREFIX.to_string(),
        }
    }
}

/// Admin HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: defaults::DEFAULT_SERVER_ADDR.to_string(),
        }
    }
}

/// Storage paths.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Sled database directory.
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(defaults::DEFAULT_DATA_DIR),
        }
    }
}

impl EngineConfig {
    /// Load configuration using the standard search order:
    /// 1. `AIOLOS_CONFIG` environment variable
    /// 2. `./aiolos.toml` in the current working directory
    /// 3. Built-in defaults
    pub fn load() -> Self {
        if let Ok(path) = std::env::var("AIOLOS_CONFIG") {
            let p = PathBuf::from(&path);
            if p.exists() {
                match Self::load_from_file(&p) {
                    Ok(config) => {
                        info!(path = %p.display(), "Loaded engine config from AIOLOS_CONFIG");
                        return config;
                    }
                    Err(e) => {
                        warn!(path = %p.display(), error = %e, "Failed to load config from AIOLOS_CONFIG, falling back");
                    }
                }
            } else {
                warn!(path = %path, "AIOLOS_CONFIG points to non-existent file, falling back");
            }
        }

        let local = PathBuf::from("aiolos.toml");
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => {
                    info!("Loaded engine config from ./aiolos.toml");
                    return config;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load ./aiolos.toml, using defaults");
                }
            }
        }

        info!("No aiolos.toml found — using built-in defaults");
        Self::default()
    }

    /// Load from a specific TOML file path.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        toml::from_str(&contents).map_err(|e| ConfigError::Parse(path.to_path_buf(), e))
    }
}
