//! Configuration system for Keel.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $KEEL_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/keel/config.toml
//!   3. ~/.config/keel/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KeelConfig {
    pub rpc: RpcConfig,
    pub gas: GasConfig,
    pub events: EventsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    /// Node endpoint. Read by transport implementations; the core never dials.
    pub endpoint: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GasConfig {
    /// Percentage added on top of a gas estimate before submission.
    pub margin_percent: u32,
    /// Upper clamp on any gas limit the client submits. 0 = no clamp.
    pub max_limit: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Per-subscription buffer. Events beyond this are dropped and reported
    /// to the consumer as a lag marker.
    pub buffer_capacity: usize,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            endpoint: "ws://127.0.0.1:9944".to_string(),
        }
    }
}

impl Default for GasConfig {
    fn default() -> Self {
        Self {
            margin_percent: 10,
            max_limit: 0,
        }
    }
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 256,
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
        .join("keel")
}

fn home_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl KeelConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(Self::file_path())
    }

    /// Load from an explicit path, falling back to defaults if it is absent.
    pub fn load_from(path: PathBuf) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            KeelConfig::default()
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        tracing::debug!(path = %path.display(), "config loaded");
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("KEEL_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&KeelConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply KEEL_* overrides. Unparseable values are ignored.
    fn apply_env_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(v) = var("KEEL_RPC__ENDPOINT") {
            self.rpc.endpoint = v;
        }
        if let Some(p) = var("KEEL_GAS__MARGIN_PERCENT").and_then(|v| v.parse().ok()) {
            self.gas.margin_percent = p;
        }
        if let Some(m) = var("KEEL_GAS__MAX_LIMIT").and_then(|v| v.parse().ok()) {
            self.gas.max_limit = m;
        }
        if let Some(c) = var("KEEL_EVENTS__BUFFER_CAPACITY").and_then(|v| v.parse().ok()) {
            self.events.buffer_capacity = c;
        }
    }
}
