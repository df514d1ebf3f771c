//! Configuration system for loopcheck.
//!
//! Resolution order: environment variables → config file → defaults.
//! Command-line flags are applied on top by the binary.
//!
//! Config file location:
//!   1. $LOOPCHECK_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/loopcheck/config.toml
//!   3. ~/.config/loopcheck/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::protocol::{
    DEFAULT_BUFFER_SIZE, DEFAULT_ITERATIONS, DEFAULT_TIMEOUT, LOOPBACK_PRODUCT_ID,
    LOOPBACK_VENDOR_ID, STRESS_PRODUCT_ID, STRESS_VENDOR_ID,
};

/// Retry ceiling per chunk when no other value is configured.
pub const DEFAULT_RETRY_LIMIT: u32 = 16;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopcheckConfig {
    pub device: DeviceConfig,
    pub loopback: LoopbackSettings,
    pub stress: StressSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub loopback_vendor_id: u16,
    pub loopback_product_id: u16,
    pub stress_vendor_id: u16,
    pub stress_product_id: u16,
    /// Which matching device to use when several are attached.
    pub index: usize,
    /// Interface claimed on the device.
    pub interface: u8,
    /// Per-operation timeout in milliseconds.
    pub timeout_ms: u64,
}

/// How a loopback run splits its source buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkingPolicy {
    /// Every chunk is `min(max_packet_size, remaining)`.
    FixedMax,
    /// Every chunk length is drawn from `0..=min(max_packet_size, remaining)`,
    /// zero-length chunks included.
    RandomizedUpTo,
}

impl std::str::FromStr for ChunkingPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "fixed" | "fixed_max" => Ok(ChunkingPolicy::FixedMax),
            "random" | "randomized" | "randomized_up_to" => Ok(ChunkingPolicy::RandomizedUpTo),
            other => Err(format!("unknown chunking policy: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopbackSettings {
    /// Source buffer size per endpoint pair. 0 = zero-length packets only.
    pub buffer_size: usize,
    pub chunking: ChunkingPolicy,
    /// Failed attempts tolerated on one chunk before the run gives up.
    pub retry_limit: u32,
    /// Drive endpoint pairs concurrently.
    pub parallel: bool,
    /// Stop at the first failing endpoint pair.
    pub fail_fast: bool,
    /// Base seed. None = seeded from entropy.
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StressSettings {
    pub iterations: u32,
    /// Stop the run at the first failed trial.
    pub fail_fast: bool,
    /// None = seeded from entropy.
    pub seed: Option<u64>,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            loopback_vendor_id: LOOPBACK_VENDOR_ID,
            loopback_product_id: LOOPBACK_PRODUCT_ID,
            stress_vendor_id: STRESS_VENDOR_ID,
            stress_product_id: STRESS_PRODUCT_ID,
            index: 0,
            interface: 0,
            timeout_ms: DEFAULT_TIMEOUT.as_millis() as u64,
        }
    }
}

impl Default for LoopbackSettings {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            chunking: ChunkingPolicy::FixedMax,
            retry_limit: DEFAULT_RETRY_LIMIT,
            parallel: false,
            fail_fast: false,
            seed: None,
        }
    }
}

impl Default for StressSettings {
    fn default() -> Self {
        Self {
            iterations: DEFAULT_ITERATIONS,
            fail_fast: false,
            seed: None,
        }
    }
}

impl DeviceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("loopcheck")
}

fn dirs_or_home() -> PathBuf {
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

impl LoopcheckConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            Self::from_file(&path)?
        } else {
            LoopcheckConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("LOOPCHECK_CONFIG")
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
            std::fs::write(&path, LoopcheckConfig::default().to_toml()?)
                .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::SerializeFailed)
    }

    /// Apply LOOPCHECK_* env var overrides.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from any key lookup. Unparseable values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let flag = |v: String| v == "true" || v == "1";

        if let Some(v) = lookup("LOOPCHECK_DEVICE__INDEX").and_then(|v| v.parse().ok()) {
            self.device.index = v;
        }
        if let Some(v) = lookup("LOOPCHECK_DEVICE__TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            self.device.timeout_ms = v;
        }
        if let Some(v) = lookup("LOOPCHECK_LOOPBACK__BUFFER_SIZE").and_then(|v| v.parse().ok()) {
            self.loopback.buffer_size = v;
        }
        if let Some(v) = lookup("LOOPCHECK_LOOPBACK__CHUNKING").and_then(|v| v.parse().ok()) {
            self.loopback.chunking = v;
        }
        if let Some(v) = lookup("LOOPCHECK_LOOPBACK__RETRY_LIMIT").and_then(|v| v.parse().ok()) {
            self.loopback.retry_limit = v;
        }
        if let Some(v) = lookup("LOOPCHECK_LOOPBACK__SEED").and_then(|v| v.parse().ok()) {
            self.loopback.seed = Some(v);
        }
        if let Some(v) = lookup("LOOPCHECK_LOOPBACK__FAIL_FAST") {
            self.loopback.fail_fast = flag(v);
        }
        if let Some(v) = lookup("LOOPCHECK_STRESS__ITERATIONS").and_then(|v| v.parse().ok()) {
            self.stress.iterations = v;
        }
        if let Some(v) = lookup("LOOPCHECK_STRESS__FAIL_FAST") {
            self.stress.fail_fast = flag(v);
        }
        if let Some(v) = lookup("LOOPCHECK_STRESS__SEED").and_then(|v| v.parse().ok()) {
            self.stress.seed = Some(v);
        }
    }
}
