//! Pool and delivery configuration
//!
//! Loaded from an optional TOML file layered under `TRANSFERBUF_*`
//! environment variables, e.g. `TRANSFERBUF_STREAMS=4` or
//! `TRANSFERBUF_POOL__BLOCK_SIZE=65536`.

use crate::checksum::{Checksum, Cksum, Crc32};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Shape of the transfer pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Bytes per slot
    pub block_size: usize,
    /// Number of slots
    pub block_count: usize,
    /// Upper bound for a single internal wait (milliseconds)
    pub wake_interval_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            block_size: 1024 * 1024, // 1MB
            block_count: 3,
            wake_interval_ms: 1000,
        }
    }
}

impl PoolConfig {
    pub fn wake_interval(&self) -> Duration {
        Duration::from_millis(self.wake_interval_ms)
    }
}

/// Checksum computed while data passes through the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumKind {
    None,
    /// IEEE CRC-32
    #[default]
    Crc32,
    /// POSIX `cksum`
    Cksum,
}

impl ChecksumKind {
    /// Fresh accumulator for this kind
    pub fn build(&self) -> Option<Box<dyn Checksum>> {
        match self {
            ChecksumKind::None => None,
            ChecksumKind::Crc32 => Some(Box::new(Crc32::new())),
            ChecksumKind::Cksum => Some(Box::new(Cksum::new())),
        }
    }
}

impl FromStr for ChecksumKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(ChecksumKind::None),
            "crc32" => Ok(ChecksumKind::Crc32),
            "cksum" => Ok(ChecksumKind::Cksum),
            other => Err(Error::InvalidArgument(format!(
                "Unknown checksum type: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for ChecksumKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChecksumKind::None => write!(f, "none"),
            ChecksumKind::Crc32 => write!(f, "crc32"),
            ChecksumKind::Cksum => write!(f, "cksum"),
        }
    }
}

/// Settings for a single delivery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    pub pool: PoolConfig,
    /// Parallel reader streams
    pub streams: usize,
    pub checksum: ChecksumKind,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            pool: PoolConfig::default(),
            streams: 1,
            checksum: ChecksumKind::Crc32,
        }
    }
}

impl DeliveryConfig {
    /// Load configuration from an optional file plus environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path).required(true));
        }
        builder = builder.add_source(
            ::config::Environment::with_prefix("TRANSFERBUF")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: Self = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| Error::Config(format!("Failed to load configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s)
            .map_err(|e| Error::Config(format!("Invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Render the effective configuration as TOML
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to render configuration: {}", e)))
    }

    pub fn validate(&self) -> Result<()> {
        if self.streams == 0 {
            return Err(Error::Config("streams must be at least 1".to_string()));
        }
        if self.pool.block_size == 0 || self.pool.block_count == 0 {
            return Err(Error::Config(
                "block_size and block_count must be non-zero for a delivery".to_string(),
            ));
        }
        if self.pool.block_count < self.streams {
            return Err(Error::Config(format!(
                "block_count ({}) must be at least the number of streams ({})",
                self.pool.block_count, self.streams
            )));
        }
        Ok(())
    }
}
