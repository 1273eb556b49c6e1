//! Engine configuration file format.
//!
//! Loads [`WinogradConfig`] from a TOML file (`winoconv.toml`) with environment
//! variable overrides via `WINOCONV_*` prefixed variables.

use crate::shape::Shape2D;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// How a transform driver reaches the border tiles of a tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TileAddressing {
    /// Hand the padding amounts to the micro-kernel.
    Direct,
    /// Build a per-point offset table; padded points read zero.
    Indirect,
    /// Copy border tiles through a zeroed scratch patch.
    #[serde(rename = "copy")]
    UnpaddedCopy,
}

impl std::fmt::Display for TileAddressing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Direct => write!(f, "direct"),
            Self::Indirect => write!(f, "indirect"),
            Self::UnpaddedCopy => write!(f, "copy"),
        }
    }
}

impl std::str::FromStr for TileAddressing {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "direct" => Ok(Self::Direct),
            "indirect" => Ok(Self::Indirect),
            "copy" | "unpadded-copy" => Ok(Self::UnpaddedCopy),
            other => Err(format!("unknown tile addressing mode: {other}")),
        }
    }
}

/// Largest tile extent any registered transform uses.
pub const MAX_TILE_EXTENT: usize = 8;

/// Engine configuration loaded from TOML with environment variable overrides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WinogradConfig {
    /// Worker threads used for weight transforms and the default pool
    /// (0 = one per logical core).
    /// Override: `WINOCONV_NUM_THREADS`
    pub num_threads: usize,

    /// Pin the output tile, e.g. `{ rows = 2, cols = 2 }`.
    /// Override: `WINOCONV_OUTPUT_TILE` (`2x2`, `4x4`, ...)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_tile: Option<Shape2D>,

    /// Addressing strategy of the input transform driver.
    /// Override: `WINOCONV_INPUT_ADDRESSING`
    pub input_addressing: TileAddressing,

    /// Addressing strategy of the output transform driver.
    /// Override: `WINOCONV_OUTPUT_ADDRESSING`
    pub output_addressing: TileAddressing,

    /// Allow micro-kernels that need SIMD extensions.
    /// Override: `WINOCONV_ALLOW_SIMD`
    pub allow_simd: bool,
}

impl Default for WinogradConfig {
    fn default() -> Self {
        Self {
            num_threads: 0,
            output_tile: None,
            input_addressing: TileAddressing::Indirect,
            output_addressing: TileAddressing::Indirect,
            allow_simd: true,
        }
    }
}

/// Errors that can occur when loading or validating a [`WinogradConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize TOML: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("invalid environment override {key}={value}: {reason}")]
    EnvOverride { key: String, value: String, reason: String },
}

impl WinogradConfig {
    /// Render the default configuration as TOML.
    pub fn default_toml() -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(&Self::default())?)
    }

    /// Load configuration from a TOML file, falling back to defaults for
    /// missing fields, then apply environment variable overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Load from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let mut cfg: WinogradConfig = toml::from_str(toml_str)?;
        cfg.apply_env_overrides()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load only from environment variables, starting from defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut cfg = Self::default();
        cfg.apply_env_overrides()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_threads > 1024 {
            return Err(ConfigError::Validation(format!(
                "num_threads must be <= 1024, got {}",
                self.num_threads
            )));
        }
        if let Some(tile) = self.output_tile
            && (tile.rows == 0 || tile.cols == 0 || tile.rows > MAX_TILE_EXTENT || tile.cols > MAX_TILE_EXTENT)
        {
            return Err(ConfigError::Validation(format!(
                "output_tile must be between 1x1 and {MAX_TILE_EXTENT}x{MAX_TILE_EXTENT}, got {tile}"
            )));
        }
        Ok(())
    }

    /// Apply `WINOCONV_*` environment variable overrides.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(val) = std::env::var("WINOCONV_NUM_THREADS") {
            self.num_threads = val.parse::<usize>().map_err(|e| ConfigError::EnvOverride {
                key: "WINOCONV_NUM_THREADS".into(),
                value: val.clone(),
                reason: e.to_string(),
            })?;
        }

        if let Ok(val) = std::env::var("WINOCONV_OUTPUT_TILE") {
            self.output_tile = if matches!(val.as_str(), "" | "auto") {
                None
            } else {
                Some(val.parse::<Shape2D>().map_err(|reason| ConfigError::EnvOverride {
                    key: "WINOCONV_OUTPUT_TILE".into(),
                    value: val.clone(),
                    reason,
                })?)
            };
        }

        if let Ok(val) = std::env::var("WINOCONV_INPUT_ADDRESSING") {
            self.input_addressing = val.parse::<TileAddressing>().map_err(|reason| {
                ConfigError::EnvOverride { key: "WINOCONV_INPUT_ADDRESSING".into(), value: val.clone(), reason }
            })?;
        }

        if let Ok(val) = std::env::var("WINOCONV_OUTPUT_ADDRESSING") {
            self.output_addressing = val.parse::<TileAddressing>().map_err(|reason| {
                ConfigError::EnvOverride { key: "WINOCONV_OUTPUT_ADDRESSING".into(), value: val.clone(), reason }
            })?;
        }

        if let Ok(val) = std::env::var("WINOCONV_ALLOW_SIMD") {
            self.allow_simd = matches!(val.as_str(), "1" | "true" | "yes");
        }

        Ok(())
    }
}
