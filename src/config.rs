//! Kernel configuration.
//!
//! ## Environment
//!
//! [`KernelConfig::from_env`] starts from the defaults and applies:
//! - `PROMPT_KERNEL_CACHE_CAPACITY`: cache entries (default: 1000)
//! - `PROMPT_KERNEL_CACHE_ENABLED`: `true`/`false` (default: true)
//! - `PROMPT_KERNEL_SEED`: expansion seed (default: 0)
//! - `PROMPT_KERNEL_EXPAND_WILDCARDS`: `true`/`false` (default: false)
//! - `PROMPT_KERNEL_MAX_WILDCARD_DEPTH`: nested wildcard cap (default: 10)
//!
//! Unset variables keep their default; values that fail to parse are errors.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::cache::CacheConfig;
use crate::compiler::{CompileOptions, DEFAULT_MAX_WILDCARD_DEPTH};
use crate::ops::OPTIMIZE_MAX_ITERATIONS;

/// Environment variable for the cache capacity.
pub const ENV_CACHE_CAPACITY: &str = "PROMPT_KERNEL_CACHE_CAPACITY";
/// Environment variable toggling the cache.
pub const ENV_CACHE_ENABLED: &str = "PROMPT_KERNEL_CACHE_ENABLED";
/// Environment variable for the expansion seed.
pub const ENV_SEED: &str = "PROMPT_KERNEL_SEED";
/// Environment variable toggling wildcard expansion.
pub const ENV_EXPAND_WILDCARDS: &str = "PROMPT_KERNEL_EXPAND_WILDCARDS";
/// Environment variable for the nested wildcard cap.
pub const ENV_MAX_WILDCARD_DEPTH: &str = "PROMPT_KERNEL_MAX_WILDCARD_DEPTH";

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// JSON could not be parsed.
    #[error("Invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// An environment variable held an unparsable value.
    #[error("Invalid value for {var}: {value:?}")]
    InvalidEnv {
        /// Variable name.
        var: &'static str,
        /// Raw value.
        value: String,
    },
    /// A setting is outside its allowed range.
    #[error("Invalid setting {field}: {reason}")]
    OutOfRange {
        /// Setting name.
        field: &'static str,
        /// What is wrong with it.
        reason: &'static str,
    },
}

/// Top-level configuration for the kernel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// Compile cache settings.
    pub cache: CacheConfig,
    /// Default compile options.
    pub compile: CompileOptions,
    /// Nested wildcard depth cap (default: 10).
    pub max_wildcard_depth: usize,
    /// Optimizer iteration cap (default: 100).
    pub optimize_max_iterations: usize,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            compile: CompileOptions::default(),
            max_wildcard_depth: DEFAULT_MAX_WILDCARD_DEPTH,
            optimize_max_iterations: OPTIMIZE_MAX_ITERATIONS,
        }
    }
}

impl KernelConfig {
    /// Parse a JSON document; missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(v) = parse_var(&lookup, ENV_CACHE_CAPACITY)? {
            config.cache.max_entries = v;
        }
        if let Some(v) = parse_flag(&lookup, ENV_CACHE_ENABLED)? {
            config.cache.enabled = v;
        }
        if let Some(v) = parse_var(&lookup, ENV_SEED)? {
            config.compile.seed = v;
        }
        if let Some(v) = parse_flag(&lookup, ENV_EXPAND_WILDCARDS)? {
            config.compile.expand_wildcards = v;
        }
        if let Some(v) = parse_var(&lookup, ENV_MAX_WILDCARD_DEPTH)? {
            config.max_wildcard_depth = v;
        }
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.optimize_max_iterations == 0 {
            return Err(ConfigError::OutOfRange {
                field: "optimize_max_iterations",
                reason: "must be at least 1",
            });
        }
        Ok(())
    }
}

fn parse_var<F, T>(lookup: &F, var: &'static str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(var) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv { var, value: raw }),
    }
}

fn parse_flag<F>(lookup: &F, var: &'static str) -> Result<Option<bool>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        None => Ok(None),
        Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            _ => Err(ConfigError::InvalidEnv { var, value: raw }),
        },
    }
}
