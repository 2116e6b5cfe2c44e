//! Kernel configuration loaded from `.hivelog/config.toml`.
//!
//! A missing file is not an error: every knob has a default. Unknown keys are
//! rejected so typos surface instead of silently falling back.

use crate::core::error::HivelogError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct KernelConfig {
    pub store: StoreConfig,
    pub reservations: ReservationConfig,
    pub mandates: MandateConfig,
    pub patterns: PatternConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    pub busy_timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            busy_timeout_secs: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReservationConfig {
    pub default_ttl_seconds: i64,
    pub min_ttl_seconds: i64,
    /// Upper bound for a requested TTL or renewal.
    pub max_ttl_seconds: i64,
}

impl Default for ReservationConfig {
    fn default() -> Self {
        Self {
            default_ttl_seconds: 3600,
            min_ttl_seconds: 60,
            max_ttl_seconds: 30 * 24 * 60 * 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MandateConfig {
    pub half_life_days: f64,
    pub established_net: f64,
    pub mandate_net: f64,
    pub mandate_ratio: f64,
    pub rejected_net: f64,
}

impl Default for MandateConfig {
    fn default() -> Self {
        Self {
            half_life_days: 90.0,
            established_net: 2.0,
            mandate_net: 5.0,
            mandate_ratio: 0.7,
            rejected_net: -3.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PatternConfig {
    pub half_life_days: f64,
    pub min_observations: f64,
    pub min_helpful: f64,
    pub max_harmful_ratio: f64,
    pub deprecation_ratio: f64,
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            half_life_days: 90.0,
            min_observations: 3.0,
            min_helpful: 5.0,
            max_harmful_ratio: 0.15,
            deprecation_ratio: 0.3,
        }
    }
}

impl KernelConfig {
    pub fn validate(&self) -> Result<(), HivelogError> {
        if self.reservations.min_ttl_seconds <= 0 {
            return Err(HivelogError::ConfigError(
                "reservations.min_ttl_seconds must be positive".into(),
            ));
        }
        if self.reservations.default_ttl_seconds < self.reservations.min_ttl_seconds {
            return Err(HivelogError::ConfigError(format!(
                "reservations.default_ttl_seconds ({}) is below min_ttl_seconds ({})",
                self.reservations.default_ttl_seconds, self.reservations.min_ttl_seconds
            )));
        }
        if self.reservations.default_ttl_seconds > self.reservations.max_ttl_seconds {
            return Err(HivelogError::ConfigError(format!(
                "reservations.default_ttl_seconds ({}) is above max_ttl_seconds ({})",
                self.reservations.default_ttl_seconds, self.reservations.max_ttl_seconds
            )));
        }
        if self.mandates.half_life_days <= 0.0 || self.patterns.half_life_days <= 0.0 {
            return Err(HivelogError::ConfigError(
                "half_life_days must be positive".into(),
            ));
        }
        for (name, ratio) in [
            ("mandates.mandate_ratio", self.mandates.mandate_ratio),
            ("patterns.max_harmful_ratio", self.patterns.max_harmful_ratio),
            ("patterns.deprecation_ratio", self.patterns.deprecation_ratio),
        ] {
            if !(0.0..=1.0).contains(&ratio) {
                return Err(HivelogError::ConfigError(format!(
                    "{} must be within [0, 1], got {}",
                    name, ratio
                )));
            }
        }
        Ok(())
    }
}

pub fn config_path(hivelog_dir: &Path) -> PathBuf {
    hivelog_dir.join(CONFIG_FILE_NAME)
}

/// Load config from `<hivelog_dir>/config.toml`.
/// Accepts either the `.hivelog` directory or the store root (`.hivelog/data`).
pub fn load_config(hivelog_dir: &Path) -> Result<KernelConfig, HivelogError> {
    let candidates = [
        Some(config_path(hivelog_dir)),
        hivelog_dir.parent().map(config_path),
    ];

    for path in candidates.into_iter().flatten() {
        if path.is_file() {
            let content = fs::read_to_string(&path)?;
            return parse_config(&content);
        }
    }

    // No config = defaults (not an error)
    Ok(KernelConfig::default())
}

pub fn parse_config(content: &str) -> Result<KernelConfig, HivelogError> {
    let config: KernelConfig =
        toml::from_str(content).map_err(|e| HivelogError::ConfigError(e.to_string()))?;
    config.validate()?;
    Ok(config)
}
