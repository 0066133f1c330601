//! Configuration management for Turnstile.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::admission::RuleSet;
use crate::error::Result;

/// Prefix for environment overrides, e.g. `TURNSTILE__ADMISSION__ENABLED=false`.
pub const ENV_PREFIX: &str = "TURNSTILE";

/// Main configuration for a Turnstile host.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnstileConfig {
    /// Admission control configuration
    #[serde(default)]
    pub admission: AdmissionSettings,

    /// Spam classifier tuning
    #[serde(default)]
    pub spam: SpamSettings,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Admission control configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionSettings {
    /// Master switch; when off every check is granted
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Seconds between expiry sweeps
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Path to a YAML rules file layered over the built-in rules
    pub rules_path: Option<String>,

    /// Seconds of per-identity activity history to keep
    #[serde(default = "default_activity_retention")]
    pub activity_retention_secs: u64,
}

impl Default for AdmissionSettings {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            sweep_interval_secs: default_sweep_interval(),
            rules_path: None,
            activity_retention_secs: default_activity_retention(),
        }
    }
}

fn default_enabled() -> bool {
    true
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_activity_retention() -> u64 {
    30
}

/// Spam classifier tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpamSettings {
    /// Score at or above which content is spam
    #[serde(default = "default_threshold")]
    pub threshold: u32,

    /// Characters beyond which content is "long"
    #[serde(default = "default_max_length")]
    pub max_length: usize,

    /// Points added for long content
    #[serde(default = "default_length_points")]
    pub length_points: u32,

    /// A word repeated more often than this scores its count
    #[serde(default = "default_repeated_word_threshold")]
    pub repeated_word_threshold: usize,

    /// Look-back for posting velocity, in seconds
    #[serde(default = "default_velocity_window")]
    pub velocity_window_secs: u64,

    /// Recent messages beyond this score their count
    #[serde(default = "default_velocity_threshold")]
    pub velocity_threshold: usize,

    /// Characters of content included in spam flag events
    #[serde(default = "default_preview_chars")]
    pub preview_chars: usize,
}

impl Default for SpamSettings {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            max_length: default_max_length(),
            length_points: default_length_points(),
            repeated_word_threshold: default_repeated_word_threshold(),
            velocity_window_secs: default_velocity_window(),
            velocity_threshold: default_velocity_threshold(),
            preview_chars: default_preview_chars(),
        }
    }
}

impl SpamSettings {
    pub fn velocity_window_ms(&self) -> u64 {
        self.velocity_window_secs * 1000
    }
}

fn default_threshold() -> u32 {
    5
}

fn default_max_length() -> usize {
    1000
}

fn default_length_points() -> u32 {
    2
}

fn default_repeated_word_threshold() -> usize {
    5
}

fn default_velocity_window() -> u64 {
    30
}

fn default_velocity_threshold() -> usize {
    10
}

fn default_preview_chars() -> usize {
    100
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl TurnstileConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: TurnstileConfig = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from an optional YAML file, then apply
    /// `TURNSTILE__*` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(
                ::config::File::from(path)
                    .format(::config::FileFormat::Yaml)
                    .required(true),
            );
        }
        let config = builder
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    /// Time between expiry sweeps.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.admission.sweep_interval_secs.max(1))
    }

    /// Built-in rules, with the configured rules file layered on top.
    pub fn rule_set(&self) -> Result<RuleSet> {
        let mut rules = RuleSet::defaults();
        if let Some(path) = &self.admission.rules_path {
            rules.extend(RuleSet::from_file(path)?);
        }
        Ok(rules)
    }
}
