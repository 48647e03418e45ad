//! Engine configuration.
//!
//! Values come from (in increasing precedence) built-in defaults, a JSON
//! config file, `ANNOTATE_*` environment variables, and CLI flags.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_INFLIGHT: usize = 12;
pub const DEFAULT_BATCH_SIZE: usize = 20;
pub const DEFAULT_CONCURRENT_BATCHES: usize = 3;
pub const DEFAULT_IAA_ANNOTATORS: u32 = 2;

/// Errors detected before any unit of work is submitted.
#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    #[error("no model profile selected")]
    NoModelSelected,
    #[error("connection {connection_id} for profile {profile_id} is inactive")]
    ConnectionInactive {
        profile_id: String,
        connection_id: String,
    },
    #[error("connection {connection_id} for profile {profile_id} has no API key")]
    MissingApiKey {
        profile_id: String,
        connection_id: String,
    },
    #[error("profile {profile_id} references connection {expected}, got {actual}")]
    ConnectionMismatch {
        profile_id: String,
        expected: String,
        actual: String,
    },
    #[error("duplicate model profile: {0}")]
    DuplicateProfile(String),
    #[error("invalid value for {key}: {value}")]
    InvalidEnv { key: &'static str, value: String },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Inter-annotator-agreement allocation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IaaConfig {
    pub enabled: bool,
    /// Share of items, 0..=100, that need multiple annotators.
    pub portion_percent: f64,
    /// Annotators per IAA item; values below 2 are raised to 2.
    pub annotators_per_item: u32,
    pub seed: u32,
}

impl Default for IaaConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            portion_percent: 0.0,
            annotators_per_item: DEFAULT_IAA_ANNOTATORS,
            seed: 0,
        }
    }
}

impl IaaConfig {
    pub fn enabled(portion_percent: f64, annotators_per_item: u32, seed: u32) -> Self {
        Self {
            enabled: true,
            portion_percent,
            annotators_per_item,
            seed,
        }
    }

    pub fn required_count(&self) -> u32 {
        self.annotators_per_item.max(2)
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if !self.portion_percent.is_finite() || !(0.0..=100.0).contains(&self.portion_percent) {
            return Err(ConfigurationError::Invalid(format!(
                "iaa.portion_percent must be within [0, 100]: {}",
                self.portion_percent
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Dispatcher bound on concurrently executing model calls.
    pub max_inflight: usize,
    pub batch_size: usize,
    pub concurrent_batches_per_window: usize,
    pub iaa: IaaConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_inflight: DEFAULT_MAX_INFLIGHT,
            batch_size: DEFAULT_BATCH_SIZE,
            concurrent_batches_per_window: DEFAULT_CONCURRENT_BATCHES,
            iaa: IaaConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Defaults overlaid with `ANNOTATE_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigurationError> {
        Self::default().overlay_env(|key| std::env::var(key).ok())
    }

    /// Overlay values from an arbitrary lookup (the environment in production).
    pub fn overlay_env<F>(mut self, lookup: F) -> Result<Self, ConfigurationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = parse_var(&lookup, "ANNOTATE_MAX_INFLIGHT")? {
            self.max_inflight = v;
        }
        if let Some(v) = parse_var(&lookup, "ANNOTATE_BATCH_SIZE")? {
            self.batch_size = v;
        }
        if let Some(v) = parse_var(&lookup, "ANNOTATE_CONCURRENT_BATCHES")? {
            self.concurrent_batches_per_window = v;
        }
        if let Some(v) = parse_var(&lookup, "ANNOTATE_IAA_ENABLED")? {
            self.iaa.enabled = v;
        }
        if let Some(v) = parse_var(&lookup, "ANNOTATE_IAA_PORTION")? {
            self.iaa.portion_percent = v;
        }
        if let Some(v) = parse_var(&lookup, "ANNOTATE_IAA_ANNOTATORS")? {
            self.iaa.annotators_per_item = v;
        }
        if let Some(v) = parse_var(&lookup, "ANNOTATE_IAA_SEED")? {
            self.iaa.seed = v;
        }
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.max_inflight == 0 {
            return Err(ConfigurationError::Invalid(
                "max_inflight must be >= 1".into(),
            ));
        }
        if self.batch_size == 0 {
            return Err(ConfigurationError::Invalid("batch_size must be >= 1".into()));
        }
        if self.concurrent_batches_per_window == 0 {
            return Err(ConfigurationError::Invalid(
                "concurrent_batches_per_window must be >= 1".into(),
            ));
        }
        self.iaa.validate()
    }
}

fn parse_var<T, F>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigurationError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigurationError::InvalidEnv { key, value: raw }),
    }
}
