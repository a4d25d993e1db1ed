//! Consensus configuration files.
//!
//! ```toml
//! network = "testnet"
//!
//! [parameters]
//! beta = 8
//! min_round_interval_ms = 50
//!
//! [logging]
//! level = "debug"
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use snow_utils::logging::LogConfig;
use thiserror::Error;

use crate::parameters::{ParameterError, Parameters};

/// Consensus configuration: a named preset plus per-field overrides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusConfig {
    /// Preset name, see [`Parameters::preset`]
    pub network: String,
    /// Overrides applied on top of the preset
    #[serde(default)]
    pub parameters: ParameterOverrides,
    #[serde(default)]
    pub logging: LogConfig,
}

/// Optional replacements for individual preset fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ParameterOverrides {
    pub k: Option<usize>,
    pub alpha_preference: Option<usize>,
    pub alpha_confidence: Option<usize>,
    pub beta: Option<usize>,
    pub concurrent_repolls: Option<usize>,
    pub optimal_processing: Option<usize>,
    pub max_outstanding_items: Option<usize>,
    pub max_item_processing_time_ms: Option<u64>,
    pub min_round_interval_ms: Option<u64>,
}

impl ParameterOverrides {
    /// Returns `base` with every present override applied.
    #[must_use]
    pub fn apply(&self, base: Parameters) -> Parameters {
        Parameters {
            k: self.k.unwrap_or(base.k),
            alpha_preference: self.alpha_preference.unwrap_or(base.alpha_preference),
            alpha_confidence: self.alpha_confidence.unwrap_or(base.alpha_confidence),
            beta: self.beta.unwrap_or(base.beta),
            concurrent_repolls: self.concurrent_repolls.unwrap_or(base.concurrent_repolls),
            optimal_processing: self.optimal_processing.unwrap_or(base.optimal_processing),
            max_outstanding_items: self
                .max_outstanding_items
                .unwrap_or(base.max_outstanding_items),
            max_item_processing_time: self
                .max_item_processing_time_ms
                .map_or(base.max_item_processing_time, Duration::from_millis),
            min_round_interval: self
                .min_round_interval_ms
                .map_or(base.min_round_interval, Duration::from_millis),
        }
    }
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self::for_network("mainnet")
    }
}

impl ConsensusConfig {
    /// Configuration for a named network with no overrides.
    pub fn for_network(network: impl Into<String>) -> Self {
        Self {
            network: network.into(),
            parameters: ParameterOverrides::default(),
            logging: LogConfig::default(),
        }
    }

    /// Loads configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Saves configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))
    }

    /// Resolves the preset, applies overrides and validates the result.
    pub fn parameters(&self) -> Result<Parameters, ConfigError> {
        let base = Parameters::preset(&self.network)
            .ok_or_else(|| ConfigError::UnknownNetwork(self.network.clone()))?;
        let params = self.parameters.apply(base);
        params.validate()?;
        Ok(params)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.parameters().map(|_| ())
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),
    #[error("parse error: {0}")]
    ParseError(String),
    #[error("serialize error: {0}")]
    SerializeError(String),
    #[error("unknown network: {0}")]
    UnknownNetwork(String),
    #[error(transparent)]
    InvalidParameters(#[from] ParameterError),
}
