//! Consensus parameters.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A violated parameter bound. Every variant names the offending field.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParameterError {
    #[error("k = 0: fails the condition that: 0 < k")]
    ZeroK,

    #[error("alpha_preference = {alpha_preference}: fails the condition that: k/2 < alpha_preference (k = {k})")]
    AlphaPreferenceTooLow { k: usize, alpha_preference: usize },

    #[error("alpha_preference = {alpha_preference}: fails the condition that: alpha_preference <= k (k = {k})")]
    AlphaPreferenceTooHigh { k: usize, alpha_preference: usize },

    #[error("alpha_confidence = {alpha_confidence}: fails the condition that: alpha_preference <= alpha_confidence (alpha_preference = {alpha_preference})")]
    AlphaConfidenceTooLow {
        alpha_preference: usize,
        alpha_confidence: usize,
    },

    #[error("alpha_confidence = {alpha_confidence}: fails the condition that: alpha_confidence <= k (k = {k})")]
    AlphaConfidenceTooHigh { k: usize, alpha_confidence: usize },

    #[error("beta = 0: fails the condition that: 0 < beta")]
    ZeroBeta,

    #[error("concurrent_repolls = 0: fails the condition that: 0 < concurrent_repolls")]
    ZeroConcurrentRepolls,

    #[error("optimal_processing = 0: fails the condition that: 0 < optimal_processing")]
    ZeroOptimalProcessing,

    #[error("max_outstanding_items = 0: fails the condition that: 0 < max_outstanding_items")]
    ZeroMaxOutstandingItems,

    #[error("max_item_processing_time = 0: fails the condition that: 0 < max_item_processing_time")]
    ZeroMaxItemProcessingTime,

    #[error("min_round_interval = 0: fails the condition that: 0 < min_round_interval")]
    ZeroMinRoundInterval,
}

impl ParameterError {
    /// Name of the field that failed validation.
    #[must_use]
    pub const fn field(&self) -> &'static str {
        match self {
            Self::ZeroK => "k",
            Self::AlphaPreferenceTooLow { .. } | Self::AlphaPreferenceTooHigh { .. } => {
                "alpha_preference"
            }
            Self::AlphaConfidenceTooLow { .. } | Self::AlphaConfidenceTooHigh { .. } => {
                "alpha_confidence"
            }
            Self::ZeroBeta => "beta",
            Self::ZeroConcurrentRepolls => "concurrent_repolls",
            Self::ZeroOptimalProcessing => "optimal_processing",
            Self::ZeroMaxOutstandingItems => "max_outstanding_items",
            Self::ZeroMaxItemProcessingTime => "max_item_processing_time",
            Self::ZeroMinRoundInterval => "min_round_interval",
        }
    }
}

/// Parameters for Snow consensus protocols.
///
/// Values are never clamped: a consensus instance refuses to start with a
/// set that fails [`Parameters::validate`]. Changing parameters at runtime
/// means building a new instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameters {
    /// Sample size (k) - validators drawn per poll
    pub k: usize,

    /// Votes needed to change the preference
    pub alpha_preference: usize,

    /// Votes needed to count a poll towards confidence
    pub alpha_confidence: usize,

    /// Consecutive confident polls needed to finalize
    pub beta: usize,

    /// Polls allowed in flight at once
    pub concurrent_repolls: usize,

    /// Processing items above which the instance reports unhealthy
    pub optimal_processing: usize,

    /// Processing items above which new items are refused
    pub max_outstanding_items: usize,

    /// Age above which a processing item makes the instance unhealthy
    pub max_item_processing_time: Duration,

    /// Delay between repoll rounds of the background worker
    pub min_round_interval: Duration,
}

impl Default for Parameters {
    fn default() -> Self {
        Self::mainnet()
    }
}

impl Parameters {
    /// Creates validated parameters, taking the resource bounds from the defaults.
    ///
    /// # Errors
    ///
    /// Returns the first violated bound.
    pub fn new(
        k: usize,
        alpha_preference: usize,
        alpha_confidence: usize,
        beta: usize,
    ) -> Result<Self, ParameterError> {
        let params = Self {
            k,
            alpha_preference,
            alpha_confidence,
            beta,
            ..Default::default()
        };
        params.validate()?;
        Ok(params)
    }

    /// Checks every bound, returning the first violation.
    ///
    /// # Errors
    ///
    /// See [`ParameterError`].
    pub fn validate(&self) -> Result<(), ParameterError> {
        let k = self.k;
        if k == 0 {
            return Err(ParameterError::ZeroK);
        }
        // k/2 < alpha, compared without truncating k/2.
        if self.alpha_preference * 2 <= k {
            return Err(ParameterError::AlphaPreferenceTooLow {
                k,
                alpha_preference: self.alpha_preference,
            });
        }
        if self.alpha_preference > k {
            return Err(ParameterError::AlphaPreferenceTooHigh {
                k,
                alpha_preference: self.alpha_preference,
            });
        }
        if self.alpha_confidence < self.alpha_preference {
            return Err(ParameterError::AlphaConfidenceTooLow {
                alpha_preference: self.alpha_preference,
                alpha_confidence: self.alpha_confidence,
            });
        }
        if self.alpha_confidence > k {
            return Err(ParameterError::AlphaConfidenceTooHigh {
                k,
                alpha_confidence: self.alpha_confidence,
            });
        }
        if self.beta == 0 {
            return Err(ParameterError::ZeroBeta);
        }
        if self.concurrent_repolls == 0 {
            return Err(ParameterError::ZeroConcurrentRepolls);
        }
        if self.optimal_processing == 0 {
            return Err(ParameterError::ZeroOptimalProcessing);
        }
        if self.max_outstanding_items == 0 {
            return Err(ParameterError::ZeroMaxOutstandingItems);
        }
        if self.max_item_processing_time.is_zero() {
            return Err(ParameterError::ZeroMaxItemProcessingTime);
        }
        if self.min_round_interval.is_zero() {
            return Err(ParameterError::ZeroMinRoundInterval);
        }
        Ok(())
    }

    #[must_use]
    pub const fn mainnet() -> Self {
        Self {
            k: 20,
            alpha_preference: 15,
            alpha_confidence: 15,
            beta: 20,
            concurrent_repolls: 4,
            optimal_processing: 10,
            max_outstanding_items: 256,
            max_item_processing_time: Duration::from_secs(30),
            min_round_interval: Duration::from_millis(100),
        }
    }

    #[must_use]
    pub const fn testnet() -> Self {
        Self {
            k: 11,
            alpha_preference: 7,
            alpha_confidence: 9,
            beta: 6,
            ..Self::mainnet()
        }
    }

    /// Small sample for local networks of a handful of nodes.
    #[must_use]
    pub const fn local() -> Self {
        Self {
            k: 5,
            alpha_preference: 4,
            alpha_confidence: 4,
            beta: 3,
            min_round_interval: Duration::from_millis(10),
            ..Self::mainnet()
        }
    }

    /// Looks up a named preset.
    ///
    /// Besides the network presets this knows `high-throughput`,
    /// `high-security` and `low-latency`.
    #[must_use]
    pub fn preset(name: &str) -> Option<Self> {
        let params = match name {
            "mainnet" => Self::mainnet(),
            "testnet" => Self::testnet(),
            "local" => Self::local(),
            "high-throughput" => Self {
                k: 7,
                alpha_preference: 5,
                alpha_confidence: 6,
                beta: 3,
                concurrent_repolls: 64,
                optimal_processing: 64,
                max_outstanding_items: 1024,
                max_item_processing_time: Duration::from_secs(2),
                min_round_interval: Duration::from_millis(5),
            },
            "high-security" => Self {
                k: 31,
                alpha_preference: 21,
                alpha_confidence: 26,
                beta: 15,
                ..Self::mainnet()
            },
            "low-latency" => Self {
                k: 5,
                alpha_preference: 4,
                alpha_confidence: 4,
                beta: 2,
                concurrent_repolls: 8,
                optimal_processing: 20,
                max_outstanding_items: 512,
                max_item_processing_time: Duration::from_secs(1),
                min_round_interval: Duration::from_millis(5),
            },
            _ => return None,
        };
        Some(params)
    }
}
