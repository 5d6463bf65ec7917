//! Faucet configuration
//!
//! A single [`FaucetConfig`] is handed to the fan-out driver at start. Every
//! field has a default so partial TOML/JSON documents deserialize.

use std::time::Duration;

use faucet_common::{Amount, NodeTarget};
use serde::{Deserialize, Serialize};

use crate::classifier::ALREADY_ACTIVATED;
use crate::Error;

/// Faucet configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct FaucetConfig {
    /// Node / network target attached to every wallet
    pub node: NodeTarget,
    /// Sweep transfer settings
    pub transfer: TransferConfig,
    /// Confirmation polling settings
    pub confirmation: ConfirmationConfig,
    /// Maximum identity runs in flight, `0` for unbounded
    pub concurrency: usize,
    /// Timeout applied to each non-polling stage
    pub stage_timeout_ms: Option<u64>,
    /// Deadline for the whole fan-out
    pub deadline_ms: Option<u64>,
    /// Remote error ids treated as recoverable
    pub recoverable: RecoverableConfig,
}

impl FaucetConfig {
    /// Check the configuration for values the pipeline cannot run with
    pub fn validate(&self) -> Result<(), Error> {
        if self.transfer.to.trim().is_empty() {
            return Err(Error::Config("transfer target must be set".to_string()));
        }
        self.confirmation.validate()?;
        if self.stage_timeout_ms == Some(0) {
            return Err(Error::Config("stage_timeout_ms must be positive".to_string()));
        }
        Ok(())
    }

    /// Concurrency bound, `None` when unbounded
    pub fn concurrency_limit(&self) -> Option<usize> {
        match self.concurrency {
            0 => None,
            limit => Some(limit),
        }
    }

    /// Per-stage timeout
    pub fn stage_timeout(&self) -> Option<Duration> {
        self.stage_timeout_ms.map(Duration::from_millis)
    }

    /// Fan-out deadline
    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_ms.map(Duration::from_millis)
    }
}

/// Sweep transfer settings.
///
/// `threshold` decides whether a transfer happens at all, `reserve` is what
/// stays behind when it does. Both are in minor units and independent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Destination of swept funds
    pub to: String,
    /// Fee offered for the transfer
    pub fee: Amount,
    /// Transfer only when balance is strictly above this
    pub threshold: Amount,
    /// Amount left in the wallet after the transfer
    pub reserve: Amount,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            to: String::new(),
            fee: Amount::from(1),
            threshold: Amount::from(100_000_000),
            reserve: Amount::from(100_000_000),
        }
    }
}

/// Confirmation polling settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfirmationConfig {
    /// Wait between two queries
    pub interval_ms: u64,
    /// Queries before giving up
    pub max_attempts: u32,
    /// Depth at which an operation counts as final
    pub required_depth: u32,
    /// Growth of the wait between queries
    pub backoff: Backoff,
}

impl Default for ConfirmationConfig {
    fn default() -> Self {
        Self {
            interval_ms: 5_000,
            max_attempts: 60,
            required_depth: 1,
            backoff: Backoff::Fixed,
        }
    }
}

impl ConfirmationConfig {
    /// Initial wait between queries
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    fn validate(&self) -> Result<(), Error> {
        if self.max_attempts == 0 {
            return Err(Error::Config(
                "confirmation.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.interval_ms == 0 {
            return Err(Error::Config(
                "confirmation.interval_ms must be positive".to_string(),
            ));
        }
        if let Backoff::Exponential {
            factor,
            max_interval_ms,
        } = self.backoff
        {
            if factor == 0 {
                return Err(Error::Config(
                    "confirmation.backoff.factor must be positive".to_string(),
                ));
            }
            if max_interval_ms < self.interval_ms {
                return Err(Error::Config(
                    "confirmation.backoff.max_interval_ms must not be below interval_ms"
                        .to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Growth of the wait between confirmation queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Backoff {
    /// Same wait every time
    #[default]
    Fixed,
    /// Multiply the wait by `factor` after each query, up to `max_interval_ms`
    Exponential {
        /// Multiplier
        factor: u32,
        /// Upper bound of the wait
        max_interval_ms: u64,
    },
}

impl Backoff {
    /// Wait to use after `current`, never shorter than `current`
    pub fn next_delay(&self, current: Duration) -> Duration {
        match self {
            Backoff::Fixed => current,
            Backoff::Exponential {
                factor,
                max_interval_ms,
            } => current
                .saturating_mul(*factor)
                .min(Duration::from_millis(*max_interval_ms))
                .max(current),
        }
    }
}

/// Remote error ids the classifier treats as recoverable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoverableConfig {
    /// Ids meaning the account was activated before
    pub already_activated: Vec<String>,
}

impl Default for RecoverableConfig {
    fn default() -> Self {
        Self {
            already_activated: vec![ALREADY_ACTIVATED.to_string()],
        }
    }
}
