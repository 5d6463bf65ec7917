use std::path::{Path, PathBuf};

use faucet::{Amount, FaucetConfig};
use faucet_fake_node::FakeNodeConfig;
use serde::{Deserialize, Serialize};

/// Prefix of environment overrides, e.g. `FAUCET_FAUCET__TRANSFER__TO`
pub const ENV_PREFIX: &str = "FAUCET";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Info {
    /// Directory holding faucet credential files
    pub credentials_dir: Option<PathBuf>,
}

/// Settings of the in-memory node backend
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FakeNode {
    /// Balance every loaded identity starts with
    pub balance: Amount,
    /// Start every account as already activated
    pub activated: bool,
    /// Confirmation query at which operations confirm, unset to never confirm
    pub confirm_after: Option<u32>,
    /// Delay applied to every node call
    pub latency_ms: u64,
}

impl Default for FakeNode {
    fn default() -> Self {
        Self {
            balance: Amount::ZERO,
            activated: false,
            confirm_after: Some(1),
            latency_ms: 0,
        }
    }
}

impl FakeNode {
    pub fn node_config(&self) -> FakeNodeConfig {
        FakeNodeConfig {
            confirm_after: self.confirm_after,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub info: Info,
    pub faucet: FaucetConfig,
    pub fake_node: FakeNode,
}

impl Settings {
    /// Load settings from `config_file` (if it exists) and the environment
    pub fn new(config_file: Option<&Path>) -> Result<Self, ::config::ConfigError> {
        let mut builder = ::config::Config::builder();

        if let Some(config_file) = config_file {
            builder = builder.add_source(::config::File::from(config_file).required(false));
        }

        builder
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}
