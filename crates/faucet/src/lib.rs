//! Faucet activator
//!
//! Activates dormant faucet wallets and sweeps their funds above a reserve to
//! a configured target, one independent pipeline run per identity.

#![warn(missing_docs)]
#![warn(rustdoc::bare_urls)]

pub mod activation;
pub mod classifier;
pub mod config;
pub mod confirm;
pub mod error;
pub mod fanout;
pub mod keys;
pub mod pipeline;
pub mod state;

#[doc(hidden)]
pub use faucet_common::{
    Amount, ConfirmationStatus, DerivedKeys, DynKeyDeriver, DynNodeClient, Identity,
    InjectionHandle, KeyDeriver, KeyError, NodeClient, NodeError, NodeTarget, RemoteError,
    TransferRequest, Wallet,
};

#[doc(hidden)]
pub use self::activation::{standard_pipeline, Outcome};
#[doc(hidden)]
pub use self::classifier::{Decision, ErrorClassifier, RecoveryRule};
#[doc(hidden)]
pub use self::config::{Backoff, ConfirmationConfig, FaucetConfig, TransferConfig};
#[doc(hidden)]
pub use self::confirm::{ConfirmationPoller, PollOutcome};
#[doc(hidden)]
pub use self::error::Error;
#[doc(hidden)]
pub use self::fanout::{Faucet, Report};
#[doc(hidden)]
pub use self::keys::Bip39Deriver;
#[doc(hidden)]
pub use self::pipeline::{Engine, Pipeline, RunContext, Stage};
#[doc(hidden)]
pub use self::state::{Confirmation, StageName, StageOutput, State};
