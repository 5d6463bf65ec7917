//! Errors

use std::time::Duration;

use faucet_common::{Amount, InjectionHandle, KeyError, NodeError};
use thiserror::Error;

use crate::state::StageName;

/// Faucet Error
#[derive(Debug, Error)]
pub enum Error {
    /// Node client error
    #[error(transparent)]
    Node(#[from] NodeError),
    /// Key derivation error
    #[error(transparent)]
    Key(#[from] KeyError),
    /// A stage read a field no earlier stage wrote
    #[error("Stage `{stage}` requires `{missing}` in state")]
    MissingField {
        /// Stage that failed
        stage: StageName,
        /// Field that was absent
        missing: StageName,
    },
    /// Field holds a result of a different shape
    #[error("Field `{0}` holds an unexpected result")]
    UnexpectedField(StageName),
    /// Stage exceeded its timeout
    #[error("Stage timed out after {0:?}")]
    StageTimeout(Duration),
    /// Operation not seen at the required depth within the attempt budget.
    ///
    /// The outcome of the operation is unknown.
    #[error("Operation `{handle}` not confirmed after {attempts} attempts")]
    ConfirmationTimeout {
        /// Operation being polled
        handle: InjectionHandle,
        /// Queries issued
        attempts: u32,
    },
    /// Node explicitly rejected the operation
    #[error("Operation `{handle}` rejected by node after {attempts} attempts")]
    OperationRejected {
        /// Operation being polled
        handle: InjectionHandle,
        /// Queries issued
        attempts: u32,
    },
    /// Balance does not cover the configured reserve
    #[error("Balance {balance} does not cover reserve {reserve}")]
    InsufficientBalance {
        /// Fetched balance
        balance: Amount,
        /// Configured reserve
        reserve: Amount,
    },
    /// Run was cancelled or hit its deadline
    #[error("Run cancelled")]
    Cancelled,
    /// Identity task panicked
    #[error("Identity run panicked: {0}")]
    TaskPanicked(String),
    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Config(String),
}

impl Error {
    /// Identifier of the remote error behind this failure, if any
    pub fn remote_id(&self) -> Option<&str> {
        match self {
            Error::Node(err) => err.remote_id(),
            _ => None,
        }
    }
}
