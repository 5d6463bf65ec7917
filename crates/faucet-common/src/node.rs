//! Node client interface
//!
//! The pipeline only depends on the request/response contracts defined here.
//! Wire encoding, signing and transaction formats belong to the implementor.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::NodeError;
use crate::identity::Wallet;
use crate::Amount;

/// Opaque reference returned by the node after accepting an operation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InjectionHandle(String);

impl InjectionHandle {
    /// Create new [`InjectionHandle`]
    pub fn new<S>(handle: S) -> Self
    where
        S: Into<String>,
    {
        Self(handle.into())
    }

    /// Handle as str
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InjectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What the node currently knows about an injected operation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmationStatus {
    /// Operation has been included on chain
    pub observed: bool,
    /// Number of blocks on top of the including block
    pub depth: u32,
    /// Node explicitly rejected the operation
    pub rejected: bool,
}

/// Transfer to build, sign and inject
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    /// Destination address
    pub to: String,
    /// Amount to transfer
    pub amount: Amount,
    /// Fee offered
    pub fee: Amount,
}

/// Primitive remote operations the pipeline is built from.
///
/// Implementations must be safe for concurrent, independent calls from many
/// identity runs. Any serialization the backing node needs is the
/// implementor's concern.
#[async_trait]
pub trait NodeClient: Send + Sync {
    /// Activate a dormant account with its activation secret
    async fn activate_account(
        &self,
        wallet: &Wallet,
        activation_secret: &str,
    ) -> Result<InjectionHandle, NodeError>;

    /// Query inclusion state of an injected operation
    async fn query_confirmation(
        &self,
        handle: &InjectionHandle,
    ) -> Result<ConfirmationStatus, NodeError>;

    /// Query spendable balance of an account
    async fn query_balance(&self, public_key_hash: &str) -> Result<Amount, NodeError>;

    /// Build, sign and inject a transfer from `wallet`
    async fn build_and_inject_transfer(
        &self,
        wallet: &Wallet,
        transfer: &TransferRequest,
    ) -> Result<InjectionHandle, NodeError>;
}

/// Shared node client
pub type DynNodeClient = Arc<dyn NodeClient>;
