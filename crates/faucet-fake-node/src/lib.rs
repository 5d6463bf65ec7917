//! Fake node
//!
//! In-memory [`NodeClient`] used for testing and dry runs. Accounts, balances
//! and operations live in a shared ledger; clones of a [`FakeNode`] observe
//! the same ledger.
//!
//! Operations confirm after a configurable number of confirmation queries,
//! so polling behaviour can be exercised without a chain.

#![warn(missing_docs)]
#![warn(rustdoc::bare_urls)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use faucet_common::{
    Amount, ConfirmationStatus, DerivedKeys, Identity, InjectionHandle, KeyDeriver, KeyError,
    NodeClient, NodeError, RemoteError, TransferRequest, Wallet,
};
use serde::{Deserialize, Serialize};

/// Remote error id for accounts the node does not know
pub const UNKNOWN_ACCOUNT: &str = "unknown_account";

/// Fake node config
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FakeNodeConfig {
    /// Confirmation query at which an operation is first observed, `None` to
    /// never confirm
    pub confirm_after: Option<u32>,
    /// Remote error id returned when activating an activated account
    pub already_activated_id: String,
    /// Remote error id returned when a transfer exceeds the balance
    pub insufficient_balance_id: String,
}

impl Default for FakeNodeConfig {
    fn default() -> Self {
        Self {
            confirm_after: Some(1),
            already_activated_id: "already_activated".to_string(),
            insufficient_balance_id: "insufficient_balance".to_string(),
        }
    }
}

/// Number of calls made per operation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    /// `activate_account`
    pub activate: usize,
    /// `query_confirmation`
    pub query_confirmation: usize,
    /// `query_balance`
    pub query_balance: usize,
    /// `build_and_inject_transfer`
    pub transfer: usize,
}

/// Transfer accepted by the fake node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRecord {
    /// Source account
    pub from: String,
    /// Destination account
    pub to: String,
    /// Amount moved
    pub amount: Amount,
    /// Fee burned
    pub fee: Amount,
}

#[derive(Debug, Default)]
struct Account {
    balance: Amount,
    activated: bool,
    activation_error: Option<RemoteError>,
    transfer_error: Option<RemoteError>,
    reject_operations: bool,
}

#[derive(Debug)]
struct Operation {
    queries: u32,
    rejected: bool,
}

#[derive(Debug, Default)]
struct Ledger {
    accounts: HashMap<String, Account>,
    operations: HashMap<String, Operation>,
    transfers: Vec<TransferRecord>,
    calls: CallCounts,
    next_operation: u64,
}

impl Ledger {
    fn inject(&mut self, rejected: bool) -> InjectionHandle {
        self.next_operation += 1;
        let handle = format!("op{}", self.next_operation);
        self.operations.insert(
            handle.clone(),
            Operation {
                queries: 0,
                rejected,
            },
        );
        InjectionHandle::new(handle)
    }
}

/// Decrements the in-flight counter on drop
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// In-memory node
#[derive(Debug, Clone)]
pub struct FakeNode {
    config: Arc<FakeNodeConfig>,
    latency: Duration,
    ledger: Arc<Mutex<Ledger>>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl FakeNode {
    /// Create new [`FakeNode`] with an empty ledger
    pub fn new(config: FakeNodeConfig) -> Self {
        Self {
            config: Arc::new(config),
            latency: Duration::ZERO,
            ledger: Arc::new(Mutex::new(Ledger::default())),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn ledger(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn update_account<F>(self, public_key_hash: &str, update: F) -> Self
    where
        F: FnOnce(&mut Account),
    {
        {
            let mut ledger = self.ledger();
            let account = ledger
                .accounts
                .entry(public_key_hash.to_string())
                .or_default();
            update(account);
        }
        self
    }

    /// Add a dormant account holding `balance`
    pub fn with_account(self, public_key_hash: &str, balance: Amount) -> Self {
        self.update_account(public_key_hash, |account| {
            account.balance = balance;
            account.activated = false;
        })
    }

    /// Add an account that was activated before
    pub fn with_activated_account(self, public_key_hash: &str, balance: Amount) -> Self {
        self.update_account(public_key_hash, |account| {
            account.balance = balance;
            account.activated = true;
        })
    }

    /// Fail every activation of `public_key_hash` with `error`
    pub fn with_activation_error(self, public_key_hash: &str, error: RemoteError) -> Self {
        self.update_account(public_key_hash, |account| {
            account.activation_error = Some(error);
        })
    }

    /// Fail every transfer from `public_key_hash` with `error`
    pub fn with_transfer_error(self, public_key_hash: &str, error: RemoteError) -> Self {
        self.update_account(public_key_hash, |account| {
            account.transfer_error = Some(error);
        })
    }

    /// Reject every operation injected by `public_key_hash`
    pub fn with_rejected_operations(self, public_key_hash: &str) -> Self {
        self.update_account(public_key_hash, |account| {
            account.reject_operations = true;
        })
    }

    /// Delay every call by `latency`
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Calls made so far
    pub fn calls(&self) -> CallCounts {
        self.ledger().calls
    }

    /// Transfers accepted so far, in injection order
    pub fn transfers(&self) -> Vec<TransferRecord> {
        self.ledger().transfers.clone()
    }

    /// Current balance of an account
    pub fn balance_of(&self, public_key_hash: &str) -> Option<Amount> {
        self.ledger()
            .accounts
            .get(public_key_hash)
            .map(|account| account.balance)
    }

    /// Whether an account is activated
    pub fn is_activated(&self, public_key_hash: &str) -> bool {
        self.ledger()
            .accounts
            .get(public_key_hash)
            .map(|account| account.activated)
            .unwrap_or(false)
    }

    /// Highest number of calls that were in flight at once
    pub fn max_concurrent_calls(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn enter(&self) -> InFlight<'_> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        let guard = InFlight(&self.in_flight);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        guard
    }

    fn unknown_account(public_key_hash: &str) -> NodeError {
        RemoteError::new(UNKNOWN_ACCOUNT)
            .with_message(format!("no account {public_key_hash}"))
            .into()
    }
}

#[async_trait]
impl NodeClient for FakeNode {
    async fn activate_account(
        &self,
        wallet: &Wallet,
        _activation_secret: &str,
    ) -> Result<InjectionHandle, NodeError> {
        let _in_flight = self.enter().await;
        let mut ledger = self.ledger();
        ledger.calls.activate += 1;

        let account = ledger
            .accounts
            .get_mut(wallet.public_key_hash())
            .ok_or_else(|| Self::unknown_account(wallet.public_key_hash()))?;

        if let Some(err) = &account.activation_error {
            return Err(err.clone().into());
        }
        if account.activated {
            return Err(RemoteError::new(self.config.already_activated_id.clone()).into());
        }

        account.activated = true;
        let rejected = account.reject_operations;
        let handle = ledger.inject(rejected);
        tracing::debug!("Activated {} with {}", wallet.public_key_hash(), handle);

        Ok(handle)
    }

    async fn query_confirmation(
        &self,
        handle: &InjectionHandle,
    ) -> Result<ConfirmationStatus, NodeError> {
        let _in_flight = self.enter().await;
        let mut ledger = self.ledger();
        ledger.calls.query_confirmation += 1;

        let operation = ledger
            .operations
            .get_mut(handle.as_str())
            .ok_or_else(|| NodeError::UnknownOperation(handle.to_string()))?;
        operation.queries += 1;

        if operation.rejected {
            return Ok(ConfirmationStatus {
                rejected: true,
                ..Default::default()
            });
        }

        Ok(match self.config.confirm_after {
            Some(after) if operation.queries >= after => ConfirmationStatus {
                observed: true,
                depth: operation.queries - after + 1,
                rejected: false,
            },
            _ => ConfirmationStatus::default(),
        })
    }

    async fn query_balance(&self, public_key_hash: &str) -> Result<Amount, NodeError> {
        let _in_flight = self.enter().await;
        let mut ledger = self.ledger();
        ledger.calls.query_balance += 1;

        ledger
            .accounts
            .get(public_key_hash)
            .map(|account| account.balance)
            .ok_or_else(|| Self::unknown_account(public_key_hash))
    }

    async fn build_and_inject_transfer(
        &self,
        wallet: &Wallet,
        transfer: &TransferRequest,
    ) -> Result<InjectionHandle, NodeError> {
        let _in_flight = self.enter().await;
        let mut ledger = self.ledger();
        ledger.calls.transfer += 1;

        let from = wallet.public_key_hash().to_string();
        let account = ledger
            .accounts
            .get_mut(&from)
            .ok_or_else(|| Self::unknown_account(&from))?;

        if let Some(err) = &account.transfer_error {
            return Err(err.clone().into());
        }

        let remaining = transfer
            .amount
            .checked_add(transfer.fee)
            .and_then(|total| account.balance.checked_sub(total))
            .ok_or_else(|| {
                RemoteError::new(self.config.insufficient_balance_id.clone())
                    .with_message(format!("balance {}", account.balance))
            })?;
        account.balance = remaining;
        let rejected = account.reject_operations;

        let target = ledger.accounts.entry(transfer.to.clone()).or_default();
        target.activated = true;
        target.balance = target.balance.saturating_add(transfer.amount);

        ledger.transfers.push(TransferRecord {
            from: from.clone(),
            to: transfer.to.clone(),
            amount: transfer.amount,
            fee: transfer.fee,
        });
        let handle = ledger.inject(rejected);
        tracing::debug!(
            "Transfer of {} from {} to {} injected as {}",
            transfer.amount,
            from,
            transfer.to,
            handle
        );

        Ok(handle)
    }
}

/// Key deriver resolving known recovery phrases to fixed keys
#[derive(Debug, Default)]
pub struct FakeDeriver {
    keys: HashMap<(String, String), DerivedKeys>,
    ready: AtomicBool,
    ready_calls: AtomicUsize,
}

impl FakeDeriver {
    /// Resolve the identity's recovery material to its declared key hash
    pub fn with_identity(self, identity: &Identity) -> Self {
        self.with_keys(
            identity,
            DerivedKeys {
                public_key: format!("pk-{}", identity.public_key_hash),
                secret_key: format!("sk-{}", identity.public_key_hash),
                public_key_hash: identity.public_key_hash.clone(),
            },
        )
    }

    /// Resolve the identity's recovery material to `keys`
    pub fn with_keys(mut self, identity: &Identity, keys: DerivedKeys) -> Self {
        self.keys.insert(
            (
                identity.recovery_phrase.clone(),
                identity.passphrase.clone(),
            ),
            keys,
        );
        self
    }

    /// Number of times the readiness barrier was awaited
    pub fn ready_calls(&self) -> usize {
        self.ready_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KeyDeriver for FakeDeriver {
    async fn ready(&self) -> Result<(), KeyError> {
        self.ready_calls.fetch_add(1, Ordering::SeqCst);
        self.ready.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn derive_keys(&self, recovery_phrase: &str, passphrase: &str) -> Result<DerivedKeys, KeyError> {
        if !self.ready.load(Ordering::SeqCst) {
            return Err(KeyError::NotReady);
        }

        self.keys
            .get(&(recovery_phrase.to_string(), passphrase.to_string()))
            .cloned()
            .ok_or_else(|| KeyError::InvalidPhrase("unknown recovery phrase".to_string()))
    }
}
