//! Node-backed stages
//!
//! Each stage wraps one [`NodeClient`](faucet_common::NodeClient) capability.
//! Its request is produced by a [`RequestBuilder`] evaluated against the live
//! state when the stage runs.

use std::sync::Arc;

use async_trait::async_trait;
use faucet_common::{DynNodeClient, InjectionHandle, TransferRequest};
use tracing::instrument;

use super::stage::{RequestBuilder, RunContext, Stage, StageTimeout};
use crate::confirm::ConfirmationPoller;
use crate::state::{StageName, StageOutput, State};
use crate::Error;

fn request_builder<R, F>(build: F) -> RequestBuilder<R>
where
    F: Fn(&StageName, &State) -> Result<R, Error> + Send + Sync + 'static,
{
    Arc::new(build)
}

/// Activates the seeded wallet's account.
///
/// The request builder supplies the activation secret.
pub struct ActivateStage {
    client: DynNodeClient,
    secret: RequestBuilder<String>,
}

impl ActivateStage {
    /// Create new [`ActivateStage`]
    pub fn new<F>(client: DynNodeClient, secret: F) -> Self
    where
        F: Fn(&StageName, &State) -> Result<String, Error> + Send + Sync + 'static,
    {
        Self {
            client,
            secret: request_builder(secret),
        }
    }
}

#[async_trait]
impl Stage for ActivateStage {
    fn name(&self) -> StageName {
        StageName::ACTIVATE_WALLET
    }

    #[instrument(skip_all, fields(operation_id = %ctx.operation_id))]
    async fn execute(&self, state: &State, ctx: &RunContext) -> Result<StageOutput, Error> {
        let name = self.name();
        let wallet = state.wallet(&name)?;
        let secret = (self.secret)(&name, state)?;

        let handle = self.client.activate_account(wallet, &secret).await?;
        tracing::info!(
            "Activation of {} injected as {}",
            wallet.public_key_hash(),
            handle
        );

        Ok(StageOutput::Injection(handle))
    }
}

/// Waits for an injected operation to be confirmed.
///
/// Bounded by its poller's attempt budget, so it opts out of stage timeouts.
pub struct ConfirmStage {
    client: DynNodeClient,
    poller: ConfirmationPoller,
    handle: RequestBuilder<InjectionHandle>,
}

impl ConfirmStage {
    /// Create new [`ConfirmStage`] writing to `confirmOperation`
    pub fn new<F>(client: DynNodeClient, poller: ConfirmationPoller, handle: F) -> Self
    where
        F: Fn(&StageName, &State) -> Result<InjectionHandle, Error> + Send + Sync + 'static,
    {
        Self {
            client,
            poller,
            handle: request_builder(handle),
        }
    }

    /// Confirm the injection stored under `field`
    pub fn of(client: DynNodeClient, poller: ConfirmationPoller, field: StageName) -> Self {
        Self::new(client, poller, move |name, state| {
            state.injection(name, &field).cloned()
        })
    }
}

#[async_trait]
impl Stage for ConfirmStage {
    fn name(&self) -> StageName {
        StageName::CONFIRM_OPERATION
    }

    fn timeout(&self) -> StageTimeout {
        StageTimeout::Disabled
    }

    #[instrument(skip_all, fields(operation_id = %ctx.operation_id))]
    async fn execute(&self, state: &State, ctx: &RunContext) -> Result<StageOutput, Error> {
        let handle = (self.handle)(&self.name(), state)?;

        let confirmation = self
            .poller
            .poll(self.client.as_ref(), handle, &ctx.cancel)
            .await
            .into_result()?;

        Ok(StageOutput::Confirmation(confirmation))
    }
}

/// Fetches the balance snapshot.
///
/// The request builder supplies the account to query.
pub struct BalanceStage {
    client: DynNodeClient,
    account: RequestBuilder<String>,
}

impl BalanceStage {
    /// Create new [`BalanceStage`]
    pub fn new<F>(client: DynNodeClient, account: F) -> Self
    where
        F: Fn(&StageName, &State) -> Result<String, Error> + Send + Sync + 'static,
    {
        Self {
            client,
            account: request_builder(account),
        }
    }
}

#[async_trait]
impl Stage for BalanceStage {
    fn name(&self) -> StageName {
        StageName::WALLET_BALANCE
    }

    #[instrument(skip_all, fields(operation_id = %ctx.operation_id))]
    async fn execute(&self, state: &State, ctx: &RunContext) -> Result<StageOutput, Error> {
        let account = (self.account)(&self.name(), state)?;

        let balance = self.client.query_balance(&account).await?;
        tracing::info!("Balance of {}: {}", account, balance);

        Ok(StageOutput::Balance(balance))
    }
}

/// Builds, signs and injects a transfer from the seeded wallet.
pub struct TransferStage {
    client: DynNodeClient,
    transfer: RequestBuilder<TransferRequest>,
}

impl TransferStage {
    /// Create new [`TransferStage`]
    pub fn new<F>(client: DynNodeClient, transfer: F) -> Self
    where
        F: Fn(&StageName, &State) -> Result<TransferRequest, Error> + Send + Sync + 'static,
    {
        Self {
            client,
            transfer: request_builder(transfer),
        }
    }
}

#[async_trait]
impl Stage for TransferStage {
    fn name(&self) -> StageName {
        StageName::TRANSACTION
    }

    #[instrument(skip_all, fields(operation_id = %ctx.operation_id))]
    async fn execute(&self, state: &State, ctx: &RunContext) -> Result<StageOutput, Error> {
        let name = self.name();
        let wallet = state.wallet(&name)?;
        let transfer = (self.transfer)(&name, state)?;

        tracing::info!(
            "Transferring {} from {} to {} (fee {})",
            transfer.amount,
            wallet.public_key_hash(),
            transfer.to,
            transfer.fee
        );

        let handle = self
            .client
            .build_and_inject_transfer(wallet, &transfer)
            .await?;

        Ok(StageOutput::Injection(handle))
    }
}
