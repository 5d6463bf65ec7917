//! Activation run - Type State Pattern Implementation
//!
//! One run per identity: derive keys, seed the state with the wallet, then
//! drive the standard pipeline to a terminal [`Outcome`].
//!
//! # Type State Flow
//!
//! ```text
//! ActivationRun<Initial>
//!   └─> seed() -> ActivationRun<Seeded>
//!         └─> execute() -> Outcome
//! ```
//!
//! # Standard Pipeline
//!
//! ```text
//! [ activateWallet -> confirmOperation ]      recovery scope
//! walletBalance
//! transferBranch: balance > threshold
//!   ├─ yes: transaction -> confirmOperation
//!   └─ no:  done
//! ```

use std::sync::Arc;

use faucet_common::{
    Amount, DynNodeClient, Identity, InjectionHandle, KeyDeriver, NodeTarget, TransferRequest,
    Wallet,
};
use tracing::instrument;

use self::state::{Initial, Seeded};
use crate::config::{FaucetConfig, TransferConfig};
use crate::confirm::ConfirmationPoller;
use crate::pipeline::{
    ActivateStage, BalanceStage, ConfirmStage, Engine, Failure, Pipeline, RunContext,
    TransferStage,
};
use crate::state::{StageName, StageOutput, State};
use crate::Error;

pub mod state;

/// Name of the branch deciding whether to sweep
pub const TRANSFER_BRANCH: StageName = StageName::from_static("transferBranch");

/// Terminal outcome of one identity run
#[derive(Debug)]
pub enum Outcome {
    /// Every stage completed
    Completed(State),
    /// A stage failed fatally
    AbortedAtStage {
        /// Stage that failed
        stage: StageName,
        /// Original error
        error: Error,
    },
    /// Confirmation polling ran out of attempts; the operation outcome is unknown
    TimedOutAtConfirmation {
        /// Confirmation stage
        stage: StageName,
        /// Operation polled
        handle: InjectionHandle,
        /// Queries issued
        attempts: u32,
    },
    /// The node rejected the operation being confirmed
    RejectedAtConfirmation {
        /// Confirmation stage
        stage: StageName,
        /// Operation polled
        handle: InjectionHandle,
        /// Queries issued
        attempts: u32,
    },
}

impl Outcome {
    /// Aborted outcome
    pub fn aborted(stage: StageName, error: Error) -> Self {
        Self::AbortedAtStage { stage, error }
    }

    /// Whether the run completed
    pub fn is_completed(&self) -> bool {
        matches!(self, Outcome::Completed(_))
    }

    /// Final state of a completed run
    pub fn state(&self) -> Option<&State> {
        match self {
            Outcome::Completed(state) => Some(state),
            _ => None,
        }
    }

    /// Whether the run swept funds to the transfer target
    pub fn swept(&self) -> bool {
        self.state()
            .map(|state| state.contains(&StageName::TRANSACTION))
            .unwrap_or(false)
    }

    /// Short label for logs and summaries
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Completed(_) => "completed",
            Outcome::AbortedAtStage { .. } => "aborted",
            Outcome::TimedOutAtConfirmation { .. } => "timed_out",
            Outcome::RejectedAtConfirmation { .. } => "rejected",
        }
    }
}

impl From<Failure> for Outcome {
    fn from(failure: Failure) -> Self {
        let Failure { stage, error, .. } = failure;
        match error {
            Error::ConfirmationTimeout { handle, attempts } => Outcome::TimedOutAtConfirmation {
                stage,
                handle,
                attempts,
            },
            Error::OperationRejected { handle, attempts } => Outcome::RejectedAtConfirmation {
                stage,
                handle,
                attempts,
            },
            error => Outcome::AbortedAtStage { stage, error },
        }
    }
}

/// Activation run of one identity
pub struct ActivationRun<S> {
    ctx: RunContext,
    state_data: S,
}

impl ActivationRun<Initial> {
    /// Create a new run in the Initial state
    pub fn new(identity: Identity, ctx: RunContext) -> Self {
        Self {
            ctx,
            state_data: Initial { identity },
        }
    }

    /// Derive keys and seed the state with the wallet.
    ///
    /// The deriver's readiness barrier must have completed.
    #[instrument(skip_all, fields(operation_id = %self.ctx.operation_id))]
    pub fn seed(
        self,
        deriver: &dyn KeyDeriver,
        node: &NodeTarget,
    ) -> Result<ActivationRun<Seeded>, Failure> {
        let identity = self.state_data.identity;

        let keys = match deriver.derive_keys(&identity.recovery_phrase, &identity.passphrase) {
            Ok(keys) => keys,
            Err(err) => {
                tracing::error!(
                    "Could not derive keys for {}: {}",
                    identity.public_key_hash,
                    err
                );
                return Err(Failure {
                    stage: StageName::WALLET,
                    error: err.into(),
                    state: State::new(),
                });
            }
        };

        if keys.public_key_hash != identity.public_key_hash {
            tracing::warn!(
                "Derived key hash {} differs from declared {}; using derived",
                keys.public_key_hash,
                identity.public_key_hash
            );
        }

        tracing::info!("Seeded wallet {}", keys.public_key_hash);

        let wallet = Wallet {
            keys,
            declared_public_key_hash: identity.public_key_hash.clone(),
            activation_secret: identity.activation_secret,
            node: node.clone(),
        };

        Ok(ActivationRun {
            ctx: self.ctx,
            state_data: Seeded {
                public_key_hash: identity.public_key_hash,
                state: State::new().merge(StageName::WALLET, StageOutput::Wallet(Arc::new(wallet))),
            },
        })
    }
}

impl ActivationRun<Seeded> {
    /// State holding the seeded wallet
    pub fn state(&self) -> &State {
        &self.state_data.state
    }

    /// Run `pipeline` to a terminal outcome
    #[instrument(skip_all, fields(operation_id = %self.ctx.operation_id))]
    pub async fn execute(self, engine: &Engine, pipeline: &Pipeline) -> Outcome {
        let public_key_hash = self.state_data.public_key_hash;

        let outcome = match engine.run(pipeline, self.state_data.state, &self.ctx).await {
            Ok(state) => Outcome::Completed(state),
            Err(failure) => Outcome::from(failure),
        };

        match &outcome {
            Outcome::Completed(_) => {
                tracing::info!("Run for {} completed (swept: {})", public_key_hash, outcome.swept())
            }
            Outcome::AbortedAtStage { stage, error } => {
                tracing::error!("Run for {} aborted at {}: {}", public_key_hash, stage, error)
            }
            Outcome::TimedOutAtConfirmation { stage, handle, .. } => tracing::warn!(
                "Run for {} timed out at {} waiting for {}",
                public_key_hash,
                stage,
                handle
            ),
            Outcome::RejectedAtConfirmation { stage, handle, .. } => tracing::error!(
                "Run for {} rejected at {}: operation {}",
                public_key_hash,
                stage,
                handle
            ),
        }

        outcome
    }
}

/// Seed and execute one identity
pub async fn run_identity(
    identity: Identity,
    deriver: &dyn KeyDeriver,
    node: &NodeTarget,
    engine: &Engine,
    pipeline: &Pipeline,
    ctx: RunContext,
) -> Outcome {
    match ActivationRun::new(identity, ctx).seed(deriver, node) {
        Ok(run) => run.execute(engine, pipeline).await,
        Err(failure) => Outcome::from(failure),
    }
}

/// Transfer sweeping everything above the reserve to the target
pub fn sweep_request(
    reader: &StageName,
    state: &State,
    transfer: &TransferConfig,
) -> Result<TransferRequest, Error> {
    let balance = state.balance(reader, &StageName::WALLET_BALANCE)?;

    let amount = balance
        .checked_sub(transfer.reserve)
        .filter(|amount| *amount > Amount::ZERO)
        .ok_or(Error::InsufficientBalance {
            balance,
            reserve: transfer.reserve,
        })?;

    Ok(TransferRequest {
        to: transfer.to.clone(),
        amount,
        fee: transfer.fee,
    })
}

/// Build the standard activate-and-sweep pipeline
pub fn standard_pipeline(client: DynNodeClient, config: &FaucetConfig) -> Pipeline {
    let poller = ConfirmationPoller::new(&config.confirmation);
    let transfer = config.transfer.clone();
    let threshold = transfer.threshold;

    let activation = Pipeline::new()
        .stage(ActivateStage::new(client.clone(), |reader, state| {
            Ok(state.wallet(reader)?.activation_secret.clone())
        }))
        .stage(ConfirmStage::of(
            client.clone(),
            poller.clone(),
            StageName::ACTIVATE_WALLET,
        ));

    let sweep = Pipeline::new()
        .stage(TransferStage::new(client.clone(), move |reader, state| {
            sweep_request(reader, state, &transfer)
        }))
        .stage(ConfirmStage::of(
            client.clone(),
            poller,
            StageName::TRANSACTION,
        ));

    Pipeline::new()
        .segment(activation)
        .stage(BalanceStage::new(client, |reader, state| {
            Ok(state.wallet(reader)?.public_key_hash().to_string())
        }))
        .branch(
            TRANSFER_BRANCH,
            move |state| Ok(state.balance(&TRANSFER_BRANCH, &StageName::WALLET_BALANCE)? > threshold),
            sweep,
            Pipeline::new(),
        )
}
