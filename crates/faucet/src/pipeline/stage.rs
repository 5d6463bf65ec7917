//! Stage trait and run context

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::state::{StageName, StageOutput, State};
use crate::Error;

/// Builds a stage's request from the live state at call time.
///
/// Requests are not pre-bound because later requests depend on earlier
/// results, e.g. the transfer amount depends on the fetched balance.
pub type RequestBuilder<R> = Arc<dyn Fn(&StageName, &State) -> Result<R, Error> + Send + Sync>;

/// Timeout applied to a single stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StageTimeout {
    /// Use the engine's default
    #[default]
    Inherit,
    /// Never time out; the stage bounds itself
    Disabled,
    /// Time out after the given duration
    After(Duration),
}

/// Context shared by every stage of one identity run
#[derive(Debug, Clone)]
pub struct RunContext {
    /// Identifier of this run, for logs
    pub operation_id: Uuid,
    /// Cancelled when the run must stop consuming stages
    pub cancel: CancellationToken,
}

impl RunContext {
    /// Create a context with a fresh operation id
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            operation_id: Uuid::new_v4(),
            cancel,
        }
    }
}

/// One pipeline step.
///
/// A stage reads the current state and produces the result stored under its
/// [`name`](Stage::name). It never writes any other slot.
#[async_trait]
pub trait Stage: Send + Sync {
    /// Name of the stage and of the slot it writes
    fn name(&self) -> StageName;

    /// Timeout policy
    fn timeout(&self) -> StageTimeout {
        StageTimeout::Inherit
    }

    /// Execute the stage against `state`
    async fn execute(&self, state: &State, ctx: &RunContext) -> Result<StageOutput, Error>;
}
