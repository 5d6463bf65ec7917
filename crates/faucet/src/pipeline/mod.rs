//! Operation pipeline
//!
//! A [`Pipeline`] is an ordered list of steps run strictly in sequence for one
//! identity. Each stage's result is merged into the [`State`] under the
//! stage's name before the next step starts.
//!
//! # Steps
//!
//! ```text
//! Stage    run one stage, merge its result
//! Segment  run a nested pipeline as a recovery scope
//! Branch   evaluate a predicate once, run one of two nested pipelines
//! ```
//!
//! # Failures
//!
//! A failing stage is handed to the [`ErrorClassifier`]. `Abort` ends the run
//! with a [`Failure`]. `Substitute` replaces the state and skips the rest of
//! the innermost enclosing segment (or just the failed stage at top level).
//! Nothing is retried here; only the confirmation poller retries.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tracing::instrument;

use crate::classifier::{Decision, ErrorClassifier};
use crate::state::{StageName, StageOutput, State};
use crate::Error;

mod stage;
pub mod stages;

pub use stage::{RequestBuilder, RunContext, Stage, StageTimeout};
pub use stages::{ActivateStage, BalanceStage, ConfirmStage, TransferStage};

/// Pure predicate over the state
pub type Predicate = Arc<dyn Fn(&State) -> Result<bool, Error> + Send + Sync>;

/// Conditional step
#[derive(Clone)]
pub struct Branch {
    name: StageName,
    predicate: Predicate,
    then: Pipeline,
    otherwise: Pipeline,
}

/// Pipeline step
#[derive(Clone)]
pub enum Step {
    /// Run a stage
    Stage(Arc<dyn Stage>),
    /// Run a nested pipeline as a recovery scope
    Segment(Pipeline),
    /// Choose a nested pipeline
    Branch(Branch),
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Stage(stage) => f.debug_tuple("Stage").field(&stage.name()).finish(),
            Step::Segment(pipeline) => f.debug_tuple("Segment").field(pipeline).finish(),
            Step::Branch(branch) => f
                .debug_struct("Branch")
                .field("name", &branch.name)
                .field("then", &branch.then)
                .field("otherwise", &branch.otherwise)
                .finish(),
        }
    }
}

/// Ordered list of steps
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    steps: Vec<Step>,
}

impl Pipeline {
    /// Empty pipeline
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a stage
    pub fn stage<S>(mut self, stage: S) -> Self
    where
        S: Stage + 'static,
    {
        self.steps.push(Step::Stage(Arc::new(stage)));
        self
    }

    /// Append a nested pipeline forming a recovery scope
    pub fn segment(mut self, pipeline: Pipeline) -> Self {
        self.steps.push(Step::Segment(pipeline));
        self
    }

    /// Append a branch: `then` runs iff `predicate` holds, `otherwise` if not
    pub fn branch<F>(mut self, name: StageName, predicate: F, then: Pipeline, otherwise: Pipeline) -> Self
    where
        F: Fn(&State) -> Result<bool, Error> + Send + Sync + 'static,
    {
        self.steps.push(Step::Branch(Branch {
            name,
            predicate: Arc::new(predicate),
            then,
            otherwise,
        }));
        self
    }

    /// Steps in order
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Number of top-level steps
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether the pipeline has no steps
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// A run that ended on a fatal error
#[derive(Debug)]
pub struct Failure {
    /// Stage that failed
    pub stage: StageName,
    /// Error it failed with
    pub error: Error,
    /// State when it failed
    pub state: State,
}

enum Flow {
    Continue(State),
    Substituted(State),
    Failed(Failure),
}

/// Sequencing engine
#[derive(Debug, Clone)]
pub struct Engine {
    classifier: Arc<ErrorClassifier>,
    stage_timeout: Option<Duration>,
}

impl Engine {
    /// Create new [`Engine`]
    pub fn new(classifier: Arc<ErrorClassifier>) -> Self {
        Self {
            classifier,
            stage_timeout: None,
        }
    }

    /// Default timeout for stages that inherit it
    pub fn with_stage_timeout(mut self, stage_timeout: Option<Duration>) -> Self {
        self.stage_timeout = stage_timeout;
        self
    }

    /// Run `pipeline` starting from `state`
    pub async fn run(
        &self,
        pipeline: &Pipeline,
        state: State,
        ctx: &RunContext,
    ) -> Result<State, Failure> {
        match self.run_steps(pipeline.steps(), state, ctx, false).await {
            Flow::Continue(state) | Flow::Substituted(state) => Ok(state),
            Flow::Failed(failure) => Err(failure),
        }
    }

    fn run_steps<'a>(
        &'a self,
        steps: &'a [Step],
        mut state: State,
        ctx: &'a RunContext,
        scoped: bool,
    ) -> BoxFuture<'a, Flow> {
        Box::pin(async move {
            for step in steps {
                match step {
                    Step::Stage(stage) => {
                        let name = stage.name();
                        match self.run_stage(stage.as_ref(), &state, ctx).await {
                            Ok(output) => {
                                tracing::debug!("Stage {} completed", name);
                                state = state.merge(name, output);
                            }
                            Err(Error::Cancelled) => {
                                return Flow::Failed(Failure {
                                    stage: name,
                                    error: Error::Cancelled,
                                    state,
                                });
                            }
                            Err(error) => match self.classifier.classify(&name, &error, &state) {
                                Decision::Abort => {
                                    tracing::error!("Stage {} failed: {}", name, error);
                                    return Flow::Failed(Failure {
                                        stage: name,
                                        error,
                                        state,
                                    });
                                }
                                Decision::Substitute(next) if scoped => {
                                    return Flow::Substituted(next);
                                }
                                Decision::Substitute(next) => state = next,
                            },
                        }
                    }
                    Step::Segment(pipeline) => {
                        match self.run_steps(pipeline.steps(), state, ctx, true).await {
                            Flow::Continue(next) | Flow::Substituted(next) => state = next,
                            failed @ Flow::Failed(_) => return failed,
                        }
                    }
                    Step::Branch(branch) => {
                        let take = match (branch.predicate)(&state) {
                            Ok(take) => take,
                            Err(error) => {
                                tracing::error!("Branch {} failed: {}", branch.name, error);
                                return Flow::Failed(Failure {
                                    stage: branch.name.clone(),
                                    error,
                                    state,
                                });
                            }
                        };
                        tracing::info!("Branch {} taken: {}", branch.name, take);

                        let chosen = if take { &branch.then } else { &branch.otherwise };
                        match self.run_steps(chosen.steps(), state, ctx, scoped).await {
                            Flow::Continue(next) => state = next,
                            other => return other,
                        }
                    }
                }
            }

            Flow::Continue(state)
        })
    }

    #[instrument(skip_all, fields(stage = %stage.name()))]
    async fn run_stage(
        &self,
        stage: &dyn Stage,
        state: &State,
        ctx: &RunContext,
    ) -> Result<StageOutput, Error> {
        if ctx.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let timeout = match stage.timeout() {
            StageTimeout::Inherit => self.stage_timeout,
            StageTimeout::Disabled => None,
            StageTimeout::After(timeout) => Some(timeout),
        };

        let execution = async {
            match timeout {
                Some(timeout) => tokio::time::timeout(timeout, stage.execute(state, ctx))
                    .await
                    .map_err(|_| Error::StageTimeout(timeout))?,
                None => stage.execute(state, ctx).await,
            }
        };

        // Dropping the execution stops local work only; a remote call may
        // still complete on the node.
        tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => Err(Error::Cancelled),
            result = execution => result,
        }
    }
}
