//! Confirmation poller
//!
//! Waits for an injected operation to be observed at the required depth.
//!
//! # State Flow
//!
//! ```text
//! Submitted
//!   └─> Polling ──┬─> Confirmed   (observed at required depth)
//!        ^   │    ├─> TimedOut    (attempt budget spent, outcome unknown)
//!        └───┘    ├─> Failed      (node rejected the operation)
//!                 └─> Cancelled   (caller cancelled between attempts)
//! ```
//!
//! Every unconfirmed attempt that will be retried waits the current interval
//! first; the interval grows according to the configured [`Backoff`].

use std::time::Duration;

use faucet_common::{ConfirmationStatus, InjectionHandle, NodeClient, NodeError};
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::config::{Backoff, ConfirmationConfig};
use crate::state::Confirmation;
use crate::Error;

/// Terminal state of a confirmation poll
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// Operation reached the required depth
    Confirmed {
        /// Confirmed operation
        handle: InjectionHandle,
        /// Depth observed
        depth: u32,
        /// Queries issued
        attempts: u32,
    },
    /// Attempt budget spent without confirmation
    TimedOut {
        /// Operation polled
        handle: InjectionHandle,
        /// Queries issued
        attempts: u32,
    },
    /// Node reported the operation as rejected
    Failed {
        /// Operation polled
        handle: InjectionHandle,
        /// Queries issued
        attempts: u32,
    },
    /// Caller cancelled the wait
    Cancelled {
        /// Operation polled
        handle: InjectionHandle,
        /// Queries issued
        attempts: u32,
    },
}

impl PollOutcome {
    /// Convert into a stage result
    pub fn into_result(self) -> Result<Confirmation, Error> {
        match self {
            PollOutcome::Confirmed {
                handle,
                depth,
                attempts,
            } => Ok(Confirmation {
                handle,
                depth,
                attempts,
            }),
            PollOutcome::TimedOut { handle, attempts } => {
                Err(Error::ConfirmationTimeout { handle, attempts })
            }
            PollOutcome::Failed { handle, attempts } => {
                Err(Error::OperationRejected { handle, attempts })
            }
            PollOutcome::Cancelled { .. } => Err(Error::Cancelled),
        }
    }
}

/// Poller progress
enum Progress {
    Submitted {
        handle: InjectionHandle,
    },
    Polling {
        handle: InjectionHandle,
        attempt: u32,
        delay: Duration,
    },
    Done(PollOutcome),
}

/// Bounded-retry confirmation poller
#[derive(Debug, Clone)]
pub struct ConfirmationPoller {
    interval: Duration,
    max_attempts: u32,
    required_depth: u32,
    backoff: Backoff,
}

impl ConfirmationPoller {
    /// Create poller from config
    pub fn new(config: &ConfirmationConfig) -> Self {
        Self {
            interval: config.interval(),
            max_attempts: config.max_attempts.max(1),
            required_depth: config.required_depth,
            backoff: config.backoff,
        }
    }

    /// Poll until the operation reaches a terminal state
    #[instrument(skip_all, fields(handle = %handle))]
    pub async fn poll(
        &self,
        client: &dyn NodeClient,
        handle: InjectionHandle,
        cancel: &CancellationToken,
    ) -> PollOutcome {
        let mut progress = Progress::Submitted { handle };

        loop {
            progress = match progress {
                Progress::Submitted { handle } => Progress::Polling {
                    handle,
                    attempt: 0,
                    delay: self.interval,
                },
                Progress::Polling {
                    handle,
                    attempt,
                    delay,
                } => {
                    if attempt > 0 {
                        tokio::select! {
                            _ = cancel.cancelled() => {
                                return PollOutcome::Cancelled { handle, attempts: attempt };
                            }
                            _ = tokio::time::sleep(delay) => {}
                        }
                    } else if cancel.is_cancelled() {
                        return PollOutcome::Cancelled {
                            handle,
                            attempts: attempt,
                        };
                    }

                    let attempt = attempt + 1;
                    let status = client.query_confirmation(&handle).await;
                    self.advance(handle, attempt, delay, status)
                }
                Progress::Done(outcome) => {
                    match &outcome {
                        PollOutcome::Confirmed {
                            handle, attempts, ..
                        } => tracing::info!(
                            "Operation {} confirmed after {} attempts",
                            handle,
                            attempts
                        ),
                        PollOutcome::TimedOut { handle, attempts } => tracing::warn!(
                            "Operation {} still unconfirmed after {} attempts",
                            handle,
                            attempts
                        ),
                        PollOutcome::Failed { handle, .. } => {
                            tracing::error!("Operation {} rejected by node", handle)
                        }
                        PollOutcome::Cancelled { .. } => {
                            tracing::debug!("Confirmation polling cancelled")
                        }
                    }
                    return outcome;
                }
            };
        }
    }

    fn advance(
        &self,
        handle: InjectionHandle,
        attempt: u32,
        delay: Duration,
        status: Result<ConfirmationStatus, NodeError>,
    ) -> Progress {
        match status {
            Ok(status) if status.rejected => {
                return Progress::Done(PollOutcome::Failed {
                    handle,
                    attempts: attempt,
                });
            }
            Ok(status) if status.observed && status.depth >= self.required_depth => {
                return Progress::Done(PollOutcome::Confirmed {
                    handle,
                    depth: status.depth,
                    attempts: attempt,
                });
            }
            Ok(status) => tracing::debug!(
                "Attempt {}: observed={} depth={}",
                attempt,
                status.observed,
                status.depth
            ),
            // Transient query failures count as unconfirmed attempts
            Err(err) => tracing::warn!("Attempt {}: confirmation query failed: {}", attempt, err),
        }

        if attempt >= self.max_attempts {
            return Progress::Done(PollOutcome::TimedOut {
                handle,
                attempts: attempt,
            });
        }

        // Never wait less than the configured interval
        let delay = if attempt == 1 {
            delay
        } else {
            self.backoff.next_delay(delay).max(self.interval)
        };

        Progress::Polling {
            handle,
            attempt,
            delay,
        }
    }
}
