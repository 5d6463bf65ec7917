//! Fan-out driver
//!
//! Runs the pipeline once per identity, each in its own task. A failing
//! identity never affects its siblings; every identity ends up in the
//! [`Report`] with exactly one [`Outcome`].
//!
//! # Usage
//!
//! ```rust,ignore
//! let faucet = Faucet::new(client, deriver, config)?;
//!
//! let report = faucet.run(identities, CancellationToken::new()).await?;
//! tracing::info!(
//!     "Completed {}, swept {}, failed {}",
//!     report.completed(),
//!     report.swept(),
//!     report.len() - report.completed()
//! );
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use faucet_common::{DynKeyDeriver, DynNodeClient, Identity};
use tokio::sync::Semaphore;
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::activation::{run_identity, standard_pipeline, Outcome};
use crate::classifier::ErrorClassifier;
use crate::config::FaucetConfig;
use crate::pipeline::{Engine, Pipeline, RunContext};
use crate::state::StageName;
use crate::Error;

/// Outcomes of a fan-out, keyed by the identity's declared key hash
#[derive(Debug, Default)]
pub struct Report {
    outcomes: HashMap<String, Outcome>,
}

impl Report {
    /// Outcome of one identity
    pub fn get(&self, public_key_hash: &str) -> Option<&Outcome> {
        self.outcomes.get(public_key_hash)
    }

    /// All outcomes
    pub fn outcomes(&self) -> &HashMap<String, Outcome> {
        &self.outcomes
    }

    /// Number of identities run
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    /// Whether no identity was run
    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// Runs that completed
    pub fn completed(&self) -> usize {
        self.count(|outcome| matches!(outcome, Outcome::Completed(_)))
    }

    /// Runs that aborted at a stage
    pub fn aborted(&self) -> usize {
        self.count(|outcome| matches!(outcome, Outcome::AbortedAtStage { .. }))
    }

    /// Runs whose confirmation timed out
    pub fn timed_out(&self) -> usize {
        self.count(|outcome| matches!(outcome, Outcome::TimedOutAtConfirmation { .. }))
    }

    /// Runs whose operation was rejected
    pub fn rejected(&self) -> usize {
        self.count(|outcome| matches!(outcome, Outcome::RejectedAtConfirmation { .. }))
    }

    /// Completed runs that swept funds
    pub fn swept(&self) -> usize {
        self.count(Outcome::swept)
    }

    fn count<F>(&self, predicate: F) -> usize
    where
        F: Fn(&Outcome) -> bool,
    {
        self.outcomes.values().filter(|outcome| predicate(outcome)).count()
    }
}

/// Aborts the tasks of a fan-out when the run is dropped
#[derive(Default)]
struct AbortOnDrop(Vec<AbortHandle>);

impl AbortOnDrop {
    fn push(&mut self, handle: AbortHandle) {
        self.0.push(handle);
    }
}

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        for handle in &self.0 {
            handle.abort();
        }
    }
}

/// Fan-out driver
pub struct Faucet {
    deriver: DynKeyDeriver,
    config: FaucetConfig,
    engine: Arc<Engine>,
    pipeline: Arc<Pipeline>,
}

impl Faucet {
    /// Create a faucet running the standard pipeline against `client`
    pub fn new(
        client: DynNodeClient,
        deriver: DynKeyDeriver,
        config: FaucetConfig,
    ) -> Result<Self, Error> {
        config.validate()?;

        let classifier =
            ErrorClassifier::already_activated(config.recoverable.already_activated.clone());
        let engine = Engine::new(Arc::new(classifier)).with_stage_timeout(config.stage_timeout());
        let pipeline = standard_pipeline(client, &config);

        Ok(Self {
            deriver,
            config,
            engine: Arc::new(engine),
            pipeline: Arc::new(pipeline),
        })
    }

    /// Replace the error classifier
    pub fn with_classifier(mut self, classifier: ErrorClassifier) -> Self {
        self.engine = Arc::new(
            Engine::new(Arc::new(classifier)).with_stage_timeout(self.config.stage_timeout()),
        );
        self
    }

    /// Replace the pipeline run for every identity
    pub fn with_pipeline(mut self, pipeline: Pipeline) -> Self {
        self.pipeline = Arc::new(pipeline);
        self
    }

    /// Configuration in use
    pub fn config(&self) -> &FaucetConfig {
        &self.config
    }

    /// Run every identity to a terminal outcome.
    ///
    /// Waits for the key deriver's readiness barrier once before any identity
    /// starts. Cancelling `cancel` (or reaching the configured deadline) stops
    /// queued and in-flight runs; they are reported as aborted. Dropping the
    /// returned future stops every spawned run.
    #[instrument(skip_all, fields(identities = identities.len()))]
    pub async fn run(
        &self,
        identities: Vec<Identity>,
        cancel: CancellationToken,
    ) -> Result<Report, Error> {
        self.deriver.ready().await?;

        let cancel = cancel.child_token();
        let _cancel_on_drop = cancel.clone().drop_guard();
        let mut spawned = AbortOnDrop::default();

        if let Some(deadline) = self.config.deadline() {
            let cancel = cancel.clone();
            let task = tokio::spawn(async move {
                tokio::time::sleep(deadline).await;
                tracing::warn!("Deadline of {:?} reached, cancelling runs", deadline);
                cancel.cancel();
            });
            spawned.push(task.abort_handle());
        }

        let semaphore = self
            .config
            .concurrency_limit()
            .map(|limit| Arc::new(Semaphore::new(limit)));

        let mut seen = HashSet::new();
        let mut tasks = Vec::with_capacity(identities.len());

        for identity in identities {
            let public_key_hash = identity.public_key_hash.clone();
            if !seen.insert(public_key_hash.clone()) {
                tracing::warn!("Skipping duplicate identity {}", public_key_hash);
                continue;
            }

            let deriver = self.deriver.clone();
            let engine = self.engine.clone();
            let pipeline = self.pipeline.clone();
            let node = self.config.node.clone();
            let semaphore = semaphore.clone();
            let cancel = cancel.clone();

            let task = tokio::spawn(async move {
                let _permit = match semaphore {
                    Some(semaphore) => tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            return Outcome::aborted(StageName::RUN, Error::Cancelled);
                        }
                        permit = semaphore.acquire_owned() => match permit {
                            Ok(permit) => Some(permit),
                            Err(_) => return Outcome::aborted(StageName::RUN, Error::Cancelled),
                        },
                    },
                    None => None,
                };

                run_identity(
                    identity,
                    deriver.as_ref(),
                    &node,
                    &engine,
                    &pipeline,
                    RunContext::new(cancel),
                )
                .await
            });

            spawned.push(task.abort_handle());
            tasks.push((public_key_hash, task));
        }

        let mut report = Report::default();
        for (public_key_hash, task) in tasks {
            let outcome = match task.await {
                Ok(outcome) => outcome,
                Err(err) => {
                    tracing::error!("Run for {} did not finish: {}", public_key_hash, err);
                    Outcome::aborted(StageName::RUN, Error::TaskPanicked(err.to_string()))
                }
            };
            report.outcomes.insert(public_key_hash, outcome);
        }

        tracing::info!(
            "Fan-out finished: {} completed, {} aborted, {} timed out, {} rejected",
            report.completed(),
            report.aborted(),
            report.timed_out(),
            report.rejected()
        );

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use faucet_common::{Amount, KeyDeriver, RemoteError};
    use faucet_fake_node::{FakeDeriver, FakeNode, FakeNodeConfig};

    use super::*;
    use crate::config::{ConfirmationConfig, TransferConfig};

    fn identity(n: usize) -> Identity {
        Identity::new(
            format!("tz1Faucet{n}"),
            format!("phrase number {n}"),
            "passphrase".to_string(),
            format!("secret{n}"),
        )
    }

    fn config() -> FaucetConfig {
        FaucetConfig {
            transfer: TransferConfig {
                to: "T1".to_string(),
                ..Default::default()
            },
            confirmation: ConfirmationConfig {
                interval_ms: 10,
                max_attempts: 3,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn faucet(node: &FakeNode, identities: &[Identity], config: FaucetConfig) -> Faucet {
        let deriver = identities
            .iter()
            .fold(FakeDeriver::default(), |deriver, identity| {
                deriver.with_identity(identity)
            });
        Faucet::new(Arc::new(node.clone()), Arc::new(deriver), config).unwrap()
    }

    #[test]
    fn test_invalid_config_rejected() {
        let node = FakeNode::new(FakeNodeConfig::default());
        let result = Faucet::new(
            Arc::new(node),
            Arc::new(FakeDeriver::default()),
            FaucetConfig::default(),
        );

        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_identity_reported() {
        let identities: Vec<_> = (0..4).map(identity).collect();
        let node = identities.iter().fold(
            FakeNode::new(FakeNodeConfig::default()),
            |node, identity| node.with_account(&identity.public_key_hash, Amount::from(10)),
        );
        let node = node.with_activation_error(
            &identities[2].public_key_hash,
            RemoteError::new("invalid_activation_secret"),
        );

        let report = faucet(&node, &identities, config())
            .run(identities.clone(), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.len(), 4);
        assert_eq!(report.completed(), 3);
        assert_eq!(report.aborted(), 1);
        assert!(matches!(
            report.get(&identities[2].public_key_hash),
            Some(Outcome::AbortedAtStage { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_identities_run_once() {
        let node = FakeNode::new(FakeNodeConfig::default()).with_account("tz1Faucet0", Amount::from(10));

        let report = faucet(&node, &[identity(0)], config())
            .run(vec![identity(0), identity(0)], CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.len(), 1);
        assert_eq!(node.calls().activate, 1);
    }

    #[tokio::test]
    async fn test_concurrency_bound_respected() {
        let identities: Vec<_> = (0..6).map(identity).collect();
        let node = identities
            .iter()
            .fold(
                FakeNode::new(FakeNodeConfig::default()),
                |node, identity| node.with_account(&identity.public_key_hash, Amount::from(10)),
            )
            .with_latency(Duration::from_millis(20));

        let mut config = config();
        config.concurrency = 2;

        let report = faucet(&node, &identities, config)
            .run(identities.clone(), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.completed(), 6);
        assert!(node.max_concurrent_calls() <= 2);
    }

    #[tokio::test]
    async fn test_readiness_barrier_awaited_once() {
        let identities: Vec<_> = (0..3).map(identity).collect();
        let node = identities.iter().fold(
            FakeNode::new(FakeNodeConfig::default()),
            |node, identity| node.with_account(&identity.public_key_hash, Amount::from(10)),
        );
        let deriver = Arc::new(
            identities
                .iter()
                .fold(FakeDeriver::default(), |deriver, identity| {
                    deriver.with_identity(identity)
                }),
        );

        let faucet = Faucet::new(Arc::new(node), deriver.clone(), config()).unwrap();
        let report = faucet
            .run(identities, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.completed(), 3);
        assert_eq!(deriver.ready_calls(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_fan_out_reports_every_identity() {
        let identities: Vec<_> = (0..3).map(identity).collect();
        let node = FakeNode::new(FakeNodeConfig::default());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = faucet(&node, &identities, config())
            .run(identities, cancel)
            .await
            .unwrap();

        assert_eq!(report.len(), 3);
        assert_eq!(report.aborted(), 3);
        assert!(report.outcomes().values().all(|outcome| matches!(
            outcome,
            Outcome::AbortedAtStage {
                error: Error::Cancelled,
                ..
            }
        )));
        assert_eq!(node.calls().activate, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_cancels_slow_runs() {
        let node = FakeNode::new(FakeNodeConfig {
            confirm_after: None,
            ..Default::default()
        })
        .with_account("tz1Faucet0", Amount::from(10));

        let mut config = config();
        config.confirmation.max_attempts = 1_000;
        config.deadline_ms = Some(1_000);

        let report = faucet(&node, &[identity(0)], config)
            .run(vec![identity(0)], CancellationToken::new())
            .await
            .unwrap();

        assert!(matches!(
            report.get("tz1Faucet0"),
            Some(Outcome::AbortedAtStage {
                error: Error::Cancelled,
                ..
            })
        ));
        assert!(node.calls().query_confirmation < 1_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_run_stops_spawned_tasks() {
        let node = FakeNode::new(FakeNodeConfig {
            confirm_after: None,
            ..Default::default()
        })
        .with_account("tz1Faucet0", Amount::from(10));

        let mut config = config();
        config.confirmation.max_attempts = 1_000;
        config.deadline_ms = Some(60_000);
        let faucet = faucet(&node, &[identity(0)], config);

        let result = tokio::time::timeout(
            Duration::from_millis(50),
            faucet.run(vec![identity(0)], CancellationToken::new()),
        )
        .await;
        assert!(result.is_err());

        let queries = node.calls().query_confirmation;
        assert!(queries > 0);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(node.calls().query_confirmation, queries);
    }

    #[tokio::test]
    async fn test_readiness_failure_is_reported() {
        struct NeverReady;

        #[async_trait::async_trait]
        impl KeyDeriver for NeverReady {
            async fn ready(&self) -> Result<(), faucet_common::KeyError> {
                Err(faucet_common::KeyError::NotReady)
            }

            fn derive_keys(
                &self,
                _recovery_phrase: &str,
                _passphrase: &str,
            ) -> Result<faucet_common::DerivedKeys, faucet_common::KeyError> {
                Err(faucet_common::KeyError::NotReady)
            }
        }

        let node = FakeNode::new(FakeNodeConfig::default());
        let faucet = Faucet::new(Arc::new(node), Arc::new(NeverReady), config()).unwrap();

        let result = faucet.run(vec![identity(0)], CancellationToken::new()).await;
        assert!(matches!(result, Err(Error::Key(_))));
    }
}
