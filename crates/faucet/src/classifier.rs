//! Error classifier
//!
//! Decides what a failed stage means for the identity run. Recoverable errors
//! are looked up in a table keyed by the remote error identifier; anything not
//! in the table aborts the run. Adding a recoverable class means registering a
//! [`RecoveryRule`], the pipeline engine never changes.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::state::{StageName, State};
use crate::Error;

/// Remote error id reported when an account was activated before
pub const ALREADY_ACTIVATED: &str = "already_activated";

/// What to do with a failed stage
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Fatal for this identity run
    Abort,
    /// Drop the failed stage and continue from this state
    Substitute(State),
}

/// Recovery for one class of remote errors.
///
/// Rules are registered against error identifiers in an [`ErrorClassifier`].
pub trait RecoveryRule: Send + Sync {
    /// Decide for a failure of `stage` with the given state
    fn recover(&self, stage: &StageName, error: &Error, state: &State) -> Decision;

    /// Get the name of this rule for logging
    fn name(&self) -> &'static str;
}

/// Account was already activated.
///
/// Only applies to the activation stage: the run continues as if activation
/// had succeeded, carrying nothing but the seeded wallet.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlreadyActivated;

impl RecoveryRule for AlreadyActivated {
    fn recover(&self, stage: &StageName, _error: &Error, state: &State) -> Decision {
        if *stage != StageName::ACTIVATE_WALLET || !state.contains(&StageName::WALLET) {
            return Decision::Abort;
        }

        Decision::Substitute(state.retain(&[StageName::WALLET]))
    }

    fn name(&self) -> &'static str {
        "AlreadyActivated"
    }
}

/// Table of recoverable remote errors
#[derive(Clone, Default)]
pub struct ErrorClassifier {
    rules: HashMap<String, Arc<dyn RecoveryRule>>,
}

impl ErrorClassifier {
    /// Classifier with no recoverable errors
    pub fn new() -> Self {
        Self::default()
    }

    /// Classifier recognising `already_activated`
    pub fn with_defaults() -> Self {
        Self::new().with_rule(ALREADY_ACTIVATED, AlreadyActivated)
    }

    /// Classifier recognising each of `ids` as already-activated
    pub fn already_activated<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ids.into_iter()
            .fold(Self::new(), |classifier, id| classifier.with_rule(id, AlreadyActivated))
    }

    /// Register `rule` for remote errors with identifier `id`
    pub fn with_rule<S, R>(mut self, id: S, rule: R) -> Self
    where
        S: Into<String>,
        R: RecoveryRule + 'static,
    {
        self.rules.insert(id.into(), Arc::new(rule));
        self
    }

    /// Whether `id` has a registered rule
    pub fn recognises(&self, id: &str) -> bool {
        self.rules.contains_key(id)
    }

    /// Classify a failure of `stage`
    pub fn classify(&self, stage: &StageName, error: &Error, state: &State) -> Decision {
        let Some(id) = error.remote_id() else {
            return Decision::Abort;
        };

        let Some(rule) = self.rules.get(id) else {
            tracing::debug!("No recovery rule for remote error {}", id);
            return Decision::Abort;
        };

        let decision = rule.recover(stage, error, state);
        if let Decision::Substitute(_) = decision {
            tracing::warn!(
                "Stage {} failed with {}; recovered by {}",
                stage,
                id,
                rule.name()
            );
        }
        decision
    }
}

impl fmt::Debug for ErrorClassifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorClassifier")
            .field("rules", &self.rules.keys().collect::<Vec<_>>())
            .finish()
    }
}
