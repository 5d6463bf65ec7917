//! Pipeline Integration Tests
//!
//! These tests run whole identities through the fan-out driver against the
//! in-memory node:
//! - Activation, sweep and confirmation end to end
//! - Recovery of already activated accounts
//! - Threshold branching, transfer failures and confirmation polling bounds
//! - Isolation and cancellation across identities

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use faucet::activation::sweep_request;
use faucet::pipeline::{BalanceStage, ConfirmStage, TransferStage};
use faucet::{
    Amount, ConfirmationPoller, Decision, DynNodeClient, Error, ErrorClassifier, Outcome,
    Pipeline, RecoveryRule, StageName, State,
};
use faucet_common::RemoteError;
use faucet_fake_node::{FakeNode, FakeNodeConfig};
use faucet_integration_tests::init_fake_node::*;
use tokio_util::sync::CancellationToken;

// =============================================================================
// End To End
// =============================================================================

/// Tests that a funded wallet is activated and everything above the reserve is swept
#[tokio::test(start_paused = true)]
async fn test_funded_wallet_swept_end_to_end() -> Result<()> {
    setup_tracing();
    let identities = vec![identity(0)];
    let node = FakeNode::new(FakeNodeConfig::default())
        .with_account("tz1Faucet0", Amount::from(150_000_000));

    let report = create_faucet(&node, &identities, test_config())?
        .run(identities, CancellationToken::new())
        .await?;

    let outcome = report.get("tz1Faucet0").expect("reported");
    assert!(outcome.is_completed(), "{outcome:?}");
    assert!(outcome.swept());

    let transfers = node.transfers();
    assert_eq!(transfers.len(), 1);
    assert_eq!(transfers[0].to, TARGET);
    assert_eq!(transfers[0].amount, Amount::from(50_000_000));
    assert_eq!(transfers[0].fee, Amount::from(1));

    // One confirmation cycle for the activation, one for the transfer
    let calls = node.calls();
    assert_eq!(calls.transfer, 1);
    assert_eq!(calls.query_confirmation, 2);

    // The second confirmation replaced the first in its slot
    let state = outcome.state().expect("completed");
    let reader = StageName::RUN;
    let transaction = state.injection(&reader, &StageName::TRANSACTION)?;
    let confirmation = state.confirmation(&reader, &StageName::CONFIRM_OPERATION)?;
    assert_eq!(&confirmation.handle, transaction);

    assert_eq!(node.balance_of(TARGET), Some(Amount::from(50_000_000)));
    assert_eq!(node.balance_of("tz1Faucet0"), Some(Amount::from(99_999_999)));

    Ok(())
}

/// Tests that an already activated account continues to the balance query from the seeded wallet
#[tokio::test(start_paused = true)]
async fn test_already_activated_reaches_balance_query() -> Result<()> {
    setup_tracing();
    let identities = vec![identity(0)];
    let node = FakeNode::new(FakeNodeConfig::default())
        .with_activated_account("tz1Faucet0", Amount::from(150_000_000));

    let report = create_faucet(&node, &identities, test_config())?
        .run(identities, CancellationToken::new())
        .await?;

    let outcome = report.get("tz1Faucet0").expect("reported");
    let state = outcome.state().expect("completed");
    assert!(!state.contains(&StageName::ACTIVATE_WALLET));
    assert!(state.contains(&StageName::WALLET));
    assert!(state.contains(&StageName::WALLET_BALANCE));
    assert!(outcome.swept());

    // Only the transfer was confirmed
    let calls = node.calls();
    assert_eq!(calls.activate, 1);
    assert_eq!(calls.query_balance, 1);
    assert_eq!(calls.query_confirmation, 1);

    Ok(())
}

/// Tests that the already-activated identifiers come from config
#[tokio::test(start_paused = true)]
async fn test_recoverable_ids_configurable() -> Result<()> {
    setup_tracing();
    let identities = vec![identity(0)];
    let node = FakeNode::new(FakeNodeConfig {
        already_activated_id: "proto.activation.already_done".to_string(),
        ..Default::default()
    })
    .with_activated_account("tz1Faucet0", Amount::from(1));

    let mut config = test_config();
    config.recoverable.already_activated = vec!["proto.activation.already_done".to_string()];

    let report = create_faucet(&node, &identities, config)?
        .run(identities.clone(), CancellationToken::new())
        .await?;
    assert_eq!(report.completed(), 1);

    // Without the id the same failure is fatal
    let report = create_faucet(&node, &identities, test_config())?
        .run(identities, CancellationToken::new())
        .await?;
    assert!(matches!(
        report.get("tz1Faucet0"),
        Some(Outcome::AbortedAtStage { stage, .. }) if *stage == StageName::ACTIVATE_WALLET
    ));

    Ok(())
}

// =============================================================================
// Branching And Polling
// =============================================================================

/// Tests that the transfer runs only for balances strictly above the threshold
#[tokio::test(start_paused = true)]
async fn test_transfer_only_above_threshold() -> Result<()> {
    setup_tracing();
    let identities = identities(3);
    let node = FakeNode::new(FakeNodeConfig::default())
        .with_account("tz1Faucet0", Amount::from(100_000_000))
        .with_account("tz1Faucet1", Amount::from(99_000_000))
        .with_account("tz1Faucet2", Amount::from(100_000_001));

    let report = create_faucet(&node, &identities, test_config())?
        .run(identities, CancellationToken::new())
        .await?;

    assert_eq!(report.completed(), 3);
    assert_eq!(report.swept(), 1);

    let calls = node.calls();
    assert_eq!(calls.transfer, 1);
    let transfers = node.transfers();
    assert_eq!(transfers[0].from, "tz1Faucet2");
    assert_eq!(transfers[0].amount, Amount::from(1));

    Ok(())
}

/// Tests that the threshold and reserve are applied independently
#[tokio::test(start_paused = true)]
async fn test_threshold_and_reserve_independent() -> Result<()> {
    setup_tracing();
    let identities = vec![identity(0)];
    let node = FakeNode::new(FakeNodeConfig::default())
        .with_account("tz1Faucet0", Amount::from(150_000_000));

    let mut config = test_config();
    config.transfer.threshold = Amount::from(10_000_000);
    config.transfer.reserve = Amount::from(1_000_000);

    let report = create_faucet(&node, &identities, config)?
        .run(identities, CancellationToken::new())
        .await?;

    assert_eq!(report.swept(), 1);
    assert_eq!(node.transfers()[0].amount, Amount::from(149_000_000));

    Ok(())
}

/// Tests that a balance above the threshold but not the reserve aborts the transfer
#[tokio::test(start_paused = true)]
async fn test_balance_below_reserve_aborts() -> Result<()> {
    setup_tracing();
    let identities = vec![identity(0)];
    let node = FakeNode::new(FakeNodeConfig::default())
        .with_account("tz1Faucet0", Amount::from(50));

    let mut config = test_config();
    config.transfer.threshold = Amount::from(10);

    let report = create_faucet(&node, &identities, config)?
        .run(identities, CancellationToken::new())
        .await?;

    assert!(matches!(
        report.get("tz1Faucet0"),
        Some(Outcome::AbortedAtStage {
            stage,
            error: Error::InsufficientBalance { .. },
        }) if *stage == StageName::TRANSACTION
    ));
    assert_eq!(node.calls().transfer, 0);

    Ok(())
}

/// Tests that a node error while injecting the sweep aborts at the transaction stage
#[tokio::test(start_paused = true)]
async fn test_transfer_remote_error_aborts_at_transaction() -> Result<()> {
    setup_tracing();
    let identities = vec![identity(0)];
    let node = FakeNode::new(FakeNodeConfig::default())
        .with_account("tz1Faucet0", Amount::from(150_000_000))
        .with_transfer_error("tz1Faucet0", RemoteError::new("proto.counter_in_the_past"));

    let report = create_faucet(&node, &identities, test_config())?
        .run(identities, CancellationToken::new())
        .await?;

    match report.get("tz1Faucet0") {
        Some(Outcome::AbortedAtStage { stage, error }) => {
            assert_eq!(*stage, StageName::TRANSACTION);
            assert_eq!(error.remote_id(), Some("proto.counter_in_the_past"));
        }
        other => panic!("unexpected outcome {other:?}"),
    }

    // Only the activation was confirmed and nothing moved
    let calls = node.calls();
    assert_eq!(calls.transfer, 1);
    assert_eq!(calls.query_confirmation, 1);
    assert!(node.transfers().is_empty());
    assert_eq!(node.balance_of("tz1Faucet0"), Some(Amount::from(150_000_000)));
    assert_eq!(report.aborted(), 1);

    Ok(())
}

/// Tests that an operation observed after k queries is confirmed after exactly k queries
#[tokio::test(start_paused = true)]
async fn test_confirmation_after_exactly_k_queries() -> Result<()> {
    setup_tracing();
    let identities = vec![identity(0)];
    let node = FakeNode::new(FakeNodeConfig {
        confirm_after: Some(3),
        ..Default::default()
    })
    .with_account("tz1Faucet0", Amount::from(1));

    let report = create_faucet(&node, &identities, test_config())?
        .run(identities, CancellationToken::new())
        .await?;

    let state = report
        .get("tz1Faucet0")
        .and_then(Outcome::state)
        .expect("completed");
    let confirmation = state.confirmation(&StageName::RUN, &StageName::CONFIRM_OPERATION)?;
    assert_eq!(confirmation.attempts, 3);
    assert_eq!(node.calls().query_confirmation, 3);

    Ok(())
}

/// Tests that an operation never observed times out after max attempts
#[tokio::test(start_paused = true)]
async fn test_confirmation_times_out_after_max_attempts() -> Result<()> {
    setup_tracing();
    let identities = vec![identity(0)];
    let node = FakeNode::new(FakeNodeConfig {
        confirm_after: None,
        ..Default::default()
    })
    .with_account("tz1Faucet0", Amount::from(150_000_000));

    let report = create_faucet(&node, &identities, test_config())?
        .run(identities, CancellationToken::new())
        .await?;

    match report.get("tz1Faucet0") {
        Some(Outcome::TimedOutAtConfirmation {
            stage, attempts, ..
        }) => {
            assert_eq!(*stage, StageName::CONFIRM_OPERATION);
            assert_eq!(*attempts, 5);
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(node.calls().query_confirmation, 5);
    assert_eq!(node.calls().query_balance, 0);
    assert_eq!(report.timed_out(), 1);

    Ok(())
}

// =============================================================================
// Fan-out
// =============================================================================

/// Tests that a failing identity does not affect its sibling
#[tokio::test(start_paused = true)]
async fn test_failing_identity_isolated() -> Result<()> {
    setup_tracing();
    let identities = identities(2);
    let node = FakeNode::new(FakeNodeConfig::default())
        .with_account("tz1Faucet0", Amount::from(150_000_000))
        .with_activation_error(
            "tz1Faucet0",
            RemoteError::new("invalid_activation_secret").with_message("bad secret"),
        )
        .with_account("tz1Faucet1", Amount::from(150_000_000));

    let report = create_faucet(&node, &identities, test_config())?
        .run(identities, CancellationToken::new())
        .await?;

    match report.get("tz1Faucet0") {
        Some(Outcome::AbortedAtStage { stage, error }) => {
            assert_eq!(*stage, StageName::ACTIVATE_WALLET);
            assert_eq!(error.remote_id(), Some("invalid_activation_secret"));
        }
        other => panic!("unexpected outcome {other:?}"),
    }

    let sibling = report.get("tz1Faucet1").expect("reported");
    assert!(sibling.is_completed());
    assert!(sibling.swept());
    assert_eq!(node.transfers().len(), 1);
    assert_eq!(node.transfers()[0].from, "tz1Faucet1");

    Ok(())
}

/// Tests that every identity ends with exactly one outcome
#[tokio::test(start_paused = true)]
async fn test_every_identity_has_one_outcome() -> Result<()> {
    setup_tracing();
    let identities = identities(5);
    let node = FakeNode::new(FakeNodeConfig::default())
        .with_account("tz1Faucet0", Amount::from(150_000_000))
        .with_activated_account("tz1Faucet1", Amount::from(1))
        .with_account("tz1Faucet2", Amount::from(150_000_000))
        .with_activation_error("tz1Faucet2", RemoteError::new("invalid_activation_secret"))
        .with_activated_account("tz1Faucet3", Amount::from(150_000_000))
        .with_rejected_operations("tz1Faucet3");
    // tz1Faucet4 is unknown to the node

    let mut config = test_config();
    config.concurrency = 2;

    let report = create_faucet(&node, &identities, config)?
        .run(identities, CancellationToken::new())
        .await?;

    assert_eq!(report.len(), 5);
    assert_eq!(report.completed(), 2);
    assert_eq!(report.aborted(), 2);
    assert_eq!(report.rejected(), 1);
    assert_eq!(
        report.completed() + report.aborted() + report.timed_out() + report.rejected(),
        report.len()
    );
    assert!(matches!(
        report.get("tz1Faucet4"),
        Some(Outcome::AbortedAtStage { stage, .. }) if *stage == StageName::ACTIVATE_WALLET
    ));

    Ok(())
}

/// Tests that cancelling the fan-out stops polling runs and reports them
#[tokio::test(start_paused = true)]
async fn test_cancel_stops_in_flight_runs() -> Result<()> {
    setup_tracing();
    let identities = identities(3);
    let node = identities.iter().fold(
        FakeNode::new(FakeNodeConfig {
            confirm_after: None,
            ..Default::default()
        }),
        |node, identity| node.with_account(&identity.public_key_hash, Amount::from(1)),
    );

    let mut config = test_config();
    config.confirmation.max_attempts = 10_000;

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let report = create_faucet(&node, &identities, config)?
        .run(identities, cancel)
        .await?;

    assert_eq!(report.len(), 3);
    for outcome in report.outcomes().values() {
        assert!(matches!(
            outcome,
            Outcome::AbortedAtStage {
                stage,
                error: Error::Cancelled,
            } if *stage == StageName::CONFIRM_OPERATION
        ));
    }
    assert!(node.calls().query_confirmation < 10_000);

    Ok(())
}

// =============================================================================
// Custom Recovery
// =============================================================================

/// Skips the sweep when the node reports the balance cannot cover it
struct SkipUnaffordableSweep;

impl RecoveryRule for SkipUnaffordableSweep {
    fn recover(&self, stage: &StageName, _error: &Error, state: &State) -> Decision {
        if *stage == StageName::TRANSACTION {
            Decision::Substitute(state.clone())
        } else {
            Decision::Abort
        }
    }

    fn name(&self) -> &'static str {
        "SkipUnaffordableSweep"
    }
}

/// Tests that a registered rule recovers a new error class inside a segment
#[tokio::test(start_paused = true)]
async fn test_custom_rule_skips_rest_of_segment() -> Result<()> {
    setup_tracing();
    let identities = vec![identity(0)];
    let node = FakeNode::new(FakeNodeConfig::default())
        .with_activated_account("tz1Faucet0", Amount::from(1_000));

    // No reserve, so amount plus fee exceeds the balance
    let mut config = test_config();
    config.transfer.reserve = Amount::ZERO;
    let transfer = config.transfer.clone();

    let client: DynNodeClient = Arc::new(node.clone());
    let poller = ConfirmationPoller::new(&config.confirmation);
    let pipeline = Pipeline::new()
        .stage(BalanceStage::new(client.clone(), |reader, state| {
            Ok(state.wallet(reader)?.public_key_hash().to_string())
        }))
        .segment(
            Pipeline::new()
                .stage(TransferStage::new(client.clone(), move |reader, state| {
                    sweep_request(reader, state, &transfer)
                }))
                .stage(ConfirmStage::of(client, poller, StageName::TRANSACTION)),
        );

    let classifier =
        ErrorClassifier::with_defaults().with_rule("insufficient_balance", SkipUnaffordableSweep);

    let report = create_faucet(&node, &identities, config)?
        .with_classifier(classifier)
        .with_pipeline(pipeline)
        .run(identities, CancellationToken::new())
        .await?;

    let outcome = report.get("tz1Faucet0").expect("reported");
    let state = outcome.state().expect("completed");
    assert!(!state.contains(&StageName::TRANSACTION));
    assert!(!state.contains(&StageName::CONFIRM_OPERATION));
    assert!(!outcome.swept());

    let calls = node.calls();
    assert_eq!(calls.transfer, 1);
    assert_eq!(calls.query_confirmation, 0);
    assert!(node.transfers().is_empty());

    Ok(())
}
