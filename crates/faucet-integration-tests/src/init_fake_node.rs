//! Setup for runs against the in-memory node

use std::sync::Arc;

use anyhow::Result;
use faucet::config::{ConfirmationConfig, TransferConfig};
use faucet::{Amount, Faucet, FaucetConfig, Identity};
use faucet_fake_node::{FakeDeriver, FakeNode};
use tracing_subscriber::EnvFilter;

/// Transfer target used by every test
pub const TARGET: &str = "T1";

/// Install a subscriber honouring `RUST_LOG`, once per test binary
pub fn setup_tracing() {
    let default_filter = "debug";
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));

    // Ok if another test already installed it
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_test_writer()
        .try_init();
}

/// Identity `n`, declaring key hash `tz1Faucet{n}`
pub fn identity(n: usize) -> Identity {
    Identity::new(
        format!("tz1Faucet{n}"),
        format!("faucet words number {n}"),
        format!("faucet{n}@example.compassword"),
        format!("activation{n}"),
    )
}

/// Identities `0..count`
pub fn identities(count: usize) -> Vec<Identity> {
    (0..count).map(identity).collect()
}

/// Config with the default threshold and reserve, fee `1`, fast polling
pub fn test_config() -> FaucetConfig {
    FaucetConfig {
        transfer: TransferConfig {
            to: TARGET.to_string(),
            fee: Amount::from(1),
            threshold: Amount::from(100_000_000),
            reserve: Amount::from(100_000_000),
        },
        confirmation: ConfirmationConfig {
            interval_ms: 10,
            max_attempts: 5,
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Deriver resolving every identity to its declared key hash
pub fn deriver_for(identities: &[Identity]) -> FakeDeriver {
    identities
        .iter()
        .fold(FakeDeriver::default(), |deriver, identity| {
            deriver.with_identity(identity)
        })
}

/// Faucet running the standard pipeline against `node`
pub fn create_faucet(
    node: &FakeNode,
    identities: &[Identity],
    config: FaucetConfig,
) -> Result<Faucet> {
    let faucet = Faucet::new(
        Arc::new(node.clone()),
        Arc::new(deriver_for(identities)),
        config,
    )?;
    Ok(faucet)
}
