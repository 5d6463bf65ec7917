//! Faucet activator binary

#![warn(missing_docs)]
#![warn(rustdoc::bare_urls)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use clap::Parser;
use faucet::{Bip39Deriver, Faucet, KeyDeriver, Outcome, Report};
use faucet_cli::cli::CLIArgs;
use faucet_cli::config::Settings;
use faucet_cli::credentials::load_identities;
use faucet_cli::{CONFIG_FILE_NAME, CREDENTIALS_DIR_NAME, DEFAULT_WORK_DIR};
use faucet_fake_node::FakeNode;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let args = CLIArgs::parse();

    init_tracing(&args.log_filter);

    let work_dir = match &args.work_dir {
        Some(work_dir) => work_dir.clone(),
        None => home::home_dir()
            .ok_or(anyhow!("Unknown home dir"))?
            .join(DEFAULT_WORK_DIR),
    };
    std::fs::create_dir_all(&work_dir)?;

    let config_file = args
        .config
        .clone()
        .unwrap_or_else(|| work_dir.join(CONFIG_FILE_NAME));
    tracing::debug!("Loading config from {}", config_file.display());

    let mut settings = Settings::new(Some(&config_file))?;
    if let Some(to) = args.to {
        settings.faucet.transfer.to = to;
    }
    if let Some(concurrency) = args.concurrency {
        settings.faucet.concurrency = concurrency;
    }

    let credentials_dir = args
        .credentials
        .or_else(|| settings.info.credentials_dir.clone())
        .unwrap_or_else(|| work_dir.join(CREDENTIALS_DIR_NAME));

    let identities = load_identities(&credentials_dir)?;
    if identities.is_empty() {
        tracing::warn!("No faucet files found in {}", credentials_dir.display());
        return Ok(());
    }
    tracing::info!("Loaded {} faucet identities", identities.len());

    let deriver = Arc::new(Bip39Deriver::new());
    deriver.ready().await?;

    tracing::warn!("Using the in-memory node backend, nothing is sent to a network");
    let fake_node = &settings.fake_node;
    let mut node = FakeNode::new(fake_node.node_config())
        .with_latency(Duration::from_millis(fake_node.latency_ms));
    for identity in &identities {
        let keys = match deriver.derive_keys(&identity.recovery_phrase, &identity.passphrase) {
            Ok(keys) => keys,
            // Reported again by the run itself
            Err(err) => {
                tracing::warn!("Could not derive {}: {}", identity.public_key_hash, err);
                continue;
            }
        };
        node = if fake_node.activated {
            node.with_activated_account(&keys.public_key_hash, fake_node.balance)
        } else {
            node.with_account(&keys.public_key_hash, fake_node.balance)
        };
    }

    let faucet = Faucet::new(Arc::new(node), deriver, settings.faucet)?;

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown signal received, cancelling runs");
            shutdown.cancel();
        }
    });

    let report = faucet.run(identities, cancel).await?;
    print_report(&report);

    Ok(())
}

fn init_tracing(default_filter: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::fmt().with_env_filter(env_filter).init();
}

fn print_report(report: &Report) {
    let mut outcomes: Vec<_> = report.outcomes().iter().collect();
    outcomes.sort_by(|(a, _), (b, _)| a.cmp(b));

    for (public_key_hash, outcome) in outcomes {
        let detail = match outcome {
            Outcome::Completed(_) if outcome.swept() => "swept".to_string(),
            Outcome::Completed(_) => "below threshold".to_string(),
            Outcome::AbortedAtStage { stage, error } => format!("at {stage}: {error}"),
            Outcome::TimedOutAtConfirmation {
                stage,
                handle,
                attempts,
            }
            | Outcome::RejectedAtConfirmation {
                stage,
                handle,
                attempts,
            } => format!("at {stage}: {handle} after {attempts} attempts"),
        };
        println!("{public_key_hash}\t{}\t{detail}", outcome.label());
    }

    println!(
        "\n{} identities: {} completed ({} swept), {} aborted, {} timed out, {} rejected",
        report.len(),
        report.completed(),
        report.swept(),
        report.aborted(),
        report.timed_out(),
        report.rejected()
    );
}
