//! Faucet credential files
//!
//! A faucet file is a JSON document as handed out by a test network faucet:
//!
//! ```json
//! {
//!   "pkh": "tz1...",
//!   "mnemonic": ["word", "..."],
//!   "email": "someone@example.com",
//!   "password": "...",
//!   "secret": "..."
//! }
//! ```
//!
//! Files without a `mnemonic` are skipped.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use faucet::Identity;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct FaucetFile {
    pkh: String,
    mnemonic: Option<Vec<String>>,
    #[serde(default)]
    email: String,
    #[serde(default)]
    password: String,
    secret: String,
}

impl FaucetFile {
    fn into_identity(self) -> Option<Identity> {
        let mnemonic = self.mnemonic?;

        Some(Identity::new(
            self.pkh,
            mnemonic.join(" "),
            format!("{}{}", self.email, self.password),
            self.secret,
        ))
    }
}

/// Parse one faucet file, `None` when it carries no mnemonic
pub fn parse_faucet_file(contents: &str) -> Result<Option<Identity>> {
    let file: FaucetFile = serde_json::from_str(contents)?;
    Ok(file.into_identity())
}

/// Load every faucet file in `dir`, in file name order.
///
/// Only `*.json` files are read. When two files declare the same key hash the
/// first one wins.
pub fn load_identities(dir: &Path) -> Result<Vec<Identity>> {
    let mut paths = fs::read_dir(dir)
        .with_context(|| format!("Could not read credentials dir {}", dir.display()))?
        .map(|entry| entry.map(|entry| entry.path()))
        .collect::<Result<Vec<_>, _>>()?;
    paths.sort();

    let mut seen = HashSet::new();
    let mut identities = Vec::new();

    for path in paths {
        if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
            continue;
        }

        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Could not read {}", path.display()))?;
        let identity = parse_faucet_file(&contents)
            .with_context(|| format!("Invalid faucet file {}", path.display()))?;

        let Some(identity) = identity else {
            tracing::info!("Skipping {}: no mnemonic", path.display());
            continue;
        };

        if !seen.insert(identity.public_key_hash.clone()) {
            tracing::warn!(
                "Skipping {}: key hash {} already loaded",
                path.display(),
                identity.public_key_hash
            );
            continue;
        }

        tracing::debug!("Loaded faucet {} from {}", identity.public_key_hash, path.display());
        identities.push(identity);
    }

    Ok(identities)
}
