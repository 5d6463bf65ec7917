//! Identity and wallet types

use std::fmt;

use serde::{Deserialize, Serialize};

/// Recovery material of one faucet wallet.
///
/// Sourced once per wallet and never mutated.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Public key hash the faucet declared for this wallet
    pub public_key_hash: String,
    /// Space separated recovery phrase
    pub recovery_phrase: String,
    /// Passphrase applied on top of the recovery phrase
    pub passphrase: String,
    /// Secret required by the activation operation
    pub activation_secret: String,
}

impl Identity {
    /// Create new [`Identity`]
    pub fn new<S>(public_key_hash: S, recovery_phrase: S, passphrase: S, activation_secret: S) -> Self
    where
        S: Into<String>,
    {
        Self {
            public_key_hash: public_key_hash.into(),
            recovery_phrase: recovery_phrase.into(),
            passphrase: passphrase.into(),
            activation_secret: activation_secret.into(),
        }
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("public_key_hash", &self.public_key_hash)
            .field("recovery_phrase", &"<redacted>")
            .field("passphrase", &"<redacted>")
            .field("activation_secret", &"<redacted>")
            .finish()
    }
}

/// Keys derived from an identity's recovery material
#[derive(Clone, PartialEq, Eq)]
pub struct DerivedKeys {
    /// Public key (encoded by the deriver)
    pub public_key: String,
    /// Secret key (encoded by the deriver)
    pub secret_key: String,
    /// Hash of the public key, the on-chain account address
    pub public_key_hash: String,
}

impl fmt::Debug for DerivedKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DerivedKeys")
            .field("public_key", &self.public_key)
            .field("secret_key", &"<redacted>")
            .field("public_key_hash", &self.public_key_hash)
            .finish()
    }
}

/// Node the pipeline talks to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeTarget {
    /// Network name
    pub name: String,
    /// Node RPC url
    pub url: String,
}

impl Default for NodeTarget {
    fn default() -> Self {
        Self {
            name: "local".to_string(),
            url: "http://127.0.0.1:8732".to_string(),
        }
    }
}

/// Wallet seeded into the pipeline state.
///
/// Created once per identity run and read by every later stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Wallet {
    /// Derived keys
    pub keys: DerivedKeys,
    /// Key hash the identity declared, kept for reporting
    pub declared_public_key_hash: String,
    /// Activation secret
    pub activation_secret: String,
    /// Node / network target
    pub node: NodeTarget,
}

impl Wallet {
    /// On-chain address of the wallet
    pub fn public_key_hash(&self) -> &str {
        &self.keys.public_key_hash
    }
}
