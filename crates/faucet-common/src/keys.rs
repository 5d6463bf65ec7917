//! Key derivation interface

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::KeyError;
use crate::identity::DerivedKeys;

/// Derives wallet keys from recovery material.
///
/// `ready` is a one-time initialization barrier. It is awaited once before any
/// identity run starts; `derive_keys` may assume it has completed.
#[async_trait]
pub trait KeyDeriver: Send + Sync {
    /// Wait until the deriver can be used
    async fn ready(&self) -> Result<(), KeyError> {
        Ok(())
    }

    /// Derive keys from a recovery phrase and passphrase
    fn derive_keys(&self, recovery_phrase: &str, passphrase: &str)
        -> Result<DerivedKeys, KeyError>;
}

/// Shared key deriver
pub type DynKeyDeriver = Arc<dyn KeyDeriver>;
