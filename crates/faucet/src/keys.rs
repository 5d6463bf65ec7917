//! BIP-39 key derivation

use async_trait::async_trait;
use bip39::Mnemonic;
use bitcoin::hashes::{hash160, Hash};
use bitcoin::secp256k1::{All, PublicKey, Secp256k1, SecretKey};
use faucet_common::{DerivedKeys, KeyDeriver, KeyError};
use tokio::sync::OnceCell;

/// Derives secp256k1 keys from a BIP-39 recovery phrase.
///
/// The signing context is built by [`KeyDeriver::ready`]; deriving before that
/// fails with [`KeyError::NotReady`].
#[derive(Debug, Default)]
pub struct Bip39Deriver {
    secp: OnceCell<Secp256k1<All>>,
}

impl Bip39Deriver {
    /// Create a deriver; the context is built on first `ready`
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyDeriver for Bip39Deriver {
    async fn ready(&self) -> Result<(), KeyError> {
        self.secp
            .get_or_init(|| async {
                tracing::debug!("Initializing signing context");
                Secp256k1::new()
            })
            .await;
        Ok(())
    }

    fn derive_keys(&self, recovery_phrase: &str, passphrase: &str) -> Result<DerivedKeys, KeyError> {
        let secp = self.secp.get().ok_or(KeyError::NotReady)?;

        let mnemonic = Mnemonic::parse(recovery_phrase)
            .map_err(|err| KeyError::InvalidPhrase(err.to_string()))?;
        let seed = mnemonic.to_seed(passphrase);

        let secret_key = SecretKey::from_slice(&seed[..32])
            .map_err(|err| KeyError::Derivation(err.to_string()))?;
        let public_key = PublicKey::from_secret_key(secp, &secret_key);
        let public_key_hash = hash160::Hash::hash(&public_key.serialize());

        Ok(DerivedKeys {
            public_key: public_key.to_string(),
            secret_key: secret_key.display_secret().to_string(),
            public_key_hash: public_key_hash.to_string(),
        })
    }
}
