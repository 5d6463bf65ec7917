//! Faucet Common
//!
//! Types and collaborator traits shared by the faucet pipeline, its node
//! backends and its tools.

#![warn(missing_docs)]
#![warn(rustdoc::bare_urls)]

pub mod amount;
pub mod error;
pub mod identity;
pub mod keys;
pub mod node;

pub use amount::Amount;
pub use error::{KeyError, NodeError, RemoteError};
pub use identity::{DerivedKeys, Identity, NodeTarget, Wallet};
pub use keys::{DynKeyDeriver, KeyDeriver};
pub use node::{ConfirmationStatus, DynNodeClient, InjectionHandle, NodeClient, TransferRequest};
