//! Errors surfaced by node clients and key derivers

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Structured error reported by a remote node.
///
/// `id` is the stable identifier used to classify the failure; every backing
/// client must surface it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteError {
    /// Stable error identifier
    pub id: String,
    /// Error kind as reported by the node (e.g. `permanent`, `temporary`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Human readable message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl RemoteError {
    /// Create a remote error with only an identifier
    pub fn new<S>(id: S) -> Self
    where
        S: Into<String>,
    {
        Self {
            id: id.into(),
            kind: None,
            message: None,
        }
    }

    /// Attach a message
    pub fn with_message<S>(mut self, message: S) -> Self
    where
        S: Into<String>,
    {
        self.message = Some(message.into());
        self
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(message) => write!(f, "{} ({})", self.id, message),
            None => write!(f, "{}", self.id),
        }
    }
}

/// Node client error
#[derive(Debug, Error)]
pub enum NodeError {
    /// The node answered with a structured error
    #[error("Node rejected request: {0}")]
    Remote(RemoteError),
    /// The node could not be reached or answered garbage
    #[error("Node transport error: {0}")]
    Transport(String),
    /// Operation handle is not known to the node
    #[error("Unknown operation `{0}`")]
    UnknownOperation(String),
    /// Serde error
    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

impl NodeError {
    /// Identifier of the remote error, if the node reported one
    pub fn remote_id(&self) -> Option<&str> {
        match self {
            NodeError::Remote(err) => Some(err.id.as_str()),
            _ => None,
        }
    }
}

impl From<RemoteError> for NodeError {
    fn from(err: RemoteError) -> Self {
        Self::Remote(err)
    }
}

/// Key derivation error
#[derive(Debug, Error)]
pub enum KeyError {
    /// Derivation attempted before the readiness barrier completed
    #[error("Key deriver is not ready")]
    NotReady,
    /// Recovery phrase could not be parsed
    #[error("Invalid recovery phrase: {0}")]
    InvalidPhrase(String),
    /// Derived material is not a valid key
    #[error("Key derivation failed: {0}")]
    Derivation(String),
}
