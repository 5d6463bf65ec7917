//! State types for an activation run.
//!
//! Each state is a distinct type holding the data relevant to that step of
//! the run. Only valid operations are available at each step.

use faucet_common::Identity;

use crate::state::State;

/// Initial state - identity assigned, nothing derived yet.
///
/// Only `seed()` is available.
pub struct Initial {
    /// Identity to run
    pub identity: Identity,
}

/// Seeded state - keys derived and the wallet merged into the state.
///
/// Only `execute()` is available.
pub struct Seeded {
    /// Declared key hash of the identity
    pub public_key_hash: String,
    /// State holding the `wallet` field
    pub state: State,
}
