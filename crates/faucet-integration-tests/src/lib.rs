//! Faucet integration tests
//!
//! Shared setup for the end to end tests under `tests/`.

pub mod init_fake_node;
