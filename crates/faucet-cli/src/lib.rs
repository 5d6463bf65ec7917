//! Faucet activator binary support
//!
//! Command line arguments, settings and credential loading for the
//! `faucet-activator` binary.

pub mod cli;
pub mod config;
pub mod credentials;

/// Default working directory name under the user's home
pub const DEFAULT_WORK_DIR: &str = ".faucet-activator";
/// Default config file name inside the working directory
pub const CONFIG_FILE_NAME: &str = "config.toml";
/// Default credentials directory name inside the working directory
pub const CREDENTIALS_DIR_NAME: &str = "faucets";
