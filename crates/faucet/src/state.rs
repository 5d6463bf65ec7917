//! Pipeline state accumulator
//!
//! [`State`] maps a stage name to the result that stage produced. It is
//! immutable: [`State::merge`] returns a new state and leaves every other slot
//! untouched, so concurrent identity runs never share mutation.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use faucet_common::{Amount, InjectionHandle, Wallet};
use serde::Serialize;

use crate::Error;

/// Name of a pipeline stage, and of the state slot it owns
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct StageName(Cow<'static, str>);

impl StageName {
    /// Seeded wallet
    pub const WALLET: StageName = StageName(Cow::Borrowed("wallet"));
    /// Account activation
    pub const ACTIVATE_WALLET: StageName = StageName(Cow::Borrowed("activateWallet"));
    /// Confirmation of the latest injection
    pub const CONFIRM_OPERATION: StageName = StageName(Cow::Borrowed("confirmOperation"));
    /// Balance snapshot
    pub const WALLET_BALANCE: StageName = StageName(Cow::Borrowed("walletBalance"));
    /// Outgoing transfer
    pub const TRANSACTION: StageName = StageName(Cow::Borrowed("transaction"));
    /// The identity run itself, used when a failure has no stage
    pub const RUN: StageName = StageName(Cow::Borrowed("run"));

    /// Create a stage name from a static str, usable in consts
    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    /// Create a stage name for a custom stage
    pub fn new<S>(name: S) -> Self
    where
        S: Into<Cow<'static, str>>,
    {
        Self(name.into())
    }

    /// Name as str
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Proof that an injected operation reached the required depth
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Confirmation {
    /// Confirmed operation
    pub handle: InjectionHandle,
    /// Depth observed
    pub depth: u32,
    /// Queries it took
    pub attempts: u32,
}

/// Result written by a stage
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutput {
    /// Seeded wallet
    Wallet(Arc<Wallet>),
    /// Handle of an injected operation
    Injection(InjectionHandle),
    /// Confirmation of an injected operation
    Confirmation(Confirmation),
    /// Balance snapshot
    Balance(Amount),
    /// Free-form result of a custom stage
    Value(serde_json::Value),
}

/// Accumulated results of one identity run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct State {
    slots: BTreeMap<StageName, StageOutput>,
}

impl State {
    /// Empty state
    pub fn new() -> Self {
        Self::default()
    }

    /// Return a new state with `output` stored under `stage`.
    ///
    /// Only the slot of `stage` is replaced.
    pub fn merge(&self, stage: StageName, output: StageOutput) -> Self {
        let mut slots = self.slots.clone();
        slots.insert(stage, output);
        Self { slots }
    }

    /// Return a new state holding only the listed slots
    pub fn retain(&self, keep: &[StageName]) -> Self {
        let slots = self
            .slots
            .iter()
            .filter(|(name, _)| keep.contains(name))
            .map(|(name, output)| (name.clone(), output.clone()))
            .collect();
        Self { slots }
    }

    /// Result stored under `stage`
    pub fn get(&self, stage: &StageName) -> Option<&StageOutput> {
        self.slots.get(stage)
    }

    /// Whether `stage` has written a result
    pub fn contains(&self, stage: &StageName) -> bool {
        self.slots.contains_key(stage)
    }

    /// Names of all written slots, in name order
    pub fn fields(&self) -> impl Iterator<Item = &StageName> {
        self.slots.keys()
    }

    /// Number of written slots
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether nothing has been written
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn require(&self, reader: &StageName, field: &StageName) -> Result<&StageOutput, Error> {
        self.slots.get(field).ok_or_else(|| Error::MissingField {
            stage: reader.clone(),
            missing: field.clone(),
        })
    }

    /// Seeded wallet, read on behalf of `reader`
    pub fn wallet(&self, reader: &StageName) -> Result<&Arc<Wallet>, Error> {
        match self.require(reader, &StageName::WALLET)? {
            StageOutput::Wallet(wallet) => Ok(wallet),
            _ => Err(Error::UnexpectedField(StageName::WALLET)),
        }
    }

    /// Injection handle written by `field`
    pub fn injection(&self, reader: &StageName, field: &StageName) -> Result<&InjectionHandle, Error> {
        match self.require(reader, field)? {
            StageOutput::Injection(handle) => Ok(handle),
            _ => Err(Error::UnexpectedField(field.clone())),
        }
    }

    /// Balance written by `field`
    pub fn balance(&self, reader: &StageName, field: &StageName) -> Result<Amount, Error> {
        match self.require(reader, field)? {
            StageOutput::Balance(balance) => Ok(*balance),
            _ => Err(Error::UnexpectedField(field.clone())),
        }
    }

    /// Confirmation written by `field`
    pub fn confirmation(&self, reader: &StageName, field: &StageName) -> Result<&Confirmation, Error> {
        match self.require(reader, field)? {
            StageOutput::Confirmation(confirmation) => Ok(confirmation),
            _ => Err(Error::UnexpectedField(field.clone())),
        }
    }
}
