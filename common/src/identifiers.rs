//! Identifier types for ledger rows.
//!
//! Every identifier is an opaque, store-assigned 64-bit integer. Account ids
//! are additionally totally ordered: the transfer engine relies on that order
//! to decide which row lock to take first.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of an account row.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct AccountId(i64);

impl AccountId {
    /// Wrap a raw store id.
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the raw id.
    pub const fn get(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for AccountId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Identifier of an entry row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(i64);

impl EntryId {
    /// Wrap a raw store id.
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the raw id.
    pub const fn get(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for EntryId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Identifier of a transfer row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransferId(i64);

impl TransferId {
    /// Wrap a raw store id.
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the raw id.
    pub const fn get(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for TransferId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}
