//! Journal entries: one signed balance change on one account.

use serde::{Deserialize, Serialize};
use simplebank_common::{AccountId, EntryId, Timestamp};

/// Direction of an entry, derived from the sign of its amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryType {
    /// Money leaving the account (negative amount).
    Debit,
    /// Money arriving in the account (positive amount).
    Credit,
}

/// A single journal entry in the ledger. Never mutated once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Unique entry ID.
    pub id: EntryId,
    /// Account affected.
    pub account_id: AccountId,
    /// Signed amount: negative for a debit, positive for a credit.
    pub amount: i64,
    /// When this entry was created.
    pub created_at: Timestamp,
}

impl Entry {
    /// Get the entry direction.
    pub fn entry_type(&self) -> EntryType {
        if self.amount < 0 {
            EntryType::Debit
        } else {
            EntryType::Credit
        }
    }
}

/// Parameters for inserting an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateEntryParams {
    pub account_id: AccountId,
    pub amount: i64,
}

impl CreateEntryParams {
    /// Debit entry for `amount` (stored negated).
    pub fn debit(account_id: AccountId, amount: i64) -> Self {
        Self {
            account_id,
            amount: -amount,
        }
    }

    /// Credit entry for `amount`.
    pub fn credit(account_id: AccountId, amount: i64) -> Self {
        Self { account_id, amount }
    }
}

/// Page of entries for one account, ordered by id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListEntriesParams {
    pub account_id: AccountId,
    pub limit: i64,
    pub offset: i64,
}

/// Sum of a set of entry amounts. Zero for the two entries of one transfer.
pub fn net_amount<'a>(entries: impl IntoIterator<Item = &'a Entry>) -> i64 {
    entries.into_iter().map(|e| e.amount).sum()
}
