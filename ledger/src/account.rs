//! Account definitions for ledger.

use serde::{Deserialize, Serialize};
use simplebank_common::{AccountId, Currency, Timestamp};

/// A ledger account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Unique account identifier.
    pub id: AccountId,
    /// Owning user.
    pub owner: String,
    /// Current balance in the currency's smallest unit.
    pub balance: i64,
    /// Account currency.
    pub currency: Currency,
    /// When the account was created.
    pub created_at: Timestamp,
}

/// Parameters for inserting an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateAccountParams {
    pub owner: String,
    pub balance: i64,
    pub currency: Currency,
}

impl CreateAccountParams {
    pub fn new(owner: impl Into<String>, balance: i64, currency: Currency) -> Self {
        Self {
            owner: owner.into(),
            balance,
            currency,
        }
    }
}

/// Parameters for the atomic `balance = balance + amount` adjustment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddAccountBalanceParams {
    /// Account to adjust.
    pub id: AccountId,
    /// Signed delta; negative for a debit.
    pub amount: i64,
}
