//! Transfer records and the engine's request/response types.

use serde::{Deserialize, Serialize};
use simplebank_common::{AccountId, EntryId, Timestamp, TransferId};

use crate::account::Account;
use crate::journal::Entry;

/// An immutable record of one money movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub id: TransferId,
    pub from_account_id: AccountId,
    pub to_account_id: AccountId,
    /// Always positive.
    pub amount: i64,
    pub created_at: Timestamp,
}

/// Parameters for inserting a transfer row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateTransferParams {
    pub from_account_id: AccountId,
    pub to_account_id: AccountId,
    pub amount: i64,
}

/// Page of transfers between two accounts, ordered by id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListTransfersParams {
    pub from_account_id: AccountId,
    pub to_account_id: AccountId,
    pub limit: i64,
    pub offset: i64,
}

/// Input of [`TransferEngine::transfer`](crate::TransferEngine::transfer).
///
/// The caller has already checked that the accounts differ, exist, share a
/// currency, that `amount > 0` and that the source can cover it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferParams {
    pub from_account_id: AccountId,
    pub to_account_id: AccountId,
    pub amount: i64,
}

impl TransferParams {
    pub fn new(from_account_id: AccountId, to_account_id: AccountId, amount: i64) -> Self {
        Self {
            from_account_id,
            to_account_id,
            amount,
        }
    }

    /// The same movement in the opposite direction.
    pub fn reversed(&self) -> Self {
        Self::new(self.to_account_id, self.from_account_id, self.amount)
    }
}

impl From<TransferParams> for CreateTransferParams {
    fn from(params: TransferParams) -> Self {
        Self {
            from_account_id: params.from_account_id,
            to_account_id: params.to_account_id,
            amount: params.amount,
        }
    }
}

/// Everything a committed transfer wrote, with post-commit account snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferResult {
    pub transfer: Transfer,
    pub from_account: Account,
    pub to_account: Account,
    pub from_entry: Entry,
    pub to_entry: Entry,
}

/// Rows removed by the fixture teardown. Balances are left untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteTransferTxParams {
    pub transfer_id: TransferId,
    pub from_entry_id: EntryId,
    pub to_entry_id: EntryId,
}

impl From<&TransferResult> for DeleteTransferTxParams {
    fn from(result: &TransferResult) -> Self {
        Self {
            transfer_id: result.transfer.id,
            from_entry_id: result.from_entry.id,
            to_entry_id: result.to_entry.id,
        }
    }
}
