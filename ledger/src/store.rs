//! The persistence contract the transfer engine consumes.
//!
//! A [`Store`] hands out [`Transaction`] handles. Every read and write of a
//! unit of work goes through the handle's [`Querier`] methods, so nothing it
//! does is visible to other handles until [`Transaction::commit`].
//!
//! Dropping a handle without committing must roll it back. The transaction
//! runner relies on that to clean up after cancelled futures and panics.

use async_trait::async_trait;
use simplebank_common::{AccountId, EntryId, Result, TransferId};

use crate::account::{Account, AddAccountBalanceParams, CreateAccountParams};
use crate::journal::{CreateEntryParams, Entry, ListEntriesParams};
use crate::transfer::{CreateTransferParams, ListTransfersParams, Transfer};

/// Single-row operations, scoped to one transaction handle.
#[async_trait]
pub trait Querier: Send {
    async fn create_account(&mut self, params: CreateAccountParams) -> Result<Account>;

    /// Fails with `NotFound` when the account does not exist.
    async fn get_account(&mut self, id: AccountId) -> Result<Account>;

    /// Atomically apply `balance = balance + amount` and return the updated
    /// row. Takes the account's row lock, held until the transaction ends.
    async fn add_account_balance(&mut self, params: AddAccountBalanceParams) -> Result<Account>;

    async fn create_entry(&mut self, params: CreateEntryParams) -> Result<Entry>;

    async fn get_entry(&mut self, id: EntryId) -> Result<Entry>;

    async fn list_entries(&mut self, params: ListEntriesParams) -> Result<Vec<Entry>>;

    async fn delete_entry(&mut self, id: EntryId) -> Result<()>;

    async fn create_transfer(&mut self, params: CreateTransferParams) -> Result<Transfer>;

    async fn get_transfer(&mut self, id: TransferId) -> Result<Transfer>;

    async fn list_transfers(&mut self, params: ListTransfersParams) -> Result<Vec<Transfer>>;

    async fn delete_transfer(&mut self, id: TransferId) -> Result<()>;
}

/// An open atomic scope.
#[async_trait]
pub trait Transaction: Querier + Sized {
    /// Publish every write made through this handle.
    async fn commit(self) -> Result<()>;

    /// Discard every write made through this handle and release its locks.
    async fn rollback(self) -> Result<()>;
}

/// A backing store able to open atomic scopes.
///
/// The provided methods run a single statement in its own short
/// transaction; they exist for callers outside the engine (account API,
/// fixtures) and never take part in a transfer.
#[async_trait]
pub trait Store: Send + Sync {
    type Tx: Transaction + 'static;

    /// Open a new atomic scope.
    async fn begin(&self) -> Result<Self::Tx>;

    async fn create_account(&self, params: CreateAccountParams) -> Result<Account> {
        let mut tx = self.begin().await?;
        let account = tx.create_account(params).await?;
        tx.commit().await?;
        Ok(account)
    }

    async fn get_account(&self, id: AccountId) -> Result<Account> {
        let mut tx = self.begin().await?;
        let account = tx.get_account(id).await?;
        tx.commit().await?;
        Ok(account)
    }

    async fn get_entry(&self, id: EntryId) -> Result<Entry> {
        let mut tx = self.begin().await?;
        let entry = tx.get_entry(id).await?;
        tx.commit().await?;
        Ok(entry)
    }

    async fn list_entries(&self, params: ListEntriesParams) -> Result<Vec<Entry>> {
        let mut tx = self.begin().await?;
        let entries = tx.list_entries(params).await?;
        tx.commit().await?;
        Ok(entries)
    }

    async fn get_transfer(&self, id: TransferId) -> Result<Transfer> {
        let mut tx = self.begin().await?;
        let transfer = tx.get_transfer(id).await?;
        tx.commit().await?;
        Ok(transfer)
    }

    async fn list_transfers(&self, params: ListTransfersParams) -> Result<Vec<Transfer>> {
        let mut tx = self.begin().await?;
        let transfers = tx.list_transfers(params).await?;
        tx.commit().await?;
        Ok(transfers)
    }
}
