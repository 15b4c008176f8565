//! In-process store with real row locks.
//!
//! Behaves like the PostgreSQL store where the transfer engine can observe
//! the difference:
//!
//! - writes made through a [`MemoryTx`] are private to it until commit;
//! - `add_account_balance` takes a per-account row lock that is held until
//!   the transaction ends, and waits at most `lock_timeout` for it;
//! - ids come from sequences that are never rolled back;
//! - entries and transfers must reference existing accounts.
//!
//! Faults can be injected per operation, and every scope's row-lock
//! acquisition order is recorded, so tests can check both atomicity and the
//! lock ordering rule.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, warn};

use simplebank_common::{AccountId, EntryId, LedgerError, Result, TransferId};

use crate::account::{Account, AddAccountBalanceParams, CreateAccountParams};
use crate::config::LedgerConfig;
use crate::journal::{CreateEntryParams, Entry, ListEntriesParams};
use crate::store::{Querier, Store, Transaction};
use crate::transfer::{CreateTransferParams, ListTransfersParams, Transfer};

/// Store operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Begin,
    CreateAccount,
    GetAccount,
    AddAccountBalance,
    CreateEntry,
    GetEntry,
    ListEntries,
    DeleteEntry,
    CreateTransfer,
    GetTransfer,
    ListTransfers,
    DeleteTransfer,
    Commit,
    Rollback,
}

#[derive(Debug)]
struct Fault {
    operation: Operation,
    occurrence: usize,
    error: LedgerError,
}

#[derive(Debug, Default, Clone)]
struct Tables {
    accounts: BTreeMap<AccountId, Account>,
    entries: BTreeMap<EntryId, Entry>,
    transfers: BTreeMap<TransferId, Transfer>,
}

#[derive(Debug, Default)]
struct Sequences {
    account: AtomicI64,
    entry: AtomicI64,
    transfer: AtomicI64,
}

impl Sequences {
    fn next(counter: &AtomicI64) -> i64 {
        counter.fetch_add(1, Ordering::SeqCst) + 1
    }
}

#[derive(Default)]
struct Shared {
    tables: RwLock<Tables>,
    row_locks: DashMap<AccountId, Arc<tokio::sync::Mutex<()>>>,
    sequences: Sequences,
    faults: Mutex<Vec<Fault>>,
    lock_history: Mutex<Vec<Vec<AccountId>>>,
}

/// In-memory ledger store. Clones share the same data.
#[derive(Clone)]
pub struct MemoryStore {
    shared: Arc<Shared>,
    lock_timeout: Duration,
}

impl MemoryStore {
    /// Default wait for a row lock before failing with `LockTimeout`.
    pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared::default()),
            lock_timeout: Self::DEFAULT_LOCK_TIMEOUT,
        }
    }

    /// Create a store using the lock timeout from `config`.
    pub fn from_config(config: &LedgerConfig) -> Result<Self> {
        if config.lock_timeout.is_zero() {
            return Err(LedgerError::ConfigurationError(
                "memory store needs a non-zero lock timeout".to_string(),
            ));
        }
        Ok(Self::new().with_lock_timeout(config.lock_timeout))
    }

    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    /// Make the `occurrence`-th call (1-based) of `operation` within a single
    /// transaction fail with `error`. Each fault fires once.
    pub fn inject_fault(&self, operation: Operation, occurrence: usize, error: LedgerError) {
        self.shared.faults.lock().push(Fault {
            operation,
            occurrence,
            error,
        });
    }

    /// Drop faults that have not fired yet.
    pub fn clear_faults(&self) {
        self.shared.faults.lock().clear();
    }

    /// Committed state of an account.
    pub fn account(&self, id: AccountId) -> Option<Account> {
        self.shared.tables.read().accounts.get(&id).cloned()
    }

    /// Committed entries of an account, ordered by id.
    pub fn entries_for(&self, account_id: AccountId) -> Vec<Entry> {
        self.shared
            .tables
            .read()
            .entries
            .values()
            .filter(|e| e.account_id == account_id)
            .cloned()
            .collect()
    }

    /// All committed transfers, ordered by id.
    pub fn transfers(&self) -> Vec<Transfer> {
        self.shared.tables.read().transfers.values().cloned().collect()
    }

    /// Sum of all committed balances.
    pub fn total_balance(&self) -> i64 {
        self.shared
            .tables
            .read()
            .accounts
            .values()
            .map(|a| a.balance)
            .sum()
    }

    /// Row-lock acquisition order of every finished transaction that took
    /// at least one lock, in completion order.
    pub fn lock_history(&self) -> Vec<Vec<AccountId>> {
        self.shared.lock_history.lock().clone()
    }

    fn take_fault(&self, operation: Operation, occurrence: usize) -> Option<LedgerError> {
        take_fault(&self.shared, operation, occurrence)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Negative LIMIT or OFFSET is an error in PostgreSQL, so it is one here too.
fn page_bounds(limit: i64, offset: i64) -> Result<(usize, usize)> {
    match (usize::try_from(limit), usize::try_from(offset)) {
        (Ok(limit), Ok(offset)) => Ok((limit, offset)),
        _ => Err(LedgerError::StorageFailure(format!(
            "invalid page: limit {limit}, offset {offset} must not be negative"
        ))),
    }
}

fn take_fault(shared: &Shared, operation: Operation, occurrence: usize) -> Option<LedgerError> {
    let mut faults = shared.faults.lock();
    let idx = faults
        .iter()
        .position(|f| f.operation == operation && f.occurrence == occurrence)?;
    Some(faults.remove(idx).error)
}

#[async_trait]
impl Store for MemoryStore {
    type Tx = MemoryTx;

    async fn begin(&self) -> Result<MemoryTx> {
        if let Some(err) = self.take_fault(Operation::Begin, 1) {
            return Err(err);
        }
        Ok(MemoryTx {
            shared: self.shared.clone(),
            lock_timeout: self.lock_timeout,
            writes: WriteSet::default(),
            row_guards: HashMap::new(),
            lock_sequence: Vec::new(),
            calls: HashMap::new(),
            finished: false,
        })
    }
}

/// Rows written by one transaction, not yet visible to anyone else.
#[derive(Debug, Default)]
struct WriteSet {
    accounts: BTreeMap<AccountId, Account>,
    entries: BTreeMap<EntryId, Entry>,
    transfers: BTreeMap<TransferId, Transfer>,
    deleted_entries: BTreeSet<EntryId>,
    deleted_transfers: BTreeSet<TransferId>,
}

impl WriteSet {
    fn is_empty(&self) -> bool {
        self.accounts.is_empty()
            && self.entries.is_empty()
            && self.transfers.is_empty()
            && self.deleted_entries.is_empty()
            && self.deleted_transfers.is_empty()
    }

    fn apply(self, tables: &mut Tables) {
        tables.accounts.extend(self.accounts);
        tables.entries.extend(self.entries);
        tables.transfers.extend(self.transfers);
        for id in self.deleted_entries {
            tables.entries.remove(&id);
        }
        for id in self.deleted_transfers {
            tables.transfers.remove(&id);
        }
    }
}

/// An open transaction on a [`MemoryStore`].
///
/// Dropping it uncommitted discards its writes and releases its row locks.
pub struct MemoryTx {
    shared: Arc<Shared>,
    lock_timeout: Duration,
    writes: WriteSet,
    row_guards: HashMap<AccountId, OwnedMutexGuard<()>>,
    lock_sequence: Vec<AccountId>,
    calls: HashMap<Operation, usize>,
    finished: bool,
}

impl MemoryTx {
    /// Count the call and fire a matching fault, if any.
    fn check(&mut self, operation: Operation) -> Result<()> {
        let count = self.calls.entry(operation).or_insert(0);
        *count += 1;
        match take_fault(&self.shared, operation, *count) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn visible_account(&self, id: AccountId) -> Option<Account> {
        self.writes
            .accounts
            .get(&id)
            .cloned()
            .or_else(|| self.shared.tables.read().accounts.get(&id).cloned())
    }

    fn visible_entries(&self) -> BTreeMap<EntryId, Entry> {
        let mut entries = self.shared.tables.read().entries.clone();
        entries.extend(self.writes.entries.clone());
        entries.retain(|id, _| !self.writes.deleted_entries.contains(id));
        entries
    }

    fn visible_transfers(&self) -> BTreeMap<TransferId, Transfer> {
        let mut transfers = self.shared.tables.read().transfers.clone();
        transfers.extend(self.writes.transfers.clone());
        transfers.retain(|id, _| !self.writes.deleted_transfers.contains(id));
        transfers
    }

    fn require_account(&self, id: AccountId) -> Result<()> {
        if self.visible_account(id).is_some() {
            Ok(())
        } else {
            Err(LedgerError::StorageFailure(format!(
                "foreign key violation: account {id} does not exist"
            )))
        }
    }

    /// Take the row lock of `id` unless this transaction already holds it.
    async fn lock_row(&mut self, id: AccountId) -> Result<()> {
        if self.row_guards.contains_key(&id) {
            return Ok(());
        }

        let row = self
            .shared
            .row_locks
            .entry(id)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .value()
            .clone();

        let guard = tokio::time::timeout(self.lock_timeout, row.lock_owned())
            .await
            .map_err(|_| {
                warn!(account_id = %id, timeout = ?self.lock_timeout, "Row lock wait timed out");
                LedgerError::LockTimeout(format!(
                    "account {id}: no row lock after {:?}",
                    self.lock_timeout
                ))
            })?;

        self.row_guards.insert(id, guard);
        self.lock_sequence.push(id);
        Ok(())
    }
}

impl Drop for MemoryTx {
    fn drop(&mut self) {
        if !self.finished && !self.writes.is_empty() {
            debug!("Transaction dropped without commit, discarding writes");
        }
        if !self.lock_sequence.is_empty() {
            self.shared
                .lock_history
                .lock()
                .push(std::mem::take(&mut self.lock_sequence));
        }
        // Row guards are released after this, once the writes of a commit are
        // already published.
    }
}

#[async_trait]
impl Querier for MemoryTx {
    async fn create_account(&mut self, params: CreateAccountParams) -> Result<Account> {
        self.check(Operation::CreateAccount)?;
        let account = Account {
            id: AccountId::new(Sequences::next(&self.shared.sequences.account)),
            owner: params.owner,
            balance: params.balance,
            currency: params.currency,
            created_at: simplebank_common::now(),
        };
        self.writes.accounts.insert(account.id, account.clone());
        Ok(account)
    }

    async fn get_account(&mut self, id: AccountId) -> Result<Account> {
        self.check(Operation::GetAccount)?;
        self.visible_account(id)
            .ok_or_else(|| LedgerError::NotFound(format!("account {id}")))
    }

    async fn add_account_balance(&mut self, params: AddAccountBalanceParams) -> Result<Account> {
        self.check(Operation::AddAccountBalance)?;
        self.lock_row(params.id).await?;

        // Read after the lock is held so the latest committed balance is used.
        let mut account = self
            .visible_account(params.id)
            .ok_or_else(|| LedgerError::NotFound(format!("account {}", params.id)))?;
        account.balance = account.balance.checked_add(params.amount).ok_or_else(|| {
            LedgerError::StorageFailure(format!("balance of account {} out of range", params.id))
        })?;

        self.writes.accounts.insert(account.id, account.clone());
        Ok(account)
    }

    async fn create_entry(&mut self, params: CreateEntryParams) -> Result<Entry> {
        self.check(Operation::CreateEntry)?;
        self.require_account(params.account_id)?;
        let entry = Entry {
            id: EntryId::new(Sequences::next(&self.shared.sequences.entry)),
            account_id: params.account_id,
            amount: params.amount,
            created_at: simplebank_common::now(),
        };
        self.writes.entries.insert(entry.id, entry.clone());
        Ok(entry)
    }

    async fn get_entry(&mut self, id: EntryId) -> Result<Entry> {
        self.check(Operation::GetEntry)?;
        self.visible_entries()
            .remove(&id)
            .ok_or_else(|| LedgerError::NotFound(format!("entry {id}")))
    }

    async fn list_entries(&mut self, params: ListEntriesParams) -> Result<Vec<Entry>> {
        self.check(Operation::ListEntries)?;
        let (limit, offset) = page_bounds(params.limit, params.offset)?;
        Ok(self
            .visible_entries()
            .into_values()
            .filter(|e| e.account_id == params.account_id)
            .skip(offset)
            .take(limit)
            .collect())
    }

    async fn delete_entry(&mut self, id: EntryId) -> Result<()> {
        self.check(Operation::DeleteEntry)?;
        self.writes.entries.remove(&id);
        self.writes.deleted_entries.insert(id);
        Ok(())
    }

    async fn create_transfer(&mut self, params: CreateTransferParams) -> Result<Transfer> {
        self.check(Operation::CreateTransfer)?;
        self.require_account(params.from_account_id)?;
        self.require_account(params.to_account_id)?;
        let transfer = Transfer {
            id: TransferId::new(Sequences::next(&self.shared.sequences.transfer)),
            from_account_id: params.from_account_id,
            to_account_id: params.to_account_id,
            amount: params.amount,
            created_at: simplebank_common::now(),
        };
        self.writes.transfers.insert(transfer.id, transfer.clone());
        Ok(transfer)
    }

    async fn get_transfer(&mut self, id: TransferId) -> Result<Transfer> {
        self.check(Operation::GetTransfer)?;
        self.visible_transfers()
            .remove(&id)
            .ok_or_else(|| LedgerError::NotFound(format!("transfer {id}")))
    }

    async fn list_transfers(&mut self, params: ListTransfersParams) -> Result<Vec<Transfer>> {
        self.check(Operation::ListTransfers)?;
        let (limit, offset) = page_bounds(params.limit, params.offset)?;
        Ok(self
            .visible_transfers()
            .into_values()
            .filter(|t| {
                t.from_account_id == params.from_account_id
                    && t.to_account_id == params.to_account_id
            })
            .skip(offset)
            .take(limit)
            .collect())
    }

    async fn delete_transfer(&mut self, id: TransferId) -> Result<()> {
        self.check(Operation::DeleteTransfer)?;
        self.writes.transfers.remove(&id);
        self.writes.deleted_transfers.insert(id);
        Ok(())
    }
}

#[async_trait]
impl Transaction for MemoryTx {
    async fn commit(mut self) -> Result<()> {
        self.finished = true;
        self.check(Operation::Commit)?;

        let writes = std::mem::take(&mut self.writes);
        writes.apply(&mut self.shared.tables.write());
        Ok(())
    }

    async fn rollback(mut self) -> Result<()> {
        self.finished = true;
        self.writes = WriteSet::default();
        self.check(Operation::Rollback)
    }
}
