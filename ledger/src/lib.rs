//! Simplebank Ledger
//!
//! Double-entry account ledger with atomic, deadlock-free fund transfers.

pub mod account;
pub mod balance;
pub mod config;
pub mod engine;
pub mod journal;
pub mod memory;
pub mod postgres;
pub mod store;
pub mod transfer;
pub mod tx;

pub use account::{Account, AddAccountBalanceParams, CreateAccountParams};
pub use balance::{BalanceAdjustment, BalanceSide, LockPlan};
pub use config::LedgerConfig;
pub use engine::TransferEngine;
pub use journal::{CreateEntryParams, Entry, EntryType, ListEntriesParams};
pub use memory::{MemoryStore, MemoryTx};
pub use postgres::{PgStore, PgTx};
pub use store::{Querier, Store, Transaction};
pub use transfer::{
    CreateTransferParams, DeleteTransferTxParams, ListTransfersParams, Transfer, TransferParams,
    TransferResult,
};
pub use tx::run_atomic;
