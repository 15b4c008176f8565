//! PostgreSQL store.
//!
//! Balance adjustments are a single `UPDATE ... RETURNING`, which takes the
//! row lock and applies the delta in one statement. Every transaction sets
//! `lock_timeout` so a blocked adjustment fails with `LockTimeout` instead of
//! waiting forever.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row};
use tracing::{debug, info};

use simplebank_common::{AccountId, Currency, EntryId, LedgerError, Result, TransferId};

use crate::account::{Account, AddAccountBalanceParams, CreateAccountParams};
use crate::config::LedgerConfig;
use crate::journal::{CreateEntryParams, Entry, ListEntriesParams};
use crate::store::{Querier, Store, Transaction};
use crate::transfer::{CreateTransferParams, ListTransfersParams, Transfer};

const ACCOUNT_COLUMNS: &str = "id, owner, balance, currency, created_at";
const ENTRY_COLUMNS: &str = "id, account_id, amount, created_at";
const TRANSFER_COLUMNS: &str = "id, from_account_id, to_account_id, amount, created_at";

/// PostgreSQL-backed ledger store.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    lock_timeout: String,
}

impl PgStore {
    /// Connect a pool as described by `config`.
    pub async fn connect(config: &LedgerConfig) -> Result<Self> {
        config.validate()?;

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect(&config.database_url)
            .await
            .map_err(map_sqlx_error)?;

        info!(
            max_connections = config.max_connections,
            "PostgreSQL connection pool established"
        );

        Ok(Self::from_pool(pool, config))
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: PgPool, config: &LedgerConfig) -> Self {
        Self {
            pool,
            lock_timeout: lock_timeout_setting(config.lock_timeout),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the bundled schema migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| LedgerError::StorageFailure(format!("migration failed: {e}")))
    }

    /// Check database health.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }
}

#[async_trait]
impl Store for PgStore {
    type Tx = PgTx;

    async fn begin(&self) -> Result<PgTx> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        // SET does not take bind parameters.
        sqlx::query(&format!("SET LOCAL lock_timeout = '{}'", self.lock_timeout))
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        Ok(PgTx { tx })
    }
}

/// An open PostgreSQL transaction. Dropping it uncommitted rolls it back.
pub struct PgTx {
    tx: sqlx::Transaction<'static, Postgres>,
}

#[async_trait]
impl Querier for PgTx {
    async fn create_account(&mut self, params: CreateAccountParams) -> Result<Account> {
        let sql = format!(
            "INSERT INTO accounts (owner, balance, currency) VALUES ($1, $2, $3) \
             RETURNING {ACCOUNT_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(&params.owner)
            .bind(params.balance)
            .bind(params.currency.code())
            .fetch_one(&mut *self.tx)
            .await
            .map_err(map_sqlx_error)?;
        account_from_row(&row)
    }

    async fn get_account(&mut self, id: AccountId) -> Result<Account> {
        let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.get())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(map_sqlx_error)?
            .ok_or_else(|| LedgerError::NotFound(format!("account {id}")))?;
        account_from_row(&row)
    }

    async fn add_account_balance(&mut self, params: AddAccountBalanceParams) -> Result<Account> {
        let sql = format!(
            "UPDATE accounts SET balance = balance + $1 WHERE id = $2 \
             RETURNING {ACCOUNT_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(params.amount)
            .bind(params.id.get())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(map_sqlx_error)?
            .ok_or_else(|| LedgerError::NotFound(format!("account {}", params.id)))?;
        account_from_row(&row)
    }

    async fn create_entry(&mut self, params: CreateEntryParams) -> Result<Entry> {
        let sql = format!(
            "INSERT INTO entries (account_id, amount) VALUES ($1, $2) RETURNING {ENTRY_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(params.account_id.get())
            .bind(params.amount)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(map_sqlx_error)?;
        entry_from_row(&row)
    }

    async fn get_entry(&mut self, id: EntryId) -> Result<Entry> {
        let sql = format!("SELECT {ENTRY_COLUMNS} FROM entries WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.get())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(map_sqlx_error)?
            .ok_or_else(|| LedgerError::NotFound(format!("entry {id}")))?;
        entry_from_row(&row)
    }

    async fn list_entries(&mut self, params: ListEntriesParams) -> Result<Vec<Entry>> {
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM entries WHERE account_id = $1 \
             ORDER BY id LIMIT $2 OFFSET $3"
        );
        let rows = sqlx::query(&sql)
            .bind(params.account_id.get())
            .bind(params.limit)
            .bind(params.offset)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(map_sqlx_error)?;
        rows.iter().map(entry_from_row).collect()
    }

    async fn delete_entry(&mut self, id: EntryId) -> Result<()> {
        sqlx::query("DELETE FROM entries WHERE id = $1")
            .bind(id.get())
            .execute(&mut *self.tx)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn create_transfer(&mut self, params: CreateTransferParams) -> Result<Transfer> {
        let sql = format!(
            "INSERT INTO transfers (from_account_id, to_account_id, amount) \
             VALUES ($1, $2, $3) RETURNING {TRANSFER_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(params.from_account_id.get())
            .bind(params.to_account_id.get())
            .bind(params.amount)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(map_sqlx_error)?;
        transfer_from_row(&row)
    }

    async fn get_transfer(&mut self, id: TransferId) -> Result<Transfer> {
        let sql = format!("SELECT {TRANSFER_COLUMNS} FROM transfers WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.get())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(map_sqlx_error)?
            .ok_or_else(|| LedgerError::NotFound(format!("transfer {id}")))?;
        transfer_from_row(&row)
    }

    async fn list_transfers(&mut self, params: ListTransfersParams) -> Result<Vec<Transfer>> {
        let sql = format!(
            "SELECT {TRANSFER_COLUMNS} FROM transfers \
             WHERE from_account_id = $1 AND to_account_id = $2 \
             ORDER BY id LIMIT $3 OFFSET $4"
        );
        let rows = sqlx::query(&sql)
            .bind(params.from_account_id.get())
            .bind(params.to_account_id.get())
            .bind(params.limit)
            .bind(params.offset)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(map_sqlx_error)?;
        rows.iter().map(transfer_from_row).collect()
    }

    async fn delete_transfer(&mut self, id: TransferId) -> Result<()> {
        sqlx::query("DELETE FROM transfers WHERE id = $1")
            .bind(id.get())
            .execute(&mut *self.tx)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }
}

#[async_trait]
impl Transaction for PgTx {
    async fn commit(self) -> Result<()> {
        self.tx.commit().await.map_err(map_sqlx_error)
    }

    async fn rollback(self) -> Result<()> {
        self.tx.rollback().await.map_err(map_sqlx_error)?;
        debug!("PostgreSQL transaction rolled back");
        Ok(())
    }
}

fn account_from_row(row: &PgRow) -> Result<Account> {
    Ok(Account {
        id: AccountId::new(row.try_get("id").map_err(map_sqlx_error)?),
        owner: row.try_get("owner").map_err(map_sqlx_error)?,
        balance: row.try_get("balance").map_err(map_sqlx_error)?,
        currency: Currency::from(row.try_get::<String, _>("currency").map_err(map_sqlx_error)?),
        created_at: row.try_get("created_at").map_err(map_sqlx_error)?,
    })
}

fn entry_from_row(row: &PgRow) -> Result<Entry> {
    Ok(Entry {
        id: EntryId::new(row.try_get("id").map_err(map_sqlx_error)?),
        account_id: AccountId::new(row.try_get("account_id").map_err(map_sqlx_error)?),
        amount: row.try_get("amount").map_err(map_sqlx_error)?,
        created_at: row.try_get("created_at").map_err(map_sqlx_error)?,
    })
}

fn transfer_from_row(row: &PgRow) -> Result<Transfer> {
    Ok(Transfer {
        id: TransferId::new(row.try_get("id").map_err(map_sqlx_error)?),
        from_account_id: AccountId::new(row.try_get("from_account_id").map_err(map_sqlx_error)?),
        to_account_id: AccountId::new(row.try_get("to_account_id").map_err(map_sqlx_error)?),
        amount: row.try_get("amount").map_err(map_sqlx_error)?,
        created_at: row.try_get("created_at").map_err(map_sqlx_error)?,
    })
}

/// `lock_timeout` value for `timeout`, in whole milliseconds rounded up.
/// Zero disables the timeout, so only a zero duration may map to `0ms`.
fn lock_timeout_setting(timeout: Duration) -> String {
    format!("{}ms", timeout.as_micros().div_ceil(1_000))
}

/// Map a driver error onto the ledger taxonomy.
pub(crate) fn map_sqlx_error(err: sqlx::Error) -> LedgerError {
    match &err {
        sqlx::Error::RowNotFound => LedgerError::NotFound(err.to_string()),
        sqlx::Error::Database(db) => match db.code().as_deref() {
            // lock_not_available
            Some("55P03") => LedgerError::LockTimeout(db.message().to_string()),
            // serialization_failure, deadlock_detected
            Some("40001") | Some("40P01") => {
                LedgerError::SerializationConflict(db.message().to_string())
            }
            _ => LedgerError::StorageFailure(err.to_string()),
        },
        _ => LedgerError::StorageFailure(err.to_string()),
    }
}
