//! Simulated account holders.

use simplebank_common::{AccountId, Currency};
use simplebank_ledger::{Account, CreateAccountParams, Store};
use tracing::info;

const OWNERS: [&str; 10] = [
    "alice", "bob", "carol", "dave", "erin", "frank", "grace", "heidi", "ivan", "judy",
];

/// Owner name of the `i`-th simulated account.
pub fn owner_name(i: usize) -> String {
    match OWNERS.get(i) {
        Some(name) => (*name).to_string(),
        None => format!("holder-{}", i + 1),
    }
}

/// Accounts opened for one simulation run.
#[derive(Debug, Clone)]
pub struct AccountSet {
    pub accounts: Vec<Account>,
}

impl AccountSet {
    /// Open `count` accounts, each funded with `initial_balance`.
    pub async fn open<S: Store>(
        store: &S,
        count: usize,
        initial_balance: i64,
        currency: &Currency,
    ) -> anyhow::Result<Self> {
        let mut accounts = Vec::with_capacity(count);
        for i in 0..count {
            let account = store
                .create_account(CreateAccountParams::new(
                    owner_name(i),
                    initial_balance,
                    currency.clone(),
                ))
                .await?;
            info!(
                account_id = %account.id,
                owner = %account.owner,
                balance = account.balance,
                "Opened account"
            );
            accounts.push(account);
        }
        Ok(Self { accounts })
    }

    pub fn ids(&self) -> Vec<AccountId> {
        self.accounts.iter().map(|a| a.id).collect()
    }

    /// Sum of the opening balances.
    pub fn opening_total(&self) -> i64 {
        self.accounts.iter().map(|a| a.balance).sum()
    }
}
