//! Simulation controller.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use simplebank_common::AccountId;
use simplebank_ledger::{ListEntriesParams, Store, TransferEngine, TransferParams};

use crate::accounts::AccountSet;
use crate::metrics::SimulationMetrics;

const ENTRY_PAGE: i64 = 500;

/// Drives a transfer plan through the engine with a fixed number of workers.
pub struct SimulationController<S> {
    engine: TransferEngine<S>,
    /// Number of concurrent workers.
    workers: usize,
    /// Simulation metrics.
    metrics: Arc<RwLock<SimulationMetrics>>,
}

/// Spendable balance of each simulated account.
///
/// The engine does not check that a source can cover a transfer, so the
/// simulator does it here. Debits are reserved before a transfer is submitted
/// and credits only count once committed, so a balance never goes below zero
/// however the workers interleave.
#[derive(Debug, Default)]
struct Funds {
    available: HashMap<AccountId, i64>,
}

impl Funds {
    fn new(accounts: &AccountSet) -> Self {
        Self {
            available: accounts.accounts.iter().map(|a| (a.id, a.balance)).collect(),
        }
    }

    /// Take `amount` from the source, if it can cover it.
    fn reserve(&mut self, params: &TransferParams) -> bool {
        if params.amount <= 0 || params.from_account_id == params.to_account_id {
            return false;
        }
        match self.available.get_mut(&params.from_account_id) {
            Some(balance) if *balance >= params.amount => {
                *balance -= params.amount;
                true
            }
            _ => false,
        }
    }

    fn settle(&mut self, params: &TransferParams) {
        if let Some(balance) = self.available.get_mut(&params.to_account_id) {
            *balance += params.amount;
        }
    }

    fn release(&mut self, params: &TransferParams) {
        if let Some(balance) = self.available.get_mut(&params.from_account_id) {
            *balance += params.amount;
        }
    }
}

/// End-of-run ledger check.
#[derive(Debug, Clone, Serialize)]
pub struct Verification {
    pub opening_total: i64,
    pub closing_total: i64,
    /// Accounts whose balance moved by something other than the sum of
    /// their entries.
    pub inconsistent_accounts: Vec<AccountId>,
}

impl Verification {
    pub fn is_ok(&self) -> bool {
        self.opening_total == self.closing_total && self.inconsistent_accounts.is_empty()
    }
}

impl<S: Store + 'static> SimulationController<S> {
    /// Create a new simulation controller.
    pub fn new(store: Arc<S>, workers: usize) -> Self {
        Self {
            engine: TransferEngine::new(store),
            workers: workers.max(1),
            metrics: Arc::new(RwLock::new(SimulationMetrics::new())),
        }
    }

    /// Run every transfer of `plan` the source account can cover, and return
    /// the wall time taken. Uncovered transfers are counted as rejected.
    pub async fn run(
        &self,
        accounts: &AccountSet,
        plan: Vec<TransferParams>,
    ) -> anyhow::Result<Duration> {
        info!(
            transfers = plan.len(),
            workers = self.workers,
            "Running transfer plan"
        );

        let mut queues = vec![Vec::new(); self.workers];
        for (i, params) in plan.into_iter().enumerate() {
            queues[i % self.workers].push(params);
        }

        let funds = Arc::new(Mutex::new(Funds::new(accounts)));
        let start = Instant::now();
        let handles: Vec<_> = queues
            .into_iter()
            .enumerate()
            .map(|(worker, queue)| {
                let engine = self.engine.clone();
                let metrics = self.metrics.clone();
                let funds = funds.clone();
                tokio::spawn(async move {
                    for params in queue {
                        if !funds.lock().await.reserve(&params) {
                            debug!(
                                worker,
                                from = %params.from_account_id,
                                amount = params.amount,
                                "Source cannot cover transfer, skipping"
                            );
                            metrics.write().await.record_rejected();
                            continue;
                        }

                        let started = Instant::now();
                        match engine.transfer(params).await {
                            Ok(_) => {
                                funds.lock().await.settle(&params);
                                metrics.write().await.record_success(started.elapsed());
                            }
                            Err(e) => {
                                funds.lock().await.release(&params);
                                warn!(
                                    worker,
                                    error = %e,
                                    code = e.error_code(),
                                    "Transfer failed"
                                );
                                metrics.write().await.record_failure(&e);
                            }
                        }
                    }
                })
            })
            .collect();

        for result in futures::future::join_all(handles).await {
            result?;
        }

        Ok(start.elapsed())
    }

    /// Check that money was neither created nor destroyed, and that every
    /// balance change is backed by entries.
    pub async fn verify(&self, accounts: &AccountSet) -> anyhow::Result<Verification> {
        let store = self.engine.store();
        let mut closing_total = 0;
        let mut inconsistent_accounts = Vec::new();

        for opening in &accounts.accounts {
            let current = store.get_account(opening.id).await?;

            let mut entry_sum = 0;
            let mut offset = 0;
            loop {
                let page = store
                    .list_entries(ListEntriesParams {
                        account_id: opening.id,
                        limit: ENTRY_PAGE,
                        offset,
                    })
                    .await?;
                entry_sum += page.iter().map(|e| e.amount).sum::<i64>();
                if (page.len() as i64) < ENTRY_PAGE {
                    break;
                }
                offset += ENTRY_PAGE;
            }

            if current.balance - opening.balance != entry_sum {
                warn!(
                    account_id = %opening.id,
                    opening = opening.balance,
                    closing = current.balance,
                    entry_sum,
                    "Balance change not backed by entries"
                );
                inconsistent_accounts.push(opening.id);
            }
            closing_total += current.balance;
        }

        Ok(Verification {
            opening_total: accounts.opening_total(),
            closing_total,
            inconsistent_accounts,
        })
    }

    /// Get simulation metrics.
    pub async fn metrics(&self) -> SimulationMetrics {
        self.metrics.read().await.clone()
    }
}
