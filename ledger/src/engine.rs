//! Transfer engine: moves money between two accounts in one atomic scope.
//!
//! The caller validates a transfer before handing it over: distinct
//! accounts, both present, same currency, positive amount, enough funds in
//! the source. The engine does not repeat those checks. It only guarantees
//! that the transfer row, both entries and both balance updates commit
//! together, and that concurrent transfers over the same accounts cannot
//! deadlock on row locks.

use std::sync::Arc;

use tracing::{info, instrument, warn};

use simplebank_common::{Result, TransferStep};

use crate::balance::{BalanceSide, LockPlan};
use crate::journal::CreateEntryParams;
use crate::store::{Querier, Store};
use crate::transfer::{DeleteTransferTxParams, TransferParams, TransferResult};
use crate::tx::run_atomic;

/// Executes transfers against a [`Store`].
///
/// Holds no state besides the store handle; clone it freely and call it from
/// as many tasks as needed.
pub struct TransferEngine<S> {
    store: Arc<S>,
}

impl<S> Clone for TransferEngine<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

impl<S: Store> TransferEngine<S> {
    /// Create a new transfer engine.
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// The underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Move `amount` from one account to the other.
    ///
    /// Not idempotent: every call writes a new transfer. Contention errors
    /// (`LockTimeout`, `SerializationConflict`) are returned to the caller,
    /// who decides whether to retry.
    #[instrument(
        skip(self, params),
        fields(
            from = %params.from_account_id,
            to = %params.to_account_id,
            amount = params.amount,
        )
    )]
    pub async fn transfer(&self, params: TransferParams) -> Result<TransferResult> {
        let result = run_atomic(self.store.as_ref(), move |tx| {
            Box::pin(execute_transfer(tx, params))
        })
        .await;

        match &result {
            Ok(result) => info!(
                transfer_id = %result.transfer.id,
                from_balance = result.from_account.balance,
                to_balance = result.to_account.balance,
                "Transfer committed"
            ),
            Err(e) => warn!(
                error = %e,
                step = ?e.failed_step(),
                retryable = e.is_retryable(),
                "Transfer aborted"
            ),
        }

        result
    }

    /// Delete a transfer and its two entries. Balances are not touched.
    ///
    /// Test fixture teardown only; this is not a compensating transaction.
    #[instrument(skip(self))]
    pub async fn delete_transfer_tx(&self, params: DeleteTransferTxParams) -> Result<()> {
        run_atomic(self.store.as_ref(), move |tx| {
            Box::pin(async move {
                tx.delete_transfer(params.transfer_id).await?;
                tx.delete_entry(params.from_entry_id).await?;
                tx.delete_entry(params.to_entry_id).await?;
                Ok(())
            })
        })
        .await?;

        info!(transfer_id = %params.transfer_id, "Transfer deleted");
        Ok(())
    }
}

/// The transfer steps, run on an open transaction.
async fn execute_transfer<Q>(tx: &mut Q, params: TransferParams) -> Result<TransferResult>
where
    Q: Querier + ?Sized,
{
    let transfer = tx
        .create_transfer(params.into())
        .await
        .map_err(|e| e.at_step(TransferStep::CreateTransfer))?;

    let from_entry = tx
        .create_entry(CreateEntryParams::debit(params.from_account_id, params.amount))
        .await
        .map_err(|e| e.at_step(TransferStep::CreateFromEntry))?;

    let to_entry = tx
        .create_entry(CreateEntryParams::credit(params.to_account_id, params.amount))
        .await
        .map_err(|e| e.at_step(TransferStep::CreateToEntry))?;

    // Lower account id first, whichever side it is on.
    let plan = LockPlan::for_transfer(&params);
    let first = tx
        .add_account_balance(plan.first.params())
        .await
        .map_err(|e| e.at_step(plan.first.step()))?;
    let second = tx
        .add_account_balance(plan.second.params())
        .await
        .map_err(|e| e.at_step(plan.second.step()))?;

    let (from_account, to_account) = match plan.first.side {
        BalanceSide::From => (first, second),
        BalanceSide::To => (second, first),
    };

    Ok(TransferResult {
        transfer,
        from_account,
        to_account,
        from_entry,
        to_entry,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::{Account, CreateAccountParams};
    use crate::journal::net_amount;
    use crate::memory::{MemoryStore, Operation};
    use crate::store::Transaction;
    use simplebank_common::{AccountId, Currency, LedgerError};
    use std::time::Duration;

    struct Fixture {
        engine: TransferEngine<MemoryStore>,
        store: MemoryStore,
        a: Account,
        b: Account,
    }

    async fn fixture(balance_a: i64, balance_b: i64) -> Fixture {
        let store = MemoryStore::new().with_lock_timeout(Duration::from_secs(2));
        let a = store
            .create_account(CreateAccountParams::new("account-a", balance_a, Currency::idr()))
            .await
            .unwrap();
        let b = store
            .create_account(CreateAccountParams::new("account-b", balance_b, Currency::idr()))
            .await
            .unwrap();
        assert!(a.id < b.id);

        Fixture {
            engine: TransferEngine::new(Arc::new(store.clone())),
            store,
            a,
            b,
        }
    }

    fn assert_untouched(f: &Fixture) {
        assert!(f.store.transfers().is_empty());
        assert!(f.store.entries_for(f.a.id).is_empty());
        assert!(f.store.entries_for(f.b.id).is_empty());
        assert_eq!(f.store.account(f.a.id).unwrap().balance, f.a.balance);
        assert_eq!(f.store.account(f.b.id).unwrap().balance, f.b.balance);
    }

    #[tokio::test]
    async fn test_transfer_result() {
        let f = fixture(1000, 500).await;

        let result = f
            .engine
            .transfer(TransferParams::new(f.a.id, f.b.id, 10))
            .await
            .unwrap();

        assert_eq!(result.transfer.from_account_id, f.a.id);
        assert_eq!(result.transfer.to_account_id, f.b.id);
        assert_eq!(result.transfer.amount, 10);

        assert_eq!(result.from_entry.account_id, f.a.id);
        assert_eq!(result.from_entry.amount, -10);
        assert_eq!(result.to_entry.account_id, f.b.id);
        assert_eq!(result.to_entry.amount, 10);

        assert_eq!(result.from_account.id, f.a.id);
        assert_eq!(result.from_account.balance, 990);
        assert_eq!(result.to_account.id, f.b.id);
        assert_eq!(result.to_account.balance, 510);

        let store = f.engine.store();
        assert_eq!(store.get_transfer(result.transfer.id).await.unwrap(), result.transfer);
        assert_eq!(store.get_entry(result.from_entry.id).await.unwrap(), result.from_entry);
        assert_eq!(store.get_entry(result.to_entry.id).await.unwrap(), result.to_entry);
        assert_eq!(store.get_account(f.a.id).await.unwrap(), result.from_account);
        assert_eq!(store.get_account(f.b.id).await.unwrap(), result.to_account);
    }

    #[tokio::test]
    async fn test_reverse_direction_maps_accounts_back() {
        let f = fixture(1000, 500).await;

        let result = f
            .engine
            .transfer(TransferParams::new(f.b.id, f.a.id, 30))
            .await
            .unwrap();

        assert_eq!(result.from_account.id, f.b.id);
        assert_eq!(result.from_account.balance, 470);
        assert_eq!(result.to_account.id, f.a.id);
        assert_eq!(result.to_account.balance, 1030);
        assert_eq!(result.from_entry.amount, -30);
        assert_eq!(result.to_entry.amount, 30);
    }

    #[tokio::test]
    async fn test_balances_locked_in_ascending_id_order() {
        let f = fixture(1000, 500).await;

        f.engine
            .transfer(TransferParams::new(f.a.id, f.b.id, 10))
            .await
            .unwrap();
        f.engine
            .transfer(TransferParams::new(f.b.id, f.a.id, 10))
            .await
            .unwrap();

        assert_eq!(
            f.store.lock_history(),
            vec![vec![f.a.id, f.b.id], vec![f.a.id, f.b.id]]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_one_way_transfers() {
        let f = fixture(1000, 500).await;
        let n = 5;
        let amount = 10;

        let handles: Vec<_> = (0..n)
            .map(|_| {
                let engine = f.engine.clone();
                let params = TransferParams::new(f.a.id, f.b.id, amount);
                tokio::spawn(async move { engine.transfer(params).await })
            })
            .collect();

        let mut from_balances = Vec::new();
        for handle in handles {
            let result = handle.await.unwrap().unwrap();

            // Each snapshot is internally consistent: money left A exactly
            // as it reached B.
            let moved = f.a.balance - result.from_account.balance;
            assert_eq!(result.to_account.balance, f.b.balance + moved);
            assert_eq!(net_amount([&result.from_entry, &result.to_entry]), 0);
            from_balances.push(result.from_account.balance);
        }

        from_balances.sort_unstable();
        assert_eq!(from_balances, vec![950, 960, 970, 980, 990]);

        assert_eq!(f.store.account(f.a.id).unwrap().balance, 950);
        assert_eq!(f.store.account(f.b.id).unwrap().balance, 550);
        assert_eq!(f.store.transfers().len(), n);

        let debits = f.store.entries_for(f.a.id);
        let credits = f.store.entries_for(f.b.id);
        assert_eq!(debits.len(), n);
        assert_eq!(credits.len(), n);
        assert!(debits.iter().all(|e| e.amount == -amount));
        assert!(credits.iter().all(|e| e.amount == amount));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_interleaved_transfers_do_not_deadlock() {
        let f = fixture(1000, 500).await;
        let n = 10;

        let handles: Vec<_> = (0..n)
            .map(|i| {
                let engine = f.engine.clone();
                let params = if i % 2 == 1 {
                    TransferParams::new(f.b.id, f.a.id, 10)
                } else {
                    TransferParams::new(f.a.id, f.b.id, 10)
                };
                tokio::spawn(async move { engine.transfer(params).await })
            })
            .collect();

        let all = futures::future::join_all(handles);
        let results = tokio::time::timeout(Duration::from_secs(10), all)
            .await
            .expect("transfers did not finish");

        for result in results {
            result.unwrap().unwrap();
        }

        assert_eq!(f.store.account(f.a.id).unwrap().balance, 1000);
        assert_eq!(f.store.account(f.b.id).unwrap().balance, 500);
        assert_eq!(f.store.transfers().len(), n);
        assert!(f
            .store
            .lock_history()
            .iter()
            .all(|sequence| sequence == &vec![f.a.id, f.b.id]));
    }

    #[tokio::test]
    async fn test_identical_calls_are_not_deduplicated() {
        let f = fixture(1000, 500).await;
        let params = TransferParams::new(f.a.id, f.b.id, 100);

        let first = f.engine.transfer(params).await.unwrap();
        let second = f.engine.transfer(params).await.unwrap();

        assert_ne!(first.transfer.id, second.transfer.id);
        assert_eq!(second.from_account.balance, 800);
        assert_eq!(second.to_account.balance, 700);
        assert_eq!(f.store.transfers().len(), 2);
    }

    #[tokio::test]
    async fn test_failure_at_any_step_leaves_no_trace() {
        let cases = [
            (Operation::CreateTransfer, 1, TransferStep::CreateTransfer),
            (Operation::CreateEntry, 1, TransferStep::CreateFromEntry),
            (Operation::CreateEntry, 2, TransferStep::CreateToEntry),
            (Operation::AddAccountBalance, 1, TransferStep::AdjustFromBalance),
            (Operation::AddAccountBalance, 2, TransferStep::AdjustToBalance),
        ];

        for (operation, occurrence, step) in cases {
            let f = fixture(1000, 500).await;
            let cause = LedgerError::StorageFailure(format!("{operation:?} failed"));
            f.store.inject_fault(operation, occurrence, cause.clone());

            let err = f
                .engine
                .transfer(TransferParams::new(f.a.id, f.b.id, 10))
                .await
                .unwrap_err();

            assert_eq!(err.failed_step(), Some(step), "{operation:?}");
            assert_eq!(err.root_cause(), &cause);
            assert_untouched(&f);
        }
    }

    #[tokio::test]
    async fn test_reverse_transfer_adjusts_destination_first() {
        let f = fixture(1000, 500).await;
        f.store.inject_fault(
            Operation::AddAccountBalance,
            1,
            LedgerError::LockTimeout("account a".into()),
        );

        let err = f
            .engine
            .transfer(TransferParams::new(f.b.id, f.a.id, 10))
            .await
            .unwrap_err();

        // A has the lower id, and is the destination here.
        assert_eq!(err.failed_step(), Some(TransferStep::AdjustToBalance));
        assert!(err.is_retryable());
        assert_untouched(&f);
    }

    #[tokio::test]
    async fn test_commit_failure_leaves_no_trace() {
        let f = fixture(1000, 500).await;
        let cause = LedgerError::SerializationConflict("could not serialize access".into());
        f.store.inject_fault(Operation::Commit, 1, cause.clone());

        let err = f
            .engine
            .transfer(TransferParams::new(f.a.id, f.b.id, 10))
            .await
            .unwrap_err();

        assert_eq!(err, cause);
        assert_untouched(&f);
    }

    #[tokio::test]
    async fn test_rollback_failure_reports_both_causes() {
        let f = fixture(1000, 500).await;
        f.store.inject_fault(
            Operation::CreateEntry,
            2,
            LedgerError::StorageFailure("entries_account_id_fkey".into()),
        );
        f.store.inject_fault(
            Operation::Rollback,
            1,
            LedgerError::StorageFailure("connection closed".into()),
        );

        let err = f
            .engine
            .transfer(TransferParams::new(f.a.id, f.b.id, 10))
            .await
            .unwrap_err();

        match &err {
            LedgerError::RollbackFailure { source, rollback } => {
                assert_eq!(source.failed_step(), Some(TransferStep::CreateToEntry));
                assert_eq!(
                    **rollback,
                    LedgerError::StorageFailure("connection closed".into())
                );
            }
            other => panic!("expected rollback failure, got {other:?}"),
        }
        assert_untouched(&f);
    }

    #[tokio::test]
    async fn test_cancelled_transfer_rolls_back() {
        let f = fixture(1000, 500).await;

        // Another transaction holds B's row lock.
        let mut holder = f.store.begin().await.unwrap();
        holder
            .add_account_balance(crate::account::AddAccountBalanceParams {
                id: f.b.id,
                amount: 0,
            })
            .await
            .unwrap();

        // The transfer locks A, then waits on B until the caller gives up.
        let cancelled = tokio::time::timeout(
            Duration::from_millis(100),
            f.engine.transfer(TransferParams::new(f.a.id, f.b.id, 10)),
        )
        .await;
        assert!(cancelled.is_err());

        holder.rollback().await.unwrap();
        assert_untouched(&f);

        // A's row lock was released with the dropped transaction.
        let result = tokio::time::timeout(
            Duration::from_secs(1),
            f.engine.transfer(TransferParams::new(f.a.id, f.b.id, 10)),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(result.from_account.balance, 990);
    }

    #[tokio::test]
    async fn test_unknown_account_aborts_transfer() {
        let f = fixture(1000, 500).await;
        let missing = AccountId::new(9_999);

        let err = f
            .engine
            .transfer(TransferParams::new(f.a.id, missing, 10))
            .await
            .unwrap_err();

        assert_eq!(err.failed_step(), Some(TransferStep::CreateTransfer));
        assert_untouched(&f);
    }

    #[tokio::test]
    async fn test_delete_transfer_tx_keeps_balances() {
        let f = fixture(1000, 500).await;
        let kept = f
            .engine
            .transfer(TransferParams::new(f.a.id, f.b.id, 10))
            .await
            .unwrap();
        let removed = f
            .engine
            .transfer(TransferParams::new(f.a.id, f.b.id, 20))
            .await
            .unwrap();

        f.engine
            .delete_transfer_tx(DeleteTransferTxParams::from(&removed))
            .await
            .unwrap();

        assert_eq!(f.store.transfers(), vec![kept.transfer.clone()]);
        assert_eq!(f.store.entries_for(f.a.id), vec![kept.from_entry]);
        assert_eq!(f.store.entries_for(f.b.id), vec![kept.to_entry]);
        assert!(matches!(
            f.store.get_transfer(removed.transfer.id).await,
            Err(LedgerError::NotFound(_))
        ));

        // Teardown only: balances still include the deleted transfer.
        assert_eq!(f.store.account(f.a.id).unwrap().balance, 970);
        assert_eq!(f.store.account(f.b.id).unwrap().balance, 530);
    }

    #[tokio::test]
    async fn test_engine_does_not_check_sufficient_funds() {
        let f = fixture(5, 0).await;

        let result = f
            .engine
            .transfer(TransferParams::new(f.a.id, f.b.id, 10))
            .await
            .unwrap();

        assert_eq!(result.from_account.balance, -5);
        assert_eq!(result.to_account.balance, 10);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(32))]

            #[test]
            fn transfers_conserve_total_balance(
                moves in prop::collection::vec((0usize..3, 0usize..3, 1i64..500), 1..20)
            ) {
                tokio_test::block_on(async {
                    let store = MemoryStore::new();
                    let mut ids = Vec::new();
                    for balance in [1_000, 2_000, 3_000] {
                        let account = store
                            .create_account(CreateAccountParams::new("owner", balance, Currency::usd()))
                            .await
                            .unwrap();
                        ids.push(account.id);
                    }
                    let engine = TransferEngine::new(Arc::new(store.clone()));

                    let mut expected = 0;
                    for (from, to, amount) in moves.iter().copied() {
                        if from == to {
                            continue;
                        }
                        let result = engine
                            .transfer(TransferParams::new(ids[from], ids[to], amount))
                            .await
                            .unwrap();
                        assert_eq!(net_amount([&result.from_entry, &result.to_entry]), 0);
                        expected += 1;
                    }

                    assert_eq!(store.total_balance(), 6_000);
                    assert_eq!(store.transfers().len(), expected);
                    for sequence in store.lock_history() {
                        assert!(sequence.windows(2).all(|w| w[0] < w[1]));
                    }
                });
            }
        }
    }
}
