//! Transaction runner: run a unit of work atomically.

use futures::future::BoxFuture;
use tracing::{debug, error};

use simplebank_common::{LedgerError, Result};

use crate::store::{Store, Transaction};

/// Run `work` inside a fresh atomic scope of `store`.
///
/// Commits when `work` succeeds and returns a commit failure unchanged. When
/// `work` fails the scope is rolled back and the original error returned; if
/// the rollback fails as well, both errors come back as
/// [`LedgerError::RollbackFailure`].
///
/// If the returned future is dropped before it completes, or `work` panics,
/// the scope handle is dropped uncommitted and the store rolls it back.
///
/// ```ignore
/// let account = run_atomic(&store, move |tx| {
///     Box::pin(async move { tx.add_account_balance(params).await })
/// })
/// .await?;
/// ```
pub async fn run_atomic<S, T, F>(store: &S, work: F) -> Result<T>
where
    S: Store + ?Sized,
    T: Send,
    F: for<'c> FnOnce(&'c mut S::Tx) -> BoxFuture<'c, Result<T>> + Send,
{
    let mut tx = store.begin().await?;

    match work(&mut tx).await {
        Ok(value) => {
            tx.commit().await?;
            debug!("Transaction committed");
            Ok(value)
        }
        Err(err) => match tx.rollback().await {
            Ok(()) => {
                debug!(error = %err, "Transaction rolled back");
                Err(err)
            }
            Err(rollback_err) => {
                error!(
                    error = %err,
                    rollback_error = %rollback_err,
                    "Rollback failed after transaction error"
                );
                Err(LedgerError::RollbackFailure {
                    source: Box::new(err),
                    rollback: Box::new(rollback_err),
                })
            }
        },
    }
}
