//! Units of work.
//!
//! A `UnitOfWork` wraps one transaction handle and moves through
//! Active -> Completed exactly once, either by `save_changes` (commit) or by
//! disposal (rollback). Completion is reported back through the callbacks
//! the context supplied; the unit never touches the registry itself.
//!
//! A driver may also end the transaction underneath the unit, e.g. when an
//! enclosing transaction on the same connection rolls back. The unit then
//! reads as Completed and deregisters the next time it is used or dropped.

use crate::db::driver::TransactionHandle;
use crate::error::{DbError, DbResult};
use tracing::{info, warn};

/// Unique unit-of-work identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UnitOfWorkId(String);

impl UnitOfWorkId {
    /// Generate a fresh identifier.
    pub fn generate() -> Self {
        Self(format!("uow_{}", uuid::Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UnitOfWorkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Callback invoked once when a unit of work completes.
pub type CompletionCallback = Box<dyn FnOnce(&UnitOfWorkId) + Send + Sync>;

/// Lifecycle state of a unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitOfWorkState {
    Active,
    Completed,
}

pub struct UnitOfWork<T: TransactionHandle> {
    id: UnitOfWorkId,
    transaction: T,
    state: UnitOfWorkState,
    on_commit: Option<CompletionCallback>,
    on_dispose: Option<CompletionCallback>,
}

impl<T: TransactionHandle> UnitOfWork<T> {
    /// Wrap an open transaction.
    pub fn new(
        id: UnitOfWorkId,
        transaction: T,
        on_commit: CompletionCallback,
        on_dispose: CompletionCallback,
    ) -> Self {
        Self {
            id,
            transaction,
            state: UnitOfWorkState::Active,
            on_commit: Some(on_commit),
            on_dispose: Some(on_dispose),
        }
    }

    pub fn id(&self) -> &UnitOfWorkId {
        &self.id
    }

    /// The transaction this unit of work owns.
    pub fn transaction(&self) -> &T {
        &self.transaction
    }

    pub fn state(&self) -> UnitOfWorkState {
        if self.state == UnitOfWorkState::Active && !self.transaction.is_active() {
            UnitOfWorkState::Completed
        } else {
            self.state
        }
    }

    pub fn is_active(&self) -> bool {
        self.state() == UnitOfWorkState::Active
    }

    /// Commit the transaction and complete the unit of work.
    ///
    /// Fails with `InvalidState` once completed. If the commit itself fails
    /// the unit stays active, so disposing it still rolls back.
    pub async fn save_changes(&mut self) -> DbResult<()> {
        if self.state == UnitOfWorkState::Completed {
            return Err(DbError::invalid_state(format!(
                "unit of work {} is already completed",
                self.id
            )));
        }
        if !self.transaction.is_active() {
            self.complete(false);
            return Err(DbError::invalid_state(format!(
                "unit of work {} was ended by an enclosing rollback",
                self.id
            )));
        }

        self.transaction.commit().await?;
        self.complete(true);

        info!(
            unit_of_work_id = %self.id,
            transaction_id = %self.transaction.id(),
            "Unit of work committed"
        );
        Ok(())
    }

    /// Roll back (if still active) and complete the unit of work.
    ///
    /// No-op once completed.
    pub async fn dispose(mut self) -> DbResult<()> {
        if self.state == UnitOfWorkState::Completed {
            return Ok(());
        }
        if !self.transaction.is_active() {
            self.complete(false);
            return Ok(());
        }

        // Leave the registry even when the rollback fails
        let result = self.transaction.rollback().await;
        self.complete(false);

        match &result {
            Ok(()) => info!(
                unit_of_work_id = %self.id,
                transaction_id = %self.transaction.id(),
                "Unit of work rolled back"
            ),
            Err(e) => warn!(
                unit_of_work_id = %self.id,
                transaction_id = %self.transaction.id(),
                error = %e,
                "Unit of work rollback failed"
            ),
        }
        result
    }

    fn complete(&mut self, committed: bool) {
        self.state = UnitOfWorkState::Completed;
        let on_commit = self.on_commit.take();
        let on_dispose = self.on_dispose.take();
        let callback = if committed { on_commit } else { on_dispose };
        if let Some(callback) = callback {
            callback(&self.id);
        }
    }
}

impl<T: TransactionHandle> Drop for UnitOfWork<T> {
    fn drop(&mut self) {
        if self.state == UnitOfWorkState::Completed {
            return;
        }
        self.complete(false);
        if !self.transaction.is_active() {
            return;
        }

        // Queued before this returns, so the next statement on the
        // connection cannot land inside the abandoned transaction
        self.transaction.abandon();

        let transaction = self.transaction.clone();
        let id = self.id.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!(
                    unit_of_work_id = %id,
                    transaction_id = %transaction.id(),
                    "Unit of work dropped while active, rolling back"
                );
                handle.spawn(async move {
                    if let Err(e) = transaction.rollback().await {
                        warn!(unit_of_work_id = %id, error = %e, "Implicit rollback failed");
                    }
                });
            }
            Err(_) => warn!(
                unit_of_work_id = %id,
                transaction_id = %transaction.id(),
                "Unit of work dropped outside a runtime; rollback deferred to the next statement"
            ),
        }
    }
}

impl<T: TransactionHandle> std::fmt::Debug for UnitOfWork<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("id", &self.id)
            .field("transaction_id", &self.transaction.id())
            .field("state", &self.state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Clone, Default)]
    struct CountingTx {
        commits: Arc<AtomicUsize>,
        rollbacks: Arc<AtomicUsize>,
        abandons: Arc<AtomicUsize>,
        ended: Arc<AtomicBool>,
        fail_commit: bool,
    }

    #[async_trait]
    impl TransactionHandle for CountingTx {
        fn id(&self) -> &str {
            "tx_test"
        }

        fn is_active(&self) -> bool {
            !self.ended.load(Ordering::SeqCst)
        }

        fn abandon(&self) {
            self.abandons.fetch_add(1, Ordering::SeqCst);
        }

        async fn commit(&self) -> DbResult<()> {
            if self.fail_commit {
                return Err(DbError::transaction("commit failed", "tx_test"));
            }
            self.commits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn rollback(&self) -> DbResult<()> {
            self.rollbacks.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Callbacks {
        committed: Arc<AtomicUsize>,
        disposed: Arc<AtomicUsize>,
    }

    fn unit(tx: CountingTx) -> (UnitOfWork<CountingTx>, Callbacks) {
        let committed = Arc::new(AtomicUsize::new(0));
        let disposed = Arc::new(AtomicUsize::new(0));
        let c = committed.clone();
        let d = disposed.clone();
        let uow = UnitOfWork::new(
            UnitOfWorkId::generate(),
            tx,
            Box::new(move |_: &UnitOfWorkId| {
                c.fetch_add(1, Ordering::SeqCst);
            }),
            Box::new(move |_: &UnitOfWorkId| {
                d.fetch_add(1, Ordering::SeqCst);
            }),
        );
        (
            uow,
            Callbacks {
                committed,
                disposed,
            },
        )
    }

    #[test]
    fn test_unit_of_work_id_format() {
        let id = UnitOfWorkId::generate();
        assert!(id.as_str().starts_with("uow_"));
        assert_eq!(id.as_str().len(), 4 + 32);
    }

    #[tokio::test]
    async fn test_save_changes_commits_once() {
        let tx = CountingTx::default();
        let (mut uow, callbacks) = unit(tx.clone());

        uow.save_changes().await.unwrap();
        assert_eq!(uow.state(), UnitOfWorkState::Completed);
        assert_eq!(tx.commits.load(Ordering::SeqCst), 1);
        assert_eq!(callbacks.committed.load(Ordering::SeqCst), 1);

        let err = uow.save_changes().await.unwrap_err();
        assert!(matches!(err, DbError::InvalidState { .. }));
        assert_eq!(tx.commits.load(Ordering::SeqCst), 1);

        // Disposing a committed unit does not roll back
        uow.dispose().await.unwrap();
        assert_eq!(tx.rollbacks.load(Ordering::SeqCst), 0);
        assert_eq!(callbacks.disposed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_dispose_rolls_back() {
        let tx = CountingTx::default();
        let (uow, callbacks) = unit(tx.clone());

        uow.dispose().await.unwrap();
        assert_eq!(tx.rollbacks.load(Ordering::SeqCst), 1);
        assert_eq!(callbacks.disposed.load(Ordering::SeqCst), 1);
        assert_eq!(callbacks.committed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failed_commit_stays_active() {
        let tx = CountingTx {
            fail_commit: true,
            ..Default::default()
        };
        let (mut uow, callbacks) = unit(tx.clone());

        assert!(uow.save_changes().await.is_err());
        assert!(uow.is_active());
        assert_eq!(callbacks.committed.load(Ordering::SeqCst), 0);

        uow.dispose().await.unwrap();
        assert_eq!(tx.rollbacks.load(Ordering::SeqCst), 1);
        assert_eq!(callbacks.disposed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_drop_while_active_deregisters_and_rolls_back() {
        let tx = CountingTx::default();
        let (uow, callbacks) = unit(tx.clone());

        drop(uow);
        assert_eq!(callbacks.disposed.load(Ordering::SeqCst), 1);
        assert_eq!(tx.abandons.load(Ordering::SeqCst), 1);

        // Let the spawned rollback run
        tokio::task::yield_now().await;
        for _ in 0..10 {
            if tx.rollbacks.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(tx.rollbacks.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_transaction_ended_by_driver_reads_completed() {
        let tx = CountingTx::default();
        let (mut uow, callbacks) = unit(tx.clone());

        tx.ended.store(true, Ordering::SeqCst);
        assert_eq!(uow.state(), UnitOfWorkState::Completed);

        let err = uow.save_changes().await.unwrap_err();
        assert!(matches!(err, DbError::InvalidState { .. }));
        assert_eq!(tx.commits.load(Ordering::SeqCst), 0);
        assert_eq!(callbacks.disposed.load(Ordering::SeqCst), 1);

        drop(uow);
        assert_eq!(callbacks.disposed.load(Ordering::SeqCst), 1);
        assert_eq!(tx.abandons.load(Ordering::SeqCst), 0);
        assert_eq!(tx.rollbacks.load(Ordering::SeqCst), 0);
    }
}
