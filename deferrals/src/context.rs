//! Execution context handed to deferred registrations
//!
//! A [`Context`] carries the cancellation signal of whoever started the work
//! and, when the host runs the work inside a transactional restart, the
//! [`Transaction`] that scopes it. Registrations that wire handlers into the
//! host should stage them on the transaction when one is present so the host
//! can discard them on rollback.

use crate::error::{Error, Result};
use futures::future::BoxFuture;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Deferred effect applied when a transaction commits
pub type CommitHook = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

static NEXT_TRANSACTION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Clone, Default)]
pub struct Context {
    cancel: CancellationToken,
    transaction: Option<Transaction>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Child context: cancelled with its parent, cancellable on its own
    pub fn child(&self) -> Self {
        Self {
            cancel: self.cancel.child_token(),
            transaction: self.transaction.clone(),
        }
    }

    /// Same cancellation scope, bound to `transaction`
    pub fn with_transaction(&self, transaction: Transaction) -> Self {
        Self {
            cancel: self.cancel.clone(),
            transaction: Some(transaction),
        }
    }

    pub fn transaction(&self) -> Option<&Transaction> {
        self.transaction.as_ref()
    }

    pub fn in_transaction(&self) -> bool {
        self.transaction.is_some()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once cancellation is requested
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("cancelled", &self.is_cancelled())
            .field("transaction", &self.transaction.as_ref().map(Transaction::id))
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Open,
    Committed,
    RolledBack,
}

/// Unit of work opened by a host for a transactional restart
///
/// Effects are staged with [`Transaction::on_commit`] and applied in staging
/// order by [`Transaction::commit`]; [`Transaction::rollback`] drops them.
#[derive(Clone)]
pub struct Transaction {
    inner: Arc<TransactionInner>,
}

struct TransactionInner {
    id: u64,
    staged: Mutex<Staged>,
}

struct Staged {
    state: TransactionState,
    hooks: Vec<CommitHook>,
}

impl Transaction {
    pub fn begin() -> Self {
        let id = NEXT_TRANSACTION_ID.fetch_add(1, Ordering::Relaxed);
        Self {
            inner: Arc::new(TransactionInner {
                id,
                staged: Mutex::new(Staged {
                    state: TransactionState::Open,
                    hooks: Vec::new(),
                }),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub async fn state(&self) -> TransactionState {
        self.inner.staged.lock().await.state
    }

    /// Number of effects waiting for commit
    pub async fn staged(&self) -> usize {
        self.inner.staged.lock().await.hooks.len()
    }

    /// Stage an effect; fails once the transaction is finished
    pub async fn on_commit(&self, hook: CommitHook) -> Result<()> {
        let mut staged = self.inner.staged.lock().await;
        if staged.state != TransactionState::Open {
            return Err(Error::transaction(format!(
                "transaction {} is already {:?}",
                self.inner.id, staged.state
            )));
        }
        staged.hooks.push(hook);
        Ok(())
    }

    /// Apply staged effects in order, returning how many ran
    pub async fn commit(&self) -> Result<usize> {
        let hooks = {
            let mut staged = self.inner.staged.lock().await;
            if staged.state != TransactionState::Open {
                return Err(Error::transaction(format!(
                    "cannot commit transaction {}: already {:?}",
                    self.inner.id, staged.state
                )));
            }
            staged.state = TransactionState::Committed;
            std::mem::take(&mut staged.hooks)
        };

        let applied = hooks.len();
        for hook in hooks {
            hook().await;
        }
        Ok(applied)
    }

    /// Discard staged effects, returning how many were dropped
    pub async fn rollback(&self) -> usize {
        let mut staged = self.inner.staged.lock().await;
        if staged.state != TransactionState::Open {
            return 0;
        }
        staged.state = TransactionState::RolledBack;
        let discarded = staged.hooks.len();
        staged.hooks.clear();
        discarded
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.inner.id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::sync::atomic::AtomicUsize;

    fn counting_hook(counter: &Arc<AtomicUsize>) -> CommitHook {
        let counter = counter.clone();
        Box::new(move || {
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
            .boxed()
        })
    }

    #[tokio::test]
    async fn test_commit_applies_staged_hooks() {
        let applied = Arc::new(AtomicUsize::new(0));
        let tx = Transaction::begin();

        tx.on_commit(counting_hook(&applied)).await.unwrap();
        tx.on_commit(counting_hook(&applied)).await.unwrap();
        assert_eq!(tx.staged().await, 2);
        assert_eq!(applied.load(Ordering::SeqCst), 0);

        assert_eq!(tx.commit().await.unwrap(), 2);
        assert_eq!(applied.load(Ordering::SeqCst), 2);
        assert_eq!(tx.state().await, TransactionState::Committed);
    }

    #[tokio::test]
    async fn test_rollback_discards_staged_hooks() {
        let applied = Arc::new(AtomicUsize::new(0));
        let tx = Transaction::begin();
        tx.on_commit(counting_hook(&applied)).await.unwrap();

        assert_eq!(tx.rollback().await, 1);
        assert_eq!(tx.state().await, TransactionState::RolledBack);
        assert!(tx.commit().await.is_err());
        assert!(tx.on_commit(counting_hook(&applied)).await.is_err());
        assert_eq!(applied.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_child_context_follows_parent_cancellation() {
        let parent = Context::new();
        let child = parent.child();
        assert!(!child.is_cancelled());

        parent.cancel();
        assert!(child.is_cancelled());
        child.cancelled().await;
    }

    #[test]
    fn test_transaction_scope() {
        let ctx = Context::new();
        assert!(!ctx.in_transaction());

        let tx = Transaction::begin();
        let scoped = ctx.with_transaction(tx.clone());
        assert_eq!(scoped.transaction().map(Transaction::id), Some(tx.id()));

        // Same cancellation scope as the original.
        ctx.cancel();
        assert!(scoped.is_cancelled());
    }
}
