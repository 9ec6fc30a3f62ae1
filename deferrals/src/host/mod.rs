//! Host system contract
//!
//! The registry does not own the system it defers work for. It needs three
//! things from it: a started/not-started status behind the host's own lock,
//! a way to run work inside a transactional restart, and a way to restart
//! the host's shared worker pool.

pub mod factory;

pub use factory::SharedFactory;

use crate::context::Context;
use crate::error::Result;
use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio::sync::Mutex;

/// Work run by [`Host::start_with_transaction`] with a transaction-scoped context
pub type TransactionWork<'a> = Box<dyn FnOnce(Context) -> BoxFuture<'a, Result<()>> + Send + 'a>;

/// Started/not-started status, guarded by the host's activity lock
#[derive(Debug, Default)]
pub struct Activity {
    started: bool,
}

impl Activity {
    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn mark_started(&mut self) {
        self.started = true;
    }

    pub fn mark_stopped(&mut self) {
        self.started = false;
    }
}

#[async_trait]
pub trait Host: Send + Sync + 'static {
    /// Lock serializing checks of the started status
    ///
    /// Distinct from any registry lock. Must not be held while calling
    /// [`Host::start_with_transaction`].
    fn activity(&self) -> &Mutex<Activity>;

    async fn is_started(&self) -> bool {
        self.activity().lock().await.is_started()
    }

    /// Run `work` inside a transaction and restart the shared factory
    ///
    /// An error from `work` aborts the transaction and is returned.
    async fn start_with_transaction<'a>(
        &'a self,
        ctx: &'a Context,
        work: TransactionWork<'a>,
    ) -> Result<()>;

    /// Restart the shared worker pool's consumer loop
    async fn start_workers(&self, ctx: &Context, workers: usize) -> Result<()>;
}
