//! Reference host: a shared controller factory over a [`WorkerPool`]

use crate::config::DeferralConfig;
use crate::context::{Context, Transaction};
use crate::error::{Error, Result};
use crate::workers::{job_handler, WorkerPool};
use async_trait::async_trait;
use futures::FutureExt;
use serde_json::Value;
use std::future::Future;
use tokio::sync::Mutex;

use super::{Activity, Host, TransactionWork};

pub struct SharedFactory {
    activity: Mutex<Activity>,
    lifetime: Mutex<Option<Context>>,
    pool: WorkerPool,
    worker_count: usize,
}

impl SharedFactory {
    pub fn new(config: &DeferralConfig) -> Self {
        Self {
            activity: Mutex::new(Activity::default()),
            lifetime: Mutex::new(None),
            pool: WorkerPool::new(),
            worker_count: config.worker_count,
        }
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Scope the workers run under, present while the host is started
    async fn lifetime(&self) -> Option<Context> {
        if !self.is_started().await {
            return None;
        }
        self.lifetime.lock().await.clone()
    }

    /// Mark the host started and bring up its worker pool
    ///
    /// Workers run under a scope owned by the host until
    /// [`SharedFactory::stop`]. Restarts reuse that scope, so cancelling a
    /// caller's context never tears down a started host.
    pub async fn start(&self, ctx: &Context) -> Result<()> {
        let mut activity = self.activity.lock().await;
        if activity.is_started() {
            return Ok(());
        }
        if ctx.is_cancelled() {
            return Err(Error::worker_pool("start requested with a cancelled context"));
        }

        let lifetime = Context::new();
        self.pool.start(&lifetime, self.worker_count).await?;
        *self.lifetime.lock().await = Some(lifetime);
        activity.mark_started();
        log::info!(
            "[shared-factory] started with {} workers",
            self.worker_count
        );
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        let mut activity = self.activity.lock().await;
        if let Some(lifetime) = self.lifetime.lock().await.take() {
            lifetime.cancel();
        }
        self.pool.shutdown().await?;
        activity.mark_stopped();
        log::info!("[shared-factory] stopped");
        Ok(())
    }

    /// Wire a job handler into the pool
    ///
    /// Inside a transaction the handler is staged and installed on commit;
    /// otherwise it is installed at once.
    pub async fn register_handler<F, Fut>(
        &self,
        ctx: &Context,
        kind: impl Into<String>,
        handler: F,
    ) -> Result<()>
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let kind = kind.into();
        let handler = job_handler(handler);

        match ctx.transaction() {
            Some(tx) => {
                log::debug!(
                    "[shared-factory] stage handler '{}' in transaction {}",
                    kind,
                    tx.id()
                );
                let pool = self.pool.clone();
                tx.on_commit(Box::new(move || {
                    async move { pool.install(kind, handler).await }.boxed()
                }))
                .await
            }
            None => {
                self.pool.install(kind, handler).await;
                Ok(())
            }
        }
    }
}

#[async_trait]
impl Host for SharedFactory {
    fn activity(&self) -> &Mutex<Activity> {
        &self.activity
    }

    async fn start_with_transaction<'a>(
        &'a self,
        ctx: &'a Context,
        work: TransactionWork<'a>,
    ) -> Result<()> {
        let tx = Transaction::begin();
        log::debug!("[shared-factory] transaction {} opened", tx.id());

        if let Err(e) = work(ctx.with_transaction(tx.clone())).await {
            let discarded = tx.rollback().await;
            log::debug!(
                "[shared-factory] transaction {} rolled back, {} staged effects discarded",
                tx.id(),
                discarded
            );
            return Err(e.with_context(format!("transaction {} rolled back", tx.id())));
        }

        let applied = tx.commit().await?;
        log::debug!(
            "[shared-factory] transaction {} committed, {} staged effects applied",
            tx.id(),
            applied
        );

        if let Some(lifetime) = self.lifetime().await {
            self.pool
                .start(&lifetime, self.worker_count)
                .await
                .map_err(|e| e.with_context("restarting shared factory after commit"))?;
        }
        Ok(())
    }

    async fn start_workers(&self, _ctx: &Context, workers: usize) -> Result<()> {
        match self.lifetime().await {
            Some(lifetime) => self.pool.start(&lifetime, workers).await,
            None => Err(Error::worker_pool(
                "refusing to restart workers of a host that has not started",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn factory() -> SharedFactory {
        SharedFactory::new(&DeferralConfig::default().with_worker_count(2))
    }

    #[tokio::test]
    async fn test_register_outside_transaction_installs_at_once() {
        let host = factory();
        host.register_handler(&Context::new(), "direct", |_| async { Ok(()) })
            .await
            .unwrap();
        assert_eq!(host.pool().handlers().await, vec!["direct".to_string()]);
    }

    #[tokio::test]
    async fn test_failed_transaction_discards_staged_handlers() {
        let host = factory();
        let ctx = Context::new();

        let result = host
            .start_with_transaction(
                &ctx,
                Box::new(|tx_ctx| {
                    async move {
                        host_stage(&tx_ctx).await;
                        Err::<(), _>(Error::registration("second", "refused"))
                    }
                    .boxed()
                }),
            )
            .await;

        assert!(result.is_err());
        assert!(matches!(
            result.unwrap_err().root_cause(),
            Error::Registration { .. }
        ));
        assert!(host.pool().handlers().await.is_empty());
    }

    async fn host_stage(ctx: &Context) {
        let tx = ctx.transaction().unwrap();
        tx.on_commit(Box::new(|| async {}.boxed())).await.unwrap();
        assert_eq!(tx.staged().await, 1);
    }

    #[tokio::test]
    async fn test_committed_transaction_installs_and_restarts_started_host() {
        let host = factory();
        let ctx = Context::new();
        host.start(&ctx).await.unwrap();

        let staging_host = &host;
        host.start_with_transaction(
            &ctx,
            Box::new(move |tx_ctx| {
                async move {
                    staging_host
                        .register_handler(&tx_ctx, "staged", |_| async { Ok(()) })
                        .await
                }
                .boxed()
            }),
        )
        .await
        .unwrap();

        assert_eq!(host.pool().handlers().await, vec!["staged".to_string()]);
        assert!(matches!(
            host.pool().status().await,
            crate::workers::PoolStatus::Running { generation: 2, .. }
        ));
        host.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_start_workers_requires_started_host() {
        let host = factory();
        let ctx = Context::new();
        assert!(host.start_workers(&ctx, 1).await.is_err());

        host.start(&ctx).await.unwrap();
        assert!(host.start_workers(&ctx, 1).await.is_ok());
        host.stop().await.unwrap();
        assert!(!host.is_started().await);
    }

    #[tokio::test]
    async fn test_restart_survives_cancelled_caller_context() {
        let host = factory();
        let ctx = Context::new();
        host.start(&ctx).await.unwrap();

        ctx.cancel();
        host.start_workers(&ctx, 1).await.unwrap();
        assert!(matches!(
            host.pool().status().await,
            crate::workers::PoolStatus::Running { generation: 2, workers: 1 }
        ));

        host.stop().await.unwrap();
        assert!(host.start_workers(&ctx, 1).await.is_err());
    }
}
