//! Readiness loop and factory initialization
//!
//! [`DeferralManager::manage_deferrals`] polls a readiness predicate until it
//! holds, runs a one-shot setup, then drains a [`DeferredRegistration`] against
//! the host. Whether the drain runs directly or inside a transactional restart
//! depends on whether the host has already started.

use crate::config::{DeferralConfig, FatalPolicy};
use crate::context::Context;
use crate::error::{Error, ErrorChain, ErrorContext, Result};
use crate::host::Host;
use crate::registry::DeferredRegistration;
use futures::FutureExt;
use std::future::Future;
use std::sync::Arc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// How a call to [`DeferralManager::manage_deferrals`] ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManageOutcome {
    /// Predicate held, setup ran and the registry was drained
    Completed,
    /// The registry was already completed; nothing was polled or run
    AlreadyCompleted,
    /// The context was cancelled while polling
    Cancelled,
}

pub struct DeferralManager<H> {
    host: Arc<H>,
    config: DeferralConfig,
}

impl<H: Host> DeferralManager<H> {
    pub fn new(host: Arc<H>, config: DeferralConfig) -> Self {
        Self { host, config }
    }

    pub fn host(&self) -> &Arc<H> {
        &self.host
    }

    pub fn config(&self) -> &DeferralConfig {
        &self.config
    }

    /// Wait for `poller` to report readiness, run `setup`, then drain `registry`
    ///
    /// The predicate is evaluated at once and then on every poll interval.
    /// Cancellation of `ctx` is only observed between polls. A second call on
    /// a completed registry returns [`ManageOutcome::AlreadyCompleted`]
    /// without polling.
    ///
    /// Setup and initialization failures are unrecoverable and handled
    /// according to the configured [`FatalPolicy`]. An invalid configuration
    /// is returned as `Error::Config` before anything is polled.
    pub async fn manage_deferrals<P, PFut, S, SFut>(
        &self,
        ctx: &Context,
        label: &str,
        registry: &DeferredRegistration<H>,
        mut poller: P,
        setup: S,
    ) -> Result<ManageOutcome>
    where
        P: FnMut(Arc<H>) -> PFut,
        PFut: Future<Output = bool>,
        S: FnOnce(Arc<H>) -> SFut,
        SFut: Future<Output = Result<()>>,
    {
        if registry.is_completed().await {
            log::debug!(
                "[deferred-registration] {} already completed, not monitoring {}",
                registry.name(),
                label
            );
            return Ok(ManageOutcome::AlreadyCompleted);
        }

        self.config.validate()?;
        let period = self.config.poll_interval();
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        log::debug!(
            "[deferred-registration] {} starting to monitor {}",
            registry.name(),
            label
        );

        loop {
            if poller(Arc::clone(&self.host)).await {
                log::debug!(
                    "[deferred-registration] {} all requirements of {} available",
                    registry.name(),
                    label
                );
                break;
            }

            tokio::select! {
                _ = ctx.cancelled() => {
                    log::error!(
                        "[deferred-registration] {} context cancelled while waiting for {}",
                        registry.name(),
                        label
                    );
                    return Ok(ManageOutcome::Cancelled);
                }
                _ = ticker.tick() => {}
            }
        }

        if let Err(e) = setup(Arc::clone(&self.host)).await {
            return self.fatal(registry.name(), e.with_context(format!("setup of {}", label)));
        }

        match self.initialize_factory(ctx, registry).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => self.fatal(registry.name(), e),
        }
    }

    /// Drain `registry` against the host and mark it completed
    ///
    /// Holds the registry lock throughout. A host that has not started is not
    /// started here: the drain runs directly. A started host gets a
    /// transactional restart around the drain, then a worker restart.
    pub async fn initialize_factory(
        &self,
        ctx: &Context,
        registry: &DeferredRegistration<H>,
    ) -> Result<ManageOutcome> {
        let mut state = registry.lock_state().await;
        let name = registry.name();
        let pending = registry.pending_counter();

        if state.completed {
            return Ok(ManageOutcome::AlreadyCompleted);
        }

        log::debug!("[deferred-registration] {} initialize factory", name);

        if !self.host.is_started().await {
            log::debug!(
                "[deferred-registration] {} run deferred registrations and funcs for inactive host",
                name
            );
            state
                .invoke_all(name, ctx, &self.host, pending)
                .await
                .context("invoking deferred work on inactive host")?;
            state.completed = true;
            log::debug!(
                "[deferred-registration] {} initialize factory done, inactive host, not started",
                name
            );
            return Ok(ManageOutcome::Completed);
        }

        log::debug!(
            "[deferred-registration] {} run deferred registrations and funcs in transaction",
            name
        );
        let host = &self.host;
        let drained = &mut *state;
        self.host
            .start_with_transaction(
                ctx,
                Box::new(move |tx_ctx| {
                    async move {
                        drained.invoke_all(name, &tx_ctx, host, pending).await?;
                        drained.completed = true;
                        Ok(())
                    }
                    .boxed()
                }),
            )
            .await
            .context("invoking deferred work in transactional restart")?;

        log::debug!("[deferred-registration] {} restarting workers", name);
        self.host
            .start_workers(ctx, self.config.worker_count)
            .await
            .context("restarting shared workers")?;

        log::debug!(
            "[deferred-registration] {} initialize factory done, active host, restarted",
            name
        );
        Ok(ManageOutcome::Completed)
    }

    fn fatal(&self, name: &str, error: Error) -> Result<ManageOutcome> {
        let chain = ErrorChain::new(&error);
        log::error!(
            "[deferred-registration] {} encountered unrecoverable error: {}",
            name,
            chain.format_for_log()
        );

        match self.config.fatal_policy {
            FatalPolicy::Exit => std::process::exit(1),
            FatalPolicy::Report => Err(Error::fatal(chain.format_for_log())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::SharedFactory;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn manager() -> DeferralManager<SharedFactory> {
        let config = DeferralConfig::default()
            .with_poll_interval(Duration::from_millis(10))
            .with_worker_count(1)
            .with_fatal_policy(FatalPolicy::Report);
        DeferralManager::new(Arc::new(SharedFactory::new(&config)), config)
    }

    #[tokio::test]
    async fn test_ready_predicate_completes_without_waiting() {
        let manager = manager();
        let registry = DeferredRegistration::new("immediate");

        let outcome = tokio::time::timeout(
            Duration::from_secs(1),
            manager.manage_deferrals(
                &Context::new(),
                "always-ready",
                &registry,
                |_| async { true },
                |_| async { Ok(()) },
            ),
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(outcome, ManageOutcome::Completed);
        assert!(registry.is_completed().await);
    }

    #[tokio::test]
    async fn test_setup_failure_is_reported_as_fatal() {
        let manager = manager();
        let registry = DeferredRegistration::new("bad-setup");
        let drained = Arc::new(AtomicUsize::new(0));

        let counter = drained.clone();
        registry
            .add_func(manager.host(), move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .await;

        let err = manager
            .manage_deferrals(
                &Context::new(),
                "bad-setup",
                &registry,
                |_| async { true },
                |_| async { Err(Error::setup("client construction failed")) },
            )
            .await
            .unwrap_err();

        assert!(err.is_fatal());
        assert!(err.to_string().contains("client construction failed"));
        assert_eq!(drained.load(Ordering::SeqCst), 0);
        assert!(!registry.is_completed().await);
    }

    #[tokio::test]
    async fn test_zero_poll_interval_is_rejected_before_polling() {
        let config = DeferralConfig {
            poll_interval_ms: 0,
            ..DeferralConfig::default()
        }
        .with_fatal_policy(FatalPolicy::Report);
        let manager = DeferralManager::new(Arc::new(SharedFactory::new(&config)), config);
        let registry = DeferredRegistration::new("zero-interval");
        let polls = Arc::new(AtomicUsize::new(0));

        let seen = polls.clone();
        let err = manager
            .manage_deferrals(
                &Context::new(),
                "zero-interval",
                &registry,
                move |_| {
                    seen.fetch_add(1, Ordering::SeqCst);
                    async { false }
                },
                |_| async { Ok(()) },
            )
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Config(_)));
        assert_eq!(polls.load(Ordering::SeqCst), 0);
        assert!(!registry.is_completed().await);
    }

    #[tokio::test]
    async fn test_sub_millisecond_interval_still_polls() {
        let config = DeferralConfig::default()
            .with_poll_interval(Duration::from_micros(200))
            .with_fatal_policy(FatalPolicy::Report);
        let manager = DeferralManager::new(Arc::new(SharedFactory::new(&config)), config);
        let registry = DeferredRegistration::new("fast");
        let polls = Arc::new(AtomicUsize::new(0));

        let seen = polls.clone();
        let outcome = tokio::time::timeout(
            Duration::from_secs(1),
            manager.manage_deferrals(
                &Context::new(),
                "fast",
                &registry,
                move |_| {
                    let ready = seen.fetch_add(1, Ordering::SeqCst) >= 2;
                    async move { ready }
                },
                |_| async { Ok(()) },
            ),
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(outcome, ManageOutcome::Completed);
        assert_eq!(polls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_initialize_factory_twice_is_noop() {
        let manager = manager();
        let registry = DeferredRegistration::new("twice");
        let ctx = Context::new();

        assert_eq!(
            manager.initialize_factory(&ctx, &registry).await.unwrap(),
            ManageOutcome::Completed
        );
        assert_eq!(
            manager.initialize_factory(&ctx, &registry).await.unwrap(),
            ManageOutcome::AlreadyCompleted
        );
    }
}
