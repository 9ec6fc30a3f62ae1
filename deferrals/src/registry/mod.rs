//! Deferred registration registry
//!
//! A [`DeferredRegistration`] collects work for one readiness condition.
//! Until the condition is met, registrations and functions are queued; the
//! coordinator drains them once, registrations first, and marks the registry
//! completed. From then on, anything added runs inline on the caller's task.
//!
//! # Example Usage
//!
//! ```rust,ignore
//! let ext_api = DeferredRegistration::new("ext-api");
//!
//! // Anywhere during startup, before or after the api is up
//! ext_api.add_registration(&ctx, &host, |ctx, host| async move {
//!     host.register_handler(&ctx, "tokens", handle_token).await
//! }).await?;
//!
//! ext_api.add_func(&host, |host| log::info!("ext api wired")).await;
//! ```

pub mod action;
mod invoke;
pub mod pending;

pub use action::{label_of, DeferredFn, RegistrationFn};
pub use pending::Pending;

use crate::context::Context;
use crate::error::Result;
use crate::host::Host;
use futures::FutureExt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex, MutexGuard};

use action::{Func, Registration};
use invoke::invoke_registrations;

pub struct DeferredRegistration<H> {
    name: String,
    state: Mutex<State<H>>,
    pending: Pending,
}

/// Everything guarded by the registry lock
pub(crate) struct State<H> {
    pub(crate) completed: bool,
    pub(crate) registrations: Vec<Registration<H>>,
    pub(crate) funcs: Vec<Func<H>>,
}

/// Execution strategy for newly added work, chosen under the registry lock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dispatch {
    Queued,
    Immediate,
}

impl Dispatch {
    fn for_state<H>(state: &State<H>) -> Self {
        if state.completed {
            Dispatch::Immediate
        } else {
            Dispatch::Queued
        }
    }
}

/// Number of items waiting in each queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueDepth {
    pub registrations: usize,
    pub funcs: usize,
}

impl<H: Host> DeferredRegistration<H> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(State {
                completed: false,
                registrations: Vec::new(),
                funcs: Vec::new(),
            }),
            pending: Pending::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// True once the readiness condition was met and the initial drain ran
    pub async fn is_completed(&self) -> bool {
        self.state.lock().await.completed
    }

    /// Accepted registrations and functions that have not finished yet
    pub fn pending(&self) -> usize {
        self.pending.count()
    }

    pub async fn queued(&self) -> QueueDepth {
        let state = self.state.lock().await;
        QueueDepth {
            registrations: state.registrations.len(),
            funcs: state.funcs.len(),
        }
    }

    /// Resolve once every accepted registration and function has finished
    pub async fn wait_settled(&self) {
        self.pending.wait_idle().await;
    }

    pub(crate) async fn lock_state(&self) -> MutexGuard<'_, State<H>> {
        self.state.lock().await
    }

    pub(crate) fn pending_counter(&self) -> &Pending {
        &self.pending
    }

    /// Defer a registration until the registry completes
    ///
    /// Before completion the registration is queued and `Ok(())` is returned
    /// at once. After completion it runs inline and its result is returned;
    /// on a started host it runs inside a transactional restart.
    pub async fn add_registration<F, Fut>(
        &self,
        ctx: &Context,
        host: &Arc<H>,
        register: F,
    ) -> Result<()>
    where
        F: Fn(Context, Arc<H>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.add_registration_labeled(label_of::<F>(), ctx, host, register)
            .await
    }

    /// [`Self::add_registration`] with an explicit label for log lines
    pub async fn add_registration_labeled<F, Fut>(
        &self,
        label: impl Into<String>,
        ctx: &Context,
        host: &Arc<H>,
        register: F,
    ) -> Result<()>
    where
        F: Fn(Context, Arc<H>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let registration = Registration::new(label.into(), register);

        {
            let mut state = self.state.lock().await;
            self.pending.add(1);
            if Dispatch::for_state(&state) == Dispatch::Queued {
                log::debug!(
                    "[deferred-registration] {} defer registration {}",
                    self.name,
                    registration.label
                );
                state.registrations.push(registration);
                return Ok(());
            }
        }

        let result = self.register_immediately(ctx, host, registration).await;
        self.pending.done();
        result
    }

    async fn register_immediately(
        &self,
        ctx: &Context,
        host: &Arc<H>,
        registration: Registration<H>,
    ) -> Result<()> {
        log::debug!(
            "[deferred-registration] {} immediate registration {}",
            self.name,
            registration.label
        );

        if !host.is_started().await {
            log::debug!(
                "[deferred-registration] {} inactive host, skip factory start",
                self.name
            );
            return invoke_registrations(
                &self.name,
                ctx,
                host,
                std::slice::from_ref(&registration),
            )
            .await;
        }

        log::debug!(
            "[deferred-registration] {} active host, restarting factory",
            self.name
        );
        let name = self.name.as_str();
        let scoped_host = Arc::clone(host);
        let result = host
            .start_with_transaction(
                ctx,
                Box::new(move |tx_ctx| {
                    async move {
                        invoke_registrations(
                            name,
                            &tx_ctx,
                            &scoped_host,
                            std::slice::from_ref(&registration),
                        )
                        .await
                    }
                    .boxed()
                }),
            )
            .await;
        log::debug!(
            "[deferred-registration] {} active host, restarting factory done",
            self.name
        );
        result
    }

    /// Defer a plain function until the registry completes
    ///
    /// Queued functions run after every queued registration. After
    /// completion the function runs inline before this returns.
    pub async fn add_func<F>(&self, host: &Arc<H>, f: F)
    where
        F: FnOnce(Arc<H>) + Send + 'static,
    {
        self.add_func_labeled(label_of::<F>(), host, f).await
    }

    /// [`Self::add_func`] with an explicit label for log lines
    pub async fn add_func_labeled<F>(&self, label: impl Into<String>, host: &Arc<H>, f: F)
    where
        F: FnOnce(Arc<H>) + Send + 'static,
    {
        let func = Func::new(label.into(), f);

        {
            let mut state = self.state.lock().await;
            self.pending.add(1);
            if Dispatch::for_state(&state) == Dispatch::Queued {
                log::debug!(
                    "[deferred-registration] {} defer func {}",
                    self.name,
                    func.label
                );
                state.funcs.push(func);
                return;
            }
        }

        let label = func.label.clone();
        log::debug!("[deferred-registration] {} imm run func {}", self.name, label);
        func.run(Arc::clone(host));
        log::debug!("[deferred-registration] {} imm done func {}", self.name, label);
        self.pending.done();
    }

    /// Run `f` once all currently accepted work has finished
    ///
    /// Returns immediately. The receiver gets exactly one value, the result
    /// of `f`. No order is promised between several of these. Must be called
    /// from within a tokio runtime.
    pub fn add_func_with_error<F, Fut>(
        &self,
        host: &Arc<H>,
        f: F,
    ) -> oneshot::Receiver<Result<()>>
    where
        F: FnOnce(Arc<H>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let (sender, receiver) = oneshot::channel();
        let pending = self.pending.clone();
        let host = Arc::clone(host);
        let name = self.name.clone();
        let label = label_of::<F>();

        log::debug!(
            "[deferred-registration] {} defer func with error {}",
            name,
            label
        );
        tokio::spawn(async move {
            pending.wait_idle().await;
            log::debug!("[deferred-registration] {} run func with error {}", name, label);
            let result = f(host).await;
            if let Err(e) = &result {
                log::debug!(
                    "[deferred-registration] {} func with error {} failed: {}",
                    name,
                    label,
                    e
                );
            }
            // The caller may have dropped the receiver; nothing to report to then.
            let _ = sender.send(result);
        });

        receiver
    }
}
