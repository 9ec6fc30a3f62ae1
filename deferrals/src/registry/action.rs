//! Deferred action types and their log labels

use crate::context::Context;
use crate::error::Result;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use std::sync::Arc;

/// Transactional registration: gets the (possibly transaction-scoped) context and the host
pub type RegistrationFn<H> =
    Arc<dyn Fn(Context, Arc<H>) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Plain function: gets the host, cannot fail
pub type DeferredFn<H> = Box<dyn FnOnce(Arc<H>) + Send>;

/// Identity of a callable for log lines
pub fn label_of<F>() -> String {
    std::any::type_name::<F>().to_string()
}

pub(crate) struct Registration<H> {
    pub(crate) label: String,
    action: RegistrationFn<H>,
}

impl<H> Registration<H> {
    pub(crate) fn new<F, Fut>(label: String, register: F) -> Self
    where
        F: Fn(Context, Arc<H>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            label,
            action: Arc::new(move |ctx, host| register(ctx, host).boxed()),
        }
    }

    pub(crate) fn run(&self, ctx: Context, host: Arc<H>) -> BoxFuture<'static, Result<()>> {
        (self.action)(ctx, host)
    }
}

pub(crate) struct Func<H> {
    pub(crate) label: String,
    action: DeferredFn<H>,
}

impl<H> Func<H> {
    pub(crate) fn new<F>(label: String, f: F) -> Self
    where
        F: FnOnce(Arc<H>) + Send + 'static,
    {
        Self {
            label,
            action: Box::new(f),
        }
    }

    pub(crate) fn run(self, host: Arc<H>) {
        (self.action)(host)
    }
}
