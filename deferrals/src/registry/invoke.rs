//! Draining of queued registrations and functions

use crate::context::Context;
use crate::error::Result;
use crate::host::Host;
use std::sync::Arc;

use super::action::Registration;
use super::pending::Pending;
use super::State;

impl<H: Host> State<H> {
    /// Run every queued registration, then every queued function
    ///
    /// Holding `&mut State` means holding the registry lock. On the first
    /// failing registration the error is returned and both queues are left
    /// untouched: no function runs and nothing is counted as done. After a
    /// full success both queues are empty.
    pub(crate) async fn invoke_all(
        &mut self,
        name: &str,
        ctx: &Context,
        host: &Arc<H>,
        pending: &Pending,
    ) -> Result<()> {
        invoke_registrations(name, ctx, host, &self.registrations).await?;
        pending.done_many(self.registrations.len());
        self.registrations.clear();

        for func in std::mem::take(&mut self.funcs) {
            let label = func.label.clone();
            log::debug!("[deferred-registration] {} run func {}", name, label);
            func.run(Arc::clone(host));
            log::debug!("[deferred-registration] {} done func {}", name, label);
            pending.done();
        }

        Ok(())
    }
}

/// Run `registrations` in order, stopping at the first error
pub(crate) async fn invoke_registrations<H: Host>(
    name: &str,
    ctx: &Context,
    host: &Arc<H>,
    registrations: &[Registration<H>],
) -> Result<()> {
    for registration in registrations {
        log::debug!(
            "[deferred-registration] {} run registration {}",
            name,
            registration.label
        );
        if let Err(e) = registration.run(ctx.clone(), Arc::clone(host)).await {
            log::debug!(
                "[deferred-registration] {} fail registration {}, error: {}",
                name,
                registration.label,
                e
            );
            return Err(e);
        }
        log::debug!(
            "[deferred-registration] {} done registration {}",
            name,
            registration.label
        );
    }
    Ok(())
}
