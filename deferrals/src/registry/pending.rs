//! Counter of accepted-but-unfinished deferred work

use std::sync::Arc;
use tokio::sync::watch;

/// Wait-group style counter backed by a watch channel
///
/// Cloned handles share the count. [`Pending::wait_idle`] resolves as soon as
/// the count is zero, including immediately.
#[derive(Clone, Debug)]
pub struct Pending {
    counter: Arc<watch::Sender<usize>>,
}

impl Default for Pending {
    fn default() -> Self {
        Self::new()
    }
}

impl Pending {
    pub fn new() -> Self {
        let (counter, _) = watch::channel(0);
        Self {
            counter: Arc::new(counter),
        }
    }

    pub fn add(&self, n: usize) {
        self.counter.send_modify(|count| *count += n);
    }

    pub fn done(&self) {
        self.done_many(1);
    }

    pub fn done_many(&self, n: usize) {
        if n == 0 {
            return;
        }
        self.counter.send_modify(|count| {
            if *count < n {
                log::error!(
                    "[deferred-registration] pending counter underflow: {} done, {} pending",
                    n,
                    count
                );
            }
            *count = count.saturating_sub(n);
        });
    }

    pub fn count(&self) -> usize {
        *self.counter.borrow()
    }

    pub fn is_idle(&self) -> bool {
        self.count() == 0
    }

    pub async fn wait_idle(&self) {
        let mut receiver = self.counter.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = receiver.wait_for(|count| *count == 0).await;
    }
}
