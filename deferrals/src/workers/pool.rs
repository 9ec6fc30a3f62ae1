//! Shared worker pool with a restartable consumer loop

use crate::context::Context;
use crate::error::{Error, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::types::{Job, JobHandler, PoolStatus, WorkerStats};

/// Handlers, a job queue and one generation of consumers at a time
///
/// Each consumer generation snapshots the handler table when it starts.
/// Handlers installed afterwards only receive work once the pool is
/// restarted with [`WorkerPool::start`].
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<WorkerPoolInner>,
}

struct WorkerPoolInner {
    handlers: RwLock<HashMap<String, JobHandler>>,
    stats: RwLock<HashMap<String, WorkerStats>>,
    sender: mpsc::UnboundedSender<Job>,
    receiver: Mutex<mpsc::UnboundedReceiver<Job>>,
    generation: Mutex<Option<Generation>>,
    next_generation: AtomicU64,
    status: RwLock<PoolStatus>,
}

struct Generation {
    id: u64,
    cancel: CancellationToken,
    consumers: Vec<JoinHandle<()>>,
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerPool {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(WorkerPoolInner {
                handlers: RwLock::new(HashMap::new()),
                stats: RwLock::new(HashMap::new()),
                sender,
                receiver: Mutex::new(receiver),
                generation: Mutex::new(None),
                next_generation: AtomicU64::new(1),
                status: RwLock::new(PoolStatus::Idle),
            }),
        }
    }

    /// Install or replace the handler for `kind`
    pub async fn install(&self, kind: impl Into<String>, handler: JobHandler) {
        let kind = kind.into();
        log::debug!("[worker-pool] install handler for '{}'", kind);
        self.inner.handlers.write().await.insert(kind.clone(), handler);
        self.inner.stats.write().await.entry(kind).or_default();
    }

    pub async fn handlers(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.inner.handlers.read().await.keys().cloned().collect();
        kinds.sort();
        kinds
    }

    /// Queue a job; it is picked up by the current or next consumer generation
    pub fn enqueue(&self, kind: impl Into<String>, payload: Value) -> Result<()> {
        let kind = kind.into();
        if kind.is_empty() {
            return Err(Error::invalid_input("job kind cannot be empty"));
        }
        self.inner
            .sender
            .send(Job::new(kind, payload))
            .map_err(|_| Error::worker_pool("job queue is closed"))
    }

    /// Start, or restart, the consumer loop with `workers` consumers
    ///
    /// The previous generation stops taking new jobs; jobs it is already
    /// running finish undisturbed. Consumers stop when `ctx` is cancelled.
    pub async fn start(&self, ctx: &Context, workers: usize) -> Result<()> {
        if workers == 0 {
            return Err(Error::worker_pool("cannot start a pool with 0 workers"));
        }
        if ctx.is_cancelled() {
            return Err(Error::worker_pool("start requested with a cancelled context"));
        }

        let table = Arc::new(self.inner.handlers.read().await.clone());
        let mut current = self.inner.generation.lock().await;

        if let Some(previous) = current.take() {
            log::debug!(
                "[worker-pool] stopping generation {} ({} consumers)",
                previous.id,
                previous.consumers.len()
            );
            previous.cancel.cancel();
        }

        let id = self.inner.next_generation.fetch_add(1, Ordering::AcqRel);
        let cancel = ctx.token().child_token();
        let consumers = (0..workers)
            .map(|_| {
                let pool = self.clone();
                let table = Arc::clone(&table);
                let cancel = cancel.clone();
                tokio::spawn(async move { pool.consume(table, cancel).await })
            })
            .collect();

        log::debug!(
            "[worker-pool] generation {} started with {} consumers and {} handlers",
            id,
            workers,
            table.len()
        );

        *current = Some(Generation {
            id,
            cancel,
            consumers,
        });
        *self.inner.status.write().await = PoolStatus::Running {
            generation: id,
            workers,
        };
        Ok(())
    }

    async fn consume(&self, table: Arc<HashMap<String, JobHandler>>, cancel: CancellationToken) {
        loop {
            let job = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                job = async { self.inner.receiver.lock().await.recv().await } => job,
            };

            let Some(job) = job else {
                break;
            };
            self.run_job(&table, job).await;
        }
    }

    async fn run_job(&self, table: &HashMap<String, JobHandler>, job: Job) {
        let Some(handler) = table.get(&job.kind).cloned() else {
            log::warn!(
                "[worker-pool] no handler for '{}' in the running generation, job dropped",
                job.kind
            );
            let mut stats = self.inner.stats.write().await;
            stats.entry(job.kind).or_default().record_unhandled();
            return;
        };

        let started = Instant::now();
        let outcome = handler(job.payload).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let mut stats = self.inner.stats.write().await;
        let entry = stats.entry(job.kind.clone()).or_default();
        match outcome {
            Ok(()) => entry.record_success(duration_ms),
            Err(e) => {
                log::error!("[worker-pool] job '{}' failed: {}", job.kind, e);
                entry.record_error(Some(duration_ms));
            }
        }
    }

    pub async fn status(&self) -> PoolStatus {
        self.inner.status.read().await.clone()
    }

    pub async fn is_running(&self) -> bool {
        self.status().await.is_running()
    }

    pub async fn stats(&self, kind: &str) -> Option<WorkerStats> {
        self.inner.stats.read().await.get(kind).cloned()
    }

    /// Stop the current generation and wait for its consumers to exit
    pub async fn shutdown(&self) -> Result<()> {
        let previous = self.inner.generation.lock().await.take();
        if let Some(generation) = previous {
            generation.cancel.cancel();
            for consumer in generation.consumers {
                if let Err(e) = consumer.await {
                    log::error!("[worker-pool] consumer ended abnormally: {}", e);
                }
            }
        }
        *self.inner.status.write().await = PoolStatus::Stopped;
        Ok(())
    }
}
