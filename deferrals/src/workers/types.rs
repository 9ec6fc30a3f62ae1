//! Core worker pool types

use crate::error::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Handler invoked by a pool consumer for one job of its kind
pub type JobHandler =
    Arc<dyn Fn(Value) -> Pin<Box<dyn Future<Output = Result<()>> + Send>> + Send + Sync>;

/// Box an async closure into a [`JobHandler`]
pub fn job_handler<F, Fut>(handler: F) -> JobHandler
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(move |payload| Box::pin(handler(payload)))
}

/// Unit of work routed to the handler registered for `kind`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub kind: String,
    pub payload: Value,
}

impl Job {
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }
}

/// Lifecycle status of the pool's consumer loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PoolStatus {
    Idle,
    Running { generation: u64, workers: usize },
    Stopped,
}

impl PoolStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, PoolStatus::Running { .. })
    }
}

/// Execution statistics aggregated per job kind
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkerStats {
    pub runs: u64,
    pub errors: u64,
    /// Jobs taken by a consumer generation that had no handler for the kind
    pub unhandled: u64,
    pub last_run_ms: Option<u64>,
    pub total_runtime_ms: u64,
}

impl WorkerStats {
    pub fn record_success(&mut self, duration_ms: u64) {
        self.runs += 1;
        self.last_run_ms = Some(duration_ms);
        self.total_runtime_ms = self.total_runtime_ms.saturating_add(duration_ms);
    }

    pub fn record_error(&mut self, duration_ms: Option<u64>) {
        self.errors += 1;
        if let Some(ms) = duration_ms {
            self.last_run_ms = Some(ms);
            self.total_runtime_ms = self.total_runtime_ms.saturating_add(ms);
        }
    }

    pub fn record_unhandled(&mut self) {
        self.unhandled += 1;
    }
}
