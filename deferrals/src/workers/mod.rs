//! Worker pool for the reference host
//!
//! Jobs are routed by kind to handlers installed on the pool. Consumers run
//! in generations: a generation sees the handlers that were installed when it
//! started, so wiring new handlers takes a restart. This is what the
//! coordinator's transactional restart exists for.
//!
//! # Example Usage
//!
//! ```rust,ignore
//! let pool = WorkerPool::new();
//! pool.install("sync-tokens", job_handler(|payload| async move {
//!     log::info!("syncing {}", payload);
//!     Ok(())
//! })).await;
//! pool.start(&ctx, 4).await?;
//! pool.enqueue("sync-tokens", json!({"user": "u-1"}))?;
//! ```

pub mod pool;
pub mod types;

pub use pool::WorkerPool;
pub use types::{job_handler, Job, JobHandler, PoolStatus, WorkerStats};
