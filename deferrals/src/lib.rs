//! Deferrals - readiness-gated registration of startup work
//!
//! Deferrals lets independently initializing subsystems say "do this once
//! resource R is ready" without writing their own polling or locking:
//! - `DeferredRegistration` queues registrations and functions until ready
//! - `DeferralManager` polls a readiness predicate, runs setup and drains the queue
//! - Work added after readiness runs inline, transactionally on a started host
//! - `SharedFactory` is a reference host with a restartable worker pool

// Enforce error handling best practices
#![cfg_attr(
    not(test),
    warn(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::unimplemented,
        clippy::todo,
    )
)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used,))]

pub mod config;
pub mod context;
pub mod error;
pub mod host;
pub mod manage;
pub mod probe;
pub mod registry;
pub mod workers;

// Re-export main types for public API
pub use config::{DeferralConfig, FatalPolicy};
pub use context::{Context, Transaction, TransactionState};
pub use error::{Error, Result};
pub use host::{Activity, Host, SharedFactory, TransactionWork};
pub use manage::{DeferralManager, ManageOutcome};
pub use probe::{
    ConditionStatus, MemoryDirectory, ServiceAvailability, ServiceDirectory, ServiceStatus,
};
pub use registry::{DeferredRegistration, Pending, QueueDepth};
pub use workers::{job_handler, PoolStatus, WorkerPool, WorkerStats};

pub mod prelude {
    pub use crate::config::{DeferralConfig, FatalPolicy};
    pub use crate::context::Context;
    pub use crate::error::{Error, ErrorContext, Result};
    pub use crate::host::{Host, SharedFactory};
    pub use crate::manage::{DeferralManager, ManageOutcome};
    pub use crate::probe::{ServiceAvailability, ServiceDirectory};
    pub use crate::registry::DeferredRegistration;
    pub use async_trait::async_trait;
}
