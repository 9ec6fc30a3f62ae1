//! Service availability predicate
//!
//! A ready-made readiness check for [`crate::DeferralManager::manage_deferrals`]:
//! every required service must exist and report an `Available` condition
//! with status `True`.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Condition type that marks a service as established
pub const AVAILABLE: &str = "Available";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceCondition {
    #[serde(rename = "type")]
    pub kind: String,
    pub status: ConditionStatus,
}

impl ServiceCondition {
    pub fn new(kind: impl Into<String>, status: ConditionStatus) -> Self {
        Self {
            kind: kind.into(),
            status,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub name: String,
    #[serde(default)]
    pub conditions: Vec<ServiceCondition>,
}

impl ServiceStatus {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            conditions: Vec::new(),
        }
    }

    pub fn with_condition(mut self, kind: impl Into<String>, status: ConditionStatus) -> Self {
        self.conditions.push(ServiceCondition::new(kind, status));
        self
    }

    pub fn is_available(&self) -> bool {
        self.conditions
            .iter()
            .any(|c| c.kind == AVAILABLE && c.status == ConditionStatus::True)
    }
}

/// Lookup of service status by name
#[async_trait]
pub trait ServiceDirectory: Send + Sync {
    /// `Ok(None)` when the service does not exist
    async fn get(&self, name: &str) -> Result<Option<ServiceStatus>>;
}

/// In-memory directory, for simulations and tests
#[derive(Debug, Default)]
pub struct MemoryDirectory {
    services: RwLock<HashMap<String, ServiceStatus>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set(&self, status: ServiceStatus) {
        self.services
            .write()
            .await
            .insert(status.name.clone(), status);
    }

    pub async fn remove(&self, name: &str) -> Option<ServiceStatus> {
        self.services.write().await.remove(name)
    }
}

#[async_trait]
impl ServiceDirectory for MemoryDirectory {
    async fn get(&self, name: &str) -> Result<Option<ServiceStatus>> {
        Ok(self.services.read().await.get(name).cloned())
    }
}

#[derive(Debug, Clone)]
pub struct ServiceAvailability {
    required: Vec<String>,
}

impl ServiceAvailability {
    pub fn new<I, S>(required: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            required: required.into_iter().map(Into::into).collect(),
        }
    }

    pub fn required(&self) -> &[String] {
        &self.required
    }

    /// True when every required service is present and available
    ///
    /// Lookup errors count as not ready.
    pub async fn check<D: ServiceDirectory + ?Sized>(&self, directory: &D) -> bool {
        log::debug!(
            "[deferred-probe] checking availability of {:?}",
            self.required
        );

        for name in &self.required {
            let status = match directory.get(name).await {
                Ok(Some(status)) => status,
                Ok(None) => {
                    log::debug!(
                        "[deferred-probe] service {:?} not found, continuing to wait",
                        name
                    );
                    return false;
                }
                Err(e) => {
                    log::debug!(
                        "[deferred-probe] service {:?}: error during check: {}",
                        name,
                        e
                    );
                    return false;
                }
            };

            if !status.is_available() {
                log::debug!(
                    "[deferred-probe] service {:?} exists, not yet available, continuing to wait",
                    name
                );
                return false;
            }

            log::debug!("[deferred-probe] service {:?} is available", name);
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    struct BrokenDirectory;

    #[async_trait]
    impl ServiceDirectory for BrokenDirectory {
        async fn get(&self, _name: &str) -> Result<Option<ServiceStatus>> {
            Err(Error::internal("directory unreachable"))
        }
    }

    #[tokio::test]
    async fn test_missing_service_is_not_ready() {
        let directory = MemoryDirectory::new();
        let probe = ServiceAvailability::new(["v1.ext.example.io"]);
        assert!(!probe.check(&directory).await);
    }

    #[tokio::test]
    async fn test_service_without_available_condition_is_not_ready() {
        let directory = MemoryDirectory::new();
        directory
            .set(
                ServiceStatus::new("v1.ext.example.io")
                    .with_condition("Progressing", ConditionStatus::True)
                    .with_condition(AVAILABLE, ConditionStatus::False),
            )
            .await;

        let probe = ServiceAvailability::new(["v1.ext.example.io"]);
        assert!(!probe.check(&directory).await);
    }

    #[tokio::test]
    async fn test_all_required_services_must_be_available() {
        let directory = MemoryDirectory::new();
        directory
            .set(ServiceStatus::new("a").with_condition(AVAILABLE, ConditionStatus::True))
            .await;

        let probe = ServiceAvailability::new(["a", "b"]);
        assert!(!probe.check(&directory).await);

        directory
            .set(ServiceStatus::new("b").with_condition(AVAILABLE, ConditionStatus::True))
            .await;
        assert!(probe.check(&directory).await);

        directory.remove("a").await;
        assert!(!probe.check(&directory).await);
    }

    #[tokio::test]
    async fn test_lookup_error_is_not_ready() {
        let probe = ServiceAvailability::new(["a"]);
        assert!(!probe.check(&BrokenDirectory).await);
    }

    #[test]
    fn test_status_deserializes_from_json() {
        let status: ServiceStatus = serde_json::from_str(
            r#"{"name":"v1.ext.example.io","conditions":[{"type":"Available","status":"True"}]}"#,
        )
        .unwrap();
        assert!(status.is_available());
    }
}
