use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// What to do when the coordinator hits a failure it cannot recover from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FatalPolicy {
    /// Log the failure and terminate the process with exit status 1
    #[default]
    Exit,
    /// Log the failure and return `Error::Fatal` to the caller of the readiness loop
    Report,
}

impl FromStr for FatalPolicy {
    type Err = Error;

    fn from_str(policy: &str) -> Result<Self> {
        match policy.trim().to_lowercase().as_str() {
            "exit" => Ok(FatalPolicy::Exit),
            "report" | "return" => Ok(FatalPolicy::Report),
            other => Err(Error::config(format!(
                "Unknown fatal policy '{}', expected 'exit' or 'report'",
                other
            ))),
        }
    }
}

impl FatalPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            FatalPolicy::Exit => "exit",
            FatalPolicy::Report => "report",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeferralConfig {
    /// Delay between two readiness checks, in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Consumer count used when the host's worker pool is restarted
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    #[serde(default)]
    pub fatal_policy: FatalPolicy,
}

impl Default for DeferralConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            worker_count: default_worker_count(),
            fatal_policy: FatalPolicy::default(),
        }
    }
}

impl DeferralConfig {
    /// Load configuration from a TOML file, then apply environment overrides
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();

        let content = fs::read_to_string(path_ref).map_err(|e| {
            Error::config(format!(
                "Failed to read config file '{}': {}. Make sure the file exists and is readable.",
                path_ref.display(),
                e
            ))
        })?;

        let mut config = Self::from_toml_str(&content).map_err(|e| {
            e.with_context(format!("Failed to load config file '{}'", path_ref.display()))
        })?;
        config.apply_env_overrides()?;

        log::debug!(
            "Successfully loaded deferral configuration from: {}",
            path_ref.display()
        );
        Ok(config)
    }

    /// Parse configuration from TOML text
    ///
    /// Accepts either a bare document or one nested under a `[deferrals]`
    /// table, so the settings can live inside a larger application file.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let value: toml::Value = toml::from_str(content)
            .map_err(|e| Error::config(format!("Failed to parse TOML: {}. Check TOML syntax.", e)))?;

        let section = match value.get("deferrals") {
            Some(section) => section.clone(),
            None => value,
        };

        section
            .try_into::<DeferralConfig>()
            .map_err(|e| Error::config(format!("Invalid deferral settings: {}", e)))
    }

    /// Create configuration from defaults plus environment variable overrides
    pub fn from_env() -> Result<Self> {
        let mut config = DeferralConfig::default();
        config.apply_env_overrides()?;
        Ok(config)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Set the poll interval; a non-zero interval below 1 ms rounds up to 1 ms
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        let millis = interval.as_millis() as u64;
        self.poll_interval_ms = if millis == 0 && !interval.is_zero() {
            1
        } else {
            millis
        };
        self
    }

    pub fn with_worker_count(mut self, workers: usize) -> Self {
        self.worker_count = workers;
        self
    }

    pub fn with_fatal_policy(mut self, policy: FatalPolicy) -> Self {
        self.fatal_policy = policy;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(Error::config("Poll interval cannot be 0"));
        }

        if self.worker_count == 0 {
            return Err(Error::config("Worker count cannot be 0"));
        }

        if self.fatal_policy == FatalPolicy::Report {
            log::debug!("Fatal initialization failures will be reported instead of exiting");
        }

        Ok(())
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(interval) = env::var("DEFERRALS_POLL_INTERVAL_MS") {
            self.poll_interval_ms = interval.trim().parse().map_err(|_| {
                Error::config(format!("Invalid DEFERRALS_POLL_INTERVAL_MS: {}", interval))
            })?;
        }

        if let Ok(workers) = env::var("DEFERRALS_WORKER_COUNT") {
            self.worker_count = workers.trim().parse().map_err(|_| {
                Error::config(format!("Invalid DEFERRALS_WORKER_COUNT: {}", workers))
            })?;
        }

        if let Ok(policy) = env::var("DEFERRALS_FATAL_POLICY") {
            self.fatal_policy = policy.parse().map_err(|_| {
                Error::config(format!("Invalid DEFERRALS_FATAL_POLICY: {}", policy))
            })?;
        }

        Ok(())
    }
}

fn default_poll_interval_ms() -> u64 {
    5_000
}

fn default_worker_count() -> usize {
    50
}
