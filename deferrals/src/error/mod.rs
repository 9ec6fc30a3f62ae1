use thiserror::Error;

pub mod context;

pub type Result<T> = std::result::Result<T, Error>;

// Re-export context helpers
pub use context::{ErrorChain, ErrorContext};

/// Main error type for the deferral registry
#[derive(Error, Debug)]
pub enum Error {
    #[error("Registration '{label}' failed: {message}")]
    Registration { label: String, message: String },

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Worker pool error: {0}")]
    WorkerPool(String),

    #[error("Setup error: {0}")]
    Setup(String),

    #[error("Unrecoverable initialization failure: {0}")]
    Fatal(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Internal error: {0}")]
    Internal(String),

    // Error with context chain
    #[error("{message}")]
    WithContext {
        message: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    pub fn registration(label: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Registration {
            label: label.into(),
            message: message.into(),
        }
    }

    pub fn transaction(msg: impl Into<String>) -> Self {
        Self::Transaction(msg.into())
    }

    pub fn worker_pool(msg: impl Into<String>) -> Self {
        Self::WorkerPool(msg.into())
    }

    pub fn setup(msg: impl Into<String>) -> Self {
        Self::Setup(msg.into())
    }

    pub fn fatal(msg: impl Into<String>) -> Self {
        Self::Fatal(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    // Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        Self::WithContext {
            message: context.into(),
            source: Box::new(self),
        }
    }

    /// Innermost error beneath any context layers
    pub fn root_cause(&self) -> &Error {
        let mut current = self;
        while let Error::WithContext { source, .. } = current {
            current = source;
        }
        current
    }

    /// Check if the error was raised by the fatal-failure path
    pub fn is_fatal(&self) -> bool {
        matches!(self.root_cause(), Error::Fatal(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_cause_follows_context() {
        let error = Error::registration("wire-handlers", "kind already bound")
            .with_context("draining deferred registrations");

        assert!(matches!(error.root_cause(), Error::Registration { .. }));
        assert_eq!(error.to_string(), "draining deferred registrations");
        assert!(!error.is_fatal());
    }

    #[test]
    fn test_fatal_detection_through_context() {
        let error = Error::fatal("pool restart failed").with_context("ext api deferrals");

        assert!(error.is_fatal());
        assert!(matches!(error.root_cause(), Error::Fatal(_)));
    }

    #[test]
    fn test_registration_display() {
        let error = Error::registration("ext-handlers", "missing client");
        assert_eq!(
            error.to_string(),
            "Registration 'ext-handlers' failed: missing client"
        );
    }
}
