//! Error context and chaining utilities
//!
//! A failed drain can be traced back through the coordinator that ran it.

use super::Error;

/// Trait for adding context to errors
pub trait ErrorContext<T> {
    fn context<C>(self, context: C) -> Result<T, Error>
    where
        C: Into<String>;
}

impl<T> ErrorContext<T> for Result<T, Error> {
    fn context<C>(self, context: C) -> Result<T, Error>
    where
        C: Into<String>,
    {
        self.map_err(|e| e.with_context(context))
    }
}

/// Flattened view of an error and every context layer around it
pub struct ErrorChain {
    chain: Vec<String>,
}

impl ErrorChain {
    pub fn new(error: &Error) -> Self {
        let mut chain = Vec::new();
        let mut current = error;
        loop {
            chain.push(current.to_string());
            match current {
                Error::WithContext { source, .. } => current = source,
                _ => break,
            }
        }
        Self { chain }
    }

    /// Outermost context first, root cause last
    pub fn format_for_log(&self) -> String {
        self.chain.join(" -> ")
    }
}
