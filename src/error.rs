//! Supervisor error types for typed error handling.
//!
//! Failures during instance construction (port allocation, directory
//! creation, installation) abort the call before anything is registered.
//! A readiness timeout is reported as [`Error::StartupTimeout`] while the
//! instance stays registered. Process crashes after launch are recovered by
//! the supervision loop and never surface here.

use std::io;

/// Result type for supervisor operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Supervisor errors with structured context.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Backend process never became ready within the startup window.
    #[error("backend for account '{account_id}' did not become ready within {timeout_secs}s")]
    StartupTimeout {
        account_id: String,
        timeout_secs: u64,
    },

    /// Engine artifact could not be fetched, verified, or installed.
    #[error("failed to install '{engine}' backend: {reason}")]
    Installation { engine: String, reason: String },

    /// No free local port could be allocated.
    #[error("failed to allocate a free local port: {source}")]
    PortAllocation {
        #[source]
        source: io::Error,
    },

    /// IO error with context.
    #[error("IO error in {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
}

impl Error {
    /// Create a startup timeout error.
    pub fn startup_timeout(account_id: impl Into<String>, timeout_secs: u64) -> Self {
        Self::StartupTimeout {
            account_id: account_id.into(),
            timeout_secs,
        }
    }

    /// Create an installation error.
    pub fn installation(engine: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Installation {
            engine: engine.into(),
            reason: reason.into(),
        }
    }

    /// Create an IO error with context.
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = Error::startup_timeout("acct123", 60);
        assert_eq!(
            err.to_string(),
            "backend for account 'acct123' did not become ready within 60s"
        );

        let err = Error::installation("scala", "download failed");
        assert_eq!(
            err.to_string(),
            "failed to install 'scala' backend: download failed"
        );
    }

    #[test]
    fn test_io_error_preserves_source() {
        let source = io::Error::new(io::ErrorKind::PermissionDenied, "denied");
        let err = Error::io("creating data dir", source);
        assert!(err.to_string().contains("creating data dir"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
