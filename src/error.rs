//! Unified error handling for the baton crate
//!
//! This module provides a unified error type that consolidates the
//! domain-specific errors into a single `Error` enum, while keeping the
//! domain-specific errors usable on their own.
//!
//! # Architecture
//!
//! - [`BatonErrorTrait`] - Common interface implemented by all error types
//! - [`ErrorCategory`] - Classification of errors for handling strategies
//! - [`Error`] - Unified error enum wrapping all domain-specific errors
//!
//! Contention (a lock held by someone else, a dedup marker already present)
//! is never an error in this crate; those outcomes are `Option`/`bool`
//! results.
//!
//! # Usage
//!
//! ```rust,ignore
//! use baton::error::{BatonErrorTrait, Error};
//!
//! fn handle_error(err: Error) {
//!     if err.is_recoverable() {
//!         tracing::warn!(error = %err, "Transient failure, retrying next tick");
//!     } else {
//!         tracing::error!(error = %err, "Fatal error");
//!     }
//! }
//! ```

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub use crate::scheduler::error::SchedulerError;
pub use crate::store::StoreError;

/// Common trait for all baton error types
pub trait BatonErrorTrait: std::error::Error {
    /// Check if this error is recoverable (a later attempt may succeed)
    fn is_recoverable(&self) -> bool;

    /// Get the error category for handling strategies
    fn category(&self) -> ErrorCategory;
}

/// Classification of errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Shared store connectivity or command errors
    Store,
    /// Scheduler registration and lifecycle errors
    Scheduler,
    /// Configuration and validation errors
    Config,
    /// Local I/O errors
    Io,
}

impl ErrorCategory {
    /// Short lowercase label, used as a log field
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Store => "store",
            Self::Scheduler => "scheduler",
            Self::Config => "config",
            Self::Io => "io",
        }
    }
}

/// Unified error type for the baton crate
#[derive(Error, Debug)]
pub enum Error {
    /// Shared store errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Scheduler errors
    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    /// A config file could not be read
    #[error("Failed to read config file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A config file is not valid TOML for [`Config`](crate::config::Config)
    #[error("Failed to parse TOML config file {}: {source}", path.display())]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// Configuration values failed validation
    #[error("Config error: {0}")]
    Config(String),
}

impl BatonErrorTrait for Error {
    fn is_recoverable(&self) -> bool {
        match self {
            Self::Store(e) => e.is_recoverable(),
            Self::Scheduler(e) => e.is_recoverable(),
            Self::Io { source, .. } => matches!(
                source.kind(),
                io::ErrorKind::Interrupted | io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
            ),
            Self::Toml { .. } | Self::Config(_) => false,
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Store(e) => e.category(),
            Self::Scheduler(e) => e.category(),
            Self::Io { .. } => ErrorCategory::Io,
            Self::Toml { .. } | Self::Config(_) => ErrorCategory::Config,
        }
    }
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub(crate) fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn toml(path: &Path, source: toml::de::Error) -> Self {
        Self::Toml {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_category() {
        let store_err = Error::Store(StoreError::WrongType("q".into()));
        assert_eq!(store_err.category(), ErrorCategory::Store);

        let sched_err = Error::Scheduler(SchedulerError::duplicate_job("report"));
        assert_eq!(sched_err.category(), ErrorCategory::Scheduler);
    }

    #[test]
    fn test_is_recoverable() {
        let path = Path::new("/etc/baton.toml");
        let slow = Error::io(path, io::Error::new(io::ErrorKind::TimedOut, "slow"));
        assert!(slow.is_recoverable());

        let missing = Error::io(path, io::Error::new(io::ErrorKind::NotFound, "gone"));
        assert!(!missing.is_recoverable());
        assert_eq!(missing.category(), ErrorCategory::Io);

        let sched_err = Error::Scheduler(SchedulerError::AlreadyStarted);
        assert!(!sched_err.is_recoverable());
    }

    #[test]
    fn test_error_conversion() {
        let unified: Error = SchedulerError::AlreadyStarted.into();
        assert!(matches!(unified, Error::Scheduler(_)));

        let unified: Error = StoreError::invalid_argument("ttl").into();
        assert!(matches!(unified, Error::Store(_)));
        assert_eq!(unified.category(), ErrorCategory::Config);
    }

    #[test]
    fn test_config_error() {
        let err = Error::config("pool_size must be greater than 0");
        assert_eq!(err.category(), ErrorCategory::Config);
        assert!(!err.is_recoverable());
        assert_eq!(err.category().as_str(), "config");
    }

    #[test]
    fn test_toml_error_names_the_file() {
        let source = toml::from_str::<toml::Table>("[store\nurl = ").unwrap_err();
        let err = Error::toml(Path::new("/etc/baton.toml"), source);

        assert_eq!(err.category(), ErrorCategory::Config);
        assert!(err.to_string().contains("/etc/baton.toml"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
