//! Error types for the scheduler module
//!
//! Only misconfiguration at registration time and lifecycle misuse surface as
//! errors. Nothing that happens inside a running job loop is reported here.

use std::fmt;
use std::time::Duration;

use crate::error::{BatonErrorTrait, ErrorCategory};

/// Result type for scheduler operations
pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Scheduler-specific errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    /// A duration option is out of range
    InvalidDuration {
        job: String,
        field: &'static str,
        reason: String,
    },

    /// An allowed hour is outside 0-23
    InvalidHour {
        job: String,
        hour: u32,
    },

    /// Another job is already registered under this name
    DuplicateJob {
        name: String,
    },

    /// An explicit job name was empty
    EmptyName,

    /// `start` was called twice
    AlreadyStarted,

    /// `stop` was called before `start`
    NotStarted,
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidDuration { job, field, reason } => {
                write!(f, "Invalid {} for job '{}': {}", field, job, reason)
            }
            Self::InvalidHour { job, hour } => {
                write!(
                    f,
                    "Invalid allowed hour '{}' for job '{}'. Must be 0-23",
                    hour, job
                )
            }
            Self::DuplicateJob { name } => {
                write!(f, "A job named '{}' is already registered", name)
            }
            Self::EmptyName => write!(f, "Job name must not be empty"),
            Self::AlreadyStarted => write!(f, "Scheduler already started"),
            Self::NotStarted => write!(f, "Scheduler not started"),
        }
    }
}

impl std::error::Error for SchedulerError {}

impl SchedulerError {
    /// Create an invalid duration error
    pub fn invalid_duration(
        job: impl Into<String>,
        field: &'static str,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidDuration {
            job: job.into(),
            field,
            reason: reason.into(),
        }
    }

    /// Create a zero-duration error
    pub fn zero_duration(job: impl Into<String>, field: &'static str) -> Self {
        Self::invalid_duration(job, field, "must be greater than zero")
    }

    /// Create an invalid hour error
    pub fn invalid_hour(job: impl Into<String>, hour: u32) -> Self {
        Self::InvalidHour {
            job: job.into(),
            hour,
        }
    }

    /// Create a duplicate job error
    pub fn duplicate_job(name: impl Into<String>) -> Self {
        Self::DuplicateJob { name: name.into() }
    }

    /// Reject `value` if it is zero
    pub(crate) fn require_nonzero(
        job: &str,
        field: &'static str,
        value: Duration,
    ) -> SchedulerResult<()> {
        if value.is_zero() {
            return Err(Self::zero_duration(job, field));
        }
        Ok(())
    }

    /// Reject a polling interval that is zero or longer than `max`
    pub(crate) fn require_interval(
        job: &str,
        value: Duration,
        max: Duration,
    ) -> SchedulerResult<()> {
        Self::require_nonzero(job, "interval", value)?;
        if value > max {
            return Err(Self::invalid_duration(
                job,
                "interval",
                format!("must not exceed {}s, got {value:?}", max.as_secs()),
            ));
        }
        Ok(())
    }
}

impl BatonErrorTrait for SchedulerError {
    fn is_recoverable(&self) -> bool {
        false
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::Scheduler
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_hour_error() {
        let err = SchedulerError::invalid_hour("cleanup", 25);
        assert!(err.to_string().contains("25"));
        assert!(err.to_string().contains("0-23"));
        assert!(err.to_string().contains("cleanup"));
    }

    #[test]
    fn test_zero_duration_error() {
        let err = SchedulerError::require_nonzero("poll", "interval", Duration::ZERO).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid interval for job 'poll': must be greater than zero"
        );
        assert!(SchedulerError::require_nonzero("poll", "interval", Duration::from_secs(1)).is_ok());
    }

    #[test]
    fn test_interval_bounds() {
        let max = Duration::from_secs(60);
        assert!(SchedulerError::require_interval("poll", max, max).is_ok());
        assert!(SchedulerError::require_interval("poll", Duration::ZERO, max).is_err());

        let err = SchedulerError::require_interval("poll", Duration::MAX, max).unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidDuration { field: "interval", .. }));
        assert!(err.to_string().contains("must not exceed 60s"));
    }

    #[test]
    fn test_never_recoverable() {
        assert!(!SchedulerError::duplicate_job("a").is_recoverable());
        assert_eq!(SchedulerError::NotStarted.category(), ErrorCategory::Scheduler);
    }
}
