//! Error types for the storage control plane
//!
//! One enum for every component. Each variant belongs to exactly one
//! [`ErrorKind`], which decides how the failure is surfaced and whether a
//! caller may retry it.

use std::time::Duration;
use thiserror::Error;

/// Unified error type for the control plane
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Caller Input Errors
    // =========================================================================
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Resource not found: {kind}/{id}")]
    ResourceNotFound { kind: String, id: String },

    #[error("Resource already exists: {kind}/{id}")]
    ResourceExists { kind: String, id: String },

    #[error("Access to {kind}/{id} denied")]
    Forbidden { kind: String, id: String },

    // =========================================================================
    // State Errors
    // =========================================================================
    #[error("Precondition failed for {kind}/{id}: {reason}")]
    Precondition {
        kind: String,
        id: String,
        reason: String,
    },

    #[error("Status conflict on {kind}/{id}: expected one of [{expected}], found {actual}")]
    StatusConflict {
        kind: String,
        id: String,
        expected: String,
        actual: String,
    },

    // =========================================================================
    // Scheduling Errors
    // =========================================================================
    #[error("No eligible pool: {reason}")]
    NoEligiblePool { reason: String },

    #[error("Insufficient capacity in pool {pool}: requested {requested} GiB, available {available} GiB")]
    InsufficientCapacity {
        pool: String,
        requested: u64,
        available: u64,
    },

    // =========================================================================
    // Driver Errors
    // =========================================================================
    #[error("Driver operation failed: {driver} - {operation}: {reason}")]
    DriverFailed {
        driver: String,
        operation: String,
        reason: String,
    },

    #[error("Driver operation timed out: {driver} - {operation} after {timeout:?}")]
    DriverTimeout {
        driver: String,
        operation: String,
        timeout: Duration,
    },

    #[error("Driver operation cancelled: {driver} - {operation}")]
    DriverCancelled { driver: String, operation: String },

    #[error("Backend {backend} is still initializing its {role} driver")]
    InitializationPending { backend: String, role: String },

    #[error("Backend not found: {backend}")]
    BackendNotFound { backend: String },

    #[error("Driver not registered: {name} ({role}, {storage_type})")]
    DriverNotRegistered {
        name: String,
        role: String,
        storage_type: String,
    },

    // =========================================================================
    // Parse / IO Errors
    // =========================================================================
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure classes the control plane distinguishes when surfacing errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Forbidden,
    Precondition,
    Conflict,
    Scheduling,
    Driver,
    Timeout,
    InitializationPending,
    Internal,
}

impl ErrorKind {
    /// HTTP status the REST surface answers with
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorKind::Validation => 400,
            ErrorKind::Forbidden => 403,
            ErrorKind::NotFound => 404,
            ErrorKind::Precondition | ErrorKind::Conflict => 409,
            ErrorKind::Scheduling => 422,
            ErrorKind::Driver => 502,
            ErrorKind::InitializationPending => 503,
            ErrorKind::Timeout => 504,
            ErrorKind::Internal => 500,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::Precondition => "precondition",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Scheduling => "scheduling",
            ErrorKind::Driver => "driver",
            ErrorKind::Timeout => "timeout",
            ErrorKind::InitializationPending => "initialization_pending",
            ErrorKind::Internal => "internal",
        };
        f.write_str(s)
    }
}

impl Error {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) => ErrorKind::Validation,
            Error::ResourceNotFound { .. } | Error::BackendNotFound { .. } => ErrorKind::NotFound,
            Error::ResourceExists { .. } | Error::StatusConflict { .. } => ErrorKind::Conflict,
            Error::Forbidden { .. } => ErrorKind::Forbidden,
            Error::Precondition { .. } => ErrorKind::Precondition,
            Error::NoEligiblePool { .. } | Error::InsufficientCapacity { .. } => {
                ErrorKind::Scheduling
            }
            Error::DriverFailed { .. } | Error::DriverCancelled { .. } => ErrorKind::Driver,
            Error::DriverTimeout { .. } => ErrorKind::Timeout,
            Error::InitializationPending { .. } => ErrorKind::InitializationPending,
            Error::Internal(_)
            | Error::Configuration(_)
            | Error::DriverNotRegistered { .. }
            | Error::JsonParse(_)
            | Error::YamlParse(_)
            | Error::Io(_) => ErrorKind::Internal,
        }
    }

    /// Whether the caller may usefully re-submit the same request.
    ///
    /// Nothing is retried inside the control plane; this only informs callers.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Scheduling)
    }

    /// Whether the failure came out of a driver call
    pub fn is_driver_failure(&self) -> bool {
        matches!(self.kind(), ErrorKind::Driver | ErrorKind::Timeout)
    }

    pub(crate) fn not_found(kind: &str, id: impl Into<String>) -> Self {
        Error::ResourceNotFound {
            kind: kind.to_string(),
            id: id.into(),
        }
    }

    pub(crate) fn precondition(kind: &str, id: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Precondition {
            kind: kind.to_string(),
            id: id.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn driver(driver: &str, operation: &str, reason: impl Into<String>) -> Self {
        Error::DriverFailed {
            driver: driver.to_string(),
            operation: operation.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for the control plane
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        let err = Error::precondition("volume", "v1", "has snapshots");
        assert_eq!(err.kind(), ErrorKind::Precondition);

        let err = Error::StatusConflict {
            kind: "volume".into(),
            id: "v1".into(),
            expected: "available".into(),
            actual: "extending".into(),
        };
        assert_eq!(err.kind(), ErrorKind::Conflict);

        let err = Error::DriverTimeout {
            driver: "sample".into(),
            operation: "create_volume".into(),
            timeout: Duration::from_secs(600),
        };
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert!(err.is_driver_failure());
    }

    #[test]
    fn test_error_retryable() {
        let sched = Error::NoEligiblePool {
            reason: "no pool in zone west".into(),
        };
        assert!(sched.is_retryable());

        let pending = Error::InitializationPending {
            backend: "ceph".into(),
            role: "provision".into(),
        };
        assert!(!pending.is_retryable());
        assert_eq!(pending.kind(), ErrorKind::InitializationPending);

        let validation = Error::Validation("size must be positive".into());
        assert!(!validation.is_retryable());
        assert_eq!(validation.kind().http_status(), 400);
        assert_eq!(pending.kind().http_status(), 503);
    }
}
