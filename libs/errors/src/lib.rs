//! Unified error handling for the IED data-model server
//!
//! Every crate in the workspace reports failures through [`IedError`].
//! Structural and configuration errors surface synchronously to the caller;
//! per-request errors are converted to data-access error codes by the model
//! crate and sent to the peer as ordinary response data.

use thiserror::Error;

// ============================================================================
// IedError - Main error type
// ============================================================================

/// Main error type for the data-model server, its model library and clients
#[derive(Debug, Error)]
pub enum IedError {
    // ======================================
    // Per-request errors (returned to the peer as data)
    // ======================================
    #[error("Object not found: {reference}")]
    NotFound { reference: String },

    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    #[error("Access denied: {reference} [{fc}]")]
    AccessDenied { reference: String, fc: String },

    #[error("Attribute is read-only: {reference}")]
    ReadOnly { reference: String },

    #[error("Invalid object reference: {0}")]
    InvalidReference(String),

    #[error("Subscription not found: {0}")]
    SubscriptionNotFound(u32),

    #[error("Connection is closing")]
    ConnectionClosing,

    // ======================================
    // Model construction errors
    // ======================================
    #[error("Duplicate name: {name} already exists under {parent}")]
    DuplicateName { parent: String, name: String },

    #[error("Data model is frozen; structural changes are not allowed")]
    ModelFrozen,

    #[error("Invalid hierarchy: {child} cannot be placed under {parent}")]
    InvalidHierarchy { parent: String, child: String },

    #[error("Logical node {logical_node} is missing mandatory data object {object}")]
    MissingMandatoryObject {
        logical_node: String,
        object: String,
    },

    // ======================================
    // Server lifecycle & communication errors
    // ======================================
    #[error("Cannot bind {addr}: {reason}")]
    Bind { addr: String, reason: String },

    #[error("Server is already running")]
    AlreadyRunning,

    #[error("Connection failed: {endpoint}: {reason}")]
    ConnectionFailed { endpoint: String, reason: String },

    #[error("Timeout waiting for {0}")]
    Timeout(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Request rejected by the peer with a data-access error code
    #[error("Request rejected by server: {code} ({name})")]
    Rejected { code: u8, name: String },

    // ======================================
    // Configuration errors
    // ======================================
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid configuration: {field}: {reason}")]
    InvalidConfig { field: String, reason: String },

    // ======================================
    // I/O & serialisation
    // ======================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using IedError
pub type IedResult<T> = Result<T, IedError>;

impl IedError {
    pub fn not_found(reference: impl Into<String>) -> Self {
        Self::NotFound {
            reference: reference.into(),
        }
    }

    pub fn type_mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::TypeMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    pub fn access_denied(reference: impl Into<String>, fc: impl Into<String>) -> Self {
        Self::AccessDenied {
            reference: reference.into(),
            fc: fc.into(),
        }
    }

    pub fn read_only(reference: impl Into<String>) -> Self {
        Self::ReadOnly {
            reference: reference.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }
}

impl From<serde_json::Error> for IedError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

// ============================================================================
// IedError implements IedErrorTrait
// ============================================================================

impl IedErrorTrait for IedError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "NOT_FOUND",
            Self::TypeMismatch { .. } => "TYPE_MISMATCH",
            Self::AccessDenied { .. } => "ACCESS_DENIED",
            Self::ReadOnly { .. } => "READ_ONLY",
            Self::InvalidReference(_) => "INVALID_REFERENCE",
            Self::SubscriptionNotFound(_) => "SUBSCRIPTION_NOT_FOUND",
            Self::ConnectionClosing => "CONNECTION_CLOSING",

            Self::DuplicateName { .. } => "DUPLICATE_NAME",
            Self::ModelFrozen => "MODEL_FROZEN",
            Self::InvalidHierarchy { .. } => "INVALID_HIERARCHY",
            Self::MissingMandatoryObject { .. } => "MISSING_MANDATORY_OBJECT",

            Self::Bind { .. } => "BIND_ERROR",
            Self::AlreadyRunning => "ALREADY_RUNNING",
            Self::ConnectionFailed { .. } => "CONNECTION_FAILED",
            Self::Timeout(_) => "TIMEOUT",
            Self::Protocol(_) => "PROTOCOL_ERROR",
            Self::Rejected { .. } => "REJECTED",

            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::InvalidConfig { .. } => "INVALID_CONFIG",

            Self::Io(_) => "IO_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
            Self::Other(_) => "OTHER_ERROR",
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::NotFound { .. } | Self::SubscriptionNotFound(_) => ErrorCategory::NotFound,

            Self::TypeMismatch { .. } | Self::InvalidReference(_) => ErrorCategory::Validation,

            Self::AccessDenied { .. } | Self::ReadOnly { .. } => ErrorCategory::Permission,

            Self::DuplicateName { .. }
            | Self::ModelFrozen
            | Self::InvalidHierarchy { .. }
            | Self::MissingMandatoryObject { .. } => ErrorCategory::Model,

            Self::Configuration(_) | Self::InvalidConfig { .. } => ErrorCategory::Configuration,

            Self::Bind { .. } | Self::AlreadyRunning => ErrorCategory::Lifecycle,

            Self::ConnectionClosing | Self::ConnectionFailed { .. } => ErrorCategory::Connection,

            Self::Timeout(_) => ErrorCategory::Timeout,

            Self::Protocol(_) | Self::Rejected { .. } => ErrorCategory::Protocol,

            Self::Io(_) | Self::Serialization(_) | Self::Internal(_) => ErrorCategory::Internal,

            Self::Other(_) => ErrorCategory::Unknown,
        }
    }
}

// ============================================================================
// Error Trait - Architectural layer
// ============================================================================

/// Error category enum - used for classification and log levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    // Request layer
    NotFound,
    Validation,
    Permission,

    // Model construction
    Model,
    Configuration,

    // Server lifecycle / transport
    Lifecycle,
    Connection,
    Timeout,
    Protocol,

    // System level
    Internal,
    Unknown,
}

/// Common error capability trait
///
/// The core never retries anything on its own; `is_retryable` and
/// `retry_delay_ms` are hints for client applications.
pub trait IedErrorTrait: std::error::Error + Send + Sync + 'static {
    /// Get error code (for logs and peers)
    fn error_code(&self) -> &'static str;

    /// Get error category
    fn category(&self) -> ErrorCategory;

    /// Whether a client may sensibly retry the failed operation
    fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Connection | ErrorCategory::Timeout
        )
    }

    /// Recommended retry delay in milliseconds
    fn retry_delay_ms(&self) -> u64 {
        match self.category() {
            ErrorCategory::Connection => 1500,
            ErrorCategory::Timeout => 500,
            _ => 0,
        }
    }

    /// Get log level
    fn log_level(&self) -> tracing::Level {
        use tracing::Level;
        match self.category() {
            ErrorCategory::Internal | ErrorCategory::Model | ErrorCategory::Lifecycle => {
                Level::ERROR
            },
            ErrorCategory::Connection | ErrorCategory::Timeout | ErrorCategory::Protocol => {
                Level::WARN
            },
            ErrorCategory::NotFound | ErrorCategory::Validation | ErrorCategory::Permission => {
                Level::DEBUG
            },
            _ => Level::WARN,
        }
    }
}

// Tests
#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(IedError::not_found("LD/LN.DO").error_code(), "NOT_FOUND");
        assert_eq!(IedError::ModelFrozen.error_code(), "MODEL_FROZEN");
        assert_eq!(
            IedError::Bind {
                addr: "0.0.0.0:102".into(),
                reason: "permission denied".into()
            }
            .error_code(),
            "BIND_ERROR"
        );
    }

    #[test]
    fn test_error_retryable() {
        assert!(IedError::Timeout("response".into()).is_retryable());
        assert!(IedError::ConnectionClosing.is_retryable());
        assert!(!IedError::not_found("x").is_retryable());
        assert!(!IedError::read_only("x").is_retryable());
    }

    #[test]
    fn test_log_levels_follow_category() {
        use tracing::Level;
        assert_eq!(IedError::not_found("x").log_level(), Level::DEBUG);
        assert_eq!(IedError::ConnectionClosing.log_level(), Level::WARN);
        assert_eq!(IedError::Internal("boom".into()).log_level(), Level::ERROR);
        assert_eq!(IedError::ConnectionClosing.retry_delay_ms(), 1500);
        assert_eq!(IedError::read_only("x").retry_delay_ms(), 0);
    }

    #[test]
    fn test_display_messages() {
        let err = IedError::DuplicateName {
            parent: "Battery/ZBAT".into(),
            name: "Vol".into(),
        };
        assert_eq!(
            err.to_string(),
            "Duplicate name: Vol already exists under Battery/ZBAT"
        );
        let err = IedError::MissingMandatoryObject {
            logical_node: "Battery/ZBAT".into(),
            object: "NamPlt".into(),
        };
        assert!(err.to_string().contains("NamPlt"));
    }
}
