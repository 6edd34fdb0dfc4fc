// crates/warden-server/src/error.rs
// Standardized error types for Warden

use thiserror::Error;

/// Precondition that failed before validation could run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precondition {
    ReadBeforeEdit,
    ScopeViolation,
    HaltActive,
    MustEscalate,
    SessionConflict,
    SessionNotInitialized,
}

impl Precondition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Precondition::ReadBeforeEdit => "read_before_edit",
            Precondition::ScopeViolation => "scope_violation",
            Precondition::HaltActive => "halt_active",
            Precondition::MustEscalate => "must_escalate",
            Precondition::SessionConflict => "session_conflict",
            Precondition::SessionNotInitialized => "session_not_initialized",
        }
    }
}

/// Main error type for the Warden library.
///
/// Only `Internal` (and the wrapped transport variants the resilience
/// fabric reshapes) map to an opaque 500 / `-32603`; every other kind
/// carries a stable code and a user-safe message. Underlying causes are
/// logged, never surfaced to clients.
#[derive(Error, Debug)]
pub enum WardenError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("rate limited")]
    RateLimited {
        /// Seconds until the current window resets.
        retry_after_secs: u64,
    },

    #[error("precondition failed: {}: {message}", kind.as_str())]
    PreconditionFailed {
        kind: Precondition,
        message: String,
    },

    #[error("operation timed out: {0}")]
    Timeout(String),

    #[error("cache error: {0}")]
    Cache(String),

    #[error("{dependency} unavailable")]
    DependencyUnavailable { dependency: &'static str },

    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// Convenience type alias for Result using WardenError.
pub type Result<T> = std::result::Result<T, WardenError>;

impl WardenError {
    pub fn precondition(kind: Precondition, message: impl Into<String>) -> Self {
        WardenError::PreconditionFailed {
            kind,
            message: message.into(),
        }
    }

    /// Stable machine-readable error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            WardenError::InvalidInput(_) => "invalid_input",
            WardenError::NotFound(_) => "not_found",
            WardenError::Unauthorized(_) => "unauthorized",
            WardenError::RateLimited { .. } => "rate_limited",
            WardenError::PreconditionFailed { .. } => "precondition_failed",
            WardenError::Timeout(_) => "timeout",
            WardenError::Cache(_) => "cache_error",
            WardenError::DependencyUnavailable { .. } => "dependency_unavailable",
            WardenError::Db(_)
            | WardenError::Redis(_)
            | WardenError::Io(_)
            | WardenError::Json(_)
            | WardenError::Config(_)
            | WardenError::Internal(_)
            | WardenError::Anyhow(_) => "internal",
        }
    }

    /// Whether the resilience fabric should count this as a dependency
    /// failure (and so trip the breaker / retry the read).
    pub fn is_dependency_failure(&self) -> bool {
        matches!(
            self,
            WardenError::Db(_)
                | WardenError::Redis(_)
                | WardenError::Io(_)
                | WardenError::Timeout(_)
                | WardenError::DependencyUnavailable { .. }
        )
    }

    /// HTTP status for the management API surface.
    pub fn http_status(&self) -> u16 {
        match self {
            WardenError::InvalidInput(_) => 400,
            WardenError::NotFound(_) => 404,
            WardenError::Unauthorized(_) => 401,
            WardenError::RateLimited { .. } => 429,
            WardenError::PreconditionFailed { .. } => 412,
            WardenError::Timeout(_) => 504,
            WardenError::DependencyUnavailable { .. } => 503,
            _ => 500,
        }
    }

    /// JSON-RPC error code for the MCP surface.
    pub fn jsonrpc_code(&self) -> i64 {
        match self {
            WardenError::InvalidInput(_) => -32602,
            WardenError::NotFound(_) => -32601,
            WardenError::Unauthorized(_) => -32003,
            WardenError::RateLimited { .. } => -32001,
            WardenError::PreconditionFailed { .. } => -32004,
            WardenError::DependencyUnavailable { .. } => -32002,
            WardenError::Timeout(_) => -32002,
            _ => -32603,
        }
    }

    /// User-safe message. Internal variants are collapsed to a generic
    /// string; the cause stays in the logs.
    pub fn user_message(&self) -> String {
        match self.kind() {
            "internal" => "internal error".to_string(),
            _ => self.to_string(),
        }
    }
}

impl From<String> for WardenError {
    fn from(s: String) -> Self {
        WardenError::Internal(s)
    }
}

impl From<tokio::task::JoinError> for WardenError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_cancelled() {
            WardenError::Timeout("task cancelled".to_string())
        } else {
            WardenError::Internal(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(WardenError::InvalidInput("x".into()).kind(), "invalid_input");
        assert_eq!(
            WardenError::RateLimited { retry_after_secs: 1 }.kind(),
            "rate_limited"
        );
        assert_eq!(
            WardenError::DependencyUnavailable { dependency: "database" }.kind(),
            "dependency_unavailable"
        );
        assert_eq!(WardenError::Internal("boom".into()).kind(), "internal");
    }

    #[test]
    fn test_internal_is_opaque() {
        let err = WardenError::Internal("connection string leaked".into());
        assert_eq!(err.user_message(), "internal error");
        assert_eq!(err.http_status(), 500);
        assert_eq!(err.jsonrpc_code(), -32603);
    }

    #[test]
    fn test_rate_limited_mapping() {
        let err = WardenError::RateLimited { retry_after_secs: 30 };
        assert_eq!(err.http_status(), 429);
        assert_eq!(err.jsonrpc_code(), -32001);
    }

    #[test]
    fn test_precondition_codes() {
        let err = WardenError::precondition(Precondition::MustEscalate, "3 strikes on T1");
        assert_eq!(err.kind(), "precondition_failed");
        assert_eq!(err.jsonrpc_code(), -32004);
        assert!(err.user_message().contains("must_escalate"));
    }

    #[test]
    fn test_dependency_failure_classification() {
        assert!(WardenError::Timeout("q".into()).is_dependency_failure());
        assert!(!WardenError::InvalidInput("q".into()).is_dependency_failure());
        assert!(!WardenError::NotFound("q".into()).is_dependency_failure());
    }
}
