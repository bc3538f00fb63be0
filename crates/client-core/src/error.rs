//! Error types for the call client
//!
//! Four errors end a call attempt outright and are shown to the user:
//!
//! - [`CallError::PermissionDenied`] - camera or microphone access refused
//! - [`CallError::EngineInitFailure`] - the RTC engine could not be created
//! - [`CallError::TokenNotFound`] - no active call token in the document store
//! - [`CallError::PeerTimeout`] - nobody joined before the wait countdown ran out
//!
//! None of them are retried automatically. A permission denial can be offered
//! again by the host once the user changes their mind; the others require a
//! new call attempt.
//!
//! ```rust,no_run
//! # use randcall_client_core::{CallSessionBuilder, CallError};
//! # async fn example(builder: CallSessionBuilder) {
//! match builder.launch().await {
//!     Ok(handle) => println!("Call screen opened: {}", handle.id()),
//!     Err(CallError::PermissionDenied { missing }) => {
//!         println!("Need permissions: {:?}", missing);
//!     }
//!     Err(e) => eprintln!("Could not start call ({}): {}", e.category(), e),
//! }
//! # }
//! ```

use thiserror::Error;

use crate::permission::Permission;

/// Result type alias for call client operations
pub type CallResult<T> = Result<T, CallError>;

/// Errors produced by the call client
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    #[error("Permission denied: {missing:?}")]
    PermissionDenied { missing: Vec<Permission> },

    #[error("RTC engine initialization failed: {reason}")]
    EngineInitFailure { reason: String },

    #[error("Token not found")]
    TokenNotFound,

    #[error("No peer joined within {waited_ms}ms")]
    PeerTimeout { waited_ms: u64 },

    #[error("Invalid configuration: {field} - {reason}")]
    InvalidConfiguration { field: String, reason: String },

    #[error("Missing required configuration: {field}")]
    MissingConfiguration { field: String },

    #[error("Transport failed: {reason}")]
    TransportFailed { reason: String },

    #[error("Document store error: {reason}")]
    StoreError { reason: String },

    #[error("Operation timeout after {duration_ms}ms")]
    OperationTimeout { duration_ms: u64 },

    #[error("Call session is closed")]
    SessionClosed,
}

impl CallError {
    /// Create an engine initialization error
    pub fn engine_init_failure(reason: impl Into<String>) -> Self {
        Self::EngineInitFailure { reason: reason.into() }
    }

    /// Create a transport error
    pub fn transport_failed(reason: impl Into<String>) -> Self {
        Self::TransportFailed { reason: reason.into() }
    }

    /// Create a document store error
    pub fn store_error(reason: impl Into<String>) -> Self {
        Self::StoreError { reason: reason.into() }
    }

    /// Create an invalid configuration error
    pub fn invalid_configuration(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error ends the current call attempt
    pub fn is_terminal_for_attempt(&self) -> bool {
        matches!(
            self,
            CallError::PermissionDenied { .. }
                | CallError::EngineInitFailure { .. }
                | CallError::TokenNotFound
                | CallError::PeerTimeout { .. }
                | CallError::SessionClosed
        )
    }

    /// Whether the host may offer the same attempt again after user action
    pub fn is_reofferable(&self) -> bool {
        matches!(self, CallError::PermissionDenied { .. })
    }

    /// Nothing in the call flow is retried automatically.
    pub fn is_recoverable(&self) -> bool {
        false
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            CallError::PermissionDenied { .. } => "permission",
            CallError::EngineInitFailure { .. } | CallError::TransportFailed { .. } => "transport",
            CallError::TokenNotFound | CallError::StoreError { .. } => "token",
            CallError::PeerTimeout { .. } | CallError::SessionClosed => "call",
            CallError::InvalidConfiguration { .. } | CallError::MissingConfiguration { .. } => {
                "configuration"
            }
            CallError::OperationTimeout { .. } => "system",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_taxonomy_is_terminal_and_not_retried() {
        let errors = vec![
            CallError::PermissionDenied {
                missing: vec![Permission::Camera],
            },
            CallError::engine_init_failure("bad app id"),
            CallError::TokenNotFound,
            CallError::PeerTimeout { waited_ms: 15000 },
        ];

        for error in errors {
            assert!(error.is_terminal_for_attempt(), "{error} should end the attempt");
            assert!(!error.is_recoverable());
        }
    }

    #[test]
    fn test_only_permission_denial_is_reofferable() {
        assert!(CallError::PermissionDenied { missing: vec![] }.is_reofferable());
        assert!(!CallError::TokenNotFound.is_reofferable());
        assert!(!CallError::PeerTimeout { waited_ms: 1 }.is_reofferable());
    }

    #[test]
    fn test_categories() {
        assert_eq!(CallError::TokenNotFound.category(), "token");
        assert_eq!(CallError::store_error("offline").category(), "token");
        assert_eq!(CallError::engine_init_failure("x").category(), "transport");
        assert_eq!(
            CallError::invalid_configuration("wait_timeout_ms", "zero").category(),
            "configuration"
        );
    }

    #[test]
    fn test_display_messages() {
        assert_eq!(CallError::TokenNotFound.to_string(), "Token not found");
        assert_eq!(
            CallError::PeerTimeout { waited_ms: 15000 }.to_string(),
            "No peer joined within 15000ms"
        );
    }
}
