//! Error types for the notification engine
//!
//! Errors are classified by how callers must react:
//! - Disconnected: the Gmail integration needs re-authorization; UI-facing
//!   features degrade to "not connected" instead of erroring loudly.
//! - Transient: a single network call failed; that unit of work is skipped
//!   and processing continues.
//! - Configuration: missing client config; fatal for the affected feature
//!   only, never for the whole process.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// No stored credential, or refresh was rejected by the provider.
    /// Callers must treat this as "integration needs re-authorization"
    /// and never retry silently in a loop.
    #[error("Gmail integration disconnected")]
    Disconnected,

    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),

    #[error("HTTP: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Operation timed out after {0} seconds")]
    Timeout(u64),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Database: {0}")]
    Db(#[from] crate::db::DbError),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("Mail delivery failed: {0}")]
    Delivery(String),
}

impl EngineError {
    /// True for failures where skipping the unit of work and continuing
    /// is the right response (per-domain fetch, per-reminder delivery).
    pub fn is_transient(&self) -> bool {
        match self {
            EngineError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            EngineError::Api { status, .. } => *status == 429 || *status >= 500,
            EngineError::Timeout(_) | EngineError::Delivery(_) => true,
            _ => false,
        }
    }

    /// True when the caller should surface "not connected" and hide the
    /// mailbox widgets rather than showing an error.
    pub fn is_auth(&self) -> bool {
        matches!(
            self,
            EngineError::Disconnected | EngineError::RefreshFailed(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_5xx_is_transient() {
        let err = EngineError::Api {
            status: 503,
            message: "unavailable".into(),
        };
        assert!(err.is_transient());
    }

    #[test]
    fn test_rate_limit_is_transient() {
        let err = EngineError::Api {
            status: 429,
            message: "slow down".into(),
        };
        assert!(err.is_transient());
    }

    #[test]
    fn test_disconnected_is_auth_not_transient() {
        assert!(EngineError::Disconnected.is_auth());
        assert!(!EngineError::Disconnected.is_transient());
    }

    #[test]
    fn test_configuration_is_neither() {
        let err = EngineError::Configuration("missing client_id".into());
        assert!(!err.is_transient());
        assert!(!err.is_auth());
    }
}
