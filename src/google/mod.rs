//! Google API surface: OAuth credential lifecycle + Gmail v1 client.
//!
//! Modules:
//! - oauth: authorization-code exchange, connection status, disconnect
//! - token: valid-token resolution with single-flight refresh per user
//! - gmail: mail search / message fetch / unread count / mark-read

pub mod gmail;
pub mod oauth;
pub mod token;

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Gmail scope requested during authorization.
pub const GMAIL_SCOPE: &str = "https://www.googleapis.com/auth/gmail.modify";

/// Default Google token endpoint.
pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// Per-request timeout so a stalled provider cannot hang a whole run.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

/// Stored OAuth credential, one per user (upsert-by-replace).
///
/// Created on successful authorization exchange, mutated (access token
/// + expiry) on every refresh, deleted on explicit disconnect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthCredential {
    pub user_id: String,
    pub access_token: String,
    /// Long-lived; the provider does not rotate it in the refresh flow.
    pub refresh_token: String,
    pub token_uri: String,
    /// RFC 3339 expiry of the access token.
    pub expires_at: String,
}

impl OAuthCredential {
    /// True when the access token must be refreshed before use.
    /// A 60-second skew margin avoids handing out a token that dies
    /// mid-request; an unparseable expiry counts as expired.
    pub fn is_expired(&self) -> bool {
        match chrono::DateTime::parse_from_rfc3339(&self.expires_at) {
            Ok(expiry) => expiry <= chrono::Utc::now() + chrono::Duration::seconds(60),
            Err(_) => true,
        }
    }
}

/// Token endpoint response for both grant types.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default = "default_expires_in")]
    pub expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 250,
            max_backoff_ms: 2_000,
        }
    }
}

fn is_retryable_status(status: reqwest::StatusCode) -> bool {
    status == reqwest::StatusCode::TOO_MANY_REQUESTS
        || status == reqwest::StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
}

fn retry_delay(
    attempt: u32,
    policy: &RetryPolicy,
    retry_after: Option<&reqwest::header::HeaderValue>,
) -> Duration {
    if let Some(value) = retry_after.and_then(|v| v.to_str().ok()) {
        if let Ok(secs) = value.parse::<u64>() {
            return Duration::from_secs(secs.min(30));
        }
    }

    let exponent = 2u64.saturating_pow(attempt.saturating_sub(1));
    let base = policy
        .initial_backoff_ms
        .saturating_mul(exponent)
        .min(policy.max_backoff_ms);
    let jitter = (std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos() as u64)
        .unwrap_or(0))
        % 150;
    Duration::from_millis(base.saturating_add(jitter))
}

/// Send a request, retrying 429/408/5xx and transport-level failures
/// with capped exponential backoff. Honors Retry-After when present.
pub async fn send_with_retry(
    request: reqwest::RequestBuilder,
    policy: &RetryPolicy,
) -> Result<reqwest::Response, EngineError> {
    let attempts = policy.max_attempts.max(1);
    for attempt in 1..=attempts {
        let Some(cloned) = request.try_clone() else {
            return request.send().await.map_err(EngineError::Http);
        };

        match cloned.send().await {
            Ok(response) => {
                let status = response.status();
                if is_retryable_status(status) && attempt < attempts {
                    let delay = retry_delay(
                        attempt,
                        policy,
                        response.headers().get(reqwest::header::RETRY_AFTER),
                    );
                    log::warn!(
                        "google retry {}/{} after status {} (sleep {:?})",
                        attempt,
                        attempts,
                        status,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    continue;
                }
                return Ok(response);
            }
            Err(err) => {
                let retryable_transport = err.is_timeout() || err.is_connect();
                if retryable_transport && attempt < attempts {
                    let delay = retry_delay(attempt, policy, None);
                    log::warn!(
                        "google retry {}/{} after transport error: {} (sleep {:?})",
                        attempt,
                        attempts,
                        err,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    continue;
                }
                return Err(EngineError::Http(err));
            }
        }
    }

    Err(EngineError::RefreshFailed(
        "request exhausted retries".to_string(),
    ))
}

/// Shared HTTP client with the per-request timeout applied. A client
/// without the timeout is never handed out; a builder failure is an
/// error, not a fallback.
pub fn http_client() -> Result<reqwest::Client, EngineError> {
    Ok(reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credential(expires_at: String) -> OAuthCredential {
        OAuthCredential {
            user_id: "u1".to_string(),
            access_token: "ya29.test".to_string(),
            refresh_token: "1//refresh".to_string(),
            token_uri: DEFAULT_TOKEN_URI.to_string(),
            expires_at,
        }
    }

    #[test]
    fn test_future_expiry_is_not_expired() {
        let future = chrono::Utc::now() + chrono::Duration::hours(1);
        assert!(!credential(future.to_rfc3339()).is_expired());
    }

    #[test]
    fn test_past_expiry_is_expired() {
        let past = chrono::Utc::now() - chrono::Duration::hours(1);
        assert!(credential(past.to_rfc3339()).is_expired());
    }

    #[test]
    fn test_expiry_within_skew_margin_is_expired() {
        let soon = chrono::Utc::now() + chrono::Duration::seconds(30);
        assert!(credential(soon.to_rfc3339()).is_expired());
    }

    #[test]
    fn test_unparseable_expiry_is_expired() {
        assert!(credential("not a timestamp".to_string()).is_expired());
    }

    #[test]
    fn test_token_response_defaults_expires_in() {
        let json = r#"{"access_token": "ya29.x"}"#;
        let resp: TokenResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.expires_in, 3600);
        assert!(resp.refresh_token.is_none());
    }

    #[test]
    fn test_retry_delay_honors_retry_after() {
        let policy = RetryPolicy::default();
        let header = reqwest::header::HeaderValue::from_static("7");
        let delay = retry_delay(1, &policy, Some(&header));
        assert_eq!(delay, Duration::from_secs(7));
    }

    #[test]
    fn test_http_client_builds_with_timeout() {
        assert!(http_client().is_ok());
    }

    #[test]
    fn test_retry_delay_caps_backoff() {
        let policy = RetryPolicy::default();
        let delay = retry_delay(10, &policy, None);
        assert!(delay <= Duration::from_millis(policy.max_backoff_ms + 150));
    }
}
