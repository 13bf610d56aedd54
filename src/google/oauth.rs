//! Authorization-code exchange and connection management.
//!
//! The browser side of the consent flow lives outside this engine; the
//! callback hands us a code, we exchange it for tokens and persist the
//! resulting credential for the user.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::Serialize;
use url::Url;

use super::token::CredentialStore;
use super::{send_with_retry, OAuthCredential, RetryPolicy, TokenResponse, GMAIL_SCOPE};
use crate::config::GoogleClientConfig;
use crate::error::EngineError;

/// Gmail connection status as surfaced to settings UIs.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    pub connected: bool,
    pub expires_at: Option<String>,
    pub is_expired: bool,
}

/// Build the consent URL the UI redirects the user to.
///
/// `access_type=offline` + `prompt=consent` force Google to issue a
/// refresh token even on re-authorization.
pub fn consent_url(google: &GoogleClientConfig) -> Result<String, EngineError> {
    let mut url = Url::parse("https://accounts.google.com/o/oauth2/v2/auth")
        .map_err(|e| EngineError::Configuration(format!("auth URL: {e}")))?;
    url.query_pairs_mut()
        .append_pair("client_id", &google.client_id)
        .append_pair("redirect_uri", &google.redirect_uri)
        .append_pair("response_type", "code")
        .append_pair("scope", GMAIL_SCOPE)
        .append_pair("access_type", "offline")
        .append_pair("prompt", "consent");
    Ok(url.to_string())
}

/// Exchange an authorization code for tokens and persist the credential.
///
/// Replaces any previously stored credential for the user.
pub async fn exchange_code(
    store: &Arc<dyn CredentialStore>,
    google: &GoogleClientConfig,
    user_id: &str,
    code: &str,
) -> Result<OAuthCredential, EngineError> {
    let client = super::http_client()?;
    let resp = send_with_retry(
        client.post(super::DEFAULT_TOKEN_URI).form(&[
            ("code", code),
            ("client_id", google.client_id.as_str()),
            ("client_secret", google.client_secret.as_str()),
            ("redirect_uri", google.redirect_uri.as_str()),
            ("grant_type", "authorization_code"),
        ]),
        &RetryPolicy::default(),
    )
    .await?;

    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(EngineError::Api {
            status: status.as_u16(),
            message: body,
        });
    }

    let token: TokenResponse = resp.json().await?;
    let refresh_token = token.refresh_token.ok_or_else(|| {
        EngineError::RefreshFailed("No refresh_token in exchange response".to_string())
    })?;

    let credential = OAuthCredential {
        user_id: user_id.to_string(),
        access_token: token.access_token,
        refresh_token,
        token_uri: super::DEFAULT_TOKEN_URI.to_string(),
        expires_at: (Utc::now() + Duration::seconds(token.expires_in as i64)).to_rfc3339(),
    };
    store.upsert(&credential)?;
    Ok(credential)
}

/// Report whether the user's mailbox integration is connected.
pub fn connection_status(
    store: &Arc<dyn CredentialStore>,
    user_id: &str,
) -> Result<ConnectionStatus, EngineError> {
    match store.load(user_id)? {
        Some(credential) => {
            let is_expired = credential.is_expired();
            Ok(ConnectionStatus {
                // Expired-but-refreshable still counts as connected; a
                // refresh happens on the next token request.
                connected: true,
                expires_at: Some(credential.expires_at),
                is_expired,
            })
        }
        None => Ok(ConnectionStatus {
            connected: false,
            expires_at: None,
            is_expired: false,
        }),
    }
}

/// Explicit disconnect: delete the stored credential.
pub fn disconnect(store: &Arc<dyn CredentialStore>, user_id: &str) -> Result<(), EngineError> {
    store.delete(user_id)
}
