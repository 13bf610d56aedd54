//! HTTP surface: the hardened reminder trigger plus thin JSON wrappers
//! around the mailbox services.
//!
//! The trigger endpoint requires the shared secret in the
//! `x-cron-secret` header. With no secret configured the endpoint is
//! disabled outright rather than left open.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::google::oauth;
use crate::search::CompanySearchRequest;
use crate::state::AppState;

const CRON_SECRET_HEADER: &str = "x-cron-secret";

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/cron/reminders", post(trigger_reminders))
        .route("/api/mail/search", get(mail_search))
        .route("/api/mail/unread", get(mail_unread))
        .route("/api/mail/{message_id}/read", post(mail_mark_read))
        .route("/api/gmail/status", get(gmail_status))
        .route("/api/gmail/consent-url", get(gmail_consent_url))
        .route("/api/gmail/callback", post(gmail_callback))
        .route("/api/gmail/disconnect", post(gmail_disconnect))
        .with_state(state)
}

/// Bind and serve until the process is stopped.
pub async fn serve(state: Arc<AppState>) -> Result<(), EngineError> {
    let addr = state.config.listen_addr.clone();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    log::info!("HTTP server listening on {addr}");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

// ============================================================================
// Error mapping
// ============================================================================

struct ApiError(EngineError);

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            EngineError::Disconnected | EngineError::RefreshFailed(_) => StatusCode::UNAUTHORIZED,
            EngineError::Api { .. } | EngineError::Http(_) => StatusCode::BAD_GATEWAY,
            EngineError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(serde_json::json!({ "error": self.0.to_string() }));
        (status, body).into_response()
    }
}

// ============================================================================
// Handlers
// ============================================================================

async fn healthz() -> &'static str {
    "ok"
}

async fn trigger_reminders(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<crate::reminder::RunReport>, Response> {
    let Some(expected) = &state.config.cron_secret else {
        log::warn!("Reminder trigger rejected: no cron secret configured");
        return Err(StatusCode::SERVICE_UNAVAILABLE.into_response());
    };

    let presented = headers
        .get(CRON_SECRET_HEADER)
        .and_then(|v| v.to_str().ok());
    if presented != Some(expected.as_str()) {
        log::warn!("Reminder trigger rejected: bad or missing {CRON_SECRET_HEADER}");
        return Err(StatusCode::UNAUTHORIZED.into_response());
    }

    let report = state
        .reminders
        .run_with_timeout(Utc::now(), state.config.run_timeout_secs)
        .await
        .map_err(|e| ApiError(e).into_response())?;
    Ok(Json(report))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MailSearchParams {
    user_id: String,
    company: String,
    #[serde(default)]
    company_email: Option<String>,
    #[serde(default = "default_days_back")]
    days: u32,
    #[serde(default)]
    unread_only: bool,
}

fn default_days_back() -> u32 {
    30
}

async fn mail_search(
    State(state): State<Arc<AppState>>,
    Query(params): Query<MailSearchParams>,
) -> Result<Json<Vec<crate::google::gmail::EmailMessage>>, ApiError> {
    let request = CompanySearchRequest {
        company_name: params.company,
        company_email: params.company_email,
        days_back: params.days,
        only_unread: params.unread_only,
    };
    let messages = state
        .search
        .search_company_mail(&params.user_id, &request)
        .await?;
    Ok(Json(messages))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UnreadParams {
    user_id: String,
    #[serde(default)]
    company: Option<String>,
    #[serde(default)]
    company_email: Option<String>,
}

#[derive(Debug, Serialize)]
struct UnreadResponse {
    count: u64,
}

async fn mail_unread(
    State(state): State<Arc<AppState>>,
    Query(params): Query<UnreadParams>,
) -> Result<Json<UnreadResponse>, ApiError> {
    let count = state
        .search
        .unread_count(
            &params.user_id,
            params.company.as_deref(),
            params.company_email.as_deref(),
        )
        .await?;
    Ok(Json(UnreadResponse { count }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserParams {
    user_id: String,
}

async fn mail_mark_read(
    State(state): State<Arc<AppState>>,
    Path(message_id): Path<String>,
    Query(params): Query<UserParams>,
) -> Result<StatusCode, ApiError> {
    state
        .search
        .mark_as_read(&params.user_id, &message_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn gmail_status(
    State(state): State<Arc<AppState>>,
    Query(params): Query<UserParams>,
) -> Result<Json<oauth::ConnectionStatus>, ApiError> {
    let status = oauth::connection_status(&state.credentials, &params.user_id)?;
    Ok(Json(status))
}

#[derive(Debug, Serialize)]
struct ConsentUrlResponse {
    url: String,
}

async fn gmail_consent_url(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ConsentUrlResponse>, ApiError> {
    let google = state.config.google.as_ref().ok_or_else(|| {
        EngineError::Configuration("Google client not configured".to_string())
    })?;
    let url = oauth::consent_url(google)?;
    Ok(Json(ConsentUrlResponse { url }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CallbackBody {
    user_id: String,
    code: String,
}

async fn gmail_callback(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CallbackBody>,
) -> Result<Json<oauth::ConnectionStatus>, ApiError> {
    let google = state.config.google.as_ref().ok_or_else(|| {
        EngineError::Configuration("Google client not configured".to_string())
    })?;
    oauth::exchange_code(&state.credentials, google, &body.user_id, &body.code).await?;
    let status = oauth::connection_status(&state.credentials, &body.user_id)?;
    Ok(Json(status))
}

async fn gmail_disconnect(
    State(state): State<Arc<AppState>>,
    Json(body): Json<UserParams>,
) -> Result<StatusCode, ApiError> {
    oauth::disconnect(&state.credentials, &body.user_id)?;
    Ok(StatusCode::NO_CONTENT)
}
