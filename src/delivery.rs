//! Notification delivery channels.
//!
//! Two channels: transactional email through SendGrid and in-app
//! notification rows in SQLite. The trait seam exists so the reminder
//! engine can run against a recording double in tests.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::db::{NewNotification, TrackerDb};
use crate::error::EngineError;
use crate::google::{send_with_retry, RetryPolicy};

const SENDGRID_SEND_URL: &str = "https://api.sendgrid.com/v3/mail/send";

#[async_trait]
pub trait DeliveryGateway: Send + Sync {
    /// Send a plain-text email. Returns `EngineError::Delivery` when the
    /// provider rejects the message.
    async fn send_email(&self, to: &str, subject: &str, text: &str) -> Result<(), EngineError>;

    /// Record an in-app notification for the user.
    fn insert_notification(
        &self,
        user_id: &str,
        title: &str,
        content: &str,
        link: Option<&str>,
    ) -> Result<(), EngineError>;
}

/// Production gateway: SendGrid for mail, `notifications` table for the
/// in-app channel. Without an API key the email channel is disabled and
/// sends are logged and skipped; the in-app channel still works.
pub struct SendGridGateway {
    api_key: Option<String>,
    mail_from: String,
    db: Arc<Mutex<TrackerDb>>,
}

impl SendGridGateway {
    pub fn new(api_key: Option<String>, mail_from: String, db: Arc<Mutex<TrackerDb>>) -> Self {
        if api_key.is_none() {
            log::warn!("No SendGrid API key configured; email channel disabled");
        }
        Self {
            api_key,
            mail_from,
            db,
        }
    }

    fn db(&self) -> std::sync::MutexGuard<'_, TrackerDb> {
        self.db.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl DeliveryGateway for SendGridGateway {
    async fn send_email(&self, to: &str, subject: &str, text: &str) -> Result<(), EngineError> {
        let Some(api_key) = &self.api_key else {
            log::info!("Email channel disabled; skipping mail to {to}");
            return Ok(());
        };

        let body = serde_json::json!({
            "personalizations": [{ "to": [{ "email": to }] }],
            "from": { "email": self.mail_from },
            "subject": subject,
            "content": [{ "type": "text/plain", "value": text }],
        });

        let client = crate::google::http_client()?;
        let resp = send_with_retry(
            client
                .post(SENDGRID_SEND_URL)
                .bearer_auth(api_key)
                .json(&body),
            &RetryPolicy::default(),
        )
        .await?;

        let status = resp.status();
        if !status.is_success() {
            let detail = resp.text().await.unwrap_or_default();
            return Err(EngineError::Delivery(format!(
                "SendGrid returned {status}: {detail}"
            )));
        }
        Ok(())
    }

    fn insert_notification(
        &self,
        user_id: &str,
        title: &str,
        content: &str,
        link: Option<&str>,
    ) -> Result<(), EngineError> {
        self.db().insert_notification(&NewNotification {
            user_id: user_id.to_string(),
            title: title.to_string(),
            content: content.to_string(),
            link: link.map(String::from),
        })?;
        Ok(())
    }
}
