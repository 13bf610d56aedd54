//! Shared application context: config, store handles and the service
//! objects built from them.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono_tz::Tz;

use crate::config::Config;
use crate::db::TrackerDb;
use crate::delivery::SendGridGateway;
use crate::error::EngineError;
use crate::google::token::{
    CredentialStore, HttpTokenRefresher, RefreshedToken, SqliteCredentialStore,
    TokenLifecycleManager, TokenRefresher,
};
use crate::google::OAuthCredential;
use crate::reminder::ReminderEngine;
use crate::search::MailSearchService;

/// Stands in for the refresher when no Google client is configured.
/// Stored credentials then act as disconnected until one is provided.
struct DisabledRefresher;

#[async_trait]
impl TokenRefresher for DisabledRefresher {
    async fn refresh(&self, _credential: &OAuthCredential) -> Result<RefreshedToken, EngineError> {
        Err(EngineError::Configuration(
            "Google client not configured".to_string(),
        ))
    }
}

pub struct AppState {
    pub config: Config,
    pub db: Arc<Mutex<TrackerDb>>,
    pub credentials: Arc<dyn CredentialStore>,
    pub tokens: Arc<TokenLifecycleManager>,
    pub search: MailSearchService,
    pub reminders: ReminderEngine,
}

impl AppState {
    pub fn new(config: Config) -> Result<Self, EngineError> {
        let db = match &config.db_path {
            Some(path) => TrackerDb::open_at(PathBuf::from(path))?,
            None => TrackerDb::open()?,
        };
        let db = Arc::new(Mutex::new(db));

        let credentials: Arc<dyn CredentialStore> =
            Arc::new(SqliteCredentialStore::new(Arc::clone(&db)));
        let refresher: Arc<dyn TokenRefresher> = match &config.google {
            Some(google) => Arc::new(HttpTokenRefresher::new(google.clone())?),
            None => {
                log::warn!("No Google client configured; mailbox integration disabled");
                Arc::new(DisabledRefresher)
            }
        };
        let tokens = Arc::new(TokenLifecycleManager::new(
            Arc::clone(&credentials),
            refresher,
        ));

        let timezone: Tz = config.reminder_schedule.timezone.parse().map_err(|_| {
            EngineError::Configuration(format!(
                "Invalid timezone: {}",
                config.reminder_schedule.timezone
            ))
        })?;

        let gateway = Arc::new(SendGridGateway::new(
            config.sendgrid_api_key.clone(),
            config.mail_from.clone(),
            Arc::clone(&db),
        ));

        Ok(Self {
            search: MailSearchService::new(Arc::clone(&tokens)),
            reminders: ReminderEngine::new(
                Arc::clone(&db),
                gateway,
                timezone,
                config.app_url.clone(),
            ),
            tokens,
            credentials,
            db,
            config,
        })
    }
}
