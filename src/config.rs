//! Configuration loaded from `~/.shukatsu/config.json`, with secrets
//! overridable via environment variables so deployments can keep them
//! out of the file.
//!
//! Missing Google client config disables the mailbox feature only; a
//! missing SendGrid key disables the email channel only. Neither is
//! fatal for the whole process.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// OAuth client registration for the Google integration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoogleClientConfig {
    pub client_id: String,
    pub client_secret: String,
    /// Where Google sends the consent redirect; the callback handler
    /// outside this engine forwards the code to us.
    pub redirect_uri: String,
}

/// When and in which timezone the reminder batch runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub enabled: bool,
    pub cron: String,
    pub timezone: String,
}

impl ScheduleEntry {
    /// Default reminder schedule: 8 AM every day, Japan time.
    pub fn default_reminders() -> Self {
        Self {
            enabled: true,
            cron: "0 8 * * *".to_string(),
            timezone: "Asia/Tokyo".to_string(),
        }
    }
}

impl Default for ScheduleEntry {
    fn default() -> Self {
        Self::default_reminders()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Base URL used in reminder links ("open the app" etc.).
    #[serde(default = "default_app_url")]
    pub app_url: String,

    #[serde(default)]
    pub google: Option<GoogleClientConfig>,

    /// SendGrid API key for the transactional email channel.
    #[serde(default)]
    pub sendgrid_api_key: Option<String>,

    /// From address for reminder mail.
    #[serde(default = "default_mail_from")]
    pub mail_from: String,

    /// Shared secret required in the `x-cron-secret` header of the
    /// reminder-run trigger endpoint.
    #[serde(default)]
    pub cron_secret: Option<String>,

    #[serde(default = "ScheduleEntry::default_reminders")]
    pub reminder_schedule: ScheduleEntry,

    /// Listen address for the HTTP trigger server.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Override for the SQLite path (defaults to ~/.shukatsu/tracker.db).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_path: Option<String>,

    /// Wall-clock budget for one reminder run, in seconds.
    #[serde(default = "default_run_timeout_secs")]
    pub run_timeout_secs: u64,
}

fn default_app_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_mail_from() -> String {
    "noreply@example.com".to_string()
}

fn default_listen_addr() -> String {
    "127.0.0.1:8787".to_string()
}

fn default_run_timeout_secs() -> u64 {
    300
}

impl Default for Config {
    fn default() -> Self {
        Self {
            app_url: default_app_url(),
            google: None,
            sendgrid_api_key: None,
            mail_from: default_mail_from(),
            cron_secret: None,
            reminder_schedule: ScheduleEntry::default_reminders(),
            listen_addr: default_listen_addr(),
            db_path: None,
            run_timeout_secs: default_run_timeout_secs(),
        }
    }
}

/// Canonical config file path: `~/.shukatsu/config.json`.
pub fn config_path() -> Result<PathBuf, EngineError> {
    let home = dirs::home_dir()
        .ok_or_else(|| EngineError::Configuration("Could not find home directory".into()))?;
    Ok(home.join(".shukatsu").join("config.json"))
}

/// Load configuration. A missing file yields the defaults (env vars can
/// still supply the secrets); a malformed file is an error.
pub fn load_config() -> Result<Config, EngineError> {
    let path = config_path()?;
    let mut config = if path.exists() {
        let content = std::fs::read_to_string(&path)?;
        serde_json::from_str(&content)
            .map_err(|e| EngineError::Configuration(format!("{}: {}", path.display(), e)))?
    } else {
        log::info!(
            "No config file at {}; starting with defaults",
            path.display()
        );
        Config::default()
    };

    apply_env_overrides(&mut config);
    Ok(config)
}

/// Secrets from the environment win over the file.
fn apply_env_overrides(config: &mut Config) {
    if let (Ok(id), Ok(secret)) = (
        std::env::var("GOOGLE_CLIENT_ID"),
        std::env::var("GOOGLE_CLIENT_SECRET"),
    ) {
        let redirect_uri = std::env::var("GOOGLE_REDIRECT_URI")
            .unwrap_or_else(|_| format!("{}/api/auth/callback/google", config.app_url));
        config.google = Some(GoogleClientConfig {
            client_id: id,
            client_secret: secret,
            redirect_uri,
        });
    }
    if let Ok(key) = std::env::var("SENDGRID_API_KEY") {
        config.sendgrid_api_key = Some(key);
    }
    if let Ok(secret) = std::env::var("CRON_SECRET") {
        config.cron_secret = Some(secret);
    }
    if let Ok(from) = std::env::var("MAIL_FROM") {
        config.mail_from = from;
    }
    if let Ok(url) = std::env::var("APP_URL") {
        config.app_url = url;
    }
}
