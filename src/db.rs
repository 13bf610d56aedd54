//! SQLite-backed state for the notification engine.
//!
//! The database lives at `~/.shukatsu/tracker.db`. The engine reads the
//! tracker projections (profiles, companies, events, participants,
//! reflections) and owns three tables: `notifications` (in-app channel),
//! `gmail_credentials` (one OAuth credential per user) and
//! `reminder_log` (per-day delivery dedup).

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use thiserror::Error;

use crate::google::OAuthCredential;

/// Errors specific to database operations.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Home directory not found")]
    HomeDirNotFound,

    #[error("Failed to create database directory: {0}")]
    CreateDir(std::io::Error),
}

/// A row from the `profiles` table.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DbProfile {
    pub id: String,
    pub email: Option<String>,
    pub nickname: Option<String>,
}

/// An event row joined with its company name.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DbEvent {
    pub id: String,
    pub company_id: Option<String>,
    pub company_name: Option<String>,
    pub title: String,
    pub kind: String,
    pub start_time: String,
}

/// A new in-app notification row.
#[derive(Debug, Clone)]
pub struct NewNotification {
    pub user_id: String,
    pub title: String,
    pub content: String,
    pub link: Option<String>,
}

/// SQLite connection wrapper.
///
/// Intentionally NOT `Clone`; held behind a `std::sync::Mutex` in the
/// engine context so tasks serialize their access.
pub struct TrackerDb {
    conn: Connection,
}

impl TrackerDb {
    /// Open (or create) the database at `~/.shukatsu/tracker.db` and
    /// apply the schema.
    pub fn open() -> Result<Self, DbError> {
        Self::open_at(Self::db_path()?)
    }

    /// Open a database at an explicit path. Useful for testing.
    pub fn open_at(path: PathBuf) -> Result<Self, DbError> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(DbError::CreateDir)?;
            }
        }

        let conn = Connection::open(&path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(include_str!("schema.sql"))?;

        Ok(Self { conn })
    }

    fn db_path() -> Result<PathBuf, DbError> {
        let home = dirs::home_dir().ok_or(DbError::HomeDirNotFound)?;
        Ok(home.join(".shukatsu").join("tracker.db"))
    }

    // =========================================================================
    // Profiles / companies / events (tracker projections)
    // =========================================================================

    /// All users with a deliverable email address on file.
    pub fn users_with_email(&self) -> Result<Vec<DbProfile>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, email, nickname FROM profiles
             WHERE email IS NOT NULL AND email <> ''
             ORDER BY id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(DbProfile {
                id: row.get(0)?,
                email: row.get(1)?,
                nickname: row.get(2)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn get_profile(&self, user_id: &str) -> Result<Option<DbProfile>, DbError> {
        self.conn
            .query_row(
                "SELECT id, email, nickname FROM profiles WHERE id = ?1",
                params![user_id],
                |row| {
                    Ok(DbProfile {
                        id: row.get(0)?,
                        email: row.get(1)?,
                        nickname: row.get(2)?,
                    })
                },
            )
            .optional()
            .map_err(Into::into)
    }

    /// Events of one kind whose start time falls in `[start, end]`.
    pub fn events_of_kind_between(
        &self,
        kind: &str,
        start: &DateTime<Utc>,
        end: &DateTime<Utc>,
    ) -> Result<Vec<DbEvent>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT e.id, e.company_id, c.name, e.title, e.kind, e.start_time
             FROM events e LEFT JOIN companies c ON c.id = e.company_id
             WHERE e.kind = ?1 AND e.start_time >= ?2 AND e.start_time <= ?3
             ORDER BY e.start_time, e.id",
        )?;
        let rows = stmt.query_map(
            params![kind, start.to_rfc3339(), end.to_rfc3339()],
            Self::event_from_row,
        )?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// All events whose start time falls in `[start, end]`, any kind.
    pub fn events_between(
        &self,
        start: &DateTime<Utc>,
        end: &DateTime<Utc>,
    ) -> Result<Vec<DbEvent>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT e.id, e.company_id, c.name, e.title, e.kind, e.start_time
             FROM events e LEFT JOIN companies c ON c.id = e.company_id
             WHERE e.start_time >= ?1 AND e.start_time <= ?2
             ORDER BY e.start_time, e.id",
        )?;
        let rows = stmt.query_map(
            params![start.to_rfc3339(), end.to_rfc3339()],
            Self::event_from_row,
        )?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    fn event_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DbEvent> {
        Ok(DbEvent {
            id: row.get(0)?,
            company_id: row.get(1)?,
            company_name: row.get(2)?,
            title: row.get(3)?,
            kind: row.get(4)?,
            start_time: row.get(5)?,
        })
    }

    pub fn participants(&self, event_id: &str) -> Result<Vec<String>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT user_id FROM event_participants WHERE event_id = ?1 ORDER BY user_id",
        )?;
        let rows = stmt.query_map(params![event_id], |row| row.get::<_, String>(0))?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Reflection existence is keyed by event id only — not by author.
    pub fn has_reflection(&self, event_id: &str) -> Result<bool, DbError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM reflections WHERE event_id = ?1",
            params![event_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    // =========================================================================
    // Notifications (engine-owned, insert only)
    // =========================================================================

    pub fn insert_notification(&self, notification: &NewNotification) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT INTO notifications (id, user_id, title, content, link, created_at, read)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0)",
            params![
                uuid::Uuid::new_v4().to_string(),
                notification.user_id,
                notification.title,
                notification.content,
                notification.link,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    // =========================================================================
    // Reminder delivery log
    // =========================================================================

    /// Check-and-insert the dedup key for one reminder. Returns `true`
    /// if the key was inserted (deliver it) and `false` if a delivery
    /// was already logged for this (user, event, kind, date).
    pub fn try_log_reminder(
        &self,
        user_id: &str,
        event_id: Option<&str>,
        kind: &str,
        date: &str,
    ) -> Result<bool, DbError> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO reminder_log (user_id, event_id, kind, date, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                user_id,
                event_id.unwrap_or(""),
                kind,
                date,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(inserted > 0)
    }

    // =========================================================================
    // Gmail credentials (one per user, upsert-by-replace)
    // =========================================================================

    pub fn load_credential(&self, user_id: &str) -> Result<Option<OAuthCredential>, DbError> {
        self.conn
            .query_row(
                "SELECT user_id, access_token, refresh_token, token_uri, expires_at
                 FROM gmail_credentials WHERE user_id = ?1",
                params![user_id],
                |row| {
                    Ok(OAuthCredential {
                        user_id: row.get(0)?,
                        access_token: row.get(1)?,
                        refresh_token: row.get(2)?,
                        token_uri: row.get(3)?,
                        expires_at: row.get(4)?,
                    })
                },
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn upsert_credential(&self, credential: &OAuthCredential) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO gmail_credentials
             (user_id, access_token, refresh_token, token_uri, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                credential.user_id,
                credential.access_token,
                credential.refresh_token,
                credential.token_uri,
                credential.expires_at,
            ],
        )?;
        Ok(())
    }

    pub fn delete_credential(&self, user_id: &str) -> Result<(), DbError> {
        self.conn.execute(
            "DELETE FROM gmail_credentials WHERE user_id = ?1",
            params![user_id],
        )?;
        Ok(())
    }

    // =========================================================================
    // Write helpers for the tracker projections (used by seeding + tests;
    // the CRUD surface proper lives outside this engine)
    // =========================================================================

    pub fn upsert_profile(&self, profile: &DbProfile) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO profiles (id, email, nickname) VALUES (?1, ?2, ?3)",
            params![profile.id, profile.email, profile.nickname],
        )?;
        Ok(())
    }

    pub fn upsert_company(&self, id: &str, name: &str, email: Option<&str>) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO companies (id, name, email) VALUES (?1, ?2, ?3)",
            params![id, name, email],
        )?;
        Ok(())
    }

    pub fn upsert_event(
        &self,
        id: &str,
        company_id: Option<&str>,
        title: &str,
        kind: &str,
        start_time: &DateTime<Utc>,
    ) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO events (id, company_id, title, kind, start_time, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                id,
                company_id,
                title,
                kind,
                start_time.to_rfc3339(),
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn add_participant(&self, event_id: &str, user_id: &str) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT OR IGNORE INTO event_participants (event_id, user_id) VALUES (?1, ?2)",
            params![event_id, user_id],
        )?;
        Ok(())
    }

    pub fn insert_reflection(
        &self,
        event_id: &str,
        author_id: Option<&str>,
        content: &str,
    ) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT INTO reflections (id, event_id, author_id, content, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                uuid::Uuid::new_v4().to_string(),
                event_id,
                author_id,
                content,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }
}
