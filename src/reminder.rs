//! Scheduled reminder batch.
//!
//! One run executes three passes against the tracker state:
//! 1. daily-check — one nudge per user with a deliverable email
//! 2. deadline-due — deadlines falling on tomorrow's local calendar day
//! 3. reflection-gap — yesterday's events still missing a reflection
//!
//! Day boundaries are computed in the configured timezone and converted
//! to UTC for the store queries. Every reminder is deduplicated through
//! `reminder_log` before delivery: the (user, event, kind, date) key is
//! inserted first, so a reminder is attempted at most once per local
//! calendar day even across overlapping runs. A failure in one pass or
//! one delivery never aborts the rest of the run.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use serde::Serialize;

use crate::db::{DbEvent, TrackerDb};
use crate::delivery::DeliveryGateway;
use crate::error::EngineError;

/// The three reminder passes, in run order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReminderKind {
    DailyCheck,
    DeadlineDue,
    ReflectionGap,
}

impl ReminderKind {
    /// Stable key used in `reminder_log`.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReminderKind::DailyCheck => "daily-check",
            ReminderKind::DeadlineDue => "deadline-due",
            ReminderKind::ReflectionGap => "reflection-gap",
        }
    }
}

/// One reminder ready for delivery.
#[derive(Debug, Clone)]
pub struct ReminderItem {
    pub user_id: String,
    pub email: Option<String>,
    pub kind: ReminderKind,
    pub event_id: Option<String>,
    pub subject: String,
    pub body: String,
    pub link: Option<String>,
}

/// Outcome of one reminder run.
#[derive(Debug, Default, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    /// Items the passes produced before dedup.
    pub emitted: usize,
    pub delivered: usize,
    pub skipped_duplicates: usize,
    pub failed: usize,
}

/// Event kind that participates in the deadline pass.
const DEADLINE_KIND: &str = "Deadline";

pub struct ReminderEngine {
    db: Arc<Mutex<TrackerDb>>,
    gateway: Arc<dyn DeliveryGateway>,
    timezone: Tz,
    app_url: String,
}

impl ReminderEngine {
    pub fn new(
        db: Arc<Mutex<TrackerDb>>,
        gateway: Arc<dyn DeliveryGateway>,
        timezone: Tz,
        app_url: String,
    ) -> Self {
        Self {
            db,
            gateway,
            timezone,
            app_url,
        }
    }

    fn db(&self) -> MutexGuard<'_, TrackerDb> {
        self.db.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Run the batch with a wall-clock budget.
    pub async fn run_with_timeout(
        &self,
        now: DateTime<Utc>,
        timeout_secs: u64,
    ) -> Result<RunReport, EngineError> {
        tokio::time::timeout(
            std::time::Duration::from_secs(timeout_secs),
            self.run(now),
        )
        .await
        .map_err(|_| EngineError::Timeout(timeout_secs))?
    }

    /// Execute the three passes as of `now` and deliver what they emit.
    pub async fn run(&self, now: DateTime<Utc>) -> Result<RunReport, EngineError> {
        let today = now.with_timezone(&self.timezone).date_naive();
        log::info!("Reminder run starting (local date {today})");

        let mut items = Vec::new();
        for (name, result) in [
            ("daily-check", self.daily_check_pass()),
            ("deadline-due", self.deadline_pass(today)),
            ("reflection-gap", self.reflection_gap_pass(today)),
        ] {
            match result {
                Ok(mut pass_items) => items.append(&mut pass_items),
                Err(e) => log::error!("Reminder pass {name} failed: {e}"),
            }
        }

        let mut report = RunReport {
            emitted: items.len(),
            ..Default::default()
        };

        let date_key = today.to_string();
        for item in items {
            // Dedup key goes in before delivery; at-most-once per day.
            let fresh = self.db().try_log_reminder(
                &item.user_id,
                item.event_id.as_deref(),
                item.kind.as_str(),
                &date_key,
            )?;
            if !fresh {
                report.skipped_duplicates += 1;
                continue;
            }

            match self.deliver(&item).await {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    log::error!(
                        "Delivery of {} reminder to {} failed: {e}",
                        item.kind.as_str(),
                        item.user_id
                    );
                    report.failed += 1;
                }
            }
        }

        log::info!(
            "Reminder run done: {} emitted, {} delivered, {} duplicate, {} failed",
            report.emitted,
            report.delivered,
            report.skipped_duplicates,
            report.failed
        );
        Ok(report)
    }

    async fn deliver(&self, item: &ReminderItem) -> Result<(), EngineError> {
        self.gateway
            .insert_notification(&item.user_id, &item.subject, &item.body, item.link.as_deref())?;
        if let Some(email) = &item.email {
            self.gateway
                .send_email(email, &item.subject, &item.body)
                .await?;
        }
        Ok(())
    }

    // =========================================================================
    // Passes
    // =========================================================================

    /// Pass 1: one unconditional nudge per user with an email on file.
    fn daily_check_pass(&self) -> Result<Vec<ReminderItem>, EngineError> {
        let users = self.db().users_with_email()?;
        Ok(users
            .into_iter()
            .map(|user| {
                let name = user.nickname.as_deref().unwrap_or("あなた");
                ReminderItem {
                    subject: "【就活トラッカー】今日のタスクを確認しましょう".to_string(),
                    body: format!(
                        "{name}さん\n\nおはようございます。\n今日の予定とタスクを確認しましょう。\n{}",
                        self.app_url
                    ),
                    link: Some(self.app_url.clone()),
                    user_id: user.id,
                    email: user.email,
                    kind: ReminderKind::DailyCheck,
                    event_id: None,
                }
            })
            .collect())
    }

    /// Pass 2: deadlines whose start falls on tomorrow's local day, one
    /// reminder per participant.
    fn deadline_pass(&self, today: NaiveDate) -> Result<Vec<ReminderItem>, EngineError> {
        let tomorrow = today + Duration::days(1);
        let (start, end) = self.local_day_bounds(tomorrow)?;
        let events = self.db().events_of_kind_between(DEADLINE_KIND, &start, &end)?;

        let mut items = Vec::new();
        for event in &events {
            // Hoisted so the db guard drops before get_profile re-locks.
            let participants = self.db().participants(&event.id)?;
            for user_id in participants {
                let email = self
                    .db()
                    .get_profile(&user_id)?
                    .and_then(|profile| profile.email)
                    .filter(|e| !e.is_empty());
                let company = event.company_name.as_deref().unwrap_or("志望企業");
                items.push(ReminderItem {
                    subject: "【就活トラッカー】明日締切の予定があります".to_string(),
                    body: format!(
                        "{company}の「{}」の締切が明日に迫っています。\n準備を忘れずに。\n{}/calendar",
                        event.title, self.app_url
                    ),
                    link: Some(format!("{}/calendar", self.app_url)),
                    user_id,
                    email,
                    kind: ReminderKind::DeadlineDue,
                    event_id: Some(event.id.clone()),
                });
            }
        }
        Ok(items)
    }

    /// Pass 3: yesterday's events with no reflection recorded, one
    /// reminder per participant. Reflection existence is per event, so
    /// one participant writing it silences the reminder for all.
    fn reflection_gap_pass(&self, today: NaiveDate) -> Result<Vec<ReminderItem>, EngineError> {
        let yesterday = today - Duration::days(1);
        let (start, end) = self.local_day_bounds(yesterday)?;
        let events = self.db().events_between(&start, &end)?;

        let mut items = Vec::new();
        for event in &events {
            if self.db().has_reflection(&event.id)? {
                continue;
            }
            let participants = self.db().participants(&event.id)?;
            for user_id in participants {
                let email = self
                    .db()
                    .get_profile(&user_id)?
                    .and_then(|profile| profile.email)
                    .filter(|e| !e.is_empty());
                items.push(self.reflection_item(event, user_id, email));
            }
        }
        Ok(items)
    }

    fn reflection_item(
        &self,
        event: &DbEvent,
        user_id: String,
        email: Option<String>,
    ) -> ReminderItem {
        let company = event.company_name.as_deref().unwrap_or("志望企業");
        ReminderItem {
            subject: "【就活トラッカー】昨日のイベントを振り返りましょう".to_string(),
            body: format!(
                "{company}の「{}」の振り返りがまだ記録されていません。\n記憶が新しいうちに書いておきましょう。\n{}/events/{}",
                event.title, self.app_url, event.id
            ),
            link: Some(format!("{}/events/{}", self.app_url, event.id)),
            user_id,
            email,
            kind: ReminderKind::ReflectionGap,
            event_id: Some(event.id.clone()),
        }
    }

    /// `[00:00:00, 23:59:59]` of one local calendar day, in UTC.
    fn local_day_bounds(
        &self,
        date: NaiveDate,
    ) -> Result<(DateTime<Utc>, DateTime<Utc>), EngineError> {
        let start_local = date
            .and_hms_opt(0, 0, 0)
            .and_then(|dt| self.timezone.from_local_datetime(&dt).earliest());
        let end_local = date
            .and_hms_opt(23, 59, 59)
            .and_then(|dt| self.timezone.from_local_datetime(&dt).latest());
        match (start_local, end_local) {
            (Some(start), Some(end)) => Ok((start.with_timezone(&Utc), end.with_timezone(&Utc))),
            _ => Err(EngineError::Configuration(format!(
                "Cannot resolve local day {date} in {}",
                self.timezone
            ))),
        }
    }
}
