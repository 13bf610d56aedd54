//! Cron-driven reminder scheduling.
//!
//! A one-minute poll loop checks whether the configured schedule is due
//! in its timezone, with support for:
//! - Cron expression parsing (5-field, seconds implied)
//! - Sleep/wake detection via time-jump polling
//! - Missed job handling (runs if within grace period)
//!
//! Due runs are sent over an mpsc channel; the receiver owns the actual
//! reminder engine so a slow run never blocks the clock.

use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use tokio::sync::mpsc;

use crate::config::ScheduleEntry;
use crate::error::EngineError;

/// Grace period for missed jobs (2 hours)
const MISSED_JOB_GRACE_PERIOD_SECS: i64 = 7200;

/// Time jump threshold to detect sleep/wake (5 minutes)
const TIME_JUMP_THRESHOLD_SECS: i64 = 300;

/// Poll interval for the scheduler loop (1 minute)
const POLL_INTERVAL_SECS: u64 = 60;

/// Why a run was triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunTrigger {
    Scheduled,
    Missed,
    Manual,
}

/// Message sent when the reminder batch should run.
#[derive(Debug, Clone)]
pub struct SchedulerMessage {
    pub trigger: RunTrigger,
    pub scheduled_for: DateTime<Utc>,
}

pub struct Scheduler {
    entry: ScheduleEntry,
    sender: mpsc::Sender<SchedulerMessage>,
    last_scheduled_run: Mutex<Option<DateTime<Utc>>>,
}

impl Scheduler {
    pub fn new(entry: ScheduleEntry, sender: mpsc::Sender<SchedulerMessage>) -> Self {
        Self {
            entry,
            sender,
            last_scheduled_run: Mutex::new(None),
        }
    }

    /// Start the scheduler loop.
    ///
    /// Runs indefinitely, checking for a due job every minute and
    /// catching up after sleep/wake gaps.
    pub async fn run(&self) {
        if !self.entry.enabled {
            log::info!("Reminder schedule disabled; scheduler idle");
            return;
        }

        match get_next_run_time(&self.entry) {
            Ok(next) => log::info!("Reminder scheduler started, next run at {next}"),
            Err(e) => log::error!("Reminder schedule invalid: {e}"),
        }

        let mut last_check = Utc::now();
        loop {
            tokio::time::sleep(Duration::from_secs(POLL_INTERVAL_SECS)).await;

            let now = Utc::now();

            // Detect sleep: time jumped more than 5 minutes
            let time_jump = (now - last_check).num_seconds();
            if time_jump > TIME_JUMP_THRESHOLD_SECS {
                log::info!(
                    "Detected system wake (time jumped {} seconds), checking for missed run",
                    time_jump
                );
                if let Ok(Some(missed)) = self.find_missed_job(now) {
                    log::info!("Found missed reminder run ({missed}), running now");
                    self.trigger(RunTrigger::Missed, missed).await;
                }
            }

            match self.due_run(now) {
                Ok(Some(scheduled_for)) => {
                    self.trigger(RunTrigger::Scheduled, scheduled_for).await
                }
                Ok(None) => {}
                Err(e) => log::error!("Schedule check failed: {e}"),
            }

            last_check = now;
        }
    }

    fn last_run(&self) -> Option<DateTime<Utc>> {
        *self.last_scheduled_run.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The scheduled instant we should run for right now, if any.
    fn due_run(&self, now: DateTime<Utc>) -> Result<Option<DateTime<Utc>>, EngineError> {
        let schedule = parse_cron(&self.entry.cron)?;
        let tz = parse_timezone(&self.entry.timezone)?;

        let now_local = now.with_timezone(&tz);
        let last_run = self.last_run();

        // Find the most recent scheduled time around now. The window is
        // two minutes wide so a poll landing just after the minute, or a
        // short wake delay, still matches.
        let mut scheduled_times = schedule.after(&(now_local - chrono::Duration::minutes(2)));
        if let Some(next_time) = scheduled_times.next() {
            let next_utc = next_time.with_timezone(&Utc);
            let diff = (now - next_utc).num_seconds().abs();
            if diff < 120 {
                if let Some(last) = last_run {
                    if (last - next_utc).num_seconds().abs() < 60 {
                        return Ok(None); // Already ran this slot
                    }
                }
                return Ok(Some(next_utc));
            }
        }

        Ok(None)
    }

    /// Find a run missed during sleep, within the grace period.
    fn find_missed_job(&self, now: DateTime<Utc>) -> Result<Option<DateTime<Utc>>, EngineError> {
        let schedule = parse_cron(&self.entry.cron)?;
        let tz = parse_timezone(&self.entry.timezone)?;

        let now_local = now.with_timezone(&tz);
        let grace_start = now_local - chrono::Duration::seconds(MISSED_JOB_GRACE_PERIOD_SECS);
        let last_run = self.last_run();

        for scheduled in schedule.after(&grace_start) {
            let scheduled_utc = scheduled.with_timezone(&Utc);
            if scheduled_utc > now {
                break;
            }
            if let Some(last) = last_run {
                if last >= scheduled_utc {
                    continue; // Already ran
                }
            }
            return Ok(Some(scheduled_utc));
        }

        Ok(None)
    }

    async fn trigger(&self, trigger: RunTrigger, scheduled_for: DateTime<Utc>) {
        *self
            .last_scheduled_run
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(scheduled_for);

        if self
            .sender
            .send(SchedulerMessage {
                trigger,
                scheduled_for,
            })
            .await
            .is_err()
        {
            log::error!("Failed to send scheduler message ({trigger:?})");
        }
    }
}

/// Parse a cron expression.
pub fn parse_cron(expr: &str) -> Result<Schedule, EngineError> {
    // The cron crate expects 6 fields (with seconds), but we use 5-field
    // format. Add "0" for seconds at the start.
    let full_expr = format!("0 {}", expr);

    full_expr
        .parse::<Schedule>()
        .map_err(|e| EngineError::Configuration(format!("Invalid cron expression '{expr}': {e}")))
}

fn parse_timezone(name: &str) -> Result<Tz, EngineError> {
    name.parse()
        .map_err(|_| EngineError::Configuration(format!("Invalid timezone: {name}")))
}

/// Next scheduled run, in UTC.
pub fn get_next_run_time(entry: &ScheduleEntry) -> Result<DateTime<Utc>, EngineError> {
    let schedule = parse_cron(&entry.cron)?;
    let tz = parse_timezone(&entry.timezone)?;

    let next = schedule
        .upcoming(tz)
        .next()
        .ok_or_else(|| EngineError::Configuration("No upcoming scheduled time".to_string()))?;

    Ok(next.with_timezone(&Utc))
}
