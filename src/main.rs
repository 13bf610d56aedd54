//! shukatsu-notifyd: scheduler loop + HTTP surface around the engine.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;

use shukatsu_notify::config::load_config;
use shukatsu_notify::error::EngineError;
use shukatsu_notify::scheduler::{Scheduler, SchedulerMessage};
use shukatsu_notify::server;
use shukatsu_notify::state::AppState;

#[tokio::main]
async fn main() -> Result<(), EngineError> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = load_config()?;
    let state = Arc::new(AppState::new(config)?);

    let (tx, mut rx) = mpsc::channel::<SchedulerMessage>(8);
    let scheduler = Scheduler::new(state.config.reminder_schedule.clone(), tx);

    // Scheduler clock in one task, reminder runs in another so a slow
    // batch never blocks the next poll.
    tokio::spawn(async move { scheduler.run().await });

    let runner_state = Arc::clone(&state);
    tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            log::info!(
                "Reminder run triggered ({:?}, scheduled for {})",
                message.trigger,
                message.scheduled_for
            );
            let result = runner_state
                .reminders
                .run_with_timeout(Utc::now(), runner_state.config.run_timeout_secs)
                .await;
            if let Err(e) = result {
                log::error!("Reminder run failed: {e}");
            }
        }
    });

    server::serve(state).await
}
