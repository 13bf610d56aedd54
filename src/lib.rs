//! Notification and reminder engine for a personal job-search tracker.
//!
//! The engine owns four concerns:
//! - Gmail OAuth credential lifecycle (store, refresh, disconnect)
//! - Company mail search: domain inference, relevance filtering and
//!   aggregation of per-domain query results
//! - A scheduled three-pass reminder batch (daily check, deadlines due
//!   tomorrow, missing reflections for yesterday's events)
//! - Delivery over two channels: transactional email and in-app rows
//!
//! The `shukatsu-notifyd` binary wires these behind a cron-style
//! scheduler and a small HTTP surface.

pub mod aggregate;
pub mod classify;
pub mod config;
pub mod db;
pub mod delivery;
pub mod domains;
pub mod error;
pub mod google;
pub mod reminder;
pub mod scheduler;
pub mod search;
pub mod server;
pub mod state;
