//! # Funnel Telegram Bot
//!
//! A Telegram bot that walks users through a scripted marketing funnel —
//! channel invite, short quiz, timed follow-ups — driven by a durable
//! delayed-action scheduler that persists every deferred step in SQLite
//! and survives process restarts.

pub mod bot;
pub mod config;
pub mod dispatch;
pub mod errors;
pub mod funnel;
pub mod scheduler;
pub mod script;
pub mod store;
pub mod timing;
pub mod users;
