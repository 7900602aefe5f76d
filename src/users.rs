//! # User State Module
//!
//! Persistent per-user funnel state: the current step, the subscribed
//! and consult-interest flags, and an append-only event log for operator
//! history. The scheduler core never reads this table; funnel handlers
//! do, and the time policy is a pure function of configuration rather
//! than anything stored here.

use anyhow::{Context, Result};
use chrono::Utc;
use log::info;
use rusqlite::{params, Connection, OptionalExtension};

/// A user's funnel state row
#[derive(Debug, Clone, PartialEq)]
pub struct UserState {
    pub user_id: i64,
    pub username: Option<String>,
    pub source: Option<String>,
    pub step: String,
    pub subscribed: bool,
    pub consult_interest: bool,
    pub quiz_score: i64,
    pub last_action: Option<String>,
}

/// Initialize the users and events tables
pub fn init_user_schema(conn: &Connection) -> Result<()> {
    info!("Initializing user schema...");

    conn.execute(
        "CREATE TABLE IF NOT EXISTS users (
            user_id INTEGER PRIMARY KEY,
            username TEXT,
            source TEXT,
            step TEXT NOT NULL DEFAULT 'start',
            subscribed INTEGER NOT NULL DEFAULT 0,
            consult_interest INTEGER NOT NULL DEFAULT 0,
            quiz_score INTEGER NOT NULL DEFAULT 0,
            last_action TEXT
        )",
        [],
    )
    .context("Failed to create users table")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL,
            timestamp TEXT NOT NULL,
            action TEXT NOT NULL,
            details TEXT
        )",
        [],
    )
    .context("Failed to create events table")?;

    info!("User schema initialized successfully");
    Ok(())
}

/// Create the user row if it does not exist yet; refreshes the username
/// either way. Existing funnel progress is never reset here.
pub fn upsert_user(
    conn: &Connection,
    user_id: i64,
    username: Option<&str>,
    source: &str,
) -> Result<()> {
    conn.execute(
        "INSERT INTO users (user_id, username, source, step, last_action)
         VALUES (?1, ?2, ?3, 'start', ?4)
         ON CONFLICT(user_id) DO UPDATE SET username = excluded.username",
        params![user_id, username, source, Utc::now().to_rfc3339()],
    )
    .context("Failed to upsert user")?;
    Ok(())
}

/// Read a user's state, or None if they never started the funnel
pub fn get_user(conn: &Connection, user_id: i64) -> Result<Option<UserState>> {
    conn.query_row(
        "SELECT user_id, username, source, step, subscribed, consult_interest, quiz_score, last_action
         FROM users WHERE user_id = ?1",
        params![user_id],
        |row| {
            Ok(UserState {
                user_id: row.get(0)?,
                username: row.get(1)?,
                source: row.get(2)?,
                step: row.get(3)?,
                subscribed: row.get::<_, i64>(4)? != 0,
                consult_interest: row.get::<_, i64>(5)? != 0,
                quiz_score: row.get(6)?,
                last_action: row.get(7)?,
            })
        },
    )
    .optional()
    .context("Failed to read user")
}

/// Advance the user to a new funnel step
pub fn set_step(conn: &Connection, user_id: i64, step: &str) -> Result<()> {
    conn.execute(
        "UPDATE users SET step = ?1, last_action = ?2 WHERE user_id = ?3",
        params![step, Utc::now().to_rfc3339(), user_id],
    )
    .context("Failed to set user step")?;

    info!("User {user_id} moved to step '{step}'");
    Ok(())
}

pub fn set_subscribed(conn: &Connection, user_id: i64, subscribed: bool) -> Result<()> {
    conn.execute(
        "UPDATE users SET subscribed = ?1, last_action = ?2 WHERE user_id = ?3",
        params![subscribed as i64, Utc::now().to_rfc3339(), user_id],
    )
    .context("Failed to set subscribed flag")?;
    Ok(())
}

pub fn set_consult_interest(conn: &Connection, user_id: i64, interested: bool) -> Result<()> {
    conn.execute(
        "UPDATE users SET consult_interest = ?1, last_action = ?2 WHERE user_id = ?3",
        params![interested as i64, Utc::now().to_rfc3339(), user_id],
    )
    .context("Failed to set consult interest flag")?;
    Ok(())
}

/// Increment the running quiz score by one
pub fn bump_quiz_score(conn: &Connection, user_id: i64) -> Result<()> {
    conn.execute(
        "UPDATE users SET quiz_score = quiz_score + 1 WHERE user_id = ?1",
        params![user_id],
    )
    .context("Failed to bump quiz score")?;
    Ok(())
}

/// Append an audit event. Never read by the bot itself; kept for
/// operator history.
pub fn record_event(conn: &Connection, user_id: i64, action: &str, details: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO events (user_id, timestamp, action, details) VALUES (?1, ?2, ?3, ?4)",
        params![user_id, Utc::now().to_rfc3339(), action, details],
    )
    .context("Failed to record event")?;
    Ok(())
}

/// Full user-data purge of state and history. Scheduled actions are
/// purged separately through the scheduler service.
pub fn delete_user(conn: &Connection, user_id: i64) -> Result<()> {
    conn.execute("DELETE FROM events WHERE user_id = ?1", params![user_id])
        .context("Failed to delete user events")?;
    let removed = conn
        .execute("DELETE FROM users WHERE user_id = ?1", params![user_id])
        .context("Failed to delete user")?;

    info!("Reset user {user_id} (removed: {removed})");
    Ok(())
}
