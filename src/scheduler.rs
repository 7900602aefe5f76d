//! # Scheduler Service Module
//!
//! The scheduling API called synchronously from funnel handlers: it
//! computes the due time via the time policy and persists the action in
//! the task store. Constructed once at process start and passed by
//! reference to every handler and to the dispatch loop; there are no
//! ambient scheduler globals.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rusqlite::Connection;
use tokio::sync::Mutex;

use crate::config::BotConfig;
use crate::errors::SchedulerError;
use crate::store;
use crate::timing::resolve_delay;

/// Schedules, reschedules and cancels delayed funnel actions.
pub struct SchedulerService {
    conn: Arc<Mutex<Connection>>,
    config: BotConfig,
}

impl SchedulerService {
    pub fn new(conn: Arc<Mutex<Connection>>, config: BotConfig) -> Self {
        Self { conn, config }
    }

    /// Enqueue an action for `user_id` due after the policy-resolved
    /// delay. Any pending action of the same kind for this user is
    /// superseded. Propagates storage failures to the caller: a silently
    /// dropped schedule would break the funnel chain.
    pub async fn schedule(
        &self,
        user_id: i64,
        kind: &str,
        normal: Duration,
        fast: Duration,
        payload: Option<String>,
    ) -> Result<i64, SchedulerError> {
        let delay = resolve_delay(&self.config, user_id, normal, fast);
        let due_at = Utc::now().timestamp() + delay.as_secs() as i64;

        let mut conn = self.conn.lock().await;
        store::enqueue(
            &mut conn,
            user_id,
            kind,
            due_at,
            payload.as_deref().unwrap_or(""),
        )
    }

    /// Drop a pending action of the given kind, if any. Used when a live
    /// user interaction pre-empts a scheduled timeout.
    pub async fn cancel(&self, user_id: i64, kind: &str) -> Result<(), SchedulerError> {
        let conn = self.conn.lock().await;
        store::cancel(&conn, user_id, kind)
    }

    /// Delete every action for the user, delivered or not. Account-reset
    /// support.
    pub async fn purge_user(&self, user_id: i64) -> Result<(), SchedulerError> {
        let conn = self.conn.lock().await;
        store::purge_user(&conn, user_id)
    }

    pub fn config(&self) -> &BotConfig {
        &self.config
    }
}
