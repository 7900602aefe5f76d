//! # Task Store Module
//!
//! Persistent table of scheduled funnel actions. This is pure data
//! access: the scheduler service decides *when* an action is due and the
//! dispatch loop decides *what* happens when it fires; this module only
//! guarantees the row-level invariants:
//!
//! - at most one undelivered action per `(user_id, kind)` — `enqueue`
//!   supersedes any pending action of the same kind in one transaction;
//! - `delivered` only ever transitions `false -> true`, exactly once;
//! - delivered rows are retained for history and never updated again.

use log::{debug, info};
use rusqlite::{params, Connection};

use crate::errors::SchedulerError;

/// A persisted scheduled action: "run funnel step `kind` for `user_id`
/// at or after `due_at`".
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledAction {
    pub id: i64,
    pub user_id: i64,
    pub kind: String,
    /// Due time as Unix epoch seconds. Second precision is deliberate.
    pub due_at: i64,
    /// Opaque string passed through to the handler unchanged.
    pub payload: String,
    pub delivered: bool,
}

/// Initialize the scheduled actions schema
pub fn init_scheduler_schema(conn: &Connection) -> Result<(), SchedulerError> {
    info!("Initializing scheduler schema...");

    conn.execute(
        "CREATE TABLE IF NOT EXISTS scheduled_actions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL,
            kind TEXT NOT NULL,
            due_at INTEGER NOT NULL,
            payload TEXT NOT NULL DEFAULT '',
            delivered INTEGER NOT NULL DEFAULT 0,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // The dispatch loop scans by (delivered, due_at); supersede and
    // cancel scan by (user_id, kind, delivered).
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_actions_due
         ON scheduled_actions (delivered, due_at)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_actions_user_kind
         ON scheduled_actions (user_id, kind, delivered)",
        [],
    )?;

    info!("Scheduler schema initialized successfully");
    Ok(())
}

/// Insert a new undelivered action, superseding any undelivered action
/// with the same `(user_id, kind)`. The delete and insert run in a single
/// transaction so a concurrent dispatch poll never observes both the old
/// and the new row as undelivered.
pub fn enqueue(
    conn: &mut Connection,
    user_id: i64,
    kind: &str,
    due_at: i64,
    payload: &str,
) -> Result<i64, SchedulerError> {
    let tx = conn.transaction()?;

    tx.execute(
        "DELETE FROM scheduled_actions
         WHERE user_id = ?1 AND kind = ?2 AND delivered = 0",
        params![user_id, kind],
    )?;
    tx.execute(
        "INSERT INTO scheduled_actions (user_id, kind, due_at, payload)
         VALUES (?1, ?2, ?3, ?4)",
        params![user_id, kind, due_at, payload],
    )?;

    let action_id = tx.last_insert_rowid();
    tx.commit()?;

    info!("Enqueued action {action_id} for user {user_id}: kind '{kind}', due at {due_at}");
    Ok(action_id)
}

/// Delete undelivered action(s) matching `(user_id, kind)`. No-op if none
/// exist; used when a live user interaction makes a pending timeout
/// irrelevant.
pub fn cancel(conn: &Connection, user_id: i64, kind: &str) -> Result<(), SchedulerError> {
    let removed = conn.execute(
        "DELETE FROM scheduled_actions
         WHERE user_id = ?1 AND kind = ?2 AND delivered = 0",
        params![user_id, kind],
    )?;

    if removed > 0 {
        info!("Canceled {removed} pending '{kind}' action(s) for user {user_id}");
    }
    Ok(())
}

/// Return undelivered actions with `due_at <= now`, earliest first,
/// capped at `limit` to bound a single poll's batch size.
pub fn due_actions(
    conn: &Connection,
    now: i64,
    limit: usize,
) -> Result<Vec<ScheduledAction>, SchedulerError> {
    let mut stmt = conn.prepare(
        "SELECT id, user_id, kind, due_at, payload, delivered
         FROM scheduled_actions
         WHERE delivered = 0 AND due_at <= ?1
         ORDER BY due_at ASC
         LIMIT ?2",
    )?;

    let actions = stmt
        .query_map(params![now, limit as i64], |row| {
            Ok(ScheduledAction {
                id: row.get(0)?,
                user_id: row.get(1)?,
                kind: row.get(2)?,
                due_at: row.get(3)?,
                payload: row.get(4)?,
                delivered: row.get::<_, i64>(5)? != 0,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    debug!("Found {} due action(s) at {now}", actions.len());
    Ok(actions)
}

/// Mark an action delivered. Idempotent: marking an already-delivered
/// action again is a no-op, not an error.
pub fn mark_delivered(conn: &Connection, action_id: i64) -> Result<(), SchedulerError> {
    conn.execute(
        "UPDATE scheduled_actions SET delivered = 1 WHERE id = ?1",
        params![action_id],
    )?;
    debug!("Marked action {action_id} delivered");
    Ok(())
}

/// Delete all actions for a user regardless of state. Used by the
/// account-reset flow.
pub fn purge_user(conn: &Connection, user_id: i64) -> Result<(), SchedulerError> {
    let removed = conn.execute(
        "DELETE FROM scheduled_actions WHERE user_id = ?1",
        params![user_id],
    )?;

    info!("Purged {removed} action(s) for user {user_id}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    fn setup_test_db() -> Result<Connection> {
        let conn = Connection::open_in_memory()?;
        init_scheduler_schema(&conn)?;
        Ok(conn)
    }

    fn count_undelivered(conn: &Connection, user_id: i64, kind: &str) -> Result<i64> {
        let count = conn.query_row(
            "SELECT COUNT(*) FROM scheduled_actions
             WHERE user_id = ?1 AND kind = ?2 AND delivered = 0",
            params![user_id, kind],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    #[test]
    fn test_enqueue_basic() -> Result<()> {
        let mut conn = setup_test_db()?;

        let action_id = enqueue(&mut conn, 1, "channel_reminder", 1000, "")?;
        assert!(action_id > 0);

        let due = due_actions(&conn, 1000, 10)?;
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, action_id);
        assert_eq!(due[0].user_id, 1);
        assert_eq!(due[0].kind, "channel_reminder");
        assert_eq!(due[0].due_at, 1000);
        assert_eq!(due[0].payload, "");
        assert!(!due[0].delivered);

        Ok(())
    }

    #[test]
    fn test_enqueue_supersedes_pending_action_of_same_kind() -> Result<()> {
        let mut conn = setup_test_db()?;

        enqueue(&mut conn, 1, "quiz_timeout", 1005, "q1")?;
        let second_id = enqueue(&mut conn, 1, "quiz_timeout", 1010, "q2")?;

        assert_eq!(count_undelivered(&conn, 1, "quiz_timeout")?, 1);

        let due = due_actions(&conn, 2000, 10)?;
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, second_id);
        assert_eq!(due[0].due_at, 1010);
        assert_eq!(due[0].payload, "q2");

        Ok(())
    }

    #[test]
    fn test_enqueue_does_not_supersede_other_kinds_or_users() -> Result<()> {
        let mut conn = setup_test_db()?;

        enqueue(&mut conn, 1, "quiz_timeout", 1000, "")?;
        enqueue(&mut conn, 1, "case_story", 1000, "")?;
        enqueue(&mut conn, 2, "quiz_timeout", 1000, "")?;

        assert_eq!(count_undelivered(&conn, 1, "quiz_timeout")?, 1);
        assert_eq!(count_undelivered(&conn, 1, "case_story")?, 1);
        assert_eq!(count_undelivered(&conn, 2, "quiz_timeout")?, 1);

        Ok(())
    }

    #[test]
    fn test_enqueue_does_not_delete_delivered_history() -> Result<()> {
        let mut conn = setup_test_db()?;

        let first = enqueue(&mut conn, 1, "case_story", 1000, "")?;
        mark_delivered(&conn, first)?;

        // Rescheduling the same kind must keep the delivered row as history
        enqueue(&mut conn, 1, "case_story", 2000, "")?;

        let total: i64 = conn.query_row(
            "SELECT COUNT(*) FROM scheduled_actions WHERE user_id = 1 AND kind = 'case_story'",
            [],
            |row| row.get(0),
        )?;
        assert_eq!(total, 2);

        Ok(())
    }

    #[test]
    fn test_cancel_removes_pending_action() -> Result<()> {
        let mut conn = setup_test_db()?;

        enqueue(&mut conn, 1, "quiz_timeout", 1000, "")?;
        cancel(&conn, 1, "quiz_timeout")?;

        assert_eq!(count_undelivered(&conn, 1, "quiz_timeout")?, 0);
        assert!(due_actions(&conn, 2000, 10)?.is_empty());

        Ok(())
    }

    #[test]
    fn test_cancel_is_noop_when_nothing_pending() -> Result<()> {
        let conn = setup_test_db()?;

        // Must not error on an empty store
        cancel(&conn, 1, "quiz_timeout")?;

        Ok(())
    }

    #[test]
    fn test_cancel_leaves_delivered_rows_alone() -> Result<()> {
        let mut conn = setup_test_db()?;

        let id = enqueue(&mut conn, 1, "case_story", 1000, "")?;
        mark_delivered(&conn, id)?;
        cancel(&conn, 1, "case_story")?;

        let total: i64 = conn.query_row(
            "SELECT COUNT(*) FROM scheduled_actions WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )?;
        assert_eq!(total, 1);

        Ok(())
    }

    #[test]
    fn test_due_actions_never_returns_future_actions() -> Result<()> {
        let mut conn = setup_test_db()?;

        enqueue(&mut conn, 1, "channel_reminder", 500, "")?;
        enqueue(&mut conn, 2, "channel_reminder", 1500, "")?;

        let due = due_actions(&conn, 1000, 10)?;
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].user_id, 1);

        Ok(())
    }

    #[test]
    fn test_due_actions_never_returns_delivered_actions() -> Result<()> {
        let mut conn = setup_test_db()?;

        let id = enqueue(&mut conn, 1, "channel_reminder", 500, "")?;
        mark_delivered(&conn, id)?;

        assert!(due_actions(&conn, 1000, 10)?.is_empty());

        Ok(())
    }

    #[test]
    fn test_due_actions_ordered_by_due_time_ascending() -> Result<()> {
        let mut conn = setup_test_db()?;

        enqueue(&mut conn, 3, "case_story", 900, "")?;
        enqueue(&mut conn, 1, "case_story", 300, "")?;
        enqueue(&mut conn, 2, "case_story", 600, "")?;

        let due = due_actions(&conn, 1000, 10)?;
        let due_times: Vec<i64> = due.iter().map(|a| a.due_at).collect();
        assert_eq!(due_times, vec![300, 600, 900]);

        Ok(())
    }

    #[test]
    fn test_due_actions_respects_batch_limit() -> Result<()> {
        let mut conn = setup_test_db()?;

        for user_id in 1..=5 {
            enqueue(&mut conn, user_id, "case_story", 100 + user_id, "")?;
        }

        let due = due_actions(&conn, 1000, 3)?;
        assert_eq!(due.len(), 3);
        // The earliest three, in order
        assert_eq!(due[0].user_id, 1);
        assert_eq!(due[2].user_id, 3);

        Ok(())
    }

    #[test]
    fn test_mark_delivered_is_idempotent() -> Result<()> {
        let mut conn = setup_test_db()?;

        let id = enqueue(&mut conn, 1, "channel_reminder", 500, "")?;

        mark_delivered(&conn, id)?;
        mark_delivered(&conn, id)?; // second call must be a no-op

        let delivered: i64 = conn.query_row(
            "SELECT delivered FROM scheduled_actions WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )?;
        assert_eq!(delivered, 1);

        Ok(())
    }

    #[test]
    fn test_mark_delivered_unknown_id_is_not_an_error() -> Result<()> {
        let conn = setup_test_db()?;

        mark_delivered(&conn, 99999)?;

        Ok(())
    }

    #[test]
    fn test_purge_user_removes_all_states() -> Result<()> {
        let mut conn = setup_test_db()?;

        let delivered_id = enqueue(&mut conn, 1, "channel_reminder", 100, "")?;
        mark_delivered(&conn, delivered_id)?;
        enqueue(&mut conn, 1, "case_story", 200, "")?;
        enqueue(&mut conn, 2, "case_story", 200, "")?;

        purge_user(&conn, 1)?;

        let remaining_for_user1: i64 = conn.query_row(
            "SELECT COUNT(*) FROM scheduled_actions WHERE user_id = 1",
            [],
            |row| row.get(0),
        )?;
        assert_eq!(remaining_for_user1, 0);

        // Other users are untouched
        assert_eq!(due_actions(&conn, 1000, 10)?.len(), 1);

        Ok(())
    }

    #[test]
    fn test_payload_round_trips_unchanged() -> Result<()> {
        let mut conn = setup_test_db()?;

        let payload = "2:987654"; // question index + message id, opaque to the store
        enqueue(&mut conn, 1, "quiz_timeout", 100, payload)?;

        let due = due_actions(&conn, 1000, 10)?;
        assert_eq!(due[0].payload, payload);

        Ok(())
    }
}
