//! # Scheduler Error Types Module
//!
//! This module defines custom error types used by the delayed-action
//! scheduler core: the task store, the scheduler service and the
//! dispatch loop.

/// Custom error types for scheduler operations
#[derive(Debug, Clone)]
pub enum SchedulerError {
    /// Task store unreachable or a query failed
    Storage(String),
    /// A funnel action handler failed while processing an action
    Handler {
        action_id: i64,
        user_id: i64,
        kind: String,
        message: String,
    },
    /// A dispatched action's kind has no registered handler
    UnknownKind(String),
}

impl std::fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchedulerError::Storage(msg) => write!(f, "Storage error: {msg}"),
            SchedulerError::Handler {
                action_id,
                user_id,
                kind,
                message,
            } => write!(
                f,
                "Handler error for action {action_id} (user {user_id}, kind '{kind}'): {message}"
            ),
            SchedulerError::UnknownKind(kind) => {
                write!(f, "No handler registered for action kind '{kind}'")
            }
        }
    }
}

impl std::error::Error for SchedulerError {}

impl From<rusqlite::Error> for SchedulerError {
    fn from(err: rusqlite::Error) -> Self {
        SchedulerError::Storage(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_message_formatting() {
        let storage_error = SchedulerError::Storage("disk I/O error".to_string());
        assert_eq!(format!("{storage_error}"), "Storage error: disk I/O error");

        let unknown = SchedulerError::UnknownKind("mystery_step".to_string());
        assert_eq!(
            format!("{unknown}"),
            "No handler registered for action kind 'mystery_step'"
        );
    }

    #[test]
    fn test_handler_error_carries_action_identity() {
        let err = SchedulerError::Handler {
            action_id: 42,
            user_id: 7,
            kind: "case_story".to_string(),
            message: "send failed".to_string(),
        };
        let display = format!("{err}");
        assert!(display.contains("42"));
        assert!(display.contains("user 7"));
        assert!(display.contains("case_story"));
    }

    #[test]
    fn test_from_rusqlite_error() {
        let err: SchedulerError = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(matches!(err, SchedulerError::Storage(_)));
    }
}
