//! # Dispatch Loop Module
//!
//! The single background process that drives the funnel forward: every
//! poll interval it reads due, undelivered actions from the task store
//! and invokes the registered handler for each one.
//!
//! Delivery policy is at-most-once-attempt: an action is marked
//! delivered after its handler runs, whether the handler succeeded or
//! failed. A broken step must not block the rest of a user's funnel by
//! being retried forever, and duplicate sends are worse for the user
//! than a skipped step. Unknown kinds follow the same policy and are
//! logged as deployment errors.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use log::{error, info, warn};
use rusqlite::Connection;
use teloxide::Bot;
use tokio::sync::Mutex;

use crate::errors::SchedulerError;
use crate::scheduler::SchedulerService;
use crate::store::{self, ScheduledAction};

/// Everything a funnel action handler needs to do its work: the bot for
/// outbound messages, the shared connection for user state, and the
/// scheduler so handlers can chain further deferred steps.
pub struct DispatchContext {
    pub bot: Bot,
    pub conn: Arc<Mutex<Connection>>,
    pub scheduler: Arc<SchedulerService>,
}

/// A funnel step behavior, keyed by action kind in the registry.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn handle(&self, ctx: &DispatchContext, action: &ScheduledAction) -> anyhow::Result<()>;
}

/// Typed mapping from action kind to handler. A kind with no entry is a
/// single well-defined error path (`SchedulerError::UnknownKind`), not a
/// silent fallthrough.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn ActionHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, kind: &str, handler: Arc<dyn ActionHandler>) {
        if self.handlers.insert(kind.to_string(), handler).is_some() {
            warn!("Handler for kind '{kind}' registered twice; keeping the later one");
        }
    }

    pub fn get(&self, kind: &str) -> Option<Arc<dyn ActionHandler>> {
        self.handlers.get(kind).cloned()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Run one poll: fetch up to `limit` due actions as of `now` and process
/// them in ascending due-time order. Returns the number of actions
/// processed. Handler failures are contained per action; only storage
/// failures bubble up, and the caller retries on the next poll.
pub async fn process_due_batch(
    ctx: &DispatchContext,
    registry: &HandlerRegistry,
    now: i64,
    limit: usize,
) -> Result<usize, SchedulerError> {
    // Copy the batch out under the lock; handlers run without it so a
    // slow Telegram send never blocks schedule/cancel calls.
    let batch = {
        let conn = ctx.conn.lock().await;
        store::due_actions(&conn, now, limit)?
    };

    let processed = batch.len();
    for action in batch {
        let outcome = match registry.get(&action.kind) {
            Some(handler) => handler
                .handle(ctx, &action)
                .await
                .map_err(|e| SchedulerError::Handler {
                    action_id: action.id,
                    user_id: action.user_id,
                    kind: action.kind.clone(),
                    message: format!("{e:#}"),
                }),
            None => Err(SchedulerError::UnknownKind(action.kind.clone())),
        };

        if let Err(e) = outcome {
            error!(
                "Dispatch failed for action {} (user {}, kind '{}'): {e}",
                action.id, action.user_id, action.kind
            );
        }

        // Marked delivered regardless of the handler outcome; a failure
        // here is logged and the row is picked up again next poll.
        let conn = ctx.conn.lock().await;
        if let Err(e) = store::mark_delivered(&conn, action.id) {
            error!("Failed to mark action {} delivered: {e}", action.id);
        }
    }

    Ok(processed)
}

/// The perpetual dispatch loop. Nothing propagates out of it: a failed
/// poll (e.g. storage unavailable) is logged and retried on the next
/// tick.
pub async fn run_dispatch_loop(
    ctx: Arc<DispatchContext>,
    registry: Arc<HandlerRegistry>,
    poll_interval_secs: u64,
    batch_size: usize,
) {
    info!(
        "Dispatch loop started: polling every {poll_interval_secs}s, batch size {batch_size}, {} handler(s) registered",
        registry.len()
    );

    let mut interval = tokio::time::interval(Duration::from_secs(poll_interval_secs));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        interval.tick().await;

        let now = Utc::now().timestamp();
        match process_due_batch(&ctx, &registry, now, batch_size).await {
            Ok(0) => {}
            Ok(n) => info!("Dispatched {n} due action(s)"),
            Err(e) => error!("Dispatch poll failed, will retry next tick: {e}"),
        }
    }
}
