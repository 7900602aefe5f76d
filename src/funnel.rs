//! # Funnel Action Handlers Module
//!
//! One handler per scheduled action kind, plus the quiz progression
//! helpers shared between the dispatch path (auto-skip timeouts) and the
//! live callback path (real answers). Handlers send the step's content,
//! update user state, and chain the next deferred step through the
//! scheduler — the whole marketing sequence is this chain, with no
//! long-lived per-user task anywhere.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{info, warn};
use rusqlite::Connection;
use teloxide::prelude::*;
use teloxide::types::MessageId;
use tokio::sync::Mutex;

use crate::dispatch::{ActionHandler, DispatchContext, HandlerRegistry};
use crate::scheduler::SchedulerService;
use crate::script::{
    self, StepDelay, AVOIDANCE_INTRO_DELAY, CASE_STORY_DELAY, CONSULT_OFFER_DELAY,
    KIND_AVOIDANCE_INTRO, KIND_CASE_STORY, KIND_CHANNEL_REMINDER, KIND_CONSULT_OFFER,
    KIND_QUIZ_TIMEOUT, QUIZ, QUIZ_TIMEOUT_DELAY,
};
use crate::store::ScheduledAction;
use crate::users;

use crate::bot::ui_builder::{channel_invite_keyboard, consult_keyboard, quiz_keyboard};

/// Build the registry with every funnel step kind wired up.
pub fn build_registry() -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    registry.register(KIND_CHANNEL_REMINDER, Arc::new(ChannelReminderHandler));
    registry.register(KIND_QUIZ_TIMEOUT, Arc::new(QuizTimeoutHandler));
    registry.register(KIND_AVOIDANCE_INTRO, Arc::new(AvoidanceIntroHandler));
    registry.register(KIND_CASE_STORY, Arc::new(CaseStoryHandler));
    registry.register(KIND_CONSULT_OFFER, Arc::new(ConsultOfferHandler));
    registry
}

/// Schedule a funnel step with its scripted delay pair.
pub async fn schedule_step(
    scheduler: &SchedulerService,
    user_id: i64,
    kind: &str,
    delay: StepDelay,
    payload: Option<String>,
) -> Result<()> {
    scheduler
        .schedule(user_id, kind, delay.normal, delay.fast, payload)
        .await
        .with_context(|| format!("Failed to schedule '{kind}' for user {user_id}"))?;
    Ok(())
}

/// The users.step value while question `index` is pending. Callback data
/// for a different question than the pending one is stale and ignored.
pub fn quiz_step(index: usize) -> String {
    format!("quiz_q{index}")
}

/// Quiz timeout payload: question index plus the id of the question
/// message whose keyboard must be cleared when the timeout fires.
pub fn timeout_payload(index: usize, message_id: i32) -> String {
    format!("{index}:{message_id}")
}

pub fn parse_timeout_payload(payload: &str) -> Option<(usize, i32)> {
    let (index, message_id) = payload.split_once(':')?;
    Some((index.parse().ok()?, message_id.parse().ok()?))
}

/// Send the quiz intro and the first question.
pub async fn start_quiz(
    bot: &Bot,
    conn: &Arc<Mutex<Connection>>,
    scheduler: &SchedulerService,
    user_id: i64,
) -> Result<()> {
    bot.send_message(ChatId(user_id), script::QUIZ_INTRO_TEXT)
        .await?;
    send_quiz_question(bot, conn, scheduler, user_id, 0).await
}

/// Send question `index`, move the user's step there, and arm the
/// auto-skip timeout. Arming the next timeout supersedes the previous
/// question's pending one through the store invariant.
pub async fn send_quiz_question(
    bot: &Bot,
    conn: &Arc<Mutex<Connection>>,
    scheduler: &SchedulerService,
    user_id: i64,
    index: usize,
) -> Result<()> {
    let question = &QUIZ[index];
    let sent = bot
        .send_message(
            ChatId(user_id),
            crate::bot::ui_builder::format_quiz_question(index, question),
        )
        .reply_markup(quiz_keyboard(index, question))
        .await?;

    {
        let conn = conn.lock().await;
        users::set_step(&conn, user_id, &quiz_step(index))?;
    }

    schedule_step(
        scheduler,
        user_id,
        KIND_QUIZ_TIMEOUT,
        QUIZ_TIMEOUT_DELAY,
        Some(timeout_payload(index, sent.id.0)),
    )
    .await
}

/// Move on after question `index` was answered or skipped: either the
/// next question or the quiz wrap-up.
pub async fn advance_quiz(
    bot: &Bot,
    conn: &Arc<Mutex<Connection>>,
    scheduler: &SchedulerService,
    user_id: i64,
    answered_index: usize,
) -> Result<()> {
    let next = answered_index + 1;
    if next < QUIZ.len() {
        send_quiz_question(bot, conn, scheduler, user_id, next).await
    } else {
        finish_quiz(bot, conn, scheduler, user_id).await
    }
}

/// Wrap up the quiz: drop any pending auto-skip, report the result
/// bucket, and chain the avoidance intro.
pub async fn finish_quiz(
    bot: &Bot,
    conn: &Arc<Mutex<Connection>>,
    scheduler: &SchedulerService,
    user_id: i64,
) -> Result<()> {
    scheduler.cancel(user_id, KIND_QUIZ_TIMEOUT).await?;

    let score = {
        let conn = conn.lock().await;
        users::set_step(&conn, user_id, script::STEP_QUIZ_DONE)?;
        users::get_user(&conn, user_id)?
            .map(|u| u.quiz_score as usize)
            .unwrap_or(0)
    };

    info!("User {user_id} finished the quiz with score {score}");
    bot.send_message(ChatId(user_id), script::quiz_result_text(score))
        .await?;

    schedule_step(
        scheduler,
        user_id,
        KIND_AVOIDANCE_INTRO,
        AVOIDANCE_INTRO_DELAY,
        None,
    )
    .await
}

/// Nudges users who never confirmed the channel subscription. Skips
/// silently if the user confirmed after this was scheduled (the cancel
/// race is tolerated, not eliminated).
pub struct ChannelReminderHandler;

#[async_trait]
impl ActionHandler for ChannelReminderHandler {
    async fn handle(&self, ctx: &DispatchContext, action: &ScheduledAction) -> Result<()> {
        let user = {
            let conn = ctx.conn.lock().await;
            users::get_user(&conn, action.user_id)?
        };

        let Some(user) = user else {
            info!("Skipping channel reminder: user {} was reset", action.user_id);
            return Ok(());
        };
        if user.subscribed {
            info!(
                "Skipping channel reminder: user {} already subscribed",
                action.user_id
            );
            return Ok(());
        }

        ctx.bot
            .send_message(ChatId(action.user_id), script::CHANNEL_REMINDER_TEXT)
            .reply_markup(channel_invite_keyboard(
                &ctx.scheduler.config().channel_url,
            ))
            .await?;
        Ok(())
    }
}

/// Auto-skip for an unanswered quiz question: clears the stale keyboard
/// (message id from the payload), counts the question as skipped, and
/// advances the quiz.
pub struct QuizTimeoutHandler;

#[async_trait]
impl ActionHandler for QuizTimeoutHandler {
    async fn handle(&self, ctx: &DispatchContext, action: &ScheduledAction) -> Result<()> {
        let Some((index, message_id)) = parse_timeout_payload(&action.payload) else {
            anyhow::bail!("Malformed quiz timeout payload: '{}'", action.payload);
        };

        // A stale timeout (user answered and moved on just before this
        // fired) must not double-advance the quiz.
        let current_step = {
            let conn = ctx.conn.lock().await;
            users::get_user(&conn, action.user_id)?.map(|u| u.step)
        };
        if current_step.as_deref() != Some(quiz_step(index).as_str()) {
            info!(
                "Skipping stale quiz timeout for user {} (question {index})",
                action.user_id
            );
            return Ok(());
        }

        // Best effort: the message may already have been edited or deleted
        if let Err(e) = ctx
            .bot
            .edit_message_reply_markup(ChatId(action.user_id), MessageId(message_id))
            .await
        {
            warn!(
                "Could not clear quiz keyboard for user {}: {e}",
                action.user_id
            );
        }

        {
            let conn = ctx.conn.lock().await;
            users::record_event(&conn, action.user_id, "quiz_skip", &format!("q{index}"))?;
        }

        ctx.bot
            .send_message(ChatId(action.user_id), script::QUIZ_SKIPPED_TEXT)
            .await?;
        advance_quiz(&ctx.bot, &ctx.conn, &ctx.scheduler, action.user_id, index).await
    }
}

/// Educational message about avoidance; chains the case story.
pub struct AvoidanceIntroHandler;

#[async_trait]
impl ActionHandler for AvoidanceIntroHandler {
    async fn handle(&self, ctx: &DispatchContext, action: &ScheduledAction) -> Result<()> {
        {
            let conn = ctx.conn.lock().await;
            users::set_step(&conn, action.user_id, script::STEP_AVOIDANCE)?;
        }

        ctx.bot
            .send_message(ChatId(action.user_id), script::AVOIDANCE_INTRO_TEXT)
            .await?;

        schedule_step(
            &ctx.scheduler,
            action.user_id,
            KIND_CASE_STORY,
            CASE_STORY_DELAY,
            None,
        )
        .await
    }
}

/// The case story; chains the consultation offer.
pub struct CaseStoryHandler;

#[async_trait]
impl ActionHandler for CaseStoryHandler {
    async fn handle(&self, ctx: &DispatchContext, action: &ScheduledAction) -> Result<()> {
        {
            let conn = ctx.conn.lock().await;
            users::set_step(&conn, action.user_id, script::STEP_CASE_STORY)?;
        }

        ctx.bot
            .send_message(ChatId(action.user_id), script::CASE_STORY_TEXT)
            .await?;

        schedule_step(
            &ctx.scheduler,
            action.user_id,
            KIND_CONSULT_OFFER,
            CONSULT_OFFER_DELAY,
            None,
        )
        .await
    }
}

/// Final step: the consultation offer with a yes/no keyboard. The chain
/// ends here; the user's button press is handled live.
pub struct ConsultOfferHandler;

#[async_trait]
impl ActionHandler for ConsultOfferHandler {
    async fn handle(&self, ctx: &DispatchContext, action: &ScheduledAction) -> Result<()> {
        {
            let conn = ctx.conn.lock().await;
            users::set_step(&conn, action.user_id, script::STEP_CONSULT_OFFER)?;
        }

        ctx.bot
            .send_message(ChatId(action.user_id), script::CONSULT_OFFER_TEXT)
            .reply_markup(consult_keyboard())
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_covers_every_scripted_kind() {
        let registry = build_registry();

        for kind in [
            KIND_CHANNEL_REMINDER,
            KIND_QUIZ_TIMEOUT,
            KIND_AVOIDANCE_INTRO,
            KIND_CASE_STORY,
            KIND_CONSULT_OFFER,
        ] {
            assert!(registry.get(kind).is_some(), "missing handler for '{kind}'");
        }
        assert_eq!(registry.len(), 5);
    }

    #[test]
    fn test_timeout_payload_round_trip() {
        let payload = timeout_payload(2, 98765);
        assert_eq!(payload, "2:98765");
        assert_eq!(parse_timeout_payload(&payload), Some((2, 98765)));
    }

    #[test]
    fn test_malformed_timeout_payload_is_rejected() {
        assert!(parse_timeout_payload("").is_none());
        assert!(parse_timeout_payload("2").is_none());
        assert!(parse_timeout_payload("a:b").is_none());
        assert!(parse_timeout_payload("1:2:3").is_none());
    }

    #[test]
    fn test_quiz_step_names() {
        assert_eq!(quiz_step(0), "quiz_q0");
        assert_eq!(quiz_step(2), "quiz_q2");
    }
}
