//! Callback Handler module for processing inline keyboard callback queries

use anyhow::Result;
use log::{error, info, warn};
use rusqlite::Connection;
use std::sync::Arc;
use teloxide::prelude::*;
use tokio::sync::Mutex;

use crate::funnel::{advance_quiz, quiz_step, start_quiz};
use crate::scheduler::SchedulerService;
use crate::script::{self, KIND_CHANNEL_REMINDER, QUIZ, STEP_START};
use crate::users;

use super::ui_builder::{parse_quiz_callback, CB_CONSULT_NO, CB_CONSULT_YES, CB_SUBSCRIBED};

/// Handle inline keyboard callback queries: subscription confirmation,
/// quiz answers, and the consultation offer buttons.
pub async fn callback_handler(
    bot: Bot,
    q: teloxide::types::CallbackQuery,
    conn: Arc<Mutex<Connection>>,
    scheduler: Arc<SchedulerService>,
) -> Result<()> {
    let data = q.data.as_deref().unwrap_or("");

    if let Some(msg) = &q.message {
        let chat_id = msg.chat().id;
        let user_id = chat_id.0;

        if data == CB_SUBSCRIBED {
            handle_subscribed(&bot, &conn, &scheduler, user_id, msg.id()).await?;
        } else if let Some((index, option)) = parse_quiz_callback(data) {
            handle_quiz_answer(&bot, &conn, &scheduler, user_id, msg.id(), index, option).await?;
        } else if data == CB_CONSULT_YES || data == CB_CONSULT_NO {
            handle_consult_choice(&bot, &conn, user_id, msg.id(), data == CB_CONSULT_YES).await?;
        } else {
            warn!("Unrecognized callback data from user {user_id}: '{data}'");
        }
    }

    // Answer the callback query to remove the loading state
    bot.answer_callback_query(q.id).await?;
    Ok(())
}

/// The user confirmed they joined the channel: record it, drop the
/// pending reminder, and move straight into the quiz.
async fn handle_subscribed(
    bot: &Bot,
    conn: &Arc<Mutex<Connection>>,
    scheduler: &SchedulerService,
    user_id: i64,
    message_id: teloxide::types::MessageId,
) -> Result<()> {
    let already_past_start = {
        let conn = conn.lock().await;
        match users::get_user(&conn, user_id)? {
            Some(user) => user.step != STEP_START,
            None => {
                // Button pressed after a /reset; re-register minimally
                users::upsert_user(&conn, user_id, None, &scheduler.config().source_tag)?;
                false
            }
        }
    };

    if already_past_start {
        // Duplicate tap on an old invite message; nothing to redo
        info!("Ignoring repeated subscription confirmation from user {user_id}");
        return Ok(());
    }

    {
        let conn = conn.lock().await;
        users::set_subscribed(&conn, user_id, true)?;
        users::record_event(&conn, user_id, "subscribed", "")?;
    }
    scheduler.cancel(user_id, KIND_CHANNEL_REMINDER).await?;

    if let Err(e) = bot
        .edit_message_reply_markup(ChatId(user_id), message_id)
        .await
    {
        warn!("Could not clear invite keyboard for user {user_id}: {e}");
    }

    if let Err(e) = start_quiz(bot, conn, scheduler, user_id).await {
        error!("Failed to start quiz for user {user_id}: {e:#}");
        bot.send_message(ChatId(user_id), script::APOLOGY_TEXT)
            .await?;
    }
    Ok(())
}

/// A live quiz answer. Stale taps — answers to a question that is no
/// longer pending (already answered, or auto-skipped by the timeout that
/// fired first) — are ignored; the supersede/cancel machinery narrows
/// that race but cannot eliminate it.
async fn handle_quiz_answer(
    bot: &Bot,
    conn: &Arc<Mutex<Connection>>,
    scheduler: &SchedulerService,
    user_id: i64,
    message_id: teloxide::types::MessageId,
    index: usize,
    option: usize,
) -> Result<()> {
    if index >= QUIZ.len() || option >= QUIZ[index].options.len() {
        warn!("Out-of-range quiz answer from user {user_id}: q{index} opt{option}");
        return Ok(());
    }

    let is_current = {
        let conn = conn.lock().await;
        users::get_user(&conn, user_id)?
            .map(|u| u.step == quiz_step(index))
            .unwrap_or(false)
    };
    if !is_current {
        info!("Ignoring stale quiz answer from user {user_id} for question {index}");
        return Ok(());
    }

    {
        let conn = conn.lock().await;
        users::record_event(&conn, user_id, "quiz_answer", &format!("q{index}:{option}"))?;
        if option == QUIZ[index].scoring_option {
            users::bump_quiz_score(&conn, user_id)?;
        }
    }

    if let Err(e) = bot
        .edit_message_reply_markup(ChatId(user_id), message_id)
        .await
    {
        warn!("Could not clear quiz keyboard for user {user_id}: {e}");
    }

    if let Err(e) = advance_quiz(bot, conn, scheduler, user_id, index).await {
        error!("Failed to advance quiz for user {user_id}: {e:#}");
        bot.send_message(ChatId(user_id), script::APOLOGY_TEXT)
            .await?;
    }
    Ok(())
}

/// The consultation offer buttons at the end of the chain.
async fn handle_consult_choice(
    bot: &Bot,
    conn: &Arc<Mutex<Connection>>,
    user_id: i64,
    message_id: teloxide::types::MessageId,
    interested: bool,
) -> Result<()> {
    {
        let conn = conn.lock().await;
        users::set_consult_interest(&conn, user_id, interested)?;
        users::record_event(
            &conn,
            user_id,
            "consult_choice",
            if interested { "yes" } else { "no" },
        )?;
    }

    if let Err(e) = bot
        .edit_message_reply_markup(ChatId(user_id), message_id)
        .await
    {
        warn!("Could not clear consult keyboard for user {user_id}: {e}");
    }

    let reply = if interested {
        script::CONSULT_YES_TEXT
    } else {
        script::CONSULT_NO_TEXT
    };
    bot.send_message(ChatId(user_id), reply).await?;

    info!(
        "User {user_id} answered the consult offer: {}",
        if interested { "interested" } else { "declined" }
    );
    Ok(())
}
