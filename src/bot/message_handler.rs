//! Message Handler module for processing incoming Telegram messages

use anyhow::Result;
use log::{error, info};
use rusqlite::Connection;
use std::sync::Arc;
use teloxide::prelude::*;
use tokio::sync::Mutex;

use crate::funnel::schedule_step;
use crate::scheduler::SchedulerService;
use crate::script::{self, CHANNEL_REMINDER_DELAY, KIND_CHANNEL_REMINDER};
use crate::users;

use super::ui_builder::channel_invite_keyboard;

/// Split a command message into the bare command and an optional payload.
/// Handles the group-chat form (`/start@SomeBot`) and deep-link payloads
/// (`/start promo_spring`).
fn parse_command(text: &str) -> Option<(&str, Option<&str>)> {
    let text = text.trim();
    if !text.starts_with('/') {
        return None;
    }

    let mut parts = text.splitn(2, char::is_whitespace);
    let command = parts.next()?.split('@').next()?;
    let payload = parts.next().map(str::trim).filter(|p| !p.is_empty());
    Some((command, payload))
}

/// Handle incoming messages: the /start, /reset and /help commands, and
/// a gentle fallback for everything else.
pub async fn message_handler(
    bot: Bot,
    msg: Message,
    conn: Arc<Mutex<Connection>>,
    scheduler: Arc<SchedulerService>,
) -> Result<()> {
    let Some(text) = msg.text() else {
        bot.send_message(msg.chat.id, script::FALLBACK_TEXT).await?;
        return Ok(());
    };

    match parse_command(text) {
        Some(("/start", payload)) => handle_start(&bot, &msg, &conn, &scheduler, payload).await,
        Some(("/reset", _)) => handle_reset(&bot, &msg, &conn, &scheduler).await,
        Some(("/help", _)) => {
            bot.send_message(msg.chat.id, script::HELP_TEXT).await?;
            Ok(())
        }
        _ => {
            bot.send_message(msg.chat.id, script::FALLBACK_TEXT).await?;
            Ok(())
        }
    }
}

/// /start: register the user, send the welcome with the channel invite,
/// and arm the subscription reminder. A deep-link payload becomes the
/// user's acquisition source; without one the configured default tag is
/// recorded.
async fn handle_start(
    bot: &Bot,
    msg: &Message,
    conn: &Arc<Mutex<Connection>>,
    scheduler: &SchedulerService,
    source: Option<&str>,
) -> Result<()> {
    let user_id = msg.chat.id.0;
    let username = msg
        .from
        .as_ref()
        .and_then(|user| user.username.as_deref());
    let source = source.unwrap_or(&scheduler.config().source_tag);

    info!("User {user_id} started the funnel (source '{source}')");

    {
        let conn = conn.lock().await;
        users::upsert_user(&conn, user_id, username, source)?;
        users::record_event(&conn, user_id, "start", source)?;
    }

    bot.send_message(msg.chat.id, script::WELCOME_TEXT)
        .reply_markup(channel_invite_keyboard(&scheduler.config().channel_url))
        .await?;

    // A scheduling failure must not be swallowed silently: without the
    // reminder the funnel chain is broken, so tell the user.
    if let Err(e) = schedule_step(
        scheduler,
        user_id,
        KIND_CHANNEL_REMINDER,
        CHANNEL_REMINDER_DELAY,
        None,
    )
    .await
    {
        error!("Failed to schedule channel reminder for user {user_id}: {e:#}");
        bot.send_message(msg.chat.id, script::APOLOGY_TEXT).await?;
    }

    Ok(())
}

/// /reset: full user-data purge — state, events, and every scheduled
/// action regardless of delivery state. A failed purge is reported to
/// the user, not left silent.
async fn handle_reset(
    bot: &Bot,
    msg: &Message,
    conn: &Arc<Mutex<Connection>>,
    scheduler: &SchedulerService,
) -> Result<()> {
    let user_id = msg.chat.id.0;
    info!("User {user_id} requested a reset");

    let purged: Result<()> = async {
        scheduler.purge_user(user_id).await?;
        let conn = conn.lock().await;
        users::delete_user(&conn, user_id)?;
        Ok(())
    }
    .await;

    if let Err(e) = purged {
        error!("Failed to reset user {user_id}: {e:#}");
        bot.send_message(msg.chat.id, script::APOLOGY_TEXT).await?;
        return Ok(());
    }

    bot.send_message(msg.chat.id, script::RESET_DONE_TEXT)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_commands_parse() {
        assert_eq!(parse_command("/start"), Some(("/start", None)));
        assert_eq!(parse_command("/reset"), Some(("/reset", None)));
        assert_eq!(parse_command(" /help "), Some(("/help", None)));
    }

    #[test]
    fn test_group_style_command_is_recognized() {
        assert_eq!(parse_command("/start@CalmWayBot"), Some(("/start", None)));
        assert_eq!(
            parse_command("/start@CalmWayBot promo_spring"),
            Some(("/start", Some("promo_spring")))
        );
    }

    #[test]
    fn test_deep_link_payload_is_extracted() {
        assert_eq!(
            parse_command("/start promo_spring"),
            Some(("/start", Some("promo_spring")))
        );
        // Trailing whitespace is not a payload
        assert_eq!(parse_command("/start   "), Some(("/start", None)));
    }

    #[test]
    fn test_plain_text_is_not_a_command() {
        assert_eq!(parse_command("hello"), None);
        assert_eq!(parse_command(""), None);
        assert_eq!(parse_command("start"), None);
    }
}
