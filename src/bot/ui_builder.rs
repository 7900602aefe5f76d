//! UI Builder module for creating inline keyboards and formatting funnel messages

use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup};

use crate::script::{QuizQuestion, QUIZ};

// Callback data tags routed by the callback handler
pub const CB_SUBSCRIBED: &str = "subscribed";
pub const CB_CONSULT_YES: &str = "consult_yes";
pub const CB_CONSULT_NO: &str = "consult_no";

/// Callback data for answering quiz question `index` with option `option`
pub fn quiz_callback_data(index: usize, option: usize) -> String {
    format!("quiz_{index}_{option}")
}

/// Parse quiz callback data back into (question index, option index)
pub fn parse_quiz_callback(data: &str) -> Option<(usize, usize)> {
    let rest = data.strip_prefix("quiz_")?;
    let (index, option) = rest.split_once('_')?;
    Some((index.parse().ok()?, option.parse().ok()?))
}

/// Channel invite: a URL button plus a confirmation button
pub fn channel_invite_keyboard(channel_url: &str) -> InlineKeyboardMarkup {
    let mut rows = Vec::new();
    if let Ok(url) = channel_url.parse() {
        rows.push(vec![InlineKeyboardButton::url("📢 Open the channel", url)]);
    }
    rows.push(vec![InlineKeyboardButton::callback(
        "✅ I've joined",
        CB_SUBSCRIBED,
    )]);

    InlineKeyboardMarkup::new(rows)
}

/// One row per answer option for a quiz question
pub fn quiz_keyboard(index: usize, question: &QuizQuestion) -> InlineKeyboardMarkup {
    let buttons = question
        .options
        .iter()
        .enumerate()
        .map(|(option, label)| {
            vec![InlineKeyboardButton::callback(
                label.to_string(),
                quiz_callback_data(index, option),
            )]
        })
        .collect::<Vec<_>>();

    InlineKeyboardMarkup::new(buttons)
}

/// Yes/no keyboard for the consultation offer
pub fn consult_keyboard() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![
        InlineKeyboardButton::callback("🗓 Yes, let's talk", CB_CONSULT_YES),
        InlineKeyboardButton::callback("Not now", CB_CONSULT_NO),
    ]])
}

/// Format a quiz question with its position in the sequence
pub fn format_quiz_question(index: usize, question: &QuizQuestion) -> String {
    format!(
        "Question {}/{}\n\n{}",
        index + 1,
        QUIZ.len(),
        question.text
    )
}
