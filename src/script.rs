//! # Funnel Script Module
//!
//! The scripted funnel in data form: action kinds, per-step delays at
//! both time scales, user step names, the quiz question bank and its
//! scoring threshold, and the message copy. Changing the funnel cadence
//! or wording happens here, not in the handlers.

use std::time::Duration;

// Action kinds — tags for scheduled funnel steps. Scoped per user by the
// task store's supersede invariant.
pub const KIND_CHANNEL_REMINDER: &str = "channel_reminder";
pub const KIND_QUIZ_TIMEOUT: &str = "quiz_timeout";
pub const KIND_AVOIDANCE_INTRO: &str = "avoidance_intro";
pub const KIND_CASE_STORY: &str = "case_story";
pub const KIND_CONSULT_OFFER: &str = "consult_offer";

// User step names as persisted in users.step
pub const STEP_START: &str = "start";
pub const STEP_QUIZ_DONE: &str = "quiz_done";
pub const STEP_AVOIDANCE: &str = "avoidance";
pub const STEP_CASE_STORY: &str = "case_story";
pub const STEP_CONSULT_OFFER: &str = "consult_offer";

/// A deferred step's delay at both time scales: production cadence and
/// the accelerated fast-track cadence used for testing.
#[derive(Debug, Clone, Copy)]
pub struct StepDelay {
    pub normal: Duration,
    pub fast: Duration,
}

pub const CHANNEL_REMINDER_DELAY: StepDelay = StepDelay {
    normal: Duration::from_secs(60 * 60), // 1 hour
    fast: Duration::from_secs(20),
};

pub const QUIZ_TIMEOUT_DELAY: StepDelay = StepDelay {
    normal: Duration::from_secs(30 * 60), // 30 minutes per question
    fast: Duration::from_secs(15),
};

pub const AVOIDANCE_INTRO_DELAY: StepDelay = StepDelay {
    normal: Duration::from_secs(2 * 60 * 60), // 2 hours
    fast: Duration::from_secs(10),
};

pub const CASE_STORY_DELAY: StepDelay = StepDelay {
    normal: Duration::from_secs(24 * 60 * 60), // next day
    fast: Duration::from_secs(25),
};

pub const CONSULT_OFFER_DELAY: StepDelay = StepDelay {
    normal: Duration::from_secs(48 * 60 * 60), // two days
    fast: Duration::from_secs(30),
};

/// One quiz question with its answer options. The option index is what
/// callback data carries; `scoring_option` is the index that counts
/// toward the avoidance score.
#[derive(Debug, Clone, Copy)]
pub struct QuizQuestion {
    pub text: &'static str,
    pub options: &'static [&'static str],
    pub scoring_option: usize,
}

pub const QUIZ: &[QuizQuestion] = &[
    QuizQuestion {
        text: "When something worries you, do you tend to put off dealing with it?",
        options: &["Yes, often", "Not really"],
        scoring_option: 0,
    },
    QuizQuestion {
        text: "Do you avoid conversations that might turn uncomfortable?",
        options: &["Yes, often", "Not really"],
        scoring_option: 0,
    },
    QuizQuestion {
        text: "After a stressful day, do you distract yourself instead of winding down?",
        options: &["Yes, often", "Not really"],
        scoring_option: 0,
    },
];

/// Number of scoring answers needed to land in the "high avoidance"
/// bucket.
pub const AVOIDANCE_THRESHOLD: usize = 2;

pub fn quiz_result_text(score: usize) -> &'static str {
    if score >= AVOIDANCE_THRESHOLD {
        "Your answers suggest avoidance is doing a lot of work for you right now. \
         That's more common than you'd think — and it's workable. \
         I'll send you something on this shortly."
    } else {
        "Your answers look fairly balanced. Still, the patterns we'll look at \
         next tend to show up for everyone from time to time."
    }
}

// Message copy

pub const WELCOME_TEXT: &str = "Hi! I'm the CalmWay bot. Over the next few days I'll \
walk you through a short path: a couple of questions, a real story, and — if you \
want one — a consultation.\n\nFirst step: join the channel below, then tap the \
button so I know you're in.";

pub const CHANNEL_REMINDER_TEXT: &str = "Just checking in — the channel invite is \
still waiting for you. Tap the button once you've joined and we'll keep going.";

pub const QUIZ_INTRO_TEXT: &str = "You're in! Let's start with a short quiz — \
three quick questions, no wrong answers.";

pub const QUIZ_SKIPPED_TEXT: &str = "No answer needed — I'll count that one as a \
skip and we'll move on.";

pub const AVOIDANCE_INTRO_TEXT: &str = "Avoidance is the mind's way of buying \
short-term calm at a long-term price: the worry doesn't go away, it compounds. \
Tomorrow I'll share a story about how that plays out — and what breaks the loop.";

pub const CASE_STORY_TEXT: &str = "A client of mine — let's call her Maria — spent \
two years 'waiting for the right moment' to deal with her anxiety. Three sessions \
in, the thing she'd been avoiding took twenty minutes to say out loud. The waiting \
was the hard part, not the conversation.";

pub const CONSULT_OFFER_TEXT: &str = "If any of this resonated, I offer a free \
20-minute intro consultation. No commitment — just a conversation. Interested?";

pub const CONSULT_YES_TEXT: &str = "Great — I've noted your interest. You'll get a \
message to arrange a time within a day.";

pub const CONSULT_NO_TEXT: &str = "No problem at all. The channel stays open for \
you, and you can come back to this any time with /start.";

pub const RESET_DONE_TEXT: &str = "Your data and scheduled messages have been \
cleared. Send /start to begin again.";

pub const HELP_TEXT: &str = "This bot walks you through a short guided sequence.\n\n\
/start — begin (or continue) the sequence\n\
/reset — erase your data and start over\n\
/help — this message";

pub const FALLBACK_TEXT: &str = "I'm a scripted guide, so I mostly speak in \
buttons. Use /start to begin or /help to see what I can do.";

pub const APOLOGY_TEXT: &str = "Something went wrong on my side — please try \
again in a moment.";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quiz_bank_is_well_formed() {
        assert!(!QUIZ.is_empty());
        for question in QUIZ {
            assert!(!question.text.is_empty());
            assert!(question.options.len() >= 2);
            assert!(question.scoring_option < question.options.len());
        }
    }

    #[test]
    fn test_threshold_is_reachable() {
        assert!(AVOIDANCE_THRESHOLD <= QUIZ.len());
    }

    #[test]
    fn test_fast_delays_are_accelerations() {
        for delay in [
            CHANNEL_REMINDER_DELAY,
            QUIZ_TIMEOUT_DELAY,
            AVOIDANCE_INTRO_DELAY,
            CASE_STORY_DELAY,
            CONSULT_OFFER_DELAY,
        ] {
            assert!(delay.fast < delay.normal);
            assert!(delay.fast >= Duration::from_secs(1));
        }
    }

    #[test]
    fn test_result_buckets() {
        assert_ne!(quiz_result_text(0), quiz_result_text(QUIZ.len()));
        assert_eq!(
            quiz_result_text(AVOIDANCE_THRESHOLD),
            quiz_result_text(QUIZ.len())
        );
    }
}
