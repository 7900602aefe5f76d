//! # Time Policy Module
//!
//! Decides, per user, whether a scheduling call uses the production
//! delay or the accelerated fast-track delay. Pure function of the user
//! identity and configuration; every scheduling call site goes through
//! it, so switching a deployment between production cadence and test
//! cadence requires no call-site changes.

use std::time::Duration;

use crate::config::BotConfig;

/// Returns `fast` if the user is in accelerated mode (global test mode is
/// on, or the user id matches the configured fast-track id), otherwise
/// `normal`.
pub fn resolve_delay(
    config: &BotConfig,
    user_id: i64,
    normal: Duration,
    fast: Duration,
) -> Duration {
    if is_fast_user(config, user_id) {
        fast
    } else {
        normal
    }
}

/// Whether the user gets the accelerated cadence.
pub fn is_fast_user(config: &BotConfig, user_id: i64) -> bool {
    config.test_mode || config.fast_user_id == Some(user_id)
}
