//! # Bot Configuration Module
//!
//! This module defines the configuration for the funnel bot and its
//! scheduler: the global test-mode flag, the fast-track user id, the
//! dispatch poll cadence and batch size, and the channel invite target.

use std::env;

// Constants for scheduler configuration
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 10;
pub const DEFAULT_DISPATCH_BATCH_SIZE: usize = 50;
pub const DEFAULT_CHANNEL_URL: &str = "https://t.me/calm_way_channel";
pub const DEFAULT_SOURCE_TAG: &str = "organic";

/// Configuration for the funnel bot and scheduler core
#[derive(Debug, Clone)]
pub struct BotConfig {
    /// Global test mode: every user gets the accelerated delays
    pub test_mode: bool,
    /// Optional fast-track user id: this user always gets accelerated delays
    pub fast_user_id: Option<i64>,
    /// Seconds between dispatch loop polls
    pub poll_interval_secs: u64,
    /// Maximum number of due actions processed per poll
    pub dispatch_batch_size: usize,
    /// URL of the channel users are invited to join
    pub channel_url: String,
    /// Tag recorded as the acquisition source for new users
    pub source_tag: String,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            test_mode: false,
            fast_user_id: None,
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            dispatch_batch_size: DEFAULT_DISPATCH_BATCH_SIZE,
            channel_url: DEFAULT_CHANNEL_URL.to_string(),
            source_tag: DEFAULT_SOURCE_TAG.to_string(),
        }
    }
}

impl BotConfig {
    /// Build a configuration from environment variables, falling back to
    /// defaults for anything unset. Invalid numeric values fall back to
    /// defaults rather than aborting startup.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let test_mode = env::var("TEST_MODE")
            .map(|v| matches!(v.trim(), "1" | "true" | "yes"))
            .unwrap_or(defaults.test_mode);

        let fast_user_id = env::var("FAST_USER_ID")
            .ok()
            .and_then(|v| v.trim().parse::<i64>().ok());

        let poll_interval_secs = env::var("POLL_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.trim().parse::<u64>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(defaults.poll_interval_secs);

        let dispatch_batch_size = env::var("DISPATCH_BATCH_SIZE")
            .ok()
            .and_then(|v| v.trim().parse::<usize>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(defaults.dispatch_batch_size);

        let channel_url = env::var("CHANNEL_URL").unwrap_or(defaults.channel_url);
        let source_tag = env::var("FUNNEL_SOURCE_TAG").unwrap_or(defaults.source_tag);

        Self {
            test_mode,
            fast_user_id,
            poll_interval_secs,
            dispatch_batch_size,
            channel_url,
            source_tag,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let config = BotConfig::default();

        assert!(!config.test_mode);
        assert!(config.fast_user_id.is_none());
        assert_eq!(config.poll_interval_secs, DEFAULT_POLL_INTERVAL_SECS);
        assert_eq!(config.dispatch_batch_size, DEFAULT_DISPATCH_BATCH_SIZE);
        assert!(!config.channel_url.is_empty());
    }

    #[test]
    fn test_defaults_are_reasonable() {
        let config = BotConfig::default();

        // Poll cadence must be positive and coarse (no sub-second polling)
        assert!(config.poll_interval_secs >= 1);
        assert!(config.poll_interval_secs <= 60);

        // A poll must process at least one action
        assert!(config.dispatch_batch_size >= 1);
    }

    #[test]
    fn test_config_cloning() {
        let config = BotConfig {
            test_mode: true,
            fast_user_id: Some(99),
            ..Default::default()
        };
        let cloned = config.clone();

        assert_eq!(cloned.test_mode, config.test_mode);
        assert_eq!(cloned.fast_user_id, config.fast_user_id);
        assert_eq!(cloned.channel_url, config.channel_url);
    }
}
