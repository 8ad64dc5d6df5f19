/// Configuration management
use crate::error::{ChatError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_TYPING_THROTTLE_MS: u64 = 2000;
const DEFAULT_TYPING_TIMEOUT_MS: u64 = 3000;
const DEFAULT_MENTION_LIMIT: usize = 5;

/// Client tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Minimum interval between typing-presence writes
    pub typing_throttle: Duration,

    /// Age after which a typing-presence record is considered stale
    pub typing_timeout: Duration,

    /// Maximum number of mention-autocomplete candidates shown
    pub mention_limit: usize,

    /// Maximum length of the last-message preview in conversation summaries
    pub preview_len: usize,

    /// Page size when loading conversation history
    pub history_limit: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            typing_throttle: Duration::from_millis(DEFAULT_TYPING_THROTTLE_MS),
            typing_timeout: Duration::from_millis(DEFAULT_TYPING_TIMEOUT_MS),
            mention_limit: DEFAULT_MENTION_LIMIT,
            preview_len: 64,
            history_limit: 50,
        }
    }
}

impl Config {
    /// Create config from command line arguments
    pub fn from_args(args: &[String]) -> Result<Self> {
        let mut config = Self::default();

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--typing-throttle-ms" => {
                    let v = args.get(i + 1).ok_or_else(|| {
                        ChatError::Config("--typing-throttle-ms requires a value".to_string())
                    })?;
                    let ms = v.parse::<u64>().map_err(|_| {
                        ChatError::Config("--typing-throttle-ms must be a number".to_string())
                    })?;
                    config.typing_throttle = Duration::from_millis(ms);
                    i += 2;
                }
                "--typing-timeout-ms" => {
                    let v = args.get(i + 1).ok_or_else(|| {
                        ChatError::Config("--typing-timeout-ms requires a value".to_string())
                    })?;
                    let ms = v.parse::<u64>().map_err(|_| {
                        ChatError::Config("--typing-timeout-ms must be a number".to_string())
                    })?;
                    config.typing_timeout = Duration::from_millis(ms);
                    i += 2;
                }
                "--mention-limit" => {
                    let v = args.get(i + 1).ok_or_else(|| {
                        ChatError::Config("--mention-limit requires a value".to_string())
                    })?;
                    config.mention_limit = v.parse::<usize>().map_err(|_| {
                        ChatError::Config("--mention-limit must be a number".to_string())
                    })?;
                    i += 2;
                }
                _ => {
                    // Positional args (user name) are handled by the binary
                    i += 1;
                }
            }
        }

        // Env overrides (nice for scripts)
        if let Some(ms) = std::env::var("RIPPLE_TYPING_THROTTLE_MS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
        {
            config.typing_throttle = Duration::from_millis(ms);
        }
        if let Some(ms) = std::env::var("RIPPLE_TYPING_TIMEOUT_MS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
        {
            config.typing_timeout = Duration::from_millis(ms);
        }

        Ok(config)
    }
}
