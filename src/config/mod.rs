//! Typed configuration from environment variables.
//!
//! Loads once at startup, fails fast if required vars are missing.
//! Credentials are wrapped in secrecy::SecretString to prevent log leaks.

pub mod secrets;

use crate::error::{Error, Result};
use secrecy::SecretString;
use std::collections::BTreeSet;

/// Subreddits watched when `WATCHED_SUBREDDITS` is not set.
pub const DEFAULT_SUBREDDITS: &[&str] = &["wallstreetbets", "thetagang"];

#[derive(Debug)]
pub struct Config {
    pub database_url: SecretString,
    pub telegram_bot_token: SecretString,
    pub reddit: RedditCredentials,
    pub watched_subreddits: BTreeSet<String>,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

/// App-only OAuth credentials for the Reddit API.
#[derive(Debug)]
pub struct RedditCredentials {
    pub client_id: String,
    pub client_secret: SecretString,
    pub user_agent: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    /// In production, systemd EnvironmentFile provides the vars.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: SecretString::from(required_var("DATABASE_URL")?),
            telegram_bot_token: SecretString::from(required_var("TELEGRAM_BOT_TOKEN")?),
            reddit: RedditCredentials {
                client_id: required_var("REDDIT_CLIENT_ID")?,
                client_secret: SecretString::from(required_var("REDDIT_CLIENT_SECRET")?),
                user_agent: std::env::var("REDDIT_USER_AGENT")
                    .unwrap_or_else(|_| format!("wsbwatch/{}", env!("CARGO_PKG_VERSION"))),
            },
            watched_subreddits: std::env::var("WATCHED_SUBREDDITS")
                .map(|raw| parse_subreddits(&raw))
                .unwrap_or_else(|_| default_subreddits()),
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

/// The built-in watched set.
pub fn default_subreddits() -> BTreeSet<String> {
    DEFAULT_SUBREDDITS.iter().map(|s| s.to_string()).collect()
}

/// Parse a comma-separated subreddit list. Names are trimmed, lowercased and
/// stripped of a leading `r/`; empty entries are ignored.
pub fn parse_subreddits(raw: &str) -> BTreeSet<String> {
    raw.split(',')
        .map(|s| s.trim())
        .map(|s| s.strip_prefix("r/").unwrap_or(s))
        .filter(|s| !s.is_empty())
        .map(|s| s.to_ascii_lowercase())
        .collect()
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| Error::Config(format!("required environment variable {name} is not set")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_comma_separated_subreddits() {
        let set = parse_subreddits(" WallStreetBets, r/thetagang ,,options");
        let expected: BTreeSet<String> = ["wallstreetbets", "thetagang", "options"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(set, expected);
    }

    #[test]
    fn default_set_is_the_two_trading_subs() {
        let set = default_subreddits();
        assert!(set.contains("wallstreetbets"));
        assert!(set.contains("thetagang"));
        assert_eq!(set.len(), 2);
    }
}
