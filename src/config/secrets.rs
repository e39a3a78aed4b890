//! Secret handling utilities.
//!
//! Re-exports secrecy types and provides helpers for building URLs that
//! embed credentials without leaking them into logs.

pub use secrecy::{ExposeSecret, SecretBox, SecretString};

/// Build a Telegram Bot API method URL. The result contains the bot token,
/// so it must never be logged.
pub fn telegram_method_url(base: &str, token: &SecretString, method: &str) -> String {
    format!(
        "{}/bot{}/{method}",
        base.trim_end_matches('/'),
        token.expose_secret()
    )
}
