//! Bot commands: parse Telegram messages, update the registry, and emit
//! control events for the watch engine.
//!
//! Supported commands:
//! - `/add <redditor> <rating 1-10>`
//! - `/remove <redditor>`
//! - `/list`
//! - `/mute <redditor> <days>`
//! - `/unmute <redditor>`
//! - `/giverockets <redditor> <amount>`

use futures::FutureExt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::model::{ChatId, ControlEvent, TrackedAccount, is_valid_redditor_name};
use crate::registry::AccountRegistry;
use crate::sink::NotificationSink;
use crate::source::PollingSource;
use crate::telegram::TelegramClient;
use crate::watch::{ControlSender, panic_message};
use crate::watch::predicate::rockets;

/// Sent to every chat when the daemon starts.
pub const HELP: &str = "Starting Reddit-Bot V 1.0 🎇 New Commands:\n/list\n/add <redditor> <rating>\n/remove <redditor>\n/mute <redditor> <days>\n/unmute <redditor>\n/giverockets <redditor> <amount(can be negative)>";

pub const MIN_RATING: i32 = 1;
pub const MAX_RATING: i32 = 10;
/// Longest accepted `/mute`, in days.
pub const MAX_MUTE_DAYS: i64 = 36_500;

const INVALID_NAME: &str = "💩invalid redditor name (3-20 letters, digits, _ or -)";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Add { redditor: String, rating: i32 },
    Remove { redditor: String },
    List,
    Mute { redditor: String, days: i64 },
    Unmute { redditor: String },
    GiveRockets { redditor: String, amount: i32 },
}

/// Parse a chat message.
///
/// `Ok(None)` for text that is not a bot command; `Err(reply)` for a command
/// with bad arguments, where `reply` tells the sender the correct usage.
pub fn parse_command(text: &str) -> std::result::Result<Option<Command>, String> {
    let mut words = text.split_whitespace();
    let Some(head) = words.next() else {
        return Ok(None);
    };
    // Commands in groups arrive as `/cmd@BotName`.
    let name = head.split('@').next().unwrap_or(head);
    let args: Vec<&str> = words.collect();

    let command = match name {
        "/add" => {
            let [redditor, rating] = args.as_slice() else {
                return Err("💩missing arguments: /add <redditor> <rating 1-10>".to_string());
            };
            let redditor = checked_name(redditor)?;
            let rating: i32 = rating
                .parse()
                .map_err(|_| "💩rating must be between 1 - 10".to_string())?;
            if !(MIN_RATING..=MAX_RATING).contains(&rating) {
                return Err("💩rating must be between 1 - 10".to_string());
            }
            Command::Add {
                redditor: redditor.to_string(),
                rating,
            }
        }
        "/remove" => {
            let [redditor] = args.as_slice() else {
                return Err("💩missing argument. correct usage: /remove <redditor>".to_string());
            };
            let redditor = checked_name(redditor)?;
            Command::Remove {
                redditor: redditor.to_string(),
            }
        }
        "/list" => Command::List,
        "/mute" => {
            let usage = || {
                format!("💩missing argument. correct usage: /mute <redditor> <days 1-{MAX_MUTE_DAYS}>")
            };
            let [redditor, days] = args.as_slice() else {
                return Err(usage());
            };
            let redditor = checked_name(redditor)?;
            let days: i64 = days.parse().map_err(|_| usage())?;
            if !(1..=MAX_MUTE_DAYS).contains(&days) {
                return Err(usage());
            }
            Command::Mute {
                redditor: redditor.to_string(),
                days,
            }
        }
        "/unmute" => {
            let [redditor] = args.as_slice() else {
                return Err("💩missing argument. correct usage: /unmute <redditor>".to_string());
            };
            let redditor = checked_name(redditor)?;
            Command::Unmute {
                redditor: redditor.to_string(),
            }
        }
        "/giverockets" => {
            let usage = || {
                "💩missing argument. correct usage: /giverockets <redditor> <amount>".to_string()
            };
            let [redditor, amount] = args.as_slice() else {
                return Err(usage());
            };
            let redditor = checked_name(redditor)?;
            Command::GiveRockets {
                redditor: redditor.to_string(),
                amount: amount.parse().map_err(|_| usage())?,
            }
        }
        _ => return Ok(None),
    };
    Ok(Some(command))
}

fn checked_name(name: &str) -> std::result::Result<&str, String> {
    if is_valid_redditor_name(name) {
        Ok(name)
    } else {
        Err(INVALID_NAME.to_string())
    }
}

/// Executes commands against the registry and the watch engine.
pub struct CommandHandler {
    registry: Arc<dyn AccountRegistry>,
    source: Arc<dyn PollingSource>,
    sink: Arc<dyn NotificationSink>,
    control: ControlSender,
}

impl CommandHandler {
    pub fn new(
        registry: Arc<dyn AccountRegistry>,
        source: Arc<dyn PollingSource>,
        sink: Arc<dyn NotificationSink>,
        control: ControlSender,
    ) -> Self {
        Self {
            registry,
            source,
            sink,
            control,
        }
    }

    /// Handle one message from `chat`, replying there.
    pub async fn handle(&self, chat: ChatId, text: &str) -> Result<()> {
        let replies = match parse_command(text) {
            Ok(Some(command)) => {
                info!(%chat, ?command, "bot command");
                self.execute(command).await?
            }
            Ok(None) => return Ok(()),
            Err(usage) => vec![usage],
        };
        for reply in replies {
            self.sink.deliver(&reply, &[chat]).await;
        }
        Ok(())
    }

    /// [`CommandHandler::handle`] with failures and panics logged instead of
    /// returned, so a long-running caller survives any single message.
    pub async fn dispatch(&self, chat: ChatId, text: &str) {
        match std::panic::AssertUnwindSafe(self.handle(chat, text))
            .catch_unwind()
            .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(%chat, error = %e, "command failed"),
            Err(panic) => error!(
                %chat,
                panic = %panic_message(panic.as_ref()),
                "command handler panicked"
            ),
        }
    }

    /// Run a parsed command. Returns the replies for the sender.
    pub async fn execute(&self, command: Command) -> Result<Vec<String>> {
        match command {
            Command::Add { redditor, rating } => {
                if !self.source.account_exists(&redditor).await? {
                    return Ok(vec!["💩redditor does not exist".to_string()]);
                }
                let account = TrackedAccount::new(&redditor, rating);
                if !self.registry.add(&account).await? {
                    return Ok(vec![format!("💩{redditor} is already tracked")]);
                }
                self.control.send(ControlEvent::Created(account))?;
                Ok(vec![format!("{redditor} has been added👀")])
            }
            Command::Remove { redditor } => {
                if !self.registry.remove(&redditor).await? {
                    return Ok(vec![format!(
                        "💩couldn't find {redditor} in database. check spelling"
                    )]);
                }
                self.control.send(ControlEvent::Removed(redditor))?;
                Ok(vec!["removed redditor👋".to_string(), self.listing().await?])
            }
            Command::List => Ok(vec![self.listing().await?]),
            Command::Mute { redditor, days } => {
                if self.registry.mute(&redditor, days).await?.is_none() {
                    return Ok(vec![
                        "💩redditor to mute could not be found".to_string(),
                        self.listing().await?,
                    ]);
                }
                Ok(vec![format!("{redditor} is now muted for {days} days🤫")])
            }
            Command::Unmute { redditor } => {
                if !self.registry.unmute(&redditor).await? {
                    return Ok(vec![
                        "💩redditor to unmute could not be found".to_string(),
                        self.listing().await?,
                    ]);
                }
                Ok(vec![format!("{redditor} unmuted👀")])
            }
            Command::GiveRockets { redditor, amount } => {
                match self.registry.adjust_rating(&redditor, amount).await? {
                    Some(rating) => Ok(vec![format!(
                        "changed rating of {redditor} to {}",
                        rockets(rating)
                    )]),
                    None => Ok(vec![
                        "💩redditor to promote could not be found".to_string(),
                        self.listing().await?,
                    ]),
                }
            }
        }
    }

    async fn listing(&self) -> Result<String> {
        let mut message = String::from("redditors:\n");
        for account in self.registry.list_tracked().await? {
            message.push_str(&account.key);
            message.push_str("\nrating:  ");
            message.push_str(&rockets(account.rating));
            message.push('\n');
        }
        Ok(message)
    }
}

/// Long-polls Telegram for bot commands and feeds them to a
/// [`CommandHandler`].
pub struct UpdatePoller {
    telegram: Arc<TelegramClient>,
    registry: Arc<dyn AccountRegistry>,
    handler: CommandHandler,
    wait: Duration,
    retry_delay: Duration,
}

impl UpdatePoller {
    pub fn new(
        telegram: Arc<TelegramClient>,
        registry: Arc<dyn AccountRegistry>,
        handler: CommandHandler,
        wait: Duration,
    ) -> Self {
        Self {
            telegram,
            registry,
            handler,
            wait,
            retry_delay: Duration::from_secs(5),
        }
    }

    /// Poll until `shutdown` fires.
    pub async fn run(self, shutdown: CancellationToken) {
        info!("update poller started");
        loop {
            let polled = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                polled = self.poll_once() => polled,
            };
            if let Err(e) = polled {
                warn!(error = %e, "telegram update poll failed");
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(self.retry_delay) => {}
                }
            }
        }
        info!("update poller stopped");
    }

    async fn poll_once(&self) -> Result<()> {
        let offset = self.registry.update_offset().await? + 1;
        let updates = self.telegram.get_updates(offset, self.wait).await?;
        let Some(last) = updates.last() else {
            return Ok(());
        };
        self.registry.save_update_offset(last.update_id).await?;

        let allowed = self.registry.destinations().await?;
        for update in updates {
            let Some(message) = update.message else {
                continue;
            };
            let Some(text) = message.text else { continue };
            let chat = ChatId(message.chat.id);
            if !allowed.contains(&chat) {
                debug!(%chat, "ignoring message from unregistered chat");
                continue;
            }
            self.handler.dispatch(chat, &text).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_add_with_rating() {
        assert_eq!(
            parse_command("/add alice 5"),
            Ok(Some(Command::Add {
                redditor: "alice".into(),
                rating: 5
            }))
        );
        assert_eq!(
            parse_command("/add@wsb_bot  bob   10"),
            Ok(Some(Command::Add {
                redditor: "bob".into(),
                rating: 10
            }))
        );
    }

    #[test]
    fn add_rejects_bad_arguments() {
        assert!(parse_command("/add alice").is_err());
        assert!(parse_command("/add alice 0").is_err());
        assert!(parse_command("/add alice 11").is_err());
        assert!(parse_command("/add alice lots").is_err());
    }

    #[test]
    fn parses_remaining_commands() {
        assert_eq!(parse_command("/list"), Ok(Some(Command::List)));
        assert_eq!(
            parse_command("/remove alice"),
            Ok(Some(Command::Remove {
                redditor: "alice".into()
            }))
        );
        assert_eq!(
            parse_command("/mute alice 3"),
            Ok(Some(Command::Mute {
                redditor: "alice".into(),
                days: 3
            }))
        );
        assert_eq!(
            parse_command("/unmute alice"),
            Ok(Some(Command::Unmute {
                redditor: "alice".into()
            }))
        );
        assert_eq!(
            parse_command("/giverockets alice -2"),
            Ok(Some(Command::GiveRockets {
                redditor: "alice".into(),
                amount: -2
            }))
        );
    }

    #[test]
    fn mute_days_are_bounded() {
        assert!(parse_command("/mute alice 0").is_err());
        assert!(parse_command("/mute alice 9999999999999").is_err());
        assert!(parse_command(&format!("/mute alice {}", MAX_MUTE_DAYS + 1)).is_err());
        assert_eq!(
            parse_command(&format!("/mute alice {MAX_MUTE_DAYS}")),
            Ok(Some(Command::Mute {
                redditor: "alice".into(),
                days: MAX_MUTE_DAYS
            }))
        );
    }

    #[test]
    fn redditor_names_outside_reddit_charset_are_rejected() {
        assert_eq!(
            parse_command("/add ../api/v1/me 5"),
            Err(INVALID_NAME.to_string())
        );
        assert!(parse_command("/remove al").is_err());
        assert!(parse_command("/unmute bob?raw_json=1").is_err());
        assert!(parse_command("/giverockets a/b 1").is_err());
        assert!(parse_command("/mute x%2F..%2F 1").is_err());
    }

    #[test]
    fn plain_text_is_not_a_command() {
        assert_eq!(parse_command("gm"), Ok(None));
        assert_eq!(parse_command(""), Ok(None));
        assert_eq!(parse_command("/start"), Ok(None));
    }
}
