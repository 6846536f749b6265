//! Telegram delivery and tier administration commands.

use crate::config::TierConfig;
use crate::sink::{DeliveryError, DeliverySink};
use crate::store::{StoreError, TierStore};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use teloxide::prelude::*;
use teloxide::types::ParseMode;
use teloxide::utils::command::BotCommands;
use teloxide::utils::html::escape;
use teloxide::RequestError;
use thiserror::Error;
use tracing::{info, warn};
use whalebot_core::{DestinationId, Tier};

#[derive(Error, Debug)]
pub enum TelegramError {
    #[error("Telegram API error: {0}")]
    Api(#[from] RequestError),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Bad command arguments. The message is sent back to the caller verbatim.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum UsageError {
    #[error("❗ Usage: {0}")]
    Usage(&'static str),
    #[error("❗ Tier must be one of: free, standard, alpha, godmode (got \"{0}\")")]
    InvalidTier(String),
}

const SETTIER_USAGE: &str =
    "/settier <user_id> <tier>  (or reply to a user's message with /settier <tier>)";
const SETGROUP_USAGE: &str = "/setgroup <chat_id> <tier>";
const UNSETGROUP_USAGE: &str = "/unsetgroup <chat_id>";

/// Bot commands.
#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase", description = "Available commands:")]
pub enum Command {
    #[command(description = "Show your tier")]
    Tier,
    #[command(description = "Set a user's tier (admin). Usage: /settier <user_id> <tier>")]
    SetTier(String),
    #[command(description = "List user tiers (admin)")]
    Tiers,
    #[command(description = "Route a chat on a tier (admin). Usage: /setgroup <chat_id> <tier>")]
    SetGroup(String),
    #[command(description = "Stop routing to a chat (admin). Usage: /unsetgroup <chat_id>")]
    UnsetGroup(String),
    #[command(description = "List routed chats (admin)")]
    Groups,
    #[command(description = "Reload tiers.json (admin)")]
    Reload,
    #[command(description = "Show chat and user ids")]
    Id,
    #[command(description = "Check the bot is alive")]
    Ping,
    #[command(description = "Show help")]
    Help,
}

/// Delivery sink sending through the Telegram Bot API.
#[derive(Clone)]
pub struct TelegramSink {
    bot: Bot,
    parse_mode: Option<ParseMode>,
}

impl TelegramSink {
    pub fn new(bot: Bot) -> Self {
        Self {
            bot,
            parse_mode: None,
        }
    }

    /// Send alerts with the given parse mode instead of plain text.
    pub fn with_parse_mode(mut self, mode: ParseMode) -> Self {
        self.parse_mode = Some(mode);
        self
    }
}

#[async_trait]
impl DeliverySink for TelegramSink {
    async fn send(&self, destination: &DestinationId, text: &str) -> Result<(), DeliveryError> {
        let chat_id = destination
            .as_chat_id()
            .ok_or_else(|| DeliveryError::InvalidDestination(destination.to_string()))?;

        let mut request = self.bot.send_message(ChatId(chat_id), text);
        if let Some(mode) = self.parse_mode {
            request = request.parse_mode(mode);
        }

        request.await.map(|_| ()).map_err(|e| match e {
            RequestError::Api(api) => DeliveryError::Rejected(api.to_string()),
            other => DeliveryError::Network(other.to_string()),
        })
    }

    fn accepts(&self, destination: &DestinationId) -> bool {
        destination.as_chat_id().is_some()
    }
}

/// Telegram bot serving the tier command surface.
pub struct TelegramBot {
    bot: Bot,
    store: Arc<TierStore>,
    admins: HashSet<u64>,
}

impl TelegramBot {
    /// Create a new bot with the given token.
    pub fn new(token: &str, store: Arc<TierStore>, admins: HashSet<u64>) -> Self {
        Self {
            bot: Bot::new(token),
            store,
            admins,
        }
    }

    /// Delivery sink sharing this bot's connection.
    pub fn sink(&self) -> TelegramSink {
        TelegramSink::new(self.bot.clone())
    }

    fn is_admin(&self, user: Option<u64>) -> bool {
        is_admin(&self.admins, user)
    }

    /// Run the bot command handler.
    pub async fn run(self: Arc<Self>) {
        let bot = self.bot.clone();
        let handler = Update::filter_message().filter_command::<Command>().endpoint(
            move |bot: Bot, msg: Message, cmd: Command| {
                let this = Arc::clone(&self);
                async move { this.handle_command(bot, msg, cmd).await }
            },
        );

        Dispatcher::builder(bot, handler)
            .build()
            .dispatch()
            .await;
    }

    async fn handle_command(
        &self,
        bot: Bot,
        msg: Message,
        cmd: Command,
    ) -> Result<(), TelegramError> {
        let user = msg.from.as_ref().map(|u| u.id.0);
        let admin_only = matches!(
            cmd,
            Command::SetTier(_)
                | Command::Tiers
                | Command::SetGroup(_)
                | Command::UnsetGroup(_)
                | Command::Groups
                | Command::Reload
        );

        if admin_only && !self.is_admin(user) {
            warn!(user = ?user, "Rejected admin command from non-admin");
            bot.send_message(msg.chat.id, "⛔ You are not authorized to use this command.")
                .await?;
            return Ok(());
        }

        let reply = match cmd {
            Command::Tier => {
                let tier = user.map_or(Tier::Free, |id| {
                    self.store
                        .snapshot()
                        .user_tier(&DestinationId::from(id as i64))
                });
                format!("🏷 Your tier: <b>{}</b>", tier.title())
            }

            Command::SetTier(args) => {
                let replied_to = msg
                    .reply_to_message()
                    .and_then(|m| m.from.as_ref())
                    .map(|u| u.id.0);
                match parse_user_assignment(&args, replied_to) {
                    Ok((target, tier)) => {
                        self.store.set_user_tier(target.clone(), tier)?;
                        info!(user = %target, tier = %tier, "User tier updated");
                        format!(
                            "✅ Set tier for <code>{}</code> to <b>{}</b>.",
                            target,
                            tier.title()
                        )
                    }
                    Err(e) => escape(&e.to_string()),
                }
            }

            Command::Tiers => format_user_tiers(&self.store.snapshot()),

            Command::SetGroup(args) => match parse_group_assignment(&args) {
                Ok((chat, tier)) => {
                    self.store.set_destination_tier(chat.clone(), tier)?;
                    info!(destination = %chat, tier = %tier, "Destination tier updated");
                    format!(
                        "✅ Chat <code>{}</code> now receives <b>{}</b> alerts.",
                        chat,
                        tier.title()
                    )
                }
                Err(e) => escape(&e.to_string()),
            },

            Command::UnsetGroup(args) => match parse_chat_id(&args, UNSETGROUP_USAGE) {
                Ok(chat) => {
                    if self.store.remove_destination(&chat)? {
                        info!(destination = %chat, "Destination removed");
                        format!("🗑 Chat <code>{}</code> removed from routing.", chat)
                    } else {
                        format!("ℹ️ Chat <code>{}</code> was not routed.", chat)
                    }
                }
                Err(e) => escape(&e.to_string()),
            },

            Command::Groups => format_groups(&self.store.snapshot()),

            Command::Reload => {
                let config = self.store.reload();
                format!(
                    "🔄 Reloaded: {} tiers, {} chats, {} users.",
                    config.tiers.len(),
                    config.destinations.len(),
                    config.users.len()
                )
            }

            Command::Id => match user {
                Some(id) => format!(
                    "Chat ID: <code>{}</code>\nUser ID: <code>{}</code>",
                    msg.chat.id, id
                ),
                None => format!("Chat ID: <code>{}</code>", msg.chat.id),
            },

            Command::Ping => "pong".to_string(),

            Command::Help => escape(&Command::descriptions().to_string()),
        };

        bot.send_message(msg.chat.id, reply)
            .parse_mode(ParseMode::Html)
            .await?;

        Ok(())
    }
}

/// Admin check against the configured id set.
pub fn is_admin(admins: &HashSet<u64>, user: Option<u64>) -> bool {
    user.is_some_and(|id| admins.contains(&id))
}

fn parse_tier(name: &str) -> Result<Tier, UsageError> {
    Tier::from_name(name).ok_or_else(|| UsageError::InvalidTier(name.to_string()))
}

fn parse_chat_id(raw: &str, usage: &'static str) -> Result<DestinationId, UsageError> {
    let raw = raw.trim();
    raw.parse::<i64>()
        .map(DestinationId::from)
        .map_err(|_| UsageError::Usage(usage))
}

/// Parse `/settier` arguments: `<user_id> <tier>`, or `<tier>` when replying
/// to a user's message.
pub fn parse_user_assignment(
    args: &str,
    replied_to: Option<u64>,
) -> Result<(DestinationId, Tier), UsageError> {
    let parts: Vec<&str> = args.split_whitespace().collect();
    match parts.as_slice() {
        [user, tier] => {
            let user: u64 = user.parse().map_err(|_| UsageError::Usage(SETTIER_USAGE))?;
            Ok((DestinationId::from(user as i64), parse_tier(tier)?))
        }
        [tier] => match replied_to {
            Some(user) => Ok((DestinationId::from(user as i64), parse_tier(tier)?)),
            None => Err(UsageError::Usage(SETTIER_USAGE)),
        },
        _ => Err(UsageError::Usage(SETTIER_USAGE)),
    }
}

/// Parse `/setgroup` arguments: `<chat_id> <tier>`.
pub fn parse_group_assignment(args: &str) -> Result<(DestinationId, Tier), UsageError> {
    let parts: Vec<&str> = args.split_whitespace().collect();
    match parts.as_slice() {
        [chat, tier] => Ok((parse_chat_id(chat, SETGROUP_USAGE)?, parse_tier(tier)?)),
        _ => Err(UsageError::Usage(SETGROUP_USAGE)),
    }
}

/// Render the user tier table.
pub fn format_user_tiers(config: &TierConfig) -> String {
    if config.users.is_empty() {
        return "ℹ️ No custom tiers set yet.".to_string();
    }

    let lines: Vec<String> = config
        .users
        .iter()
        .map(|(id, tier)| format!("• <code>{}</code>: {}", escape(id.as_str()), escape(tier.title())))
        .collect();
    format!("🧾 <b>Tiers</b>\n{}", lines.join("\n"))
}

/// Render the routing table, flagging entries that can never route.
pub fn format_groups(config: &TierConfig) -> String {
    let default = config
        .default_destination
        .as_ref()
        .map_or("none".to_string(), |d| format!("<code>{}</code>", escape(d.as_str())));

    if config.destinations.is_empty() {
        return format!("ℹ️ No chats routed yet.\nDefault: {}", default);
    }

    let lines: Vec<String> = config
        .destinations
        .iter()
        .map(|(id, tier)| {
            let flag = if config.rule_for(tier).is_some() {
                ""
            } else {
                " ⚠️ no rules"
            };
            format!(
                "• <code>{}</code>: {}{}",
                escape(id.as_str()),
                escape(tier.title()),
                flag
            )
        })
        .collect();
    format!(
        "📡 <b>Routed chats</b>\n{}\n\nDefault: {}",
        lines.join("\n"),
        default
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TierRef;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_user_assignment_explicit() {
        assert_eq!(
            parse_user_assignment("6860530316 alpha", None),
            Ok((DestinationId::new("6860530316"), Tier::Alpha))
        );
        // Explicit id wins over reply target
        assert_eq!(
            parse_user_assignment("5 GOD", Some(9)),
            Ok((DestinationId::new("5"), Tier::GodMode))
        );
    }

    #[test]
    fn test_parse_user_assignment_reply() {
        assert_eq!(
            parse_user_assignment("free", Some(77)),
            Ok((DestinationId::new("77"), Tier::Free))
        );
        assert_eq!(
            parse_user_assignment("free", None),
            Err(UsageError::Usage(SETTIER_USAGE))
        );
    }

    #[test]
    fn test_parse_user_assignment_errors() {
        assert_eq!(
            parse_user_assignment("", None),
            Err(UsageError::Usage(SETTIER_USAGE))
        );
        assert_eq!(
            parse_user_assignment("abc alpha", None),
            Err(UsageError::Usage(SETTIER_USAGE))
        );
        assert_eq!(
            parse_user_assignment("5 platinum", None),
            Err(UsageError::InvalidTier("platinum".to_string()))
        );
    }

    #[test]
    fn test_parse_group_assignment() {
        assert_eq!(
            parse_group_assignment("-100123 standard"),
            Ok((DestinationId::new("-100123"), Tier::Standard))
        );
        assert_eq!(
            parse_group_assignment("-100123"),
            Err(UsageError::Usage(SETGROUP_USAGE))
        );
        assert_eq!(
            parse_group_assignment("@chan alpha"),
            Err(UsageError::Usage(SETGROUP_USAGE))
        );
    }

    #[test]
    fn test_is_admin() {
        let admins = HashSet::from([1u64, 2]);
        assert!(is_admin(&admins, Some(1)));
        assert!(!is_admin(&admins, Some(3)));
        assert!(!is_admin(&admins, None));
    }

    #[test]
    fn test_format_user_tiers() {
        let mut config = TierConfig::empty();
        assert_eq!(format_user_tiers(&config), "ℹ️ No custom tiers set yet.");

        config
            .users
            .insert(DestinationId::new("2"), TierRef::Known(Tier::Alpha));
        config
            .users
            .insert(DestinationId::new("1"), TierRef::Known(Tier::Free));
        assert_eq!(
            format_user_tiers(&config),
            "🧾 <b>Tiers</b>\n• <code>1</code>: Free\n• <code>2</code>: Alpha"
        );
    }

    #[test]
    fn test_format_groups_flags_unroutable() {
        let mut config = TierConfig::builtin();
        config.default_destination = Some(DestinationId::new("-9"));
        config
            .destinations
            .insert(DestinationId::new("-1"), TierRef::Known(Tier::Alpha));
        config
            .destinations
            .insert(DestinationId::new("-2"), TierRef::Unknown("<vip>".to_string()));

        let text = format_groups(&config);
        assert!(text.contains("• <code>-1</code>: Alpha\n"));
        assert!(text.contains("• <code>-2</code>: &lt;vip&gt; ⚠️ no rules"));
        assert!(text.ends_with("Default: <code>-9</code>"));
    }

    #[test]
    fn test_format_groups_empty() {
        assert_eq!(
            format_groups(&TierConfig::empty()),
            "ℹ️ No chats routed yet.\nDefault: none"
        );
    }

    #[test]
    fn test_usage_error_messages() {
        assert_eq!(
            UsageError::InvalidTier("x".to_string()).to_string(),
            "❗ Tier must be one of: free, standard, alpha, godmode (got \"x\")"
        );
    }
}
