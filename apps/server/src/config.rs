//! Application configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use teloxide::types::ParseMode;
use whalebot_alerts::{CooldownPolicy, RouterConfig};

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Path to the tier document.
    pub tiers_path: PathBuf,
    /// Routing settings.
    pub router: RouterSettings,
    /// Telegram user ids allowed to run admin commands.
    pub admins: Vec<u64>,
    /// How alert text is rendered by Telegram.
    pub message_format: MessageFormat,
    /// Log instead of sending.
    pub dry_run: bool,
    /// Logging level.
    pub log_level: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            tiers_path: PathBuf::from("tiers.json"),
            router: RouterSettings::default(),
            admins: Vec::new(),
            message_format: MessageFormat::Plain,
            dry_run: false,
            log_level: "info".to_string(),
        }
    }
}

/// Router settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterSettings {
    /// Per-delivery timeout in seconds (0 disables it).
    pub delivery_timeout_secs: u64,
    /// Start cooldowns only after successful deliveries.
    pub mark_on_success: bool,
    /// Cooldown for the default destination, if any.
    pub fallback_cooldown_secs: Option<u64>,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            delivery_timeout_secs: 10,
            mark_on_success: false,
            fallback_cooldown_secs: None,
        }
    }
}

impl From<&RouterSettings> for RouterConfig {
    fn from(settings: &RouterSettings) -> Self {
        RouterConfig {
            cooldown_policy: if settings.mark_on_success {
                CooldownPolicy::OnSuccess
            } else {
                CooldownPolicy::OnAttempt
            },
            delivery_timeout: (settings.delivery_timeout_secs > 0)
                .then(|| Duration::from_secs(settings.delivery_timeout_secs)),
            fallback_cooldown: settings.fallback_cooldown_secs.map(Duration::from_secs),
        }
    }
}

/// Message rendering mode for alert text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum MessageFormat {
    #[default]
    Plain,
    Html,
    /// Legacy Telegram Markdown: `.` and `-` need no escaping.
    Markdown,
    MarkdownV2,
}

impl MessageFormat {
    #[allow(deprecated)]
    pub fn parse_mode(self) -> Option<ParseMode> {
        match self {
            MessageFormat::Plain => None,
            MessageFormat::Html => Some(ParseMode::Html),
            MessageFormat::Markdown => Some(ParseMode::Markdown),
            MessageFormat::MarkdownV2 => Some(ParseMode::MarkdownV2),
        }
    }
}

/// Parse a message format name. Unknown names fall back to plain text.
pub fn parse_format(format: &str) -> MessageFormat {
    match format.to_lowercase().as_str() {
        "html" => MessageFormat::Html,
        "markdown" | "md" => MessageFormat::Markdown,
        "markdownv2" | "mdv2" => MessageFormat::MarkdownV2,
        _ => MessageFormat::Plain,
    }
}

/// Parse a comma-separated admin id list such as `ADMIN_IDS=1,2,3`.
/// Entries that are not ids are ignored.
pub fn parse_admin_ids(raw: &str) -> Vec<u64> {
    raw.split(',')
        .filter_map(|part| part.trim().parse().ok())
        .collect()
}
