//! Whalebot - Headless Server
//!
//! Telegram whale alert bot: tier-gated routing of alerts to group chats.

mod alert_queue;
mod config;

use clap::Parser;
use config::{parse_admin_ids, parse_format, AppConfig, RouterSettings};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;
use whalebot_alerts::{AlertRouter, DeliverySink, RecordingSink, TelegramBot, TierStore};

/// Whalebot CLI
#[derive(Parser, Debug)]
#[command(name = "whalebot")]
#[command(about = "Tier-gated Telegram whale alert bot", long_about = None)]
struct Args {
    /// Tier configuration file path
    #[arg(short, long, default_value = "tiers.json")]
    tiers: String,

    /// Log level: trace, debug, info, warn, error
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Admin user id (repeatable; merged with ADMIN_IDS)
    #[arg(long = "admin")]
    admins: Vec<u64>,

    /// Per-delivery timeout in seconds (0 disables)
    #[arg(long, default_value_t = 10)]
    delivery_timeout_secs: u64,

    /// Start cooldowns only after successful deliveries
    #[arg(long, default_value_t = false)]
    mark_on_success: bool,

    /// Cooldown for the default destination in seconds
    #[arg(long)]
    fallback_cooldown_secs: Option<u64>,

    /// Alert text format: plain, html, markdown, markdownv2
    #[arg(short, long, default_value = "plain")]
    format: String,

    /// Log alerts instead of sending them (no bot token needed)
    #[arg(long, default_value_t = false)]
    dry_run: bool,

    /// Read JSON-line alerts from stdin
    #[arg(long, default_value_t = false)]
    stdin_alerts: bool,

    /// Alert queue capacity
    #[arg(long, default_value_t = 1000)]
    queue_capacity: usize,
}

impl Args {
    fn app_config(&self, env_admins: Option<String>) -> AppConfig {
        let mut admins = self.admins.clone();
        if let Some(raw) = env_admins {
            admins.extend(parse_admin_ids(&raw));
        }
        admins.sort_unstable();
        admins.dedup();

        AppConfig {
            tiers_path: self.tiers.clone().into(),
            router: RouterSettings {
                delivery_timeout_secs: self.delivery_timeout_secs,
                mark_on_success: self.mark_on_success,
                fallback_cooldown_secs: self.fallback_cooldown_secs,
            },
            admins,
            message_format: parse_format(&self.format),
            dry_run: self.dry_run,
            log_level: self.log_level.clone(),
        }
    }
}

fn init_logging(level: &str) {
    let level = match level {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }
}

fn host_name() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string())
}

#[tokio::main]
async fn main() {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();
    init_logging(&args.log_level);

    let config = args.app_config(std::env::var("ADMIN_IDS").ok());

    info!("🐋 Whalebot starting...");
    info!("  Tiers: {}", config.tiers_path.display());
    info!("  Admins: {}", config.admins.len());
    info!("  Delivery timeout: {}s", config.router.delivery_timeout_secs);
    info!("  Mark on success: {}", config.router.mark_on_success);
    info!("  Dry Run: {}", config.dry_run);
    info!("  Log level: {}", config.log_level);

    let store = Arc::new(TierStore::open(&config.tiers_path));
    let snapshot = store.snapshot();
    info!(
        "  Routing: {} tiers, {} chats, default {}",
        snapshot.tiers.len(),
        snapshot.destinations.len(),
        snapshot
            .default_destination
            .as_ref()
            .map_or("none".to_string(), |d| d.to_string())
    );

    let mut bot_handle = None;
    let sink: Arc<dyn DeliverySink> = if config.dry_run {
        info!("🎮 Dry run: alerts are logged, not sent");
        Arc::new(RecordingSink::logging().numeric_only())
    } else {
        let token = match std::env::var("TELEGRAM_BOT_TOKEN") {
            Ok(token) if !token.is_empty() => token,
            _ => {
                tracing::error!("TELEGRAM_BOT_TOKEN not set (use --dry-run to run without it)");
                return;
            }
        };

        let admins: HashSet<u64> = config.admins.iter().copied().collect();
        if admins.is_empty() {
            warn!("No admin ids configured, admin commands are disabled");
        }

        let bot = Arc::new(TelegramBot::new(&token, store.clone(), admins));
        let mut sink = bot.sink();
        if let Some(mode) = config.message_format.parse_mode() {
            sink = sink.with_parse_mode(mode);
        }

        bot_handle = Some(tokio::spawn(async move {
            bot.run().await;
        }));
        Arc::new(sink)
    };

    let router = Arc::new(AlertRouter::new(store.clone(), sink, (&config.router).into()));
    let (queue, queue_task) = alert_queue::start_alert_queue(router.clone(), args.queue_capacity);

    if router
        .announce_active(&format!("Whalebot on {}", host_name()))
        .await
    {
        info!("Announced on default destination");
    }

    let intake_handle = if args.stdin_alerts {
        info!("📥 Reading JSON-line alerts from stdin");
        let intake_queue = queue.clone();
        Some(tokio::spawn(async move {
            let stdin = tokio::io::BufReader::new(tokio::io::stdin());
            alert_queue::run_line_intake(stdin, intake_queue).await;
        }))
    } else {
        None
    };

    info!("Press Ctrl+C to stop...");

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl+C: {}", e);
    }

    warn!("Shutdown signal received");

    if let Some(handle) = intake_handle {
        handle.abort();
    }
    if let Some(handle) = bot_handle {
        handle.abort();
    }

    // Let queued alerts drain once producers are gone
    drop(queue);
    if tokio::time::timeout(Duration::from_secs(5), queue_task)
        .await
        .is_err()
    {
        warn!("Alert queue did not drain in time");
    }

    info!("  Cooldowns tracked: {}", router.cooldowns().len());
    info!("👋 Whalebot stopped");
}
