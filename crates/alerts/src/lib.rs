//! Tier-gated alert routing for the whale alert bot.
//!
//! This crate provides:
//! - JSON-backed tier configuration with atomic persistence
//! - Per-destination cooldown tracking
//! - The routing engine that fans an alert out to eligible chats
//! - Telegram delivery and tier administration commands

pub mod clock;
pub mod config;
pub mod cooldown;
pub mod router;
pub mod sink;
pub mod store;
pub mod telegram;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{TierConfig, TierFile, TierRef, TierRule};
pub use cooldown::CooldownTracker;
pub use router::{
    AlertRouter, CooldownPolicy, FallbackOutcome, RouterConfig, RoutingOutcome, SkipReason,
};
pub use sink::{DeliveryError, DeliverySink, RecordingSink};
pub use store::{StoreError, TierStore};
pub use telegram::{TelegramBot, TelegramSink};
