//! Tier-gated alert routing.
//!
//! Every configured destination is evaluated independently against its own
//! tier rule (chain allow-list, minimum USD value, cooldown). All eligible
//! destinations are attempted; a failure for one never stops the others.
//! When nothing was targeted the alert goes to the default destination, if
//! one is configured.
//!
//! Concurrent `route` calls share the cooldown tracker without coordinating:
//! two calls may both see a destination as eligible before either marks it,
//! so spacing is a soft limit. The server serializes calls through a queue.

use crate::clock::{Clock, SystemClock};
use crate::config::TierConfig;
use crate::cooldown::CooldownTracker;
use crate::sink::{DeliveryError, DeliverySink};
use crate::store::TierStore;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use whalebot_core::{AlertRequest, DestinationId};

/// When a destination's cooldown starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CooldownPolicy {
    /// Mark on every attempt, failed or not. A flaky sink then cannot turn
    /// into a burst of retries inside the cooldown window.
    #[default]
    OnAttempt,
    /// Mark only after a successful delivery.
    OnSuccess,
}

/// Configuration for the router.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub cooldown_policy: CooldownPolicy,
    /// Upper bound on one sink call. A timeout counts as a failed delivery.
    pub delivery_timeout: Option<Duration>,
    /// Cooldown applied to the fallback destination. `None` leaves the
    /// fallback ungated.
    pub fallback_cooldown: Option<Duration>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            cooldown_policy: CooldownPolicy::OnAttempt,
            delivery_timeout: Some(Duration::from_secs(10)),
            fallback_cooldown: None,
        }
    }
}

/// Why a destination was not attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Destination id the sink can never deliver to.
    InvalidDestination,
    /// Tier name did not resolve to a known tier.
    UnknownTier,
    /// Tier is known but has no rules configured.
    MissingRule,
    Chain,
    Value,
    Cooldown,
}

/// What happened on the fallback path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FallbackOutcome {
    /// At least one tier-gated destination was targeted.
    #[default]
    NotNeeded,
    /// No default destination configured; the alert was suppressed.
    Unconfigured,
    /// Fallback was due but its cooldown had not elapsed.
    CoolingDown,
    Delivered,
    Failed,
}

/// Summary of one `route` call.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RoutingOutcome {
    /// Tier-gated destinations a delivery was attempted to.
    pub attempted: u32,
    /// Tier-gated destinations that accepted the message.
    pub delivered: u32,
    pub skipped: Vec<(DestinationId, SkipReason)>,
    pub fallback: FallbackOutcome,
}

impl RoutingOutcome {
    pub fn failed(&self) -> u32 {
        self.attempted - self.delivered
    }

    /// Whether the fallback destination was sent to (successfully or not).
    pub fn fallback_fired(&self) -> bool {
        matches!(
            self.fallback,
            FallbackOutcome::Delivered | FallbackOutcome::Failed
        )
    }

    /// Nothing was sent anywhere, not even to the fallback.
    pub fn is_suppressed(&self) -> bool {
        self.attempted == 0 && !self.fallback_fired()
    }

    /// Total successful deliveries, fallback included.
    pub fn total_delivered(&self) -> u32 {
        self.delivered + u32::from(self.fallback == FallbackOutcome::Delivered)
    }

    pub fn skip_reason(&self, destination: &str) -> Option<SkipReason> {
        self.skipped
            .iter()
            .find(|(dest, _)| dest.as_str() == destination)
            .map(|(_, reason)| *reason)
    }
}

/// Routes alerts to tier-gated destinations.
pub struct AlertRouter {
    store: Arc<TierStore>,
    cooldowns: Arc<CooldownTracker>,
    sink: Arc<dyn DeliverySink>,
    clock: Arc<dyn Clock>,
    config: RouterConfig,
}

impl AlertRouter {
    /// Create a router with a fresh cooldown tracker and the system clock.
    pub fn new(store: Arc<TierStore>, sink: Arc<dyn DeliverySink>, config: RouterConfig) -> Self {
        Self {
            store,
            cooldowns: Arc::new(CooldownTracker::new()),
            sink,
            clock: Arc::new(SystemClock),
            config,
        }
    }

    /// Share an existing cooldown tracker.
    pub fn with_cooldowns(mut self, cooldowns: Arc<CooldownTracker>) -> Self {
        self.cooldowns = cooldowns;
        self
    }

    /// Set the time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn cooldowns(&self) -> &Arc<CooldownTracker> {
        &self.cooldowns
    }

    /// Route one alert to every eligible destination.
    pub async fn route(&self, alert: &AlertRequest) -> RoutingOutcome {
        // One snapshot per call, even if a reload lands mid-route
        let tiers = self.store.snapshot();
        let mut outcome = RoutingOutcome::default();

        for (destination, tier) in &tiers.destinations {
            if !self.sink.accepts(destination) {
                warn!(destination = %destination, tier = %tier, "Destination id is not deliverable, skipping");
                outcome
                    .skipped
                    .push((destination.clone(), SkipReason::InvalidDestination));
                continue;
            }

            let Some(rule) = tiers.rule_for(tier) else {
                let reason = if tier.tier().is_some() {
                    SkipReason::MissingRule
                } else {
                    SkipReason::UnknownTier
                };
                warn!(
                    destination = %destination,
                    tier = %tier,
                    reason = ?reason,
                    "Destination references a tier without rules, skipping"
                );
                outcome.skipped.push((destination.clone(), reason));
                continue;
            };

            if !rule.allows_chain(alert.chain.as_ref()) {
                debug!(destination = %destination, tier = %tier, chain = alert.chain_str(), "Skipping: chain not allowed");
                outcome.skipped.push((destination.clone(), SkipReason::Chain));
                continue;
            }

            if !rule.allows_value(alert.est_usd) {
                debug!(
                    destination = %destination,
                    tier = %tier,
                    est_usd = alert.est_usd,
                    min_usd = rule.min_usd_buy,
                    "Skipping: below minimum value"
                );
                outcome.skipped.push((destination.clone(), SkipReason::Value));
                continue;
            }

            let now = self.clock.now();
            if !self.cooldowns.is_eligible(destination, rule.delay, now) {
                debug!(destination = %destination, tier = %tier, "Skipping: cooldown active");
                outcome.skipped.push((destination.clone(), SkipReason::Cooldown));
                continue;
            }

            outcome.attempted += 1;
            let result = self.deliver(destination, &alert.text).await;
            self.mark_after(destination, now, result.is_ok());

            match result {
                Ok(()) => {
                    info!(destination = %destination, tier = %tier, chain = alert.chain_str(), "Alert sent");
                    outcome.delivered += 1;
                }
                Err(e) => {
                    warn!(destination = %destination, tier = %tier, error = %e, "Failed to send alert");
                }
            }
        }

        if outcome.attempted == 0 {
            outcome.fallback = self.send_fallback(&tiers, &alert.text).await;
        }

        outcome
    }

    /// Announce that a service is running, on the default destination only.
    /// Returns whether the message was delivered.
    pub async fn announce_active(&self, service: &str) -> bool {
        let tiers = self.store.snapshot();
        let Some(destination) = tiers.default_destination.as_ref() else {
            return false;
        };

        match self
            .deliver(destination, &format!("✅ {} is active.", service))
            .await
        {
            Ok(()) => true,
            Err(e) => {
                debug!(destination = %destination, error = %e, "Announcement not delivered");
                false
            }
        }
    }

    async fn send_fallback(&self, tiers: &TierConfig, text: &str) -> FallbackOutcome {
        let Some(destination) = tiers.default_destination.as_ref() else {
            warn!("No destination matched and no default destination configured, alert suppressed");
            return FallbackOutcome::Unconfigured;
        };

        let now = self.clock.now();
        if let Some(delay) = self.config.fallback_cooldown {
            if !self.cooldowns.is_eligible(destination, delay, now) {
                debug!(destination = %destination, "Skipping fallback: cooldown active");
                return FallbackOutcome::CoolingDown;
            }
        }

        let result = self.deliver(destination, text).await;
        if self.config.fallback_cooldown.is_some() {
            self.mark_after(destination, now, result.is_ok());
        }

        match result {
            Ok(()) => {
                info!(destination = %destination, "Alert sent to default destination");
                FallbackOutcome::Delivered
            }
            Err(e) => {
                warn!(destination = %destination, error = %e, "Failed to send alert to default destination");
                FallbackOutcome::Failed
            }
        }
    }

    async fn deliver(&self, destination: &DestinationId, text: &str) -> Result<(), DeliveryError> {
        match self.config.delivery_timeout {
            Some(limit) => tokio::time::timeout(limit, self.sink.send(destination, text))
                .await
                .unwrap_or(Err(DeliveryError::Timeout(limit))),
            None => self.sink.send(destination, text).await,
        }
    }

    fn mark_after(&self, destination: &DestinationId, now: std::time::Instant, succeeded: bool) {
        let mark = match self.config.cooldown_policy {
            CooldownPolicy::OnAttempt => true,
            CooldownPolicy::OnSuccess => succeeded,
        };
        if mark {
            self.cooldowns.mark_sent(destination, now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::{TierRef, TierRule};
    use crate::sink::RecordingSink;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;
    use whalebot_core::Tier;

    struct Harness {
        router: AlertRouter,
        sink: Arc<RecordingSink>,
        clock: Arc<ManualClock>,
    }

    fn scenario_config() -> TierConfig {
        TierConfig {
            default_destination: Some(DestinationId::new("999")),
            tiers: BTreeMap::from([
                (Tier::Free, TierRule::new(10, &["eth"], 50_000.0, 1800)),
                (Tier::GodMode, TierRule::new(200, &[], 0.0, 0)),
            ]),
            destinations: BTreeMap::from([
                (DestinationId::new("111"), TierRef::Known(Tier::Free)),
                (DestinationId::new("222"), TierRef::Known(Tier::GodMode)),
            ]),
            users: BTreeMap::new(),
        }
    }

    fn harness(config: TierConfig, sink: RecordingSink, router_config: RouterConfig) -> Harness {
        let store = Arc::new(TierStore::with_config(
            std::env::temp_dir().join("whalebot-router-unused.json"),
            config,
        ));
        let sink = Arc::new(sink);
        let clock = Arc::new(ManualClock::new());
        let router = AlertRouter::new(store, sink.clone(), router_config).with_clock(clock.clone());
        Harness {
            router,
            sink,
            clock,
        }
    }

    fn alert(chain: &str, usd: Option<f64>) -> AlertRequest {
        AlertRequest::new(chain, usd, "X").unwrap()
    }

    #[tokio::test]
    async fn test_concrete_scenario() {
        let h = harness(scenario_config(), RecordingSink::new(), RouterConfig::default());

        let outcome = h.router.route(&alert("btc", Some(10_000.0))).await;

        assert_eq!(outcome.attempted, 1);
        assert_eq!(outcome.delivered, 1);
        assert_eq!(outcome.fallback, FallbackOutcome::NotNeeded);
        assert_eq!(outcome.skip_reason("111"), Some(SkipReason::Chain));
        assert_eq!(h.sink.delivered_to(), vec!["222"]);
    }

    #[tokio::test]
    async fn test_value_gate() {
        let h = harness(scenario_config(), RecordingSink::new(), RouterConfig::default());

        let outcome = h.router.route(&alert("eth", Some(49_999.0))).await;
        assert_eq!(outcome.skip_reason("111"), Some(SkipReason::Value));
        assert_eq!(h.sink.count_for("111"), 0);

        let outcome = h.router.route(&alert("eth", Some(50_000.0))).await;
        assert_eq!(outcome.delivered, 2);
        assert_eq!(h.sink.count_for("111"), 1);
    }

    #[tokio::test]
    async fn test_unknown_value_and_chain_pass_gates() {
        let h = harness(scenario_config(), RecordingSink::new(), RouterConfig::default());

        let outcome = h.router.route(&alert("", None)).await;
        assert_eq!(outcome.attempted, 2);
        assert_eq!(h.sink.delivered_to(), vec!["111", "222"]);
    }

    #[tokio::test]
    async fn test_cooldown_spacing() {
        let h = harness(scenario_config(), RecordingSink::new(), RouterConfig::default());
        let eth = alert("eth", Some(100_000.0));

        h.router.route(&eth).await;
        h.clock.advance(Duration::from_secs(600));
        let second = h.router.route(&eth).await;
        assert_eq!(second.skip_reason("111"), Some(SkipReason::Cooldown));
        assert_eq!(h.sink.count_for("111"), 1);

        // 1800s after the delivered one, not after the suppressed one
        h.clock.advance(Duration::from_secs(1200));
        h.router.route(&eth).await;
        assert_eq!(h.sink.count_for("111"), 2);

        // Zero-delay tier got every message
        assert_eq!(h.sink.count_for("222"), 3);
    }

    #[tokio::test]
    async fn test_fallback_when_all_destinations_cooling_down() {
        let mut config = scenario_config();
        config.destinations.remove(&DestinationId::new("222"));
        let h = harness(config, RecordingSink::new(), RouterConfig::default());
        let eth = alert("eth", Some(100_000.0));

        h.router.route(&eth).await;
        let outcome = h.router.route(&eth).await;

        // Everything cooled down: falls back
        assert_eq!(outcome.attempted, 0);
        assert_eq!(outcome.fallback, FallbackOutcome::Delivered);
        assert_eq!(h.sink.delivered_to(), vec!["111", "999"]);
    }

    #[tokio::test]
    async fn test_fallback_when_no_destinations() {
        let mut config = scenario_config();
        config.destinations.clear();
        let h = harness(config, RecordingSink::new(), RouterConfig::default());

        for (chain, usd) in [("btc", Some(1.0)), ("eth", None), ("", Some(1e9))] {
            let outcome = h.router.route(&alert(chain, usd)).await;
            assert_eq!(outcome.attempted, 0);
            assert!(outcome.fallback_fired());
            assert_eq!(outcome.total_delivered(), 1);
        }
        assert_eq!(h.sink.delivered_to(), vec!["999", "999", "999"]);
        // Ungated fallback leaves no cooldown state
        assert!(h.router.cooldowns().is_empty());
    }

    #[tokio::test]
    async fn test_suppressed_without_default() {
        let h = harness(TierConfig::empty(), RecordingSink::new(), RouterConfig::default());

        let outcome = h.router.route(&alert("eth", Some(1.0))).await;
        assert_eq!(outcome.attempted, 0);
        assert_eq!(outcome.fallback, FallbackOutcome::Unconfigured);
        assert!(outcome.is_suppressed());
        assert_eq!(h.sink.attempts(), 0);
    }

    #[tokio::test]
    async fn test_unknown_tier_and_missing_rule_never_route() {
        let mut config = scenario_config();
        config.default_destination = None;
        config.destinations = BTreeMap::from([
            (DestinationId::new("1"), TierRef::Unknown("platinum".to_string())),
            (DestinationId::new("2"), TierRef::Known(Tier::Alpha)),
        ]);
        let h = harness(config, RecordingSink::new(), RouterConfig::default());

        let outcome = h.router.route(&alert("eth", Some(1e9))).await;
        assert_eq!(outcome.skip_reason("1"), Some(SkipReason::UnknownTier));
        assert_eq!(outcome.skip_reason("2"), Some(SkipReason::MissingRule));
        assert!(outcome.is_suppressed());
    }

    #[tokio::test]
    async fn test_undeliverable_destination_leaves_fallback_available() {
        let config = TierConfig {
            destinations: BTreeMap::from([(
                DestinationId::new("@alerts"),
                TierRef::Known(Tier::GodMode),
            )]),
            ..scenario_config()
        };
        let h = harness(config, RecordingSink::new().numeric_only(), RouterConfig::default());

        let outcome = h.router.route(&alert("eth", Some(1_000_000.0))).await;

        assert_eq!(outcome.attempted, 0);
        assert_eq!(
            outcome.skip_reason("@alerts"),
            Some(SkipReason::InvalidDestination)
        );
        assert_eq!(outcome.fallback, FallbackOutcome::Delivered);
        assert_eq!(h.sink.delivered_to(), vec!["999"]);
        assert_eq!(h.sink.attempts(), 1);
        assert!(h.router.cooldowns().last_sent(&DestinationId::new("@alerts")).is_none());
    }

    #[tokio::test]
    async fn test_partial_failure_isolation() {
        let mut config = scenario_config();
        config
            .destinations
            .insert(DestinationId::new("333"), TierRef::Known(Tier::GodMode));
        let sink = RecordingSink::new().fail_for("222");
        let h = harness(config, sink, RouterConfig::default());

        let outcome = h.router.route(&alert("btc", None)).await;
        assert_eq!(outcome.attempted, 2);
        assert_eq!(outcome.delivered, 1);
        assert_eq!(outcome.failed(), 1);
        assert_eq!(outcome.fallback, FallbackOutcome::NotNeeded);
        assert_eq!(h.sink.delivered_to(), vec!["333"]);
    }

    #[tokio::test]
    async fn test_failed_delivery_still_cools_down() {
        let sink = RecordingSink::new().fail_for("111");
        let h = harness(scenario_config(), sink, RouterConfig::default());
        let eth = alert("eth", Some(100_000.0));

        let first = h.router.route(&eth).await;
        assert_eq!(first.attempted, 2);
        assert_eq!(first.delivered, 1);

        h.sink.set_failing(&DestinationId::new("111"), false);
        h.clock.advance(Duration::from_secs(60));
        let second = h.router.route(&eth).await;
        assert_eq!(second.skip_reason("111"), Some(SkipReason::Cooldown));
        assert_eq!(h.sink.count_for("111"), 0);
    }

    #[tokio::test]
    async fn test_on_success_policy_retries_after_failure() {
        let sink = RecordingSink::new().fail_for("111");
        let config = RouterConfig {
            cooldown_policy: CooldownPolicy::OnSuccess,
            ..RouterConfig::default()
        };
        let h = harness(scenario_config(), sink, config);
        let eth = alert("eth", Some(100_000.0));

        h.router.route(&eth).await;
        assert!(h.router.cooldowns().last_sent(&DestinationId::new("111")).is_none());

        h.sink.set_failing(&DestinationId::new("111"), false);
        h.clock.advance(Duration::from_secs(60));
        let second = h.router.route(&eth).await;
        assert_eq!(second.delivered, 2);
        assert_eq!(h.sink.count_for("111"), 1);
    }

    #[tokio::test]
    async fn test_delivered_case_cools_down_under_both_policies() {
        for policy in [CooldownPolicy::OnAttempt, CooldownPolicy::OnSuccess] {
            let config = RouterConfig {
                cooldown_policy: policy,
                ..RouterConfig::default()
            };
            let h = harness(scenario_config(), RecordingSink::new(), config);
            let eth = alert("eth", Some(100_000.0));

            h.router.route(&eth).await;
            let second = h.router.route(&eth).await;
            assert_eq!(second.skip_reason("111"), Some(SkipReason::Cooldown));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_counts_as_failure() {
        let sink = RecordingSink::new().stall_for("222", Duration::from_secs(60));
        let config = RouterConfig {
            delivery_timeout: Some(Duration::from_secs(5)),
            ..RouterConfig::default()
        };
        let h = harness(scenario_config(), sink, config);

        let outcome = h.router.route(&alert("eth", Some(100_000.0))).await;
        assert_eq!(outcome.attempted, 2);
        assert_eq!(outcome.delivered, 1);
        assert_eq!(h.sink.delivered_to(), vec!["111"]);
        assert!(h
            .router
            .cooldowns()
            .last_sent(&DestinationId::new("222"))
            .is_some());
    }

    #[tokio::test]
    async fn test_fallback_cooldown_when_configured() {
        let mut config = scenario_config();
        config.destinations.clear();
        let router_config = RouterConfig {
            fallback_cooldown: Some(Duration::from_secs(300)),
            ..RouterConfig::default()
        };
        let h = harness(config, RecordingSink::new(), router_config);

        assert_eq!(
            h.router.route(&alert("eth", None)).await.fallback,
            FallbackOutcome::Delivered
        );
        let second = h.router.route(&alert("eth", None)).await;
        assert_eq!(second.fallback, FallbackOutcome::CoolingDown);
        assert!(second.is_suppressed());

        h.clock.advance(Duration::from_secs(300));
        assert_eq!(
            h.router.route(&alert("eth", None)).await.fallback,
            FallbackOutcome::Delivered
        );
        assert_eq!(h.sink.count_for("999"), 2);
    }

    #[tokio::test]
    async fn test_failed_fallback_is_reported() {
        let mut config = scenario_config();
        config.destinations.clear();
        let h = harness(config, RecordingSink::new().fail_for("999"), RouterConfig::default());

        let outcome = h.router.route(&alert("eth", None)).await;
        assert_eq!(outcome.fallback, FallbackOutcome::Failed);
        assert!(outcome.fallback_fired());
        assert!(!outcome.is_suppressed());
        assert_eq!(outcome.total_delivered(), 0);
    }

    #[tokio::test]
    async fn test_reload_unchanged_gives_same_decisions() {
        let path = std::env::temp_dir().join(format!(
            "whalebot-router-reload-{}.json",
            std::process::id()
        ));
        let store = Arc::new(TierStore::with_config(&path, TierConfig::builtin()));
        store
            .set_destination_tier(DestinationId::new("1"), Tier::Free)
            .unwrap();
        store
            .set_destination_tier(DestinationId::new("2"), Tier::Alpha)
            .unwrap();

        let decide = |store: Arc<TierStore>| async move {
            let router = AlertRouter::new(store, Arc::new(RecordingSink::new()), RouterConfig::default())
                .with_clock(Arc::new(ManualClock::new()));
            let mut results = Vec::new();
            for (chain, usd) in [("eth", Some(60_000.0)), ("btc", Some(20_000.0)), ("eth", Some(1.0))] {
                results.push(router.route(&alert(chain, usd)).await);
            }
            results
        };

        let before = decide(store.clone()).await;
        store.reload();
        let after = decide(store.clone()).await;
        assert_eq!(before, after);

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_announce_active() {
        let h = harness(scenario_config(), RecordingSink::new(), RouterConfig::default());
        assert!(h.router.announce_active("ETH whale monitor").await);
        assert_eq!(
            h.sink.delivered(),
            vec![(
                DestinationId::new("999"),
                "✅ ETH whale monitor is active.".to_string()
            )]
        );
        assert!(h.router.cooldowns().is_empty());

        let silent = harness(TierConfig::empty(), RecordingSink::new(), RouterConfig::default());
        assert!(!silent.router.announce_active("x").await);
    }
}
