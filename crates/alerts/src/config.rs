//! Tier configuration types.
//!
//! [`TierFile`] mirrors the on-disk `tiers.json` document, including its
//! historical key aliases. [`TierConfig`] is the resolved form the router
//! reads: tier names are parsed into [`Tier`] once, here, and never compared
//! as raw strings afterwards.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use tracing::warn;
use whalebot_core::{AlertRequest, ChainId, DestinationId, Tier};

/// Gating rules for one tier.
#[derive(Debug, Clone, PartialEq)]
pub struct TierRule {
    /// Advisory limit for upstream wallet watchers; not enforced by routing.
    pub wallet_limit: u32,
    /// Chains allowed through (empty = all).
    pub chains: BTreeSet<ChainId>,
    /// Minimum estimated USD value for an alert to pass.
    pub min_usd_buy: f64,
    /// Minimum spacing between two deliveries to the same destination.
    pub delay: Duration,
}

impl TierRule {
    pub fn new(wallet_limit: u32, chains: &[&str], min_usd_buy: f64, delay_seconds: u64) -> Self {
        Self {
            wallet_limit,
            chains: chains.iter().filter_map(|c| ChainId::parse(c)).collect(),
            min_usd_buy,
            delay: Duration::from_secs(delay_seconds),
        }
    }

    /// Chain gate. An empty allow-list or an unspecified chain always passes.
    pub fn allows_chain(&self, chain: Option<&ChainId>) -> bool {
        match chain {
            Some(chain) if !self.chains.is_empty() => self.chains.contains(chain),
            _ => true,
        }
    }

    /// Value gate. An unknown USD value always passes.
    pub fn allows_value(&self, est_usd: Option<f64>) -> bool {
        est_usd.map_or(true, |usd| usd >= self.min_usd_buy)
    }

    /// Chain and value gates combined (cooldown is tracked separately).
    pub fn admits(&self, alert: &AlertRequest) -> bool {
        self.allows_chain(alert.chain.as_ref()) && self.allows_value(alert.est_usd)
    }
}

/// Tier reference from a destination or user entry.
///
/// Names that do not parse are kept verbatim so they can be logged at routing
/// time and written back unchanged on persist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TierRef {
    Known(Tier),
    Unknown(String),
}

impl TierRef {
    pub fn parse(name: &str) -> Self {
        match Tier::from_name(name) {
            Some(tier) => TierRef::Known(tier),
            None => TierRef::Unknown(name.trim().to_string()),
        }
    }

    pub fn tier(&self) -> Option<Tier> {
        match self {
            TierRef::Known(tier) => Some(*tier),
            TierRef::Unknown(_) => None,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            TierRef::Known(tier) => tier.as_str(),
            TierRef::Unknown(name) => name,
        }
    }

    /// Name for chat replies: title case for known tiers, verbatim otherwise.
    pub fn title(&self) -> &str {
        match self {
            TierRef::Known(tier) => tier.title(),
            TierRef::Unknown(name) => name,
        }
    }
}

impl From<Tier> for TierRef {
    fn from(tier: Tier) -> Self {
        TierRef::Known(tier)
    }
}

impl std::fmt::Display for TierRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Resolved, process-wide tier configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct TierConfig {
    /// Destination used when no tier-gated destination is targeted.
    pub default_destination: Option<DestinationId>,
    /// Rules per tier.
    pub tiers: BTreeMap<Tier, TierRule>,
    /// Routing destinations (group chats) and their tiers.
    pub destinations: BTreeMap<DestinationId, TierRef>,
    /// Per-user tiers, used by the command surface.
    pub users: BTreeMap<DestinationId, TierRef>,
}

impl Default for TierConfig {
    fn default() -> Self {
        Self::builtin()
    }
}

const MAJOR_CHAINS: [&str; 3] = [ChainId::ETH, ChainId::BTC, ChainId::XRP];

impl TierConfig {
    /// Built-in configuration used when the tier document is missing or
    /// unreadable: four example tiers, no destinations, no default.
    pub fn builtin() -> Self {
        let tiers = BTreeMap::from([
            (Tier::Free, TierRule::new(10, &[ChainId::ETH], 50_000.0, 1800)),
            (Tier::Standard, TierRule::new(25, &[ChainId::ETH], 25_000.0, 900)),
            (Tier::Alpha, TierRule::new(75, &MAJOR_CHAINS, 10_000.0, 60)),
            (Tier::GodMode, TierRule::new(200, &MAJOR_CHAINS, 0.0, 0)),
        ]);

        Self {
            default_destination: None,
            tiers,
            destinations: BTreeMap::new(),
            users: BTreeMap::new(),
        }
    }

    /// Empty configuration: no rules, no destinations, no default.
    pub fn empty() -> Self {
        Self {
            default_destination: None,
            tiers: BTreeMap::new(),
            destinations: BTreeMap::new(),
            users: BTreeMap::new(),
        }
    }

    /// Parse a tier document.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let file: TierFile = serde_json::from_str(json)?;
        Ok(Self::from_file(file))
    }

    /// Resolve a raw document. Rules for unrecognized tier names are dropped.
    pub fn from_file(file: TierFile) -> Self {
        let mut tiers = BTreeMap::new();
        for (name, raw) in file.tiers {
            match Tier::from_name(&name) {
                Some(tier) => {
                    if tiers.insert(tier, raw.into_rule()).is_some() {
                        warn!(tier = %tier, name = %name, "Duplicate tier rules, last one wins");
                    }
                }
                None => warn!(name = %name, "Ignoring rules for unknown tier"),
            }
        }

        let resolve = |map: BTreeMap<String, String>| -> BTreeMap<DestinationId, TierRef> {
            map.into_iter()
                .map(|(id, tier)| (DestinationId::new(&id), TierRef::parse(&tier)))
                .collect()
        };

        Self {
            default_destination: file.default_group_id.and_then(RawId::into_destination),
            tiers,
            destinations: resolve(file.groups),
            users: resolve(file.users),
        }
    }

    /// Convert back into the on-disk document.
    pub fn to_file(&self) -> TierFile {
        let unresolve = |map: &BTreeMap<DestinationId, TierRef>| -> BTreeMap<String, String> {
            map.iter()
                .map(|(id, tier)| (id.to_string(), tier.name().to_string()))
                .collect()
        };

        TierFile {
            default_group_id: self.default_destination.as_ref().map(RawId::from_destination),
            tiers: self
                .tiers
                .iter()
                .map(|(tier, rule)| (tier.as_str().to_string(), RawTierRule::from_rule(rule)))
                .collect(),
            users: unresolve(&self.users),
            groups: unresolve(&self.destinations),
        }
    }

    /// Rules for a tier reference, if the tier is known and configured.
    pub fn rule_for(&self, tier: &TierRef) -> Option<&TierRule> {
        tier.tier().and_then(|t| self.tiers.get(&t))
    }

    /// Tier assigned to a user; unassigned or unrecognized users are `Free`.
    pub fn user_tier(&self, user: &DestinationId) -> Tier {
        self.users
            .get(user)
            .and_then(TierRef::tier)
            .unwrap_or_default()
    }

    /// Destinations whose tier is at least `minimum`.
    pub fn destinations_at_least(&self, minimum: Tier) -> Vec<&DestinationId> {
        self.destinations
            .iter()
            .filter(|(_, tier)| tier.tier().is_some_and(|t| t.meets(minimum)))
            .map(|(id, _)| id)
            .collect()
    }
}

/// A destination id as written in JSON: bot-written files hold numbers,
/// hand-edited files often use strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawId {
    Int(i64),
    Text(String),
}

impl RawId {
    /// Blank strings and `0` mean "unset".
    fn into_destination(self) -> Option<DestinationId> {
        match self {
            RawId::Int(0) => None,
            RawId::Int(id) => Some(DestinationId::from(id)),
            RawId::Text(s) if s.trim().is_empty() => None,
            RawId::Text(s) => Some(DestinationId::new(s)),
        }
    }

    fn from_destination(id: &DestinationId) -> Self {
        match id.as_chat_id() {
            Some(n) => RawId::Int(n),
            None => RawId::Text(id.to_string()),
        }
    }
}

/// Rule object as written in `tiers.json`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RawTierRule {
    #[serde(default, deserialize_with = "lenient_u32")]
    pub wallet_limit: u32,
    #[serde(default)]
    pub chains: Vec<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub min_usd_buy: f64,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub delay_seconds: i64,
}

/// Numeric field as found in hand-edited documents: `1800`, `1800.0` or `"1800"`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LenientNumber {
    Int(i64),
    Float(f64),
    Text(String),
}

impl LenientNumber {
    fn into_f64(self) -> Option<f64> {
        let value = match self {
            LenientNumber::Int(n) => n as f64,
            LenientNumber::Float(n) => n,
            LenientNumber::Text(s) => s.trim().parse().ok()?,
        };
        value.is_finite().then_some(value)
    }

    fn into_i64(self) -> Option<i64> {
        match self {
            LenientNumber::Int(n) => Some(n),
            // Fractions truncate toward zero
            other => other.into_f64().map(|n| n as i64),
        }
    }
}

fn lenient_f64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    let raw = LenientNumber::deserialize(deserializer)?;
    let shown = format!("{:?}", raw);
    raw.into_f64()
        .ok_or_else(|| D::Error::custom(format!("expected a number, got {}", shown)))
}

fn lenient_i64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    let raw = LenientNumber::deserialize(deserializer)?;
    let shown = format!("{:?}", raw);
    raw.into_i64()
        .ok_or_else(|| D::Error::custom(format!("expected an integer, got {}", shown)))
}

fn lenient_u32<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
    let value = lenient_i64(deserializer)?;
    Ok(value.clamp(0, i64::from(u32::MAX)) as u32)
}

impl RawTierRule {
    fn into_rule(self) -> TierRule {
        TierRule {
            wallet_limit: self.wallet_limit,
            chains: self.chains.iter().filter_map(|c| ChainId::parse(c)).collect(),
            min_usd_buy: self.min_usd_buy,
            // Non-positive delay means "no cooldown".
            delay: Duration::from_secs(self.delay_seconds.max(0) as u64),
        }
    }

    fn from_rule(rule: &TierRule) -> Self {
        Self {
            wallet_limit: rule.wallet_limit,
            chains: rule.chains.iter().map(|c| c.to_string()).collect(),
            min_usd_buy: rule.min_usd_buy,
            delay_seconds: rule.delay.as_secs() as i64,
        }
    }
}

/// The `tiers.json` document.
///
/// Accepts `tiers` or `TIERS` for the rule table and `groups` or
/// `destinations` for the routing table. Always written back with the
/// lower-case names.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TierFile {
    #[serde(rename = "DEFAULT_GROUP_ID", default)]
    pub default_group_id: Option<RawId>,
    #[serde(default, alias = "TIERS")]
    pub tiers: BTreeMap<String, RawTierRule>,
    #[serde(default)]
    pub users: BTreeMap<String, String>,
    #[serde(default, alias = "destinations")]
    pub groups: BTreeMap<String, String>,
}
