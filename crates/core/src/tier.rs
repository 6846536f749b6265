//! Subscription tier identifiers.

use serde::{Deserialize, Serialize};

/// Subscription tier controlling how strictly alerts are gated.
///
/// Variants are declared in ascending order of privilege so the derived
/// `Ord` gives `Free < Standard < Alpha < GodMode`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    #[default]
    Free,
    Standard,
    Alpha,
    #[serde(alias = "god", alias = "god_mode")]
    GodMode,
}

impl Tier {
    /// Parse a tier name, ignoring case and surrounding whitespace.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "free" => Some(Tier::Free),
            "standard" => Some(Tier::Standard),
            "alpha" => Some(Tier::Alpha),
            "godmode" | "god" | "god_mode" => Some(Tier::GodMode),
            _ => None,
        }
    }

    /// Canonical lower-case name, as used for keys in the tier document.
    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Standard => "standard",
            Tier::Alpha => "alpha",
            Tier::GodMode => "godmode",
        }
    }

    /// Human-facing name for chat replies.
    pub fn title(self) -> &'static str {
        match self {
            Tier::Free => "Free",
            Tier::Standard => "Standard",
            Tier::Alpha => "Alpha",
            Tier::GodMode => "GodMode",
        }
    }

    /// Check whether this tier is at least `minimum`.
    #[inline]
    pub fn meets(self, minimum: Tier) -> bool {
        self >= minimum
    }

    /// Get all tier variants in ascending order.
    pub fn all() -> &'static [Tier] {
        &[Tier::Free, Tier::Standard, Tier::Alpha, Tier::GodMode]
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
