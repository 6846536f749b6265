//! Blockchain chain identifiers.

use compact_str::CompactString;
use serde::{Deserialize, Serialize};

/// Lower-cased chain identifier such as `eth`, `btc` or `xrp`.
///
/// Chains are open-ended strings rather than an enum: tier documents may
/// name chains the bot has no poller for yet.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "CompactString", into = "CompactString")]
pub struct ChainId(CompactString);

impl ChainId {
    pub const ETH: &'static str = "eth";
    pub const BTC: &'static str = "btc";
    pub const XRP: &'static str = "xrp";

    /// Create a normalized chain id. Returns `None` for blank input.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        Some(Self(CompactString::new(trimmed.to_lowercase())))
    }

    /// Get string representation.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<CompactString> for ChainId {
    fn from(raw: CompactString) -> Self {
        Self(CompactString::new(raw.trim().to_lowercase()))
    }
}

impl From<ChainId> for CompactString {
    fn from(chain: ChainId) -> Self {
        chain.0
    }
}

impl std::fmt::Display for ChainId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
