//! Destination (chat / recipient) identifiers.

use compact_str::CompactString;
use serde::{Deserialize, Serialize};

/// Addressable chat or recipient that can receive alert text.
///
/// Stored as the string form used for keys in the tier document. Telegram
/// chat ids are signed integers (group ids are negative).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DestinationId(CompactString);

impl DestinationId {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(CompactString::new(id.as_ref().trim()))
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Interpret this id as a numeric chat id.
    pub fn as_chat_id(&self) -> Option<i64> {
        self.0.parse().ok()
    }
}

impl From<i64> for DestinationId {
    fn from(id: i64) -> Self {
        Self(compact_str::format_compact!("{}", id))
    }
}

impl From<&str> for DestinationId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl std::fmt::Display for DestinationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
