//! Per-destination cooldown tracking.

use dashmap::DashMap;
use std::time::{Duration, Instant};
use whalebot_core::DestinationId;

/// Last-send times per destination.
///
/// Entries are never pruned; the map lives for the process lifetime and is
/// lost on restart. Concurrent `mark_sent` calls are last-write-wins.
#[derive(Debug, Default)]
pub struct CooldownTracker {
    last_sent: DashMap<DestinationId, Instant>,
}

impl CooldownTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// A destination is eligible when the delay is zero, nothing was sent to
    /// it yet, or at least `delay` has elapsed since the last send.
    pub fn is_eligible(&self, destination: &DestinationId, delay: Duration, now: Instant) -> bool {
        if delay.is_zero() {
            return true;
        }
        match self.last_sent.get(destination) {
            Some(last) => now.saturating_duration_since(*last) >= delay,
            None => true,
        }
    }

    /// Record `now` as the last send, overwriting any earlier value.
    pub fn mark_sent(&self, destination: &DestinationId, now: Instant) {
        self.last_sent.insert(destination.clone(), now);
    }

    pub fn last_sent(&self, destination: &DestinationId) -> Option<Instant> {
        self.last_sent.get(destination).map(|entry| *entry)
    }

    /// Number of destinations with a recorded send.
    pub fn len(&self) -> usize {
        self.last_sent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_sent.is_empty()
    }
}
