//! Delivery sink abstraction.

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use tracing::info;
use whalebot_core::DestinationId;

/// Errors reported by a delivery sink.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("Invalid destination: {0}")]
    InvalidDestination(String),

    #[error("Message rejected: {0}")]
    Rejected(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Delivery timed out after {0:?}")]
    Timeout(Duration),
}

/// Capability to send text to a destination.
#[async_trait]
pub trait DeliverySink: Send + Sync {
    async fn send(&self, destination: &DestinationId, text: &str) -> Result<(), DeliveryError>;

    /// Whether `destination` is an address this sink can deliver to at all.
    /// The router skips destinations that fail this check before any gate.
    fn accepts(&self, _destination: &DestinationId) -> bool {
        true
    }
}

/// In-memory sink that records deliveries.
///
/// Used by tests and by the server's dry-run mode. Destinations can be set
/// to fail or to stall before answering.
#[derive(Debug, Default)]
pub struct RecordingSink {
    delivered: Mutex<Vec<(DestinationId, String)>>,
    failing: DashSet<DestinationId>,
    stalls: DashMap<DestinationId, Duration>,
    attempts: AtomicU64,
    log_deliveries: bool,
    numeric_only: bool,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sink that also logs every delivery at info level.
    pub fn logging() -> Self {
        Self {
            log_deliveries: true,
            ..Self::default()
        }
    }

    /// Only accept numeric chat ids, like the Telegram sink.
    pub fn numeric_only(mut self) -> Self {
        self.numeric_only = true;
        self
    }

    /// Make sends to `destination` fail until cleared.
    pub fn fail_for(self, destination: impl Into<DestinationId>) -> Self {
        self.failing.insert(destination.into());
        self
    }

    /// Toggle failure for a destination at runtime.
    pub fn set_failing(&self, destination: &DestinationId, failing: bool) {
        if failing {
            self.failing.insert(destination.clone());
        } else {
            self.failing.remove(destination);
        }
    }

    /// Delay sends to `destination` by `delay` before answering.
    pub fn stall_for(self, destination: impl Into<DestinationId>, delay: Duration) -> Self {
        self.stalls.insert(destination.into(), delay);
        self
    }

    /// Successful deliveries in order.
    pub fn delivered(&self) -> Vec<(DestinationId, String)> {
        self.delivered.lock().map(|d| d.clone()).unwrap_or_default()
    }

    /// Destinations of successful deliveries in order.
    pub fn delivered_to(&self) -> Vec<String> {
        self.delivered()
            .into_iter()
            .map(|(dest, _)| dest.to_string())
            .collect()
    }

    /// Number of successful deliveries to one destination.
    pub fn count_for(&self, destination: &str) -> usize {
        self.delivered()
            .iter()
            .filter(|(dest, _)| dest.as_str() == destination)
            .count()
    }

    /// Total send attempts, successful or not.
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeliverySink for RecordingSink {
    async fn send(&self, destination: &DestinationId, text: &str) -> Result<(), DeliveryError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let stall = self.stalls.get(destination).map(|d| *d);
        if let Some(delay) = stall {
            tokio::time::sleep(delay).await;
        }

        if !self.accepts(destination) {
            return Err(DeliveryError::InvalidDestination(destination.to_string()));
        }

        if self.failing.contains(destination) {
            return Err(DeliveryError::Network("Mock failure".to_string()));
        }

        if self.log_deliveries {
            info!(destination = %destination, text = text, "Dry-run delivery");
        }

        if let Ok(mut delivered) = self.delivered.lock() {
            delivered.push((destination.clone(), text.to_string()));
        }
        Ok(())
    }

    fn accepts(&self, destination: &DestinationId) -> bool {
        !self.numeric_only || destination.as_chat_id().is_some()
    }
}
