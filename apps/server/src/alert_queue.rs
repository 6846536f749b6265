//! Alert intake queue.
//!
//! Upstream producers (whale pollers, manual triggers) submit alerts through
//! a cloneable handle; one background task drains the queue and routes each
//! alert in turn, so cooldown checks inside this process never race.

use serde::Deserialize;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use whalebot_alerts::{AlertRouter, RoutingOutcome};
use whalebot_core::AlertRequest;

/// Shared handle for submitting alerts from multiple tasks.
#[derive(Clone)]
pub struct AlertQueueHandle {
    tx: mpsc::Sender<AlertRequest>,
}

impl AlertQueueHandle {
    /// Submit an alert, waiting for queue capacity.
    pub async fn send(&self, alert: AlertRequest) {
        if let Err(e) = self.tx.send(alert).await {
            warn!("Failed to queue alert: {}", e);
        }
    }
}

fn log_outcome(alert: &AlertRequest, outcome: &RoutingOutcome) {
    if outcome.is_suppressed() {
        info!(chain = alert.chain_str(), "Alert suppressed: no eligible destination");
    } else {
        debug!(
            chain = alert.chain_str(),
            attempted = outcome.attempted,
            delivered = outcome.delivered,
            fallback = ?outcome.fallback,
            "Alert routed"
        );
    }
}

/// Start the routing task. Returns the submit handle and the task handle;
/// the task ends once every handle has been dropped.
pub fn start_alert_queue(
    router: Arc<AlertRouter>,
    capacity: usize,
) -> (AlertQueueHandle, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<AlertRequest>(capacity);

    let task = tokio::spawn(async move {
        info!("Alert queue started");

        while let Some(alert) = rx.recv().await {
            let outcome = router.route(&alert).await;
            log_outcome(&alert, &outcome);
        }

        info!("Alert queue stopped");
    });

    (AlertQueueHandle { tx }, task)
}

/// One alert as a JSON line, e.g.
/// `{"chain": "eth", "usd": 125000, "text": "🐋 1,000 ETH moved"}`.
#[derive(Debug, Deserialize)]
struct AlertLine {
    #[serde(default)]
    chain: String,
    #[serde(default, alias = "est_usd")]
    usd: Option<f64>,
    text: String,
}

fn parse_alert_line(line: &str) -> Result<AlertRequest, String> {
    let parsed: AlertLine = serde_json::from_str(line).map_err(|e| e.to_string())?;
    AlertRequest::new(&parsed.chain, parsed.usd, parsed.text).map_err(|e| e.to_string())
}

/// Feed JSON-line alerts from `reader` into the queue until EOF.
/// Returns the number of alerts queued.
pub async fn run_line_intake<R>(reader: R, queue: AlertQueueHandle) -> usize
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut queued = 0;

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match parse_alert_line(line) {
                    Ok(alert) => {
                        queue.send(alert).await;
                        queued += 1;
                    }
                    Err(e) => warn!(error = %e, "Ignoring malformed alert line"),
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "Alert intake read error");
                break;
            }
        }
    }

    info!(queued = queued, "Alert intake closed");
    queued
}
