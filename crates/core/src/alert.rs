//! Inbound alert requests.

use crate::ChainId;
use thiserror::Error;

/// Errors for malformed alert input.
#[derive(Debug, Error, PartialEq)]
pub enum AlertError {
    #[error("USD value must be finite and non-negative, got {0}")]
    InvalidUsdValue(f64),

    #[error("Alert text is empty")]
    EmptyText,
}

/// One alert handed to the router by an upstream producer.
///
/// The text is already formatted for display; the router never templates it.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertRequest {
    /// Chain the alert is about. `None` passes every chain gate.
    pub chain: Option<ChainId>,
    /// Estimated USD value. `None` passes every value gate.
    pub est_usd: Option<f64>,
    /// Display text.
    pub text: String,
}

impl AlertRequest {
    /// Build a validated alert. A blank chain is treated as "any chain".
    pub fn new(
        chain: &str,
        est_usd: Option<f64>,
        text: impl Into<String>,
    ) -> Result<Self, AlertError> {
        if let Some(usd) = est_usd {
            if !usd.is_finite() || usd < 0.0 {
                return Err(AlertError::InvalidUsdValue(usd));
            }
        }

        let text = text.into();
        if text.trim().is_empty() {
            return Err(AlertError::EmptyText);
        }

        Ok(Self {
            chain: ChainId::parse(chain),
            est_usd,
            text,
        })
    }

    /// Chain as a string slice, empty when unspecified.
    pub fn chain_str(&self) -> &str {
        self.chain.as_ref().map_or("", |c| c.as_str())
    }
}
