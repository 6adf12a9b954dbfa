//! Notifier - Turns ledger events into human-readable receipts
//!
//! Chat and agent layers subscribe to the ledger's event stream and post a
//! receipt for every transition. This module owns the formatting and the
//! subscription loop; delivery is up to the sink the caller provides.

use crate::models::{LedgerEvent, Token};
use chrono::DateTime;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

/// Configuration for receipt formatting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
    /// Decimals of the smallest token unit (18 for wei-denominated assets)
    pub token_decimals: u32,
    /// Fractional digits shown in receipts
    pub display_precision: u32,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            token_decimals: 18,
            display_precision: 4,
        }
    }
}

/// Rendered notification for one ledger event
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Receipt {
    pub job_id: u64,
    pub event: &'static str,
    pub message: String,
}

/// Receipt renderer and subscription driver
#[derive(Debug, Clone, Default)]
pub struct Notifier {
    config: NotifierConfig,
}

impl Notifier {
    pub fn new(config: NotifierConfig) -> Self {
        Self { config }
    }

    /// Fixed-point rendering of a smallest-unit amount, truncated
    pub fn format_amount(&self, amount: u128) -> String {
        let decimals = self.config.token_decimals.min(38);
        let precision = self.config.display_precision.min(decimals);
        let unit = 10u128.pow(decimals);

        let whole = amount / unit;
        if precision == 0 {
            return whole.to_string();
        }
        let fraction = (amount % unit) / 10u128.pow(decimals - precision);
        format!("{}.{:0width$}", whole, fraction, width = precision as usize)
    }

    pub fn format_deadline(&self, deadline: u64) -> String {
        i64::try_from(deadline)
            .ok()
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .map(|dt| dt.to_rfc3339())
            .unwrap_or_else(|| format!("@{}", deadline))
    }

    fn format_token(&self, token: &Token) -> String {
        match token {
            Token::Native => "native".to_string(),
            Token::External(contract) => contract.to_string(),
        }
    }

    /// Render a receipt for one event
    pub fn render(&self, event: &LedgerEvent) -> Receipt {
        let message = match event {
            LedgerEvent::JobCreated {
                id,
                creator,
                token,
                amount,
                deadline,
                metadata_cid,
            } => format!(
                "Job #{} created by {}: {} {}, deadline {}, brief {}",
                id,
                creator,
                self.format_amount(*amount),
                self.format_token(token),
                self.format_deadline(*deadline),
                metadata_cid
            ),
            LedgerEvent::JobAccepted { id, assignee } => {
                format!("Job #{} accepted by {}", id, assignee)
            }
            LedgerEvent::JobDelivered {
                id,
                artifact_hash,
                attestation_cid,
            } => format!(
                "Job #{} delivered: artifact {}, attestation {}. Verify before releasing.",
                id, artifact_hash, attestation_cid
            ),
            LedgerEvent::Released { id, to, amount } => format!(
                "Job #{} released: {} paid to {}",
                id,
                self.format_amount(*amount),
                to
            ),
            LedgerEvent::Refunded { id, to, amount } => format!(
                "Job #{} refunded: {} returned to {}",
                id,
                self.format_amount(*amount),
                to
            ),
        };

        Receipt {
            job_id: event.job_id(),
            event: event.name(),
            message,
        }
    }

    /// Drain a subscription into `sink` until the ledger goes away
    ///
    /// Returns the number of receipts delivered. Lagged receivers skip the
    /// overwritten events and keep going.
    pub async fn run<F>(&self, mut events: broadcast::Receiver<LedgerEvent>, mut sink: F) -> u64
    where
        F: FnMut(Receipt) + Send,
    {
        let mut delivered = 0;
        loop {
            match events.recv().await {
                Ok(event) => {
                    let receipt = self.render(&event);
                    debug!("Receipt for job {}: {}", receipt.job_id, receipt.message);
                    sink(receipt);
                    delivered += 1;
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Notifier lagged, skipped {} events", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
        delivered
    }
}
