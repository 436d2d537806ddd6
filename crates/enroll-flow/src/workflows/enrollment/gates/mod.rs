//! Advancement gates fed by external asynchronous signals.
//!
//! Two gates exist: the apprenticeship contract step waits on a pair of
//! third-party forms (polled, bounded, cancelable), and final validation
//! waits on payment (a one-shot reactive check of `paid_at`, no timer).

pub mod watcher;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::domain::{ApplicationId, ApplicationRecord};

pub use watcher::{GateWatchHandle, GateWatcher};

/// Per-form completion booleans reported by the external provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormCompletion {
    pub student_done: bool,
    pub company_done: bool,
}

impl FormCompletion {
    pub const fn complete(self) -> bool {
        self.student_done && self.company_done
    }
}

/// External form provider queried by the contract-gate poll loop.
#[async_trait]
pub trait FormStatusProvider: Send + Sync {
    async fn completion_status(
        &self,
        application: &ApplicationId,
    ) -> Result<FormCompletion, GateError>;
}

/// Gate provider failure. Poll-loop errors are logged and retried on the
/// next tick; they never surface to the applicant.
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error("external form provider unavailable: {0}")]
    Provider(String),
}

/// Requested payment instrument, forwarded opaquely to the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Card,
    Transfer,
}

/// Instrument details for confirmation; contents are provider-specific
/// and never inspected by the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentDetails {
    pub payload: String,
}

/// Result of opening a payment intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PaymentIntent {
    Created { client_secret: String },
    AlreadyPaid,
}

/// Payment provider capability.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    async fn create_intent(
        &self,
        application: &ApplicationId,
        amount_cents: u32,
        method: PaymentMethod,
    ) -> Result<PaymentIntent, PaymentError>;

    /// Confirm a previously created intent. Success yields the settlement
    /// timestamp recorded as `paid_at`.
    async fn confirm(
        &self,
        client_secret: &str,
        details: &PaymentDetails,
    ) -> Result<DateTime<Utc>, PaymentError>;
}

/// Payment failure, split so the applicant-facing message never blames
/// the card for a configuration problem.
#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    /// Recoverable: the applicant can retry with different details.
    #[error("payment declined: {0}")]
    Declined(String),
    /// Configuration or server-side failure; retrying the same card is
    /// pointless.
    #[error("payment provider error: {0}")]
    Provider(String),
}

/// Timing for the contract-gate poll loop and the enrollment fee.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateConfig {
    pub poll_interval: Duration,
    pub poll_ceiling: Duration,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            poll_ceiling: Duration::from_secs(600),
        }
    }
}

/// One-shot payment gate: satisfied exactly when the refreshed record
/// carries a settlement timestamp.
pub fn payment_gate_satisfied(record: &ApplicationRecord) -> bool {
    record.paid_at.is_some()
}
