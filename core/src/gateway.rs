//! Contract consumed from the hosted-checkout payment gateway.
//!
//! The gateway is untrusted, possibly slow, and may deliver duplicates. The
//! core depends only on this trait; the reqwest client lives in
//! `rental-gateway` and a scriptable mock in `rental-testing`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::RentalError;
use crate::types::{Currency, GatewayReference, Money, PaymentChannel};

/// Request to open a hosted-checkout session
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct InitializeRequest {
    /// Amount to capture, in minor units
    pub amount: Money,
    /// Currency of `amount`
    pub currency: Currency,
    /// Payer email
    pub email: String,
    /// Where the gateway redirects the payer afterwards
    pub callback_url: Option<String>,
    /// Opaque metadata echoed back by the gateway (subject ids)
    pub metadata: serde_json::Value,
}

/// An open checkout session
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutSession {
    /// URL the payer is redirected to
    pub authorization_url: String,
    /// Gateway access code for inline checkout
    pub access_code: String,
    /// Unique reference for this attempt
    pub reference: GatewayReference,
}

/// Settlement status as reported by the gateway
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayStatus {
    /// Money captured
    Success,
    /// Attempt definitively failed
    Failed,
    /// Not settled yet, or the gateway's answer is ambiguous
    Pending,
}

/// Gateway answer for one reference
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayVerification {
    /// Reference queried
    pub reference: GatewayReference,
    /// Reported status
    pub status: GatewayStatus,
    /// Reported amount in minor units
    pub amount: Money,
    /// Reported currency
    pub currency: Currency,
    /// When the payer paid, if they did
    pub paid_at: Option<DateTime<Utc>>,
    /// How the payer paid, if reported
    pub channel: Option<PaymentChannel>,
    /// Gateway response message (failure reason on decline)
    pub message: Option<String>,
}

/// Errors from the gateway client
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
    /// Transport failure, timeout, 5xx or 429
    #[error("gateway unavailable: {0}")]
    Unavailable(String),

    /// 4xx: the gateway refused the request
    #[error("gateway rejected request ({status}): {message}")]
    Rejected {
        /// HTTP status
        status: u16,
        /// Gateway message
        message: String,
    },

    /// Body did not match the documented shape
    #[error("invalid gateway response: {0}")]
    InvalidResponse(String),
}

impl GatewayError {
    /// Whether retrying the same request may succeed
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

impl From<GatewayError> for RentalError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Unavailable(message) | GatewayError::InvalidResponse(message) => {
                Self::GatewayUnavailable(message)
            }
            GatewayError::Rejected { message, .. } => Self::PaymentRejected(message),
        }
    }
}

/// The hosted-checkout gateway
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Open a checkout session.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] on transport, HTTP or decoding failure.
    async fn initialize(&self, request: InitializeRequest) -> Result<CheckoutSession, GatewayError>;

    /// Query the settlement status of `reference`.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] on transport, HTTP or decoding failure.
    async fn verify(&self, reference: &GatewayReference) -> Result<GatewayVerification, GatewayError>;
}
