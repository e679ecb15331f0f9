//! JSON shapes of the gateway's transaction API.

use chrono::{DateTime, Utc};
use rental_core::gateway::{GatewayError, GatewayStatus, GatewayVerification, InitializeRequest};
use rental_core::types::{Currency, GatewayReference, Money, PaymentChannel};
use serde::{Deserialize, Serialize};

/// `POST /transaction/initialize` body
#[derive(Debug, Serialize)]
pub(crate) struct InitializeBody<'a> {
    /// Minor units
    pub amount: u64,
    pub email: &'a str,
    pub currency: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback_url: Option<&'a str>,
    pub metadata: &'a serde_json::Value,
}

impl<'a> From<&'a InitializeRequest> for InitializeBody<'a> {
    fn from(request: &'a InitializeRequest) -> Self {
        Self {
            amount: request.amount.minor(),
            email: &request.email,
            currency: request.currency.as_str(),
            callback_url: request.callback_url.as_deref(),
            metadata: &request.metadata,
        }
    }
}

/// Every response is wrapped as `{status, message, data}`
#[derive(Debug, Deserialize)]
pub(crate) struct Envelope<T> {
    pub status: bool,
    #[serde(default)]
    pub message: String,
    pub data: Option<T>,
}

/// Error bodies only promise a message
#[derive(Debug, Deserialize)]
pub(crate) struct ErrorBody {
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct InitializeData {
    pub authorization_url: String,
    pub access_code: String,
    pub reference: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct VerifyData {
    pub reference: String,
    pub status: String,
    pub amount: u64,
    pub currency: String,
    pub paid_at: Option<DateTime<Utc>>,
    pub channel: Option<String>,
    pub gateway_response: Option<String>,
}

/// Map a transaction status label.
///
/// Only `success` settles and only `failed`/`reversed` are final failures.
/// `abandoned` means the payer has not finished checkout yet, so it stays
/// pending along with every label this client does not know.
pub(crate) fn status_from_label(label: &str) -> GatewayStatus {
    match label.trim().to_ascii_lowercase().as_str() {
        "success" => GatewayStatus::Success,
        "failed" | "reversed" => GatewayStatus::Failed,
        _ => GatewayStatus::Pending,
    }
}

impl VerifyData {
    pub(crate) fn into_verification(self) -> Result<GatewayVerification, GatewayError> {
        let reference =
            GatewayReference::parse(self.reference).map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;
        let currency = Currency::parse(&self.currency).map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;
        Ok(GatewayVerification {
            reference,
            status: status_from_label(&self.status),
            amount: Money::from_minor(self.amount),
            currency,
            paid_at: self.paid_at,
            channel: self
                .channel
                .as_deref()
                .filter(|label| !label.trim().is_empty())
                .map(PaymentChannel::from_gateway),
            message: self.gateway_response,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_status_labels() {
        assert_eq!(status_from_label("success"), GatewayStatus::Success);
        assert_eq!(status_from_label("FAILED"), GatewayStatus::Failed);
        assert_eq!(status_from_label("reversed"), GatewayStatus::Failed);
        assert_eq!(status_from_label("abandoned"), GatewayStatus::Pending);
        assert_eq!(status_from_label("ongoing"), GatewayStatus::Pending);
        assert_eq!(status_from_label("something_new"), GatewayStatus::Pending);
    }

    #[test]
    fn test_verify_data_maps_fields() {
        let data: VerifyData = serde_json::from_value(serde_json::json!({
            "reference": "ref_42",
            "status": "success",
            "amount": 300_000,
            "currency": "ngn",
            "paid_at": "2024-05-20T12:05:00.000Z",
            "channel": "card",
            "gateway_response": "Approved"
        }))
        .unwrap();

        let verification = data.into_verification().unwrap();
        assert_eq!(verification.reference.as_str(), "ref_42");
        assert_eq!(verification.status, GatewayStatus::Success);
        assert_eq!(verification.amount, Money::from_minor(300_000));
        assert_eq!(verification.currency, Currency::ngn());
        assert!(verification.paid_at.is_some());
        assert_eq!(verification.channel, Some(PaymentChannel::Card));
        assert_eq!(verification.message.as_deref(), Some("Approved"));
    }

    #[test]
    fn test_verify_data_rejects_bad_currency() {
        let data: VerifyData = serde_json::from_value(serde_json::json!({
            "reference": "ref_42",
            "status": "success",
            "amount": 100,
            "currency": "naira",
            "paid_at": null,
            "channel": null,
            "gateway_response": null
        }))
        .unwrap();

        assert!(matches!(data.into_verification(), Err(GatewayError::InvalidResponse(_))));
    }

    #[test]
    fn test_initialize_body_skips_missing_callback() {
        let request = InitializeRequest {
            amount: Money::from_minor(5000),
            currency: Currency::ngn(),
            email: "payer@example.com".into(),
            callback_url: None,
            metadata: serde_json::json!({"booking_id": "b1"}),
        };
        let body = serde_json::to_value(InitializeBody::from(&request)).unwrap();
        assert_eq!(body["amount"], 5000);
        assert_eq!(body["currency"], "NGN");
        assert!(body.get("callback_url").is_none());
    }
}
