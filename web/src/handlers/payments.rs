//! Checkout initiation, verification and gateway webhooks.
//!
//! Verification responses share one mapping:
//!
//! | Outcome                                   | Status | Code                    |
//! |-------------------------------------------|--------|-------------------------|
//! | verified                                  | 200    |                         |
//! | pending (gateway has not settled)         | 202    |                         |
//! | failed (declined, expired)                | 200    |                         |
//! | failed (amount or currency mismatch)      | 422    | `AMOUNT_MISMATCH`       |
//! | verified, but the range was lost          | 409    | `POST_PAYMENT_CONFLICT` |
//!
//! Error responses carry the verification report under `details`.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rental_core::payment::PaymentOutcome;
use rental_core::types::{BookingId, GatewayReference};
use rental_runtime::{Checkout, VerificationReport};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::extractors::Caller;
use crate::state::AppState;
use crate::WebResult;

/// `POST /payments/initialize` body
#[derive(Debug, Deserialize)]
pub struct InitializePaymentRequest {
    /// Booking to pay for
    pub booking_id: BookingId,
}

/// Gateway event delivered to `POST /payments/webhook`.
///
/// Only the reference is read; status and amount always come from a fresh
/// gateway verification.
#[derive(Debug, Deserialize)]
pub struct WebhookEvent {
    /// Event name, e.g. `charge.success`
    pub event: String,
    /// Event payload
    pub data: WebhookData,
}

/// Payload of a [`WebhookEvent`]
#[derive(Debug, Deserialize)]
pub struct WebhookData {
    /// Gateway reference of the transaction
    pub reference: String,
}

/// Webhook acknowledgement
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct WebhookAck {
    /// Always `true` once the event was handled or deliberately ignored
    pub received: bool,
    /// Stored outcome label when a verification ran
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<&'static str>,
}

pub(crate) fn parse_reference(raw: String) -> Result<GatewayReference, AppError> {
    GatewayReference::parse(raw).map_err(AppError::from)
}

/// Map a verification report onto the HTTP surface.
pub(crate) fn verification_response(report: VerificationReport) -> Response {
    if report.is_post_payment_conflict() {
        return AppError::new(
            StatusCode::CONFLICT,
            "POST_PAYMENT_CONFLICT",
            format!(
                "payment {} cleared but the equipment is no longer available; a refund is required",
                report.reference
            ),
        )
        .with_details(&report)
        .into_response();
    }

    match &report.outcome {
        PaymentOutcome::Pending => (StatusCode::ACCEPTED, Json(report)).into_response(),
        PaymentOutcome::Failed { reason } if reason.is_integrity_failure() => AppError::new(
            StatusCode::UNPROCESSABLE_ENTITY,
            "AMOUNT_MISMATCH",
            format!("payment {} does not match the expected charge", report.reference),
        )
        .with_details(&report)
        .into_response(),
        PaymentOutcome::Verified { .. } | PaymentOutcome::Failed { .. } => {
            (StatusCode::OK, Json(report)).into_response()
        }
    }
}

/// Open (or reuse) a checkout session for a booking.
///
/// ```text
/// POST /payments/initialize
/// ```
pub async fn initialize_payment(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    Json(request): Json<InitializePaymentRequest>,
) -> WebResult<(StatusCode, Json<Checkout>)> {
    let checkout = state.verifier.initiate_for_booking(&ctx, request.booking_id).await?;
    let status = if checkout.reused { StatusCode::OK } else { StatusCode::CREATED };
    Ok((status, Json(checkout)))
}

/// Verify a booking payment by reference. Safe to call any number of times.
///
/// ```text
/// GET /payments/verify/:reference
/// ```
pub async fn verify_payment(
    State(state): State<AppState>,
    Path(reference): Path<String>,
) -> WebResult<Response> {
    let reference = parse_reference(reference)?;
    let report = state.verifier.verify(&reference).await?;
    Ok(verification_response(report))
}

/// Gateway webhook. Runs the same idempotent verification as the verify
/// endpoints. Unknown references and non-charge events are acknowledged and
/// ignored; a gateway outage answers 503 so the gateway redelivers.
///
/// ```text
/// POST /payments/webhook
/// ```
pub async fn payment_webhook(
    State(state): State<AppState>,
    Json(event): Json<WebhookEvent>,
) -> WebResult<Json<WebhookAck>> {
    if !event.event.starts_with("charge.") {
        tracing::debug!(event = %event.event, "ignoring webhook event");
        return Ok(Json(WebhookAck {
            received: true,
            outcome: None,
        }));
    }

    let reference = parse_reference(event.data.reference)?;
    match state.verifier.verify(&reference).await {
        Ok(report) => Ok(Json(WebhookAck {
            received: true,
            outcome: Some(report.outcome.label()),
        })),
        Err(rental_core::error::RentalError::NotFound { .. }) => {
            tracing::warn!(reference = %reference, "webhook for unknown reference");
            Ok(Json(WebhookAck {
                received: true,
                outcome: None,
            }))
        }
        Err(err) => Err(err.into()),
    }
}
