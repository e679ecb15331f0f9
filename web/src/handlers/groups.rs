//! Group booking endpoints.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::NaiveDate;
use rental_core::booking::CancellationReason;
use rental_core::group::GroupStatus;
use rental_core::types::{DateRange, EquipmentId, GroupBookingId, Money, UserId};
use rental_runtime::{Checkout, GroupView, JoinOutcome};
use serde::Deserialize;

use crate::error::AppError;
use crate::extractors::Caller;
use crate::handlers::payments::{parse_reference, verification_response};
use crate::state::AppState;
use crate::WebResult;

/// `POST /group-bookings` body
#[derive(Debug, Deserialize)]
pub struct CreateGroupRequest {
    /// Equipment to rent
    pub equipment_id: EquipmentId,
    /// First rental day
    pub start_date: NaiveDate,
    /// Last rental day (inclusive)
    pub end_date: NaiveDate,
    /// Maximum number of participants
    pub total_slots: u32,
}

/// `POST /group-bookings/:id/participants` body
#[derive(Debug, Deserialize)]
pub struct JoinRequest {
    /// Share of the total price, in minor units
    pub share: u64,
}

/// ```text
/// POST /group-bookings
/// ```
pub async fn create_group(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    Json(request): Json<CreateGroupRequest>,
) -> WebResult<(StatusCode, Json<GroupView>)> {
    let range = DateRange::new(request.start_date, request.end_date)?;
    let view = state
        .groups
        .create(&ctx, request.equipment_id, range, request.total_slots)
        .await?;
    Ok((StatusCode::CREATED, Json(view)))
}

/// Group, participants and derived readiness.
///
/// ```text
/// GET /group-bookings/:id
/// ```
pub async fn get_group(
    State(state): State<AppState>,
    _caller: Caller,
    Path(id): Path<GroupBookingId>,
) -> WebResult<Json<GroupView>> {
    Ok(Json(state.groups.get(id).await?))
}

/// Join a collecting group and open a checkout session for the share.
///
/// When the gateway is down the membership still stands; `checkout` is `null`
/// and the participant retries payment later.
///
/// ```text
/// POST /group-bookings/:id/participants
/// ```
pub async fn join_group(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    Path(id): Path<GroupBookingId>,
    Json(request): Json<JoinRequest>,
) -> WebResult<(StatusCode, Json<JoinOutcome>)> {
    let outcome = state.groups.join(&ctx, id, Money::from_minor(request.share)).await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

/// ```text
/// DELETE /group-bookings/:id/participants/:user_id
/// ```
pub async fn remove_participant(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    Path((id, user_id)): Path<(GroupBookingId, UserId)>,
) -> WebResult<Json<GroupView>> {
    Ok(Json(state.groups.remove_participant(&ctx, id, user_id).await?))
}

/// Re-open checkout for a participant whose last attempt failed or lapsed.
///
/// ```text
/// POST /group-bookings/:id/participants/:user_id/payment
/// ```
pub async fn retry_participant_payment(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    Path((id, user_id)): Path<(GroupBookingId, UserId)>,
) -> WebResult<(StatusCode, Json<Checkout>)> {
    let checkout = state.groups.retry_payment(&ctx, id, user_id).await?;
    let status = if checkout.reused { StatusCode::OK } else { StatusCode::CREATED };
    Ok((status, Json(checkout)))
}

/// Verify a participant payment; the report carries the readiness flag.
///
/// ```text
/// GET /group-bookings/payment/verify/:reference
/// ```
pub async fn verify_group_payment(
    State(state): State<AppState>,
    Path(reference): Path<String>,
) -> WebResult<Response> {
    let reference = parse_reference(reference)?;
    let report = state.verifier.verify(&reference).await?;
    Ok(verification_response(report))
}

/// Owner confirmation. A lost range cancels the group and answers 409.
///
/// ```text
/// POST /group-bookings/:id/confirm
/// ```
pub async fn confirm_group(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    Path(id): Path<GroupBookingId>,
) -> WebResult<Response> {
    let view = state.groups.confirm_by_owner(&ctx, id).await?;
    let group = &view.state.group;
    if group.status == GroupStatus::Cancelled && group.cancellation == Some(CancellationReason::PostPaymentConflict) {
        return Ok(AppError::new(
            StatusCode::CONFLICT,
            "POST_PAYMENT_CONFLICT",
            format!("equipment is no longer available for group booking {id}; paid participants require refunds"),
        )
        .with_details(&view)
        .into_response());
    }
    Ok(Json(view).into_response())
}

/// ```text
/// POST /group-bookings/:id/cancel
/// ```
pub async fn cancel_group(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    Path(id): Path<GroupBookingId>,
) -> WebResult<Json<GroupView>> {
    Ok(Json(state.groups.cancel(&ctx, id).await?))
}
