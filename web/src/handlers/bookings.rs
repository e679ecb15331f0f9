//! Single-renter booking endpoints.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::NaiveDate;
use rental_core::booking::Booking;
use rental_core::types::{BookingId, DateRange, EquipmentId};
use rental_runtime::Page;
use serde::Deserialize;

use crate::error::AppError;
use crate::extractors::Caller;
use crate::state::AppState;
use crate::WebResult;

/// `POST /bookings` body
#[derive(Debug, Deserialize)]
pub struct CreateBookingRequest {
    /// Equipment to rent
    pub equipment_id: EquipmentId,
    /// First rental day
    pub start_date: NaiveDate,
    /// Last rental day (inclusive)
    pub end_date: NaiveDate,
}

/// `GET /bookings` query
#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    /// 1-based page
    pub page: Option<u32>,
    /// Page size, at most 100
    pub per_page: Option<u32>,
}

/// Create a `pending` booking.
///
/// ```text
/// POST /bookings
/// ```
pub async fn create_booking(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    Json(request): Json<CreateBookingRequest>,
) -> WebResult<(StatusCode, Json<Booking>)> {
    let range = DateRange::new(request.start_date, request.end_date)?;
    let booking = state.bookings.create(&ctx, request.equipment_id, range).await?;
    Ok((StatusCode::CREATED, Json(booking)))
}

/// List the caller's bookings (renter) or bookings on their equipment (owner).
///
/// ```text
/// GET /bookings?page=1&per_page=20
/// ```
pub async fn list_bookings(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    Query(params): Query<ListParams>,
) -> WebResult<Json<Page<Booking>>> {
    let page = state.bookings.list(&ctx, params.page, params.per_page).await?;
    Ok(Json(page))
}

/// ```text
/// GET /bookings/:id
/// ```
pub async fn get_booking(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    Path(id): Path<BookingId>,
) -> WebResult<Json<Booking>> {
    Ok(Json(state.bookings.get(&ctx, id).await?))
}

/// Cancel a booking that has not been confirmed.
///
/// ```text
/// POST /bookings/:id/cancel
/// ```
pub async fn cancel_booking(
    State(state): State<AppState>,
    Caller(ctx): Caller,
    Path(id): Path<BookingId>,
) -> Result<Json<Booking>, AppError> {
    let booking = state.bookings.cancel(&ctx, id).await?;
    tracing::info!(booking_id = %booking.id, "booking cancelled over HTTP");
    Ok(Json(booking))
}
