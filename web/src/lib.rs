//! Axum HTTP surface for the rental booking and payment core.
//!
//! Handlers are thin: extract the [`Caller`] and the request body, call one
//! service operation from `rental-runtime`, and map the result. Domain errors
//! become [`AppError`] responses through `From<RentalError>`.
//!
//! # Routes
//!
//! ```text
//! POST   /bookings
//! GET    /bookings
//! GET    /bookings/:id
//! POST   /bookings/:id/cancel
//! POST   /payments/initialize
//! GET    /payments/verify/:reference
//! POST   /payments/webhook
//! POST   /group-bookings
//! GET    /group-bookings/:id
//! POST   /group-bookings/:id/participants
//! DELETE /group-bookings/:id/participants/:user_id
//! POST   /group-bookings/:id/participants/:user_id/payment
//! GET    /group-bookings/payment/verify/:reference
//! POST   /group-bookings/:id/confirm
//! POST   /group-bookings/:id/cancel
//! GET    /health
//! GET    /health/ready
//! ```
//!
//! # Example
//!
//! ```ignore
//! let app = rental_web::router(AppState::new(&env));
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//! axum::serve(listener, app).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod extractors;
pub mod handlers;
pub mod middleware;
pub mod state;

use axum::{
    routing::{delete, get, post},
    Router,
};

pub use error::AppError;
pub use extractors::{Caller, CorrelationId, USER_EMAIL_HEADER, USER_ID_HEADER, USER_ROLE_HEADER};
pub use middleware::{correlation_id_layer, trace_layer, CORRELATION_ID_HEADER};
pub use state::AppState;

/// Result type alias for web handlers.
pub type WebResult<T> = Result<T, AppError>;

/// Build the application router.
pub fn router(state: AppState) -> Router {
    use handlers::{bookings, groups, payments};

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/health/ready", get(handlers::readiness))
        .route("/bookings", post(bookings::create_booking).get(bookings::list_bookings))
        .route("/bookings/:id", get(bookings::get_booking))
        .route("/bookings/:id/cancel", post(bookings::cancel_booking))
        .route("/payments/initialize", post(payments::initialize_payment))
        .route("/payments/verify/:reference", get(payments::verify_payment))
        .route("/payments/webhook", post(payments::payment_webhook))
        .route("/group-bookings", post(groups::create_group))
        .route("/group-bookings/payment/verify/:reference", get(groups::verify_group_payment))
        .route("/group-bookings/:id", get(groups::get_group))
        .route("/group-bookings/:id/participants", post(groups::join_group))
        .route(
            "/group-bookings/:id/participants/:user_id",
            delete(groups::remove_participant),
        )
        .route(
            "/group-bookings/:id/participants/:user_id/payment",
            post(groups::retry_participant_payment),
        )
        .route("/group-bookings/:id/confirm", post(groups::confirm_group))
        .route("/group-bookings/:id/cancel", post(groups::cancel_group))
        .layer(trace_layer())
        .layer(correlation_id_layer())
        .with_state(state)
}
