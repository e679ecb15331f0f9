//! Custom Axum extractors.
//!
//! - [`CorrelationId`]: the request's correlation id
//! - [`Caller`]: the authenticated caller as a [`RequestContext`]
//!
//! Authentication happens at the edge proxy, which forwards the verified
//! identity in `X-User-Id`, `X-User-Email` and `X-User-Role`.

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap},
};
use rental_core::context::{Principal, RequestContext, Role};
use rental_core::types::UserId;
use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::CORRELATION_ID_HEADER;

/// Header carrying the caller's user id
pub const USER_ID_HEADER: &str = "X-User-Id";
/// Header carrying the caller's email
pub const USER_EMAIL_HEADER: &str = "X-User-Email";
/// Header carrying the caller's role (`renter` or `owner`)
pub const USER_ROLE_HEADER: &str = "X-User-Role";

/// Correlation ID for request tracing.
///
/// Taken from request extensions when the correlation middleware ran,
/// otherwise from the `X-Correlation-ID` header, otherwise freshly generated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CorrelationId(pub Uuid);

impl CorrelationId {
    pub(crate) fn from_headers(headers: &HeaderMap) -> Option<Self> {
        headers
            .get(CORRELATION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| Uuid::parse_str(s).ok())
            .map(Self)
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for CorrelationId
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let correlation_id = parts
            .extensions
            .get::<Self>()
            .copied()
            .or_else(|| Self::from_headers(&parts.headers))
            .unwrap_or_else(|| Self(Uuid::new_v4()));

        Ok(correlation_id)
    }
}

/// The authenticated caller.
///
/// ```ignore
/// async fn handler(Caller(ctx): Caller) -> Result<Json<Booking>, AppError> {
///     let booking = state.bookings.get(&ctx, id).await?;
///     Ok(Json(booking))
/// }
/// ```
#[derive(Debug, Clone)]
pub struct Caller(pub RequestContext);

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

#[async_trait]
impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let headers = &parts.headers;

        let user_id = header(headers, USER_ID_HEADER)
            .ok_or_else(|| AppError::unauthorized(format!("missing {USER_ID_HEADER} header")))?;
        let user_id = Uuid::parse_str(user_id)
            .map(UserId::from_uuid)
            .map_err(|_| AppError::unauthorized(format!("malformed {USER_ID_HEADER} header")))?;
        let email = header(headers, USER_EMAIL_HEADER)
            .ok_or_else(|| AppError::unauthorized(format!("missing {USER_EMAIL_HEADER} header")))?;
        let role = header(headers, USER_ROLE_HEADER).map_or(Ok(Role::Renter), Role::parse)?;
        let principal = Principal::new(user_id, email, role)?;

        let Ok(correlation_id) = CorrelationId::from_request_parts(parts, state).await;
        Ok(Self(
            RequestContext::new(principal).with_correlation_id(correlation_id.0.to_string()),
        ))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::http::{Request, StatusCode};

    fn parts(headers: &[(&str, &str)]) -> Parts {
        let mut builder = Request::builder();
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(()).expect("Valid request").into_parts().0
    }

    #[tokio::test]
    async fn test_correlation_id_from_header() {
        let uuid = Uuid::new_v4();
        let mut parts = parts(&[(CORRELATION_ID_HEADER, uuid.to_string().as_str())]);
        let Ok(correlation_id) = CorrelationId::from_request_parts(&mut parts, &()).await;
        assert_eq!(correlation_id.0, uuid);
    }

    #[tokio::test]
    async fn test_correlation_id_prefers_extension() {
        let uuid = Uuid::new_v4();
        let mut parts = parts(&[(CORRELATION_ID_HEADER, Uuid::new_v4().to_string().as_str())]);
        parts.extensions.insert(CorrelationId(uuid));
        let Ok(correlation_id) = CorrelationId::from_request_parts(&mut parts, &()).await;
        assert_eq!(correlation_id.0, uuid);
    }

    #[tokio::test]
    async fn test_caller_from_headers() {
        let user = Uuid::new_v4();
        let mut parts = parts(&[
            (USER_ID_HEADER, user.to_string().as_str()),
            (USER_EMAIL_HEADER, "owner@example.com"),
            (USER_ROLE_HEADER, "Owner"),
        ]);
        let Caller(ctx) = Caller::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(ctx.user_id(), UserId::from_uuid(user));
        assert_eq!(ctx.principal.role, Role::Owner);
        assert!(ctx.correlation_id.is_some());
    }

    #[tokio::test]
    async fn test_caller_defaults_to_renter() {
        let mut parts = parts(&[
            (USER_ID_HEADER, Uuid::new_v4().to_string().as_str()),
            (USER_EMAIL_HEADER, "renter@example.com"),
        ]);
        let Caller(ctx) = Caller::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(ctx.principal.role, Role::Renter);
    }

    #[tokio::test]
    async fn test_caller_rejections() {
        let mut missing = parts(&[(USER_EMAIL_HEADER, "renter@example.com")]);
        let err = Caller::from_request_parts(&mut missing, &()).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);

        let mut bad_email = parts(&[(USER_ID_HEADER, Uuid::new_v4().to_string().as_str()), (USER_EMAIL_HEADER, "nobody")]);
        let err = Caller::from_request_parts(&mut bad_email, &()).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let mut bad_role = parts(&[
            (USER_ID_HEADER, Uuid::new_v4().to_string().as_str()),
            (USER_EMAIL_HEADER, "renter@example.com"),
            (USER_ROLE_HEADER, "admin"),
        ]);
        let err = Caller::from_request_parts(&mut bad_role, &()).await.unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }
}
