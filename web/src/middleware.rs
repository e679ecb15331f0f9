//! Correlation id middleware.
//!
//! 1. **Extract** the correlation ID from `X-Correlation-ID` (or generate a new UUID)
//! 2. **Store** it in request extensions as [`CorrelationId`], where the
//!    trace layer's `http_request` span and the [`Caller`](crate::Caller)
//!    extractor pick it up
//! 3. **Echo** it in the response `X-Correlation-ID` header
//!
//! ```ignore
//! let app = Router::new()
//!     .route("/bookings", post(create_booking))
//!     .layer(correlation_id_layer());
//! ```

use axum::{
    body::Body,
    extract::Request,
    http::HeaderValue,
    response::Response,
};
use std::task::{Context, Poll};
use tower::{Layer, Service};
use tower_http::trace::{DefaultOnResponse, MakeSpan, TraceLayer};
use tower_http::classify::{ServerErrorsAsFailures, SharedClassifier};
use tracing::{Level, Span};
use uuid::Uuid;

use crate::extractors::CorrelationId;

/// Header name for correlation ID.
pub const CORRELATION_ID_HEADER: &str = "X-Correlation-ID";

/// Create a layer that adds correlation ID tracking to all requests.
#[must_use]
pub const fn correlation_id_layer() -> CorrelationIdLayer {
    CorrelationIdLayer
}

/// Layer for correlation ID tracking.
#[derive(Clone, Debug)]
pub struct CorrelationIdLayer;

impl<S> Layer<S> for CorrelationIdLayer {
    type Service = CorrelationIdMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CorrelationIdMiddleware { inner }
    }
}

/// Middleware service for correlation ID tracking.
#[derive(Clone, Debug)]
pub struct CorrelationIdMiddleware<S> {
    inner: S,
}

impl<S, B> Service<Request> for CorrelationIdMiddleware<S>
where
    S: Service<Request, Response = Response<B>> + Send + 'static,
    B: Send + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request) -> Self::Future {
        let correlation_id = CorrelationId::from_headers(req.headers())
            .unwrap_or_else(|| CorrelationId(Uuid::new_v4()));
        req.extensions_mut().insert(correlation_id);

        let fut = self.inner.call(req);

        Box::pin(async move {
            let mut response = fut.await?;
            if let Ok(header_value) = HeaderValue::from_str(&correlation_id.0.to_string()) {
                response
                    .headers_mut()
                    .insert(CORRELATION_ID_HEADER, header_value);
            }
            Ok(response)
        })
    }
}

/// Opens an `http_request` span carrying the correlation id
#[derive(Clone, Copy, Debug, Default)]
pub struct CorrelatedSpan;

impl MakeSpan<Body> for CorrelatedSpan {
    fn make_span(&mut self, request: &Request<Body>) -> Span {
        let correlation_id = request
            .extensions()
            .get::<CorrelationId>()
            .map(|id| id.0.to_string())
            .unwrap_or_default();
        tracing::info_span!(
            "http_request",
            correlation_id = %correlation_id,
            method = %request.method(),
            uri = %request.uri(),
        )
    }
}

/// Request tracing with correlated spans and a completion log per response
#[must_use]
pub fn trace_layer() -> TraceLayer<SharedClassifier<ServerErrorsAsFailures>, CorrelatedSpan> {
    TraceLayer::new_for_http()
        .make_span_with(CorrelatedSpan)
        .on_response(DefaultOnResponse::new().level(Level::INFO))
}
