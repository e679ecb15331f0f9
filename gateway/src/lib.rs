//! # Rental Gateway
//!
//! reqwest client for the hosted-checkout payment gateway.
//!
//! Two calls are used: `POST /transaction/initialize` opens a checkout
//! session, `GET /transaction/verify/:reference` reports its settlement
//! status. Errors are classified so the services can decide what to retry:
//!
//! | Cause                              | Error                                 |
//! |------------------------------------|---------------------------------------|
//! | Transport failure, timeout, 5xx, 429 | [`GatewayError::Unavailable`]       |
//! | Other 4xx                          | [`GatewayError::Rejected`]            |
//! | Body not in the documented shape   | [`GatewayError::InvalidResponse`]     |
//!
//! ```ignore
//! let gateway = HttpPaymentGateway::new(GatewayConfig {
//!     base_url: "https://api.paystack.co".into(),
//!     secret_key: std::env::var("GATEWAY_SECRET_KEY")?,
//!     timeout: Duration::from_secs(10),
//! })?;
//! let verification = gateway.verify(&reference).await?;
//! ```
//!
//! [`GatewayError::Unavailable`]: rental_core::gateway::GatewayError::Unavailable
//! [`GatewayError::Rejected`]: rental_core::gateway::GatewayError::Rejected
//! [`GatewayError::InvalidResponse`]: rental_core::gateway::GatewayError::InvalidResponse

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]

mod client;
mod wire;

pub use client::{GatewayConfig, HttpPaymentGateway};
