//! reqwest implementation of [`PaymentGateway`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode, Url};
use rental_core::gateway::{CheckoutSession, GatewayError, GatewayVerification, InitializeRequest, PaymentGateway};
use rental_core::types::GatewayReference;
use serde::de::DeserializeOwned;

use crate::wire::{Envelope, ErrorBody, InitializeBody, InitializeData, VerifyData};

/// Longest error body echoed into a [`GatewayError`]
const MAX_ERROR_BODY: usize = 256;

/// Connection settings for [`HttpPaymentGateway`]
#[derive(Clone)]
pub struct GatewayConfig {
    /// API root, e.g. `https://api.paystack.co`
    pub base_url: String,
    /// Secret key sent as a bearer token
    pub secret_key: String,
    /// Per-request timeout
    pub timeout: Duration,
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("base_url", &self.base_url)
            .field("secret_key", &"<redacted>")
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Hosted-checkout gateway client
#[derive(Clone)]
pub struct HttpPaymentGateway {
    client: Client,
    base_url: Url,
    secret_key: String,
}

impl std::fmt::Debug for HttpPaymentGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpPaymentGateway")
            .field("base_url", &self.base_url.as_str())
            .finish_non_exhaustive()
    }
}

impl HttpPaymentGateway {
    /// Build a client from `config`
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::InvalidResponse`] if the base URL does not parse
    /// or cannot carry path segments, and [`GatewayError::Unavailable`] if the
    /// TLS backend cannot be initialised.
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| GatewayError::InvalidResponse(format!("invalid gateway base URL: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(GatewayError::InvalidResponse(format!(
                "gateway base URL cannot be a base: {base_url}"
            )));
        }
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| GatewayError::Unavailable(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url,
            secret_key: config.secret_key,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, GatewayError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| GatewayError::InvalidResponse("gateway base URL cannot be a base".into()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

fn truncate(mut body: String) -> String {
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    body
}

fn transport(err: &reqwest::Error) -> GatewayError {
    if err.is_timeout() {
        GatewayError::Unavailable("gateway request timed out".into())
    } else {
        GatewayError::Unavailable(err.to_string())
    }
}

/// Classify a response and unwrap its `data` payload
async fn read_data<T: DeserializeOwned>(response: Response) -> Result<T, GatewayError> {
    let status = response.status();
    let body = response.bytes().await.map_err(|e| transport(&e))?;

    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        return Err(GatewayError::Unavailable(format!(
            "HTTP {}: {}",
            status.as_u16(),
            truncate(String::from_utf8_lossy(&body).into_owned())
        )));
    }
    if !status.is_success() {
        let message = serde_json::from_slice::<ErrorBody>(&body)
            .map(|e| e.message)
            .unwrap_or_else(|_| truncate(String::from_utf8_lossy(&body).into_owned()));
        return Err(GatewayError::Rejected {
            status: status.as_u16(),
            message,
        });
    }

    let envelope: Envelope<T> =
        serde_json::from_slice(&body).map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;
    if !envelope.status {
        return Err(GatewayError::InvalidResponse(envelope.message));
    }
    envelope
        .data
        .ok_or_else(|| GatewayError::InvalidResponse("response has no data".into()))
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    async fn initialize(&self, request: InitializeRequest) -> Result<CheckoutSession, GatewayError> {
        let url = self.endpoint(&["transaction", "initialize"])?;
        tracing::debug!(amount = %request.amount, currency = %request.currency, "initializing checkout");

        let response = self
            .client
            .post(url)
            .bearer_auth(&self.secret_key)
            .json(&InitializeBody::from(&request))
            .send()
            .await
            .map_err(|e| transport(&e))?;
        let data: InitializeData = read_data(response).await?;

        let reference =
            GatewayReference::parse(data.reference).map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;
        tracing::info!(reference = %reference, "checkout session opened");
        Ok(CheckoutSession {
            authorization_url: data.authorization_url,
            access_code: data.access_code,
            reference,
        })
    }

    async fn verify(&self, reference: &GatewayReference) -> Result<GatewayVerification, GatewayError> {
        let url = self.endpoint(&["transaction", "verify", reference.as_str()])?;

        let response = self
            .client
            .get(url)
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .map_err(|e| transport(&e))?;
        let data: VerifyData = read_data(response).await?;
        let verification = data.into_verification()?;

        tracing::debug!(
            reference = %verification.reference,
            status = ?verification.status,
            amount = %verification.amount,
            "gateway verification received"
        );
        Ok(verification)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn gateway(base_url: &str) -> HttpPaymentGateway {
        HttpPaymentGateway::new(GatewayConfig {
            base_url: base_url.into(),
            secret_key: "sk_test_secret".into(),
            timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    #[test]
    fn test_endpoint_joins_and_escapes_segments() {
        let client = gateway("https://api.example.com/");
        let url = client.endpoint(&["transaction", "verify", "ref/1 2"]).unwrap();
        assert_eq!(url.as_str(), "https://api.example.com/transaction/verify/ref%2F1%202");

        let client = gateway("https://api.example.com/v2");
        let url = client.endpoint(&["transaction", "initialize"]).unwrap();
        assert_eq!(url.as_str(), "https://api.example.com/v2/transaction/initialize");
    }

    #[test]
    fn test_rejects_unusable_base_url() {
        let config = GatewayConfig {
            base_url: "mailto:payments@example.com".into(),
            secret_key: String::new(),
            timeout: Duration::from_secs(1),
        };
        assert!(HttpPaymentGateway::new(config).is_err());
    }

    #[test]
    fn test_debug_redacts_secret() {
        let config = GatewayConfig {
            base_url: "https://api.example.com".into(),
            secret_key: "sk_live_do_not_print".into(),
            timeout: Duration::from_secs(1),
        };
        assert!(!format!("{config:?}").contains("sk_live"));
        assert!(!format!("{:?}", HttpPaymentGateway::new(config).unwrap()).contains("sk_live"));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let body = "é".repeat(200);
        let cut = truncate(body);
        assert!(cut.len() <= MAX_ERROR_BODY);
        assert!(cut.chars().all(|c| c == 'é'));
    }
}
