//! Scriptable stand-in for the hosted-checkout gateway.

use async_trait::async_trait;
use chrono::Utc;
use rental_core::gateway::{
    CheckoutSession, GatewayError, GatewayStatus, GatewayVerification, InitializeRequest,
    PaymentGateway,
};
use rental_core::types::{Currency, GatewayReference, Money, PaymentChannel};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

#[derive(Debug, Clone)]
enum Answer {
    Status {
        status: GatewayStatus,
        amount: Option<Money>,
        message: Option<String>,
    },
    Error(GatewayError),
}

#[derive(Debug, Default)]
struct MockState {
    issued: u64,
    sessions: HashMap<GatewayReference, InitializeRequest>,
    scripts: HashMap<GatewayReference, VecDeque<Answer>>,
    initialize_failures: VecDeque<GatewayError>,
    initialize_calls: usize,
    verify_calls: HashMap<GatewayReference, usize>,
}

/// In-process gateway.
///
/// Issues references `mock_ref_1`, `mock_ref_2`, ... Until scripted, every
/// verification answers `pending`. The last scripted answer for a reference
/// repeats, so a settled payment keeps reporting the same status.
#[derive(Debug, Default)]
pub struct MockPaymentGateway {
    state: Mutex<MockState>,
}

impl MockPaymentGateway {
    /// Create a gateway with no scripts
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut MockState) -> T) -> T {
        f(&mut self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner))
    }

    fn script(&self, reference: &GatewayReference, answer: Answer) {
        self.with_state(|state| {
            state
                .scripts
                .entry(reference.clone())
                .or_default()
                .push_back(answer);
        });
    }

    /// The next `initialize` call fails with `error`
    pub fn fail_next_initialize(&self, error: GatewayError) {
        self.with_state(|state| state.initialize_failures.push_back(error));
    }

    /// Report success for the amount that was initialized
    pub fn succeed(&self, reference: &GatewayReference) {
        self.script(reference, Answer::Status { status: GatewayStatus::Success, amount: None, message: None });
    }

    /// Report success for `amount`
    pub fn succeed_with_amount(&self, reference: &GatewayReference, amount: Money) {
        self.script(reference, Answer::Status { status: GatewayStatus::Success, amount: Some(amount), message: None });
    }

    /// Report a declined payment
    pub fn decline(&self, reference: &GatewayReference, message: &str) {
        self.script(
            reference,
            Answer::Status {
                status: GatewayStatus::Failed,
                amount: None,
                message: Some(message.to_string()),
            },
        );
    }

    /// Report pending
    pub fn pending(&self, reference: &GatewayReference) {
        self.script(reference, Answer::Status { status: GatewayStatus::Pending, amount: None, message: None });
    }

    /// Answer verification with an error
    pub fn verify_error(&self, reference: &GatewayReference, error: GatewayError) {
        self.script(reference, Answer::Error(error));
    }

    /// Number of `initialize` calls, including failed ones
    #[must_use]
    pub fn initialize_calls(&self) -> usize {
        self.with_state(|state| state.initialize_calls)
    }

    /// Number of `verify` calls for `reference`
    #[must_use]
    pub fn verify_calls(&self, reference: &GatewayReference) -> usize {
        self.with_state(|state| state.verify_calls.get(reference).copied().unwrap_or(0))
    }

    /// The request that opened `reference`
    #[must_use]
    pub fn session_request(&self, reference: &GatewayReference) -> Option<InitializeRequest> {
        self.with_state(|state| state.sessions.get(reference).cloned())
    }
}

#[async_trait]
impl PaymentGateway for MockPaymentGateway {
    async fn initialize(&self, request: InitializeRequest) -> Result<CheckoutSession, GatewayError> {
        self.with_state(|state| {
            state.initialize_calls += 1;
            if let Some(error) = state.initialize_failures.pop_front() {
                return Err(error);
            }
            state.issued += 1;
            let n = state.issued;
            let reference = GatewayReference::parse(format!("mock_ref_{n}"))
                .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;
            state.sessions.insert(reference.clone(), request);
            Ok(CheckoutSession {
                authorization_url: format!("https://checkout.mock/pay/mock_access_{n}"),
                access_code: format!("mock_access_{n}"),
                reference,
            })
        })
    }

    async fn verify(&self, reference: &GatewayReference) -> Result<GatewayVerification, GatewayError> {
        self.with_state(|state| {
            *state.verify_calls.entry(reference.clone()).or_default() += 1;

            let Some(request) = state.sessions.get(reference).cloned() else {
                return Err(GatewayError::Rejected {
                    status: 404,
                    message: "Transaction reference not found".to_string(),
                });
            };

            let answer = match state.scripts.get_mut(reference) {
                Some(queue) if queue.len() > 1 => queue.pop_front(),
                Some(queue) => queue.front().cloned(),
                None => None,
            }
            .unwrap_or(Answer::Status { status: GatewayStatus::Pending, amount: None, message: None });

            match answer {
                Answer::Error(error) => Err(error),
                Answer::Status { status, amount, message } => Ok(GatewayVerification {
                    reference: reference.clone(),
                    status,
                    amount: amount.unwrap_or(request.amount),
                    currency: request.currency.clone(),
                    paid_at: (status == GatewayStatus::Success).then(Utc::now),
                    channel: (status == GatewayStatus::Success).then_some(PaymentChannel::Card),
                    message,
                }),
            }
        })
    }
}

/// Currency the mock reports when a test needs one without a session
#[must_use]
pub fn default_currency() -> Currency {
    Currency::ngn()
}
