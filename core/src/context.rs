//! Request-scoped caller identity.
//!
//! Every service operation receives the authenticated [`Principal`] explicitly.
//! Nothing in the core reads identity from ambient state.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::RentalError;
use crate::types::UserId;

/// Role the caller is acting in for this request
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Rents equipment and joins group bookings
    Renter,
    /// Lists equipment and confirms group bookings on it
    Owner,
}

impl Role {
    /// Stable label
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Renter => "renter",
            Self::Owner => "owner",
        }
    }

    /// Parse a role label (case-insensitive).
    ///
    /// # Errors
    ///
    /// Returns [`RentalError::Validation`] for an unknown label.
    pub fn parse(label: &str) -> Result<Self, RentalError> {
        match label.trim().to_ascii_lowercase().as_str() {
            "renter" => Ok(Self::Renter),
            "owner" => Ok(Self::Owner),
            other => Err(RentalError::Validation(format!("unknown role: {other:?}"))),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The authenticated caller of a core operation.
///
/// Authentication itself happens upstream; the core only consumes the result.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// Caller's user id
    pub user_id: UserId,
    /// Email passed to the gateway as the payer address
    pub email: String,
    /// Role for list scoping
    pub role: Role,
}

impl Principal {
    /// Creates a principal.
    ///
    /// # Errors
    ///
    /// Returns [`RentalError::Validation`] when the email is not plausibly an address.
    pub fn new(user_id: UserId, email: impl Into<String>, role: Role) -> Result<Self, RentalError> {
        let email = email.into().trim().to_string();
        match email.split_once('@') {
            Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(Self {
                user_id,
                email,
                role,
            }),
            _ => Err(RentalError::Validation(format!("invalid email: {email:?}"))),
        }
    }

    /// Guard that the caller is `user_id`.
    ///
    /// # Errors
    ///
    /// Returns [`RentalError::Forbidden`] otherwise.
    pub fn ensure_is(&self, user_id: UserId, what: &str) -> Result<(), RentalError> {
        if self.user_id == user_id {
            Ok(())
        } else {
            Err(RentalError::Forbidden(format!("{} may not {what}", self.user_id)))
        }
    }
}

/// Per-request context threaded through service calls
#[derive(Clone, Debug)]
pub struct RequestContext {
    /// Authenticated caller
    pub principal: Principal,
    /// Correlation id for log stitching, when the transport supplied one
    pub correlation_id: Option<String>,
}

impl RequestContext {
    /// Context without a correlation id (tests, background jobs)
    #[must_use]
    pub const fn new(principal: Principal) -> Self {
        Self {
            principal,
            correlation_id: None,
        }
    }

    /// Attach a correlation id
    #[must_use]
    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Shorthand for the caller's user id
    #[must_use]
    pub const fn user_id(&self) -> UserId {
        self.principal.user_id
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_principal_rejects_bad_email() {
        assert!(Principal::new(UserId::new(), "nobody", Role::Renter).is_err());
        assert!(Principal::new(UserId::new(), "a@b.co", Role::Renter).is_ok());
    }

    #[test]
    fn test_ensure_is() {
        let me = UserId::new();
        let principal = Principal::new(me, "me@example.com", Role::Owner).unwrap();
        assert!(principal.ensure_is(me, "confirm").is_ok());
        assert!(matches!(
            principal.ensure_is(UserId::new(), "confirm"),
            Err(RentalError::Forbidden(_))
        ));
    }

    #[test]
    fn test_role_parse() {
        assert_eq!(Role::parse("OWNER").unwrap(), Role::Owner);
        assert!(Role::parse("admin").is_err());
    }
}
