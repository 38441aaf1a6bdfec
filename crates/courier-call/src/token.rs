//! Pluggable token validation for call signaling.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TokenError {
    #[error("invalid token")]
    Invalid,

    #[error("token validation failed: {0}")]
    Backend(String),
}

/// Maps a bearer token to an authenticated user id.
///
/// Injected into the [`CallManager`](crate::CallManager) at startup so
/// deployments can plug in their identity provider.
pub trait TokenValidator: Send + Sync {
    fn validate(&self, token: &str) -> Result<String, TokenError>;
}

/// Development validator: every non-empty token maps to one fixed user
/// id. Deployments must supply a real validator before production.
pub struct StaticTokenValidator {
    user_id: String,
}

impl StaticTokenValidator {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
        }
    }
}

impl TokenValidator for StaticTokenValidator {
    fn validate(&self, token: &str) -> Result<String, TokenError> {
        if token.is_empty() {
            return Err(TokenError::Invalid);
        }
        Ok(self.user_id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_validator_accepts_any_nonempty_token() {
        let validator = StaticTokenValidator::new("user123");
        assert_eq!(validator.validate("anything").unwrap(), "user123");
        assert!(matches!(
            validator.validate(""),
            Err(TokenError::Invalid)
        ));
    }
}
