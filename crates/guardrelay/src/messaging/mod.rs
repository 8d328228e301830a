//! Push messaging transport.
//!
//! The dispatcher talks to a [`Messenger`] and only cares whether a failure
//! means the destination token is permanently dead. Everything else is
//! reported and dropped.

pub mod fcm;
pub mod log;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::{Config, MessagingBackend};
use crate::error::Result;
use crate::notification::Message;

pub use fcm::FcmMessenger;
pub use log::LogMessenger;

/// Error code for a token that is not a valid registration token.
pub const INVALID_REGISTRATION_TOKEN: &str = "messaging/invalid-registration-token";

/// Error code for a token that is no longer registered.
pub const REGISTRATION_TOKEN_NOT_REGISTERED: &str = "messaging/registration-token-not-registered";

/// Classification of a failed send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SendErrorKind {
    /// The token is malformed or was never issued.
    InvalidRegistrationToken,
    /// The token was valid once but the installation unregistered.
    RegistrationTokenNotRegistered,
    /// Anything else: transport, auth, quota, payload.
    Other,
}

impl SendErrorKind {
    /// Classify a messaging error code.
    #[must_use]
    pub fn from_code(code: &str) -> Self {
        match code {
            INVALID_REGISTRATION_TOKEN => Self::InvalidRegistrationToken,
            REGISTRATION_TOKEN_NOT_REGISTERED => Self::RegistrationTokenNotRegistered,
            _ => Self::Other,
        }
    }
}

/// A failed send as reported by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {message}")]
pub struct SendError {
    /// Classified failure kind.
    pub kind: SendErrorKind,
    /// Transport error code, e.g. `messaging/registration-token-not-registered`.
    pub code: String,
    /// Human-readable detail.
    pub message: String,
}

impl SendError {
    /// Build an error from a code; the kind is derived from it.
    #[must_use]
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        let code = code.into();
        Self {
            kind: SendErrorKind::from_code(&code),
            code,
            message: message.into(),
        }
    }

    /// Whether the destination token should be removed from the directory.
    #[must_use]
    pub fn is_stale_token(&self) -> bool {
        matches!(
            self.kind,
            SendErrorKind::InvalidRegistrationToken | SendErrorKind::RegistrationTokenNotRegistered
        )
    }
}

/// A push delivery service.
#[async_trait]
pub trait Messenger: Send + Sync + std::fmt::Debug {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Send one message. Returns the provider's message id.
    ///
    /// # Errors
    ///
    /// Returns a classified [`SendError`] when the provider rejects or fails
    /// to accept the message.
    async fn send(&self, message: &Message) -> std::result::Result<String, SendError>;
}

/// Build the messenger selected by the configuration.
///
/// # Errors
///
/// Returns an error if the FCM backend is selected without credentials or its
/// HTTP client cannot be built.
pub fn from_config(config: &Config) -> Result<Arc<dyn Messenger>> {
    match config.messaging.backend {
        MessagingBackend::Fcm => Ok(Arc::new(FcmMessenger::from_config(config)?)),
        MessagingBackend::Log => Ok(Arc::new(LogMessenger::new())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_from_code() {
        assert_eq!(
            SendErrorKind::from_code("messaging/invalid-registration-token"),
            SendErrorKind::InvalidRegistrationToken
        );
        assert_eq!(
            SendErrorKind::from_code("messaging/registration-token-not-registered"),
            SendErrorKind::RegistrationTokenNotRegistered
        );
        assert_eq!(
            SendErrorKind::from_code("messaging/internal-error"),
            SendErrorKind::Other
        );
    }

    #[test]
    fn test_stale_token_classification() {
        assert!(SendError::new(INVALID_REGISTRATION_TOKEN, "bad").is_stale_token());
        assert!(SendError::new(REGISTRATION_TOKEN_NOT_REGISTERED, "gone").is_stale_token());
        assert!(!SendError::new("messaging/quota-exceeded", "slow down").is_stale_token());
    }

    #[test]
    fn test_send_error_display() {
        let err = SendError::new("messaging/unavailable", "try later");
        assert_eq!(err.to_string(), "messaging/unavailable: try later");
    }

    #[test]
    fn test_from_config_log_backend() {
        let mut config = Config::default();
        config.messaging.backend = MessagingBackend::Log;

        let messenger = from_config(&config).unwrap();
        assert_eq!(messenger.name(), "log");
    }

    #[test]
    fn test_from_config_fcm_without_credentials_fails() {
        let config = Config::default();
        assert!(from_config(&config).is_err());
    }
}
