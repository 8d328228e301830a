//! Firebase Cloud Messaging HTTP v1 transport.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Messenger, SendError, INVALID_REGISTRATION_TOKEN, REGISTRATION_TOKEN_NOT_REGISTERED};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::notification::Message;

/// Sends messages through `POST /v1/projects/{project}/messages:send`.
#[derive(Debug)]
pub struct FcmMessenger {
    endpoint: String,
    access_token: SecretString,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct SendRequest<'a> {
    message: &'a Message,
}

#[derive(Deserialize)]
struct SendResponse {
    name: String,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorEnvelope {
    #[serde(default)]
    error: ErrorStatus,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorStatus {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    details: Vec<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorDetail {
    #[serde(default)]
    error_code: Option<String>,
}

impl FcmMessenger {
    /// Create a messenger for `project_id` authenticating with `access_token`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(
        base_url: &str,
        project_id: &str,
        access_token: SecretString,
        timeout: std::time::Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::MessagingSetup(e.to_string()))?;

        Ok(Self {
            endpoint: format!(
                "{}/v1/projects/{project_id}/messages:send",
                base_url.trim_end_matches('/')
            ),
            access_token,
            client,
        })
    }

    /// Create a messenger from the `messaging` section of the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the project id or access token is missing, or the
    /// HTTP client cannot be built.
    pub fn from_config(config: &Config) -> Result<Self> {
        let messaging = &config.messaging;
        let project_id = messaging
            .project_id
            .as_deref()
            .ok_or_else(|| Error::MessagingSetup("messaging.project_id is not set".into()))?;
        let access_token = messaging
            .access_token
            .clone()
            .ok_or_else(|| Error::MessagingSetup("messaging.access_token is not set".into()))?;

        Self::new(
            &messaging.endpoint,
            project_id,
            access_token,
            config.messaging_timeout(),
        )
    }

    /// The full send URL.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Messenger for FcmMessenger {
    fn name(&self) -> &'static str {
        "fcm"
    }

    async fn send(&self, message: &Message) -> std::result::Result<String, SendError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(self.access_token.expose_secret())
            .json(&SendRequest { message })
            .send()
            .await
            .map_err(|e| SendError::new(transport_code(&e), e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unable to read error response body".to_string());
            return Err(classify_error_response(status.as_u16(), &body));
        }

        let payload: SendResponse = response
            .json()
            .await
            .map_err(|e| SendError::new("messaging/unknown-error", e.to_string()))?;
        debug!(message_id = %payload.name, "FCM accepted message");
        Ok(payload.name)
    }
}

fn transport_code(err: &reqwest::Error) -> &'static str {
    if err.is_timeout() {
        "messaging/timeout"
    } else {
        "messaging/app/network-error"
    }
}

/// Map an FCM error response to a classified [`SendError`].
///
/// `UNREGISTERED` means the installation is gone. `INVALID_ARGUMENT` is only
/// treated as a bad token when the message says so; other invalid arguments
/// are payload problems and leave the token alone.
#[must_use]
pub fn classify_error_response(http_status: u16, body: &str) -> SendError {
    let envelope: ErrorEnvelope = serde_json::from_str(body).unwrap_or_default();
    let error = envelope.error;

    let fcm_code = error
        .details
        .iter()
        .find_map(|d| d.error_code.clone())
        .unwrap_or_else(|| error.status.clone());

    let message = if error.message.is_empty() {
        format!("HTTP {http_status}: {body}")
    } else {
        error.message
    };

    let code = match fcm_code.as_str() {
        "UNREGISTERED" | "NOT_FOUND" => REGISTRATION_TOKEN_NOT_REGISTERED,
        "INVALID_ARGUMENT" if message.to_ascii_lowercase().contains("registration token") => {
            INVALID_REGISTRATION_TOKEN
        }
        "INVALID_ARGUMENT" => "messaging/invalid-argument",
        "SENDER_ID_MISMATCH" => "messaging/mismatched-credential",
        "QUOTA_EXCEEDED" => "messaging/message-rate-exceeded",
        "UNAVAILABLE" => "messaging/server-unavailable",
        "INTERNAL" => "messaging/internal-error",
        "THIRD_PARTY_AUTH_ERROR" => "messaging/third-party-auth-error",
        "UNAUTHENTICATED" | "PERMISSION_DENIED" => "messaging/authentication-error",
        _ => "messaging/unknown-error",
    };

    SendError::new(code, message)
}
