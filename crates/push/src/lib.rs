//! FCM HTTP v1 client
//!
//! Sends one multicast as a set of concurrent `messages:send` calls and
//! reports the outcome for every token, in token order. Error codes use the
//! `messaging/*` names of the Firebase Admin SDK so callers can classify
//! dead tokens the same way regardless of transport.

mod message;

use futures_util::future::join_all;
use log::debug;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use url::Url;

pub use message::{
    AndroidConfig, AndroidPriority, ApnsConfig, ApnsPayload, Aps, MulticastMessage, Notification,
    MAX_MULTICAST_TOKENS,
};

pub const DEFAULT_ENDPOINT: &str = "https://fcm.googleapis.com";

pub const REGISTRATION_TOKEN_NOT_REGISTERED: &str = "messaging/registration-token-not-registered";
pub const INVALID_ARGUMENT: &str = "messaging/invalid-argument";
pub const MISMATCHED_CREDENTIAL: &str = "messaging/mismatched-credential";
pub const MESSAGE_RATE_EXCEEDED: &str = "messaging/message-rate-exceeded";
pub const SERVER_UNAVAILABLE: &str = "messaging/server-unavailable";
pub const INTERNAL_ERROR: &str = "messaging/internal-error";
pub const THIRD_PARTY_AUTH_ERROR: &str = "messaging/third-party-auth-error";
pub const AUTHENTICATION_ERROR: &str = "messaging/authentication-error";
pub const UNKNOWN_ERROR: &str = "messaging/unknown-error";

#[derive(Debug, Error)]
pub enum PushError {
    #[error("Request error: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    UrlError(#[from] url::ParseError),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),
}

pub type Result<T> = std::result::Result<T, PushError>;

/// Failure reported for a single token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendError {
    pub code: String,
    pub message: String,
}

/// Outcome for a single token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendResponse {
    pub success: bool,
    pub message_id: Option<String>,
    pub error: Option<SendError>,
}

impl SendResponse {
    fn delivered(message_id: String) -> Self {
        Self {
            success: true,
            message_id: Some(message_id),
            error: None,
        }
    }

    fn failed(code: &str, message: String) -> Self {
        Self {
            success: false,
            message_id: None,
            error: Some(SendError {
                code: code.to_string(),
                message,
            }),
        }
    }

    pub fn error_code(&self) -> Option<&str> {
        self.error.as_ref().map(|e| e.code.as_str())
    }
}

/// Outcome of a multicast. `responses[i]` belongs to `tokens[i]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchResponse {
    pub responses: Vec<SendResponse>,
    pub success_count: usize,
    pub failure_count: usize,
}

impl BatchResponse {
    pub fn from_responses(responses: Vec<SendResponse>) -> Self {
        let success_count = responses.iter().filter(|r| r.success).count();
        let failure_count = responses.len() - success_count;
        Self {
            responses,
            success_count,
            failure_count,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SendSuccess {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorStatus,
}

#[derive(Debug, Deserialize)]
struct ErrorStatus {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    details: Vec<Value>,
}

impl ErrorStatus {
    /// `errorCode` of the FcmError detail, falling back to the RPC status
    fn fcm_code(&self) -> Option<&str> {
        self.details
            .iter()
            .filter(|d| {
                d.get("@type")
                    .and_then(Value::as_str)
                    .map_or(false, |t| t.ends_with("google.firebase.fcm.v1.FcmError"))
            })
            .find_map(|d| d.get("errorCode").and_then(Value::as_str))
            .or(self.status.as_deref())
    }
}

/// Maps an FCM v1 error code onto the Admin SDK code
pub fn classify_error_code(fcm_code: &str) -> &'static str {
    match fcm_code {
        "UNREGISTERED" | "NOT_FOUND" => REGISTRATION_TOKEN_NOT_REGISTERED,
        "INVALID_ARGUMENT" => INVALID_ARGUMENT,
        "SENDER_ID_MISMATCH" => MISMATCHED_CREDENTIAL,
        "QUOTA_EXCEEDED" | "RESOURCE_EXHAUSTED" => MESSAGE_RATE_EXCEEDED,
        "UNAVAILABLE" => SERVER_UNAVAILABLE,
        "INTERNAL" => INTERNAL_ERROR,
        "THIRD_PARTY_AUTH_ERROR" => THIRD_PARTY_AUTH_ERROR,
        "UNAUTHENTICATED" | "PERMISSION_DENIED" => AUTHENTICATION_ERROR,
        _ => UNKNOWN_ERROR,
    }
}

/// FCM client for one Firebase project
pub struct FcmClient {
    endpoint: String,
    project_id: String,
    access_token: String,
    http_client: Client,
}

impl FcmClient {
    /// `access_token` is an OAuth2 bearer token with the
    /// `firebase.messaging` scope.
    pub fn new(endpoint: &str, project_id: &str, access_token: &str, http_client: Client) -> Self {
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            project_id: project_id.to_string(),
            access_token: access_token.to_string(),
            http_client,
        }
    }

    fn send_url(&self) -> Result<Url> {
        Ok(Url::parse(&format!(
            "{}/v1/projects/{}/messages:send",
            self.endpoint, self.project_id
        ))?)
    }

    /// Send `message` to each of its tokens.
    ///
    /// Only an unusable message is an `Err`; transport and API failures are
    /// reported per token.
    pub async fn send_each_for_multicast(&self, message: &MulticastMessage) -> Result<BatchResponse> {
        if message.tokens.is_empty() {
            return Err(PushError::InvalidMessage(
                "multicast requires at least one token".to_string(),
            ));
        }
        if message.tokens.len() > MAX_MULTICAST_TOKENS {
            return Err(PushError::InvalidMessage(format!(
                "multicast supports at most {} tokens, got {}",
                MAX_MULTICAST_TOKENS,
                message.tokens.len()
            )));
        }

        let url = self.send_url()?;
        let sends = message
            .tokens
            .iter()
            .map(|token| self.send_one(url.clone(), message, token));
        let responses = join_all(sends).await;

        let batch = BatchResponse::from_responses(responses);
        debug!(
            "Multicast finished: {} delivered, {} failed",
            batch.success_count, batch.failure_count
        );
        Ok(batch)
    }

    async fn send_one(&self, url: Url, message: &MulticastMessage, token: &str) -> SendResponse {
        let response = match self
            .http_client
            .post(url)
            .bearer_auth(&self.access_token)
            .json(&message.for_token(token))
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => return SendResponse::failed(UNKNOWN_ERROR, e.to_string()),
        };

        let status = response.status();
        let text = match response.text().await {
            Ok(text) => text,
            Err(e) => return SendResponse::failed(UNKNOWN_ERROR, e.to_string()),
        };

        if status.is_success() {
            return match serde_json::from_str::<SendSuccess>(&text) {
                Ok(success) => SendResponse::delivered(success.name),
                Err(e) => SendResponse::failed(UNKNOWN_ERROR, e.to_string()),
            };
        }

        match serde_json::from_str::<ErrorEnvelope>(&text) {
            Ok(envelope) => {
                let code = envelope
                    .error
                    .fcm_code()
                    .map(classify_error_code)
                    .unwrap_or(UNKNOWN_ERROR);
                SendResponse::failed(code, envelope.error.message)
            }
            Err(_) => SendResponse::failed(
                UNKNOWN_ERROR,
                format!("Request failed with status {}: {}", status, text),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn fcm_error_detail_wins_over_rpc_status() {
        let envelope: ErrorEnvelope = serde_json::from_value(json!({
            "error": {
                "code": 404,
                "message": "Requested entity was not found.",
                "status": "NOT_FOUND",
                "details": [
                    { "@type": "type.googleapis.com/google.firebase.fcm.v1.FcmError", "errorCode": "UNREGISTERED" }
                ]
            }
        }))
        .unwrap();
        assert_eq!(envelope.error.fcm_code(), Some("UNREGISTERED"));
    }

    #[test]
    fn multicast_without_tokens_is_rejected_before_sending() {
        let client = FcmClient::new(DEFAULT_ENDPOINT, "proj", "token", Client::new());
        let message = MulticastMessage {
            tokens: Vec::new(),
            notification: Notification {
                title: "t".to_string(),
                body: "b".to_string(),
            },
            data: Default::default(),
            android: None,
            apns: None,
        };

        let result = tokio_test::block_on(client.send_each_for_multicast(&message));
        assert!(matches!(result, Err(PushError::InvalidMessage(_))));
    }

    #[test]
    fn classify_maps_dead_token_codes() {
        assert_eq!(classify_error_code("UNREGISTERED"), REGISTRATION_TOKEN_NOT_REGISTERED);
        assert_eq!(classify_error_code("INVALID_ARGUMENT"), INVALID_ARGUMENT);
        assert_eq!(classify_error_code("UNAVAILABLE"), SERVER_UNAVAILABLE);
        assert_eq!(classify_error_code("SOMETHING_NEW"), UNKNOWN_ERROR);
    }
}
