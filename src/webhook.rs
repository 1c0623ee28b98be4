//! # Incoming Message Webhook
//!
//! Forwards incoming text messages to an external HTTP endpoint so an agent can
//! react to them. Delivery is fire-and-forget: failures are logged, never retried.
//!
//! ## Payload:
//! ```json
//! {
//!   "event": "message",
//!   "sessionId": "default",
//!   "data": {
//!     "chat_jid": "15551234567@s.whatsapp.net",
//!     "sender": "15551234567",
//!     "content": "hello",
//!     "timestamp": "2025-01-01T12:00:00Z",
//!     "is_from_me": false
//!   }
//! }
//! ```

use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::BridgeError;

#[derive(Debug, Clone, Serialize)]
pub struct WebhookPayload {
    pub event: &'static str,
    #[serde(rename = "sessionId")]
    pub session_id: String,
    pub data: WebhookMessage,
}

#[derive(Debug, Clone, Serialize)]
pub struct WebhookMessage {
    pub chat_jid: String,
    pub sender: String,
    pub content: String,
    pub timestamp: String,
    pub is_from_me: bool,
}

impl WebhookPayload {
    pub fn incoming_message(
        session_id: &str,
        chat_jid: &str,
        sender: &str,
        content: &str,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            event: "message",
            session_id: session_id.to_string(),
            data: WebhookMessage {
                chat_jid: chat_jid.to_string(),
                sender: sender.to_string(),
                content: content.to_string(),
                timestamp: timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
                is_from_me: false,
            },
        }
    }
}

/// Host part of a webhook URL. Path and query may carry tokens and are never shown.
pub fn endpoint_host(url: &str) -> Option<String> {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|url| url.host_str().map(str::to_string))
}

pub struct WebhookNotifier {
    http: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, BridgeError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BridgeError::InvalidInput(format!("webhook client: {}", e)))?;
        Ok(Self {
            http,
            url: url.to_string(),
        })
    }

    pub fn host(&self) -> Option<String> {
        endpoint_host(&self.url)
    }

    /// POST the payload. Returns whether the endpoint answered 2xx.
    pub async fn notify(&self, payload: &WebhookPayload) -> bool {
        match self.http.post(&self.url).json(payload).send().await {
            Ok(response) if response.status().is_success() => {
                info!(
                    session_id = %payload.session_id,
                    status = response.status().as_u16(),
                    "Webhook delivered"
                );
                true
            }
            Ok(response) => {
                warn!(
                    session_id = %payload.session_id,
                    status = response.status().as_u16(),
                    "Webhook returned non-success status"
                );
                false
            }
            Err(e) => {
                warn!(session_id = %payload.session_id, error = %e, "Webhook delivery failed");
                false
            }
        }
    }
}
