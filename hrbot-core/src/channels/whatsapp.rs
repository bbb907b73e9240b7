//! WhatsApp Business Cloud API channel.
//!
//! Inbound messages arrive as webhook payloads and are parsed into
//! [`Inbound`]. Outbound replies go through a [`WhatsAppHttpClient`]; the
//! reqwest implementation talks to the Graph API and tests use
//! [`MockWhatsAppHttp`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{ChannelError, ConfigError};
use crate::monitor::{SideEffectKind, SideEffectMonitor};

const CHANNEL: &str = "whatsapp";

/// Env fallback for `phone_number_id`.
pub const PHONE_NUMBER_ID_ENV: &str = "PHONE_NUMBER_ID";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WhatsAppConfig {
    /// Sender phone number id. Empty means read `PHONE_NUMBER_ID`.
    pub phone_number_id: String,
    pub access_token_env: String,
    pub verify_token_env: String,
    pub api_version: String,
    /// Numbers allowed to talk to the bot. Empty allows everyone.
    pub allowed_numbers: Vec<String>,
    pub send_retries: u32,
    pub retry_delay_secs: u64,
    pub timeout_secs: u64,
}

impl Default for WhatsAppConfig {
    fn default() -> Self {
        Self {
            phone_number_id: String::new(),
            access_token_env: "WHATSAPP_ACCESS_TOKEN".into(),
            verify_token_env: "VERIFY_TOKEN".into(),
            api_version: "v19.0".into(),
            allowed_numbers: Vec::new(),
            send_retries: 3,
            retry_delay_secs: 2,
            timeout_secs: 30,
        }
    }
}

impl WhatsAppConfig {
    pub fn resolved_phone_number_id(&self) -> Result<String, ConfigError> {
        if !self.phone_number_id.is_empty() {
            return Ok(self.phone_number_id.clone());
        }
        crate::config::require_env(PHONE_NUMBER_ID_ENV)
    }

    pub fn access_token(&self) -> Result<String, ConfigError> {
        crate::config::require_env(&self.access_token_env)
    }

    pub fn verify_token(&self) -> Result<String, ConfigError> {
        crate::config::require_env(&self.verify_token_env)
    }

    pub fn is_allowed(&self, number: &str) -> bool {
        self.allowed_numbers.is_empty() || self.allowed_numbers.iter().any(|n| n == number)
    }
}

/// Trait for WhatsApp API interactions.
#[async_trait]
pub trait WhatsAppHttpClient: Send + Sync {
    /// Send a text message, returning the message id.
    async fn send_text(&self, to: &str, text: &str) -> Result<String, String>;
}

/// Real WhatsApp Cloud API client using reqwest.
pub struct RealWhatsAppHttp {
    client: reqwest::Client,
    url: String,
    access_token: String,
}

impl RealWhatsAppHttp {
    pub fn new(
        api_version: &str,
        phone_number_id: &str,
        access_token: String,
        timeout_secs: u64,
    ) -> Result<Self, ChannelError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| ChannelError::ConnectionFailed {
                channel: CHANNEL.into(),
                message: format!("Failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            client,
            url: format!("https://graph.facebook.com/{api_version}/{phone_number_id}/messages"),
            access_token,
        })
    }

    pub fn from_config(config: &WhatsAppConfig) -> Result<Self, ConfigError> {
        let phone_number_id = config.resolved_phone_number_id()?;
        let access_token = config.access_token()?;
        Self::new(
            &config.api_version,
            &phone_number_id,
            access_token,
            config.timeout_secs,
        )
        .map_err(|e| ConfigError::Invalid {
            message: e.to_string(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

/// Body of an outbound text message.
pub fn text_payload(to: &str, text: &str) -> serde_json::Value {
    serde_json::json!({
        "messaging_product": "whatsapp",
        "to": to,
        "type": "text",
        "text": { "body": text }
    })
}

#[async_trait]
impl WhatsAppHttpClient for RealWhatsAppHttp {
    async fn send_text(&self, to: &str, text: &str) -> Result<String, String> {
        let resp = self
            .client
            .post(&self.url)
            .bearer_auth(&self.access_token)
            .json(&text_payload(to, text))
            .send()
            .await
            .map_err(|e| format!("HTTP error: {e}"))?;

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| format!("JSON parse error: {e}"))?;

        if !status.is_success() {
            let err = body["error"]["message"].as_str().unwrap_or("unknown error");
            return Err(format!("WhatsApp API error ({status}): {err}"));
        }

        Ok(body["messages"][0]["id"]
            .as_str()
            .unwrap_or("unknown")
            .to_string())
    }
}

/// Sends replies with a bounded number of attempts and a fixed delay.
pub struct WhatsAppSender {
    http: Box<dyn WhatsAppHttpClient>,
    attempts: u32,
    delay: Duration,
    monitor: Arc<SideEffectMonitor>,
}

impl WhatsAppSender {
    pub fn new(
        http: Box<dyn WhatsAppHttpClient>,
        attempts: u32,
        delay: Duration,
        monitor: Arc<SideEffectMonitor>,
    ) -> Self {
        Self {
            http,
            attempts: attempts.max(1),
            delay,
            monitor,
        }
    }

    pub fn from_config(
        http: Box<dyn WhatsAppHttpClient>,
        config: &WhatsAppConfig,
        monitor: Arc<SideEffectMonitor>,
    ) -> Self {
        Self::new(
            http,
            config.send_retries,
            Duration::from_secs(config.retry_delay_secs),
            monitor,
        )
    }

    /// Deliver `text` to `to`. Exhausted retries are logged, counted and
    /// returned as an error; nothing else is escalated.
    pub async fn send_with_retry(&self, to: &str, text: &str) -> Result<String, ChannelError> {
        let mut last_error = String::new();
        for attempt in 1..=self.attempts {
            match self.http.send_text(to, text).await {
                Ok(id) => {
                    info!(to, message_id = %id, attempt, "Reply delivered");
                    return Ok(id);
                }
                Err(e) => {
                    warn!(to, attempt, attempts = self.attempts, error = %e, "Send attempt failed");
                    last_error = e;
                    if attempt < self.attempts {
                        tokio::time::sleep(self.delay).await;
                    }
                }
            }
        }
        let error = ChannelError::SendFailed {
            channel: CHANNEL.into(),
            message: format!("giving up after {} attempts: {last_error}", self.attempts),
        };
        self.monitor
            .record_failure(SideEffectKind::OutboundSend, &error);
        Err(error)
    }
}

// Webhook payload, only the fields this bot reads.

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebhookPayload {
    #[serde(default)]
    pub entry: Vec<WebhookEntry>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebhookEntry {
    #[serde(default)]
    pub changes: Vec<WebhookChange>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebhookChange {
    #[serde(default)]
    pub value: WebhookValue,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebhookValue {
    #[serde(default)]
    pub messages: Vec<WebhookMessage>,
    #[serde(default)]
    pub statuses: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookMessage {
    pub from: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub text: Option<WebhookText>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookText {
    pub body: String,
}

/// What an inbound webhook call carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A user text message to answer.
    Text { from: String, body: String },
    /// A message of another type (image, audio...).
    Unsupported { from: String, kind: String },
    /// Delivery/read status or an empty change.
    Status,
    /// Not a WhatsApp payload we understand.
    Malformed(String),
}

/// Classify `entry[0].changes[0].value.messages[0]` of a webhook body.
pub fn parse_inbound(body: &serde_json::Value) -> Inbound {
    let payload: WebhookPayload = match serde_json::from_value(body.clone()) {
        Ok(payload) => payload,
        Err(e) => return Inbound::Malformed(e.to_string()),
    };
    let Some(value) = payload
        .entry
        .into_iter()
        .next()
        .and_then(|entry| entry.changes.into_iter().next())
        .map(|change| change.value)
    else {
        return Inbound::Malformed("missing entry[0].changes[0]".into());
    };
    let Some(message) = value.messages.into_iter().next() else {
        debug!(statuses = value.statuses.len(), "Status event received");
        return Inbound::Status;
    };
    match (message.kind.as_str(), message.text) {
        ("text", Some(text)) => Inbound::Text {
            from: message.from,
            body: text.body,
        },
        ("text", None) => Inbound::Malformed("text message without body".into()),
        (kind, _) => Inbound::Unsupported {
            from: message.from,
            kind: kind.to_string(),
        },
    }
}

/// A message captured by `MockWhatsAppHttp`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentText {
    pub to: String,
    pub text: String,
}

/// In-memory client for tests: records sends and fails the first
/// `failures` attempts.
#[derive(Default)]
pub struct MockWhatsAppHttp {
    sent: Arc<Mutex<Vec<SentText>>>,
    attempts: Arc<Mutex<u32>>,
    failures: u32,
}

impl MockWhatsAppHttp {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_first(failures: u32) -> Self {
        Self {
            failures,
            ..Self::default()
        }
    }

    /// Shared handle on delivered messages, usable after the mock is boxed.
    pub fn sent_handle(&self) -> Arc<Mutex<Vec<SentText>>> {
        self.sent.clone()
    }

    pub fn attempts_handle(&self) -> Arc<Mutex<u32>> {
        self.attempts.clone()
    }
}

#[async_trait]
impl WhatsAppHttpClient for MockWhatsAppHttp {
    async fn send_text(&self, to: &str, text: &str) -> Result<String, String> {
        let attempt = {
            let mut attempts = self
                .attempts
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            *attempts += 1;
            *attempts
        };
        if attempt <= self.failures {
            return Err(format!("simulated failure {attempt}"));
        }
        self.sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(SentText {
                to: to.to_string(),
                text: text.to_string(),
            });
        Ok(format!("wamid.{attempt}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn text_body(from: &str, body: &str) -> serde_json::Value {
        json!({
            "object": "whatsapp_business_account",
            "entry": [{
                "id": "123",
                "changes": [{
                    "field": "messages",
                    "value": {
                        "messaging_product": "whatsapp",
                        "messages": [{
                            "from": from,
                            "id": "wamid.abc",
                            "timestamp": "1700000000",
                            "type": "text",
                            "text": { "body": body }
                        }]
                    }
                }]
            }]
        })
    }

    #[test]
    fn test_parse_text_message() {
        assert_eq!(
            parse_inbound(&text_body("56912345678", "¿Qué es la beca?")),
            Inbound::Text {
                from: "56912345678".into(),
                body: "¿Qué es la beca?".into()
            }
        );
    }

    #[test]
    fn test_parse_status_event() {
        let body = json!({
            "entry": [{ "changes": [{ "value": { "statuses": [{ "status": "read" }] } }] }]
        });
        assert_eq!(parse_inbound(&body), Inbound::Status);
    }

    #[test]
    fn test_parse_non_text() {
        let body = json!({
            "entry": [{ "changes": [{ "value": { "messages": [{
                "from": "569", "type": "image", "image": { "id": "x" }
            }] } }] }]
        });
        assert_eq!(
            parse_inbound(&body),
            Inbound::Unsupported {
                from: "569".into(),
                kind: "image".into()
            }
        );
    }

    #[test]
    fn test_parse_malformed() {
        assert!(matches!(parse_inbound(&json!({})), Inbound::Malformed(_)));
        assert!(matches!(
            parse_inbound(&json!({"entry": "nope"})),
            Inbound::Malformed(_)
        ));
    }

    #[test]
    fn test_text_payload_shape() {
        let payload = text_payload("569", "hola");
        assert_eq!(payload["messaging_product"], "whatsapp");
        assert_eq!(payload["type"], "text");
        assert_eq!(payload["text"]["body"], "hola");
    }

    #[test]
    fn test_graph_url() {
        let http = RealWhatsAppHttp::new("v19.0", "1234", "tok".into(), 5).unwrap();
        assert_eq!(http.url(), "https://graph.facebook.com/v19.0/1234/messages");
    }

    #[test]
    fn test_allowed_numbers() {
        let mut config = WhatsAppConfig::default();
        assert!(config.is_allowed("569"));
        config.allowed_numbers = vec!["561".into()];
        assert!(!config.is_allowed("569"));
    }

    #[tokio::test]
    async fn test_retry_then_success() {
        let mock = MockWhatsAppHttp::failing_first(2);
        let sent = mock.sent_handle();
        let monitor = Arc::new(SideEffectMonitor::new());
        let sender = WhatsAppSender::new(Box::new(mock), 3, Duration::ZERO, monitor.clone());

        let id = sender.send_with_retry("569", "hola").await.unwrap();
        assert_eq!(id, "wamid.3");
        assert_eq!(sent.lock().unwrap().len(), 1);
        assert_eq!(monitor.failures(SideEffectKind::OutboundSend), 0);
    }

    #[tokio::test]
    async fn test_retries_exhausted_are_counted() {
        let mock = MockWhatsAppHttp::failing_first(10);
        let attempts = mock.attempts_handle();
        let monitor = Arc::new(SideEffectMonitor::new());
        let sender = WhatsAppSender::new(Box::new(mock), 3, Duration::ZERO, monitor.clone());

        assert!(sender.send_with_retry("569", "hola").await.is_err());
        assert_eq!(*attempts.lock().unwrap(), 3);
        assert_eq!(monitor.failures(SideEffectKind::OutboundSend), 1);
    }
}
