use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{NotificationChannel, validate_phone};
use crate::error::NotificationError;
use crate::types::{ChannelKind, Recipient, RenderedContent, SendResult};

/// HTTP gateway settings for the short-message channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmsConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Endpoint receiving `POST {to, from, message}` as JSON.
    #[serde(default)]
    pub gateway_url: String,
    /// Sent as a bearer token when present.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_sender")]
    pub sender: String,
    #[serde(default = "default_sms_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_sender() -> String {
    "Wrench".to_string()
}

fn default_sms_timeout_ms() -> u64 {
    5_000
}

impl Default for SmsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            gateway_url: String::new(),
            api_key: None,
            sender: default_sender(),
            timeout_ms: default_sms_timeout_ms(),
        }
    }
}

/// Short-message channel posting to an SMS gateway.
pub struct SmsChannel {
    http_client: Client,
    gateway_url: String,
    api_key: Option<String>,
    sender: String,
}

impl SmsChannel {
    pub fn new(config: &SmsConfig) -> Result<Self, NotificationError> {
        if config.gateway_url.is_empty() {
            return Err(NotificationError::InvalidConfig(
                "Missing gateway_url".into(),
            ));
        }
        let http_client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| NotificationError::InvalidConfig(e.to_string()))?;

        Ok(Self {
            http_client,
            gateway_url: config.gateway_url.clone(),
            api_key: config.api_key.clone(),
            sender: config.sender.clone(),
        })
    }

    async fn post(&self, to: &str, content: &RenderedContent) -> Result<SendResult, NotificationError> {
        let body = json!({
            "to": to,
            "from": &self.sender,
            "message": format!("{}: {}", content.subject, content.body),
        });

        let mut request = self.http_client.post(&self.gateway_url).json(&body);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                NotificationError::SendFailed(format!("gateway timed out: {}", e))
            } else {
                NotificationError::SendFailed(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let error = response.text().await.unwrap_or_default();
            return Ok(SendResult::failure(format!("gateway returned {}: {}", status, error)));
        }

        // Gateways report the message id under different keys.
        let response_body: serde_json::Value = response.json().await.unwrap_or_default();
        let message_id = ["id", "messageId", "message_id", "sid"]
            .iter()
            .find_map(|key| match &response_body[*key] {
                serde_json::Value::String(s) => Some(s.clone()),
                serde_json::Value::Number(n) => Some(n.to_string()),
                _ => None,
            });

        Ok(SendResult::success(message_id))
    }
}

#[async_trait]
impl NotificationChannel for SmsChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Sms
    }

    fn validate(&self, recipient: &Recipient) -> Result<(), NotificationError> {
        let phone = recipient.phone.as_deref().ok_or_else(|| {
            NotificationError::InvalidRecipient(format!("user {} has no phone", recipient.user_id))
        })?;
        validate_phone(phone)
    }

    async fn send(&self, recipient: &Recipient, content: &RenderedContent) -> SendResult {
        if let Err(e) = self.validate(recipient) {
            return SendResult::failure(e);
        }
        let Some(phone) = recipient.phone.as_deref() else {
            return SendResult::failure("missing phone");
        };
        match self.post(phone, content).await {
            Ok(result) => result,
            Err(e) => SendResult::failure(e),
        }
    }
}
