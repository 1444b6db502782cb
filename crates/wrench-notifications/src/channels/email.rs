use std::time::Duration;

use async_trait::async_trait;
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{Mailbox, header::ContentType},
    transport::smtp::authentication::Credentials,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{NotificationChannel, validate_email};
use crate::error::NotificationError;
use crate::types::{ChannelKind, Recipient, RenderedContent, SendResult};

/// SMTP relay settings for the email channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_smtp_host")]
    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_from")]
    pub from: String,
    /// Upgrade the connection with STARTTLS. Disable only for local relays.
    #[serde(default = "default_starttls")]
    pub starttls: bool,
    #[serde(default = "default_email_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_smtp_host() -> String {
    "localhost".to_string()
}

fn default_smtp_port() -> u16 {
    587
}

fn default_from() -> String {
    "Wrench <wrench@localhost>".to_string()
}

fn default_starttls() -> bool {
    true
}

fn default_email_timeout_ms() -> u64 {
    10_000
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            smtp_host: default_smtp_host(),
            smtp_port: default_smtp_port(),
            username: None,
            password: None,
            from: default_from(),
            starttls: default_starttls(),
            timeout_ms: default_email_timeout_ms(),
        }
    }
}

/// Direct-message channel delivering plain-text mail through an SMTP relay.
pub struct EmailChannel {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    timeout: Duration,
}

impl EmailChannel {
    pub fn new(config: &EmailConfig) -> Result<Self, NotificationError> {
        let from: Mailbox = config
            .from
            .parse()
            .map_err(|e| NotificationError::InvalidConfig(format!("Invalid from: {}", e)))?;

        let mut builder = if config.starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)
                .map_err(|e| NotificationError::InvalidConfig(e.to_string()))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.smtp_host)
        };
        builder = builder.port(config.smtp_port);

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        Ok(Self {
            mailer: builder.build(),
            from,
            timeout: Duration::from_millis(config.timeout_ms),
        })
    }

    fn build_message(
        &self,
        to: &str,
        content: &RenderedContent,
    ) -> Result<Message, NotificationError> {
        let to: Mailbox = to
            .parse()
            .map_err(|e| NotificationError::InvalidRecipient(format!("Invalid to: {}", e)))?;

        Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(content.subject.as_str())
            .header(ContentType::TEXT_PLAIN)
            .body(content.body.clone())
            .map_err(|e| NotificationError::SendFailed(e.to_string()))
    }
}

#[async_trait]
impl NotificationChannel for EmailChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Email
    }

    fn validate(&self, recipient: &Recipient) -> Result<(), NotificationError> {
        let address = recipient.email.as_deref().ok_or_else(|| {
            NotificationError::InvalidRecipient(format!("user {} has no email", recipient.user_id))
        })?;
        validate_email(address)
    }

    async fn send(&self, recipient: &Recipient, content: &RenderedContent) -> SendResult {
        if let Err(e) = self.validate(recipient) {
            return SendResult::failure(e);
        }
        let Some(address) = recipient.email.as_deref() else {
            return SendResult::failure("missing email");
        };
        let message = match self.build_message(address, content) {
            Ok(message) => message,
            Err(e) => return SendResult::failure(e),
        };

        match tokio::time::timeout(self.timeout, self.mailer.send(message)).await {
            Ok(Ok(response)) => {
                debug!(user_id = recipient.user_id, code = %response.code(), "Email accepted by relay");
                SendResult::success(Some(response.message().collect::<Vec<_>>().join(" ")))
            }
            Ok(Err(e)) => SendResult::failure(NotificationError::SendFailed(e.to_string())),
            Err(_) => SendResult::failure(NotificationError::Timeout(
                self.timeout.as_millis() as u64,
            )),
        }
    }
}
