//! Escalation of unanswered questions to the HR mailbox.

use async_trait::async_trait;
use chrono::NaiveDateTime;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{ChannelError, ConfigError};

const CHANNEL: &str = "email";

/// Environment variable listing HR recipients when none are configured.
pub const RECIPIENTS_ENV: &str = "EMAIL_RRHH";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EscalationConfig {
    /// HR addresses. Empty means read `EMAIL_RRHH` (comma-separated).
    pub recipients: Vec<String>,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub username: String,
    /// Environment variable holding the SMTP password.
    pub password_env: String,
    pub from_address: String,
    pub timeout_secs: u64,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            recipients: Vec::new(),
            smtp_host: String::new(),
            smtp_port: 587,
            username: String::new(),
            password_env: "SMTP_PASSWORD".into(),
            from_address: String::new(),
            timeout_secs: 30,
        }
    }
}

impl EscalationConfig {
    /// Configured recipients, or those listed in `EMAIL_RRHH`.
    pub fn resolved_recipients(&self) -> Vec<String> {
        if !self.recipients.is_empty() {
            return self.recipients.clone();
        }
        std::env::var(RECIPIENTS_ENV)
            .map(|list| parse_recipients(&list))
            .unwrap_or_default()
    }

    /// True when an SMTP relay is set.
    pub fn is_configured(&self) -> bool {
        !self.smtp_host.is_empty()
    }
}

/// Split a comma-separated address list, dropping blanks.
pub fn parse_recipients(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Body of the escalation mail.
pub fn compose_body(pregunta: &str, rut: &str, nombre: &str, sent_at: NaiveDateTime) -> String {
    let nombre = if nombre.is_empty() {
        "Usuario anónimo"
    } else {
        nombre
    };
    let rut = if rut.is_empty() { "No proporcionado" } else { rut };
    format!(
        "Consulta recogida desde el Chatbot de RRHH\n\
         De: {nombre}\n\
         Rut: {rut}\n\
         \n\
         Pregunta:\n\
         {pregunta}\n\
         \n\
         ---\n\
         Este mensaje fue enviado automáticamente.\n\
         Fecha: {}\n",
        sent_at.format("%d/%m/%Y %H:%M:%S")
    )
}

#[async_trait]
pub trait EscalationMailer: Send + Sync {
    /// Deliver one message to every recipient.
    async fn send(&self, recipients: &[String], subject: &str, body: &str)
    -> Result<(), ChannelError>;
}

/// SMTP mailer over STARTTLS.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn from_config(config: &EscalationConfig) -> Result<Self, ConfigError> {
        if !config.is_configured() {
            return Err(ConfigError::Invalid {
                message: "escalation.smtp_host is not set".into(),
            });
        }
        let from = config
            .from_address
            .parse::<Mailbox>()
            .map_err(|e| ConfigError::Invalid {
                message: format!("escalation.from_address: {e}"),
            })?;

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)
            .map_err(|e| ConfigError::Invalid {
                message: format!("SMTP relay error: {e}"),
            })?
            .port(config.smtp_port)
            .timeout(Some(Duration::from_secs(config.timeout_secs)));

        if !config.username.is_empty() {
            let password = std::env::var(&config.password_env).map_err(|_| {
                ConfigError::EnvVarMissing {
                    var: config.password_env.clone(),
                }
            })?;
            builder = builder.credentials(Credentials::new(config.username.clone(), password));
        }

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }
}

#[async_trait]
impl EscalationMailer for SmtpMailer {
    async fn send(
        &self,
        recipients: &[String],
        subject: &str,
        body: &str,
    ) -> Result<(), ChannelError> {
        if recipients.is_empty() {
            return Err(ChannelError::NotConfigured {
                channel: CHANNEL.into(),
                message: format!("no HR recipients (set escalation.recipients or {RECIPIENTS_ENV})"),
            });
        }

        let mut builder = lettre::Message::builder()
            .from(self.from.clone())
            .subject(subject);
        for to in recipients {
            let mailbox = to.parse::<Mailbox>().map_err(|e| ChannelError::SendFailed {
                channel: CHANNEL.into(),
                message: format!("Invalid to address '{to}': {e}"),
            })?;
            builder = builder.to(mailbox);
        }
        let email = builder
            .body(body.to_string())
            .map_err(|e| ChannelError::SendFailed {
                channel: CHANNEL.into(),
                message: format!("Failed to build email: {e}"),
            })?;

        let response = self
            .transport
            .send(email)
            .await
            .map_err(|e| ChannelError::SendFailed {
                channel: CHANNEL.into(),
                message: format!("SMTP send error: {e}"),
            })?;
        info!(recipients = recipients.len(), code = %response.code(), "Escalation email sent");
        Ok(())
    }
}

/// Stand-in used when no SMTP relay is configured; every send fails.
pub struct DisabledMailer;

#[async_trait]
impl EscalationMailer for DisabledMailer {
    async fn send(&self, _: &[String], subject: &str, _: &str) -> Result<(), ChannelError> {
        debug!(subject, "Escalation mail requested but SMTP is not configured");
        Err(ChannelError::NotConfigured {
            channel: CHANNEL.into(),
            message: "escalation.smtp_host is not set".into(),
        })
    }
}

/// An email captured by `RecordingMailer`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentEmail {
    pub recipients: Vec<String>,
    pub subject: String,
    pub body: String,
}

/// Mailer that keeps every message in memory, for tests and dry runs.
#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<SentEmail>>,
    fail: bool,
}

impl RecordingMailer {
    pub fn new() -> Self {
        Self::default()
    }

    /// A mailer whose every send fails.
    pub fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn sent(&self) -> Vec<SentEmail> {
        self.sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl EscalationMailer for RecordingMailer {
    async fn send(
        &self,
        recipients: &[String],
        subject: &str,
        body: &str,
    ) -> Result<(), ChannelError> {
        if self.fail {
            return Err(ChannelError::SendFailed {
                channel: CHANNEL.into(),
                message: "simulated failure".into(),
            });
        }
        self.sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(SentEmail {
                recipients: recipients.to_vec(),
                subject: subject.to_string(),
                body: body.to_string(),
            });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;

    fn at() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 3, 4)
            .unwrap()
            .and_hms_opt(9, 5, 7)
            .unwrap()
    }

    #[test]
    fn test_body_with_user_details() {
        let body = compose_body("¿Hay bono de escolaridad?", "12.345.678-9", "Ana Pérez", at());
        assert_eq!(
            body,
            "Consulta recogida desde el Chatbot de RRHH\n\
             De: Ana Pérez\n\
             Rut: 12.345.678-9\n\
             \n\
             Pregunta:\n\
             ¿Hay bono de escolaridad?\n\
             \n\
             ---\n\
             Este mensaje fue enviado automáticamente.\n\
             Fecha: 04/03/2025 09:05:07\n"
        );
    }

    #[test]
    fn test_body_anonymous() {
        let body = compose_body("x", "", "", at());
        assert!(body.contains("De: Usuario anónimo\n"));
        assert!(body.contains("Rut: No proporcionado\n"));
    }

    #[test]
    fn test_parse_recipients() {
        assert_eq!(
            parse_recipients(" rrhh@cramer.cl, ,jefa@cramer.cl "),
            vec!["rrhh@cramer.cl", "jefa@cramer.cl"]
        );
    }

    #[test]
    fn test_configured_recipients_take_precedence() {
        let config = EscalationConfig {
            recipients: vec!["a@b.cl".into()],
            ..Default::default()
        };
        assert_eq!(config.resolved_recipients(), vec!["a@b.cl"]);
    }

    #[test]
    fn test_smtp_mailer_requires_host() {
        let err = SmtpMailer::from_config(&EscalationConfig::default()).err();
        assert!(matches!(err, Some(ConfigError::Invalid { .. })));
    }

    #[tokio::test]
    async fn test_recording_mailer() {
        let mailer = RecordingMailer::new();
        tokio_test::assert_ok!(
            mailer
                .send(&["rrhh@cramer.cl".into()], "Asunto", "Cuerpo")
                .await
        );
        assert_eq!(mailer.sent().len(), 1);
        assert_eq!(mailer.sent()[0].subject, "Asunto");

        let failing = RecordingMailer::failing();
        tokio_test::assert_err!(failing.send(&[], "a", "b").await);
    }

    #[tokio::test]
    async fn test_disabled_mailer_fails() {
        let err = DisabledMailer.send(&["a@b.cl".into()], "s", "b").await;
        assert!(matches!(err, Err(ChannelError::NotConfigured { .. })));
    }
}
