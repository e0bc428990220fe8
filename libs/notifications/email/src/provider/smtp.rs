//! SMTP provider backed by lettre.

use async_trait::async_trait;
use eyre::{eyre, Result, WrapErr};
use lettre::message::{header::ContentType, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::{debug, info};

use super::{EmailProvider, SendResult};
use crate::models::Email;

/// SMTP connection settings.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Default sender used when the email has no explicit from
    pub from_email: String,
    pub from_name: String,
}

impl SmtpConfig {
    /// Load from SMTP_* environment variables.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            host: std::env::var("SMTP_HOST").wrap_err("SMTP_HOST is required")?,
            port: std::env::var("SMTP_PORT")
                .unwrap_or_else(|_| "587".to_string())
                .parse()
                .wrap_err("SMTP_PORT must be a port number")?,
            username: std::env::var("SMTP_USERNAME").wrap_err("SMTP_USERNAME is required")?,
            password: std::env::var("SMTP_PASSWORD").wrap_err("SMTP_PASSWORD is required")?,
            from_email: std::env::var("EMAIL_FROM_ADDRESS")
                .unwrap_or_else(|_| "alerts@example.com".to_string()),
            from_name: std::env::var("EMAIL_FROM_NAME")
                .unwrap_or_else(|_| "Air Quality Alerts".to_string()),
        })
    }

    fn default_from(&self) -> String {
        format!("{} <{}>", self.from_name, self.from_email)
    }
}

/// SMTP email provider.
pub struct SmtpProvider {
    config: SmtpConfig,
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpProvider {
    /// Build the transport. Port 465 uses implicit TLS, anything else
    /// STARTTLS.
    pub fn new(config: SmtpConfig) -> Result<Self> {
        let credentials = Credentials::new(config.username.clone(), config.password.clone());

        let builder = if config.port == 465 {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
                .wrap_err("Invalid SMTP relay host")?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
                .wrap_err("Invalid SMTP relay host")?
        };

        let transport = builder
            .port(config.port)
            .credentials(credentials)
            .build();

        info!(host = %config.host, port = config.port, "SMTP provider configured");

        Ok(Self { config, transport })
    }

    fn build_message(&self, email: &Email) -> Result<Message> {
        let from = email
            .from
            .clone()
            .unwrap_or_else(|| self.config.default_from());

        let builder = Message::builder()
            .from(from.parse().wrap_err("Invalid from address")?)
            .to(email.to.parse().wrap_err("Invalid recipient address")?)
            .subject(&email.subject);

        let message = match (&email.body_text, &email.body_html) {
            (Some(text), Some(html)) => builder.multipart(MultiPart::alternative_plain_html(
                text.clone(),
                html.clone(),
            ))?,
            (Some(text), None) => builder
                .header(ContentType::TEXT_PLAIN)
                .body(text.clone())?,
            (None, Some(html)) => builder.singlepart(
                SinglePart::builder()
                    .header(ContentType::TEXT_HTML)
                    .body(html.clone()),
            )?,
            (None, None) => return Err(eyre!("Email must have either text or HTML body")),
        };

        Ok(message)
    }
}

#[async_trait]
impl EmailProvider for SmtpProvider {
    async fn send(&self, email: &Email) -> Result<SendResult> {
        let message = self.build_message(email)?;

        let response = self
            .transport
            .send(message)
            .await
            .wrap_err("SMTP send failed")?;

        let message_id = response
            .message()
            .next()
            .map(|s| s.to_string())
            .unwrap_or_else(|| email.id.to_string());

        debug!(
            email_id = %email.id,
            to = %email.to,
            message_id = %message_id,
            "Email sent via SMTP"
        );

        Ok(SendResult { message_id })
    }

    async fn health_check(&self) -> Result<()> {
        if self.transport.test_connection().await? {
            Ok(())
        } else {
            Err(eyre!("SMTP connection test failed"))
        }
    }

    fn name(&self) -> &'static str {
        "smtp"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SmtpConfig {
        SmtpConfig {
            host: "smtp.example.com".to_string(),
            port: 587,
            username: "user".to_string(),
            password: "pass".to_string(),
            from_email: "alerts@example.com".to_string(),
            from_name: "Air Quality Alerts".to_string(),
        }
    }

    #[test]
    fn test_default_from_format() {
        assert_eq!(
            config().default_from(),
            "Air Quality Alerts <alerts@example.com>"
        );
    }

    #[test]
    fn test_build_message_requires_body() {
        let provider = SmtpProvider::new(config()).unwrap();
        let email = Email::new("ops@example.com", "No body");
        assert!(provider.build_message(&email).is_err());
    }

    #[test]
    fn test_build_message_text_only() {
        let provider = SmtpProvider::new(config()).unwrap();
        let email = Email::new("ops@example.com", "Alert").with_text("AQI 210");
        assert!(provider.build_message(&email).is_ok());
    }
}
