/// Email sending functionality
use crate::{
    config::EmailConfig,
    error::{ApiError, ApiResult},
    notifications::{DeliveryChannel, Message as Notification, Recipient},
};
use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Message},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Tokio1Executor,
};

/// Email mailer service
#[derive(Clone)]
pub struct Mailer {
    config: Option<EmailConfig>,
    transport: Option<AsyncSmtpTransport<Tokio1Executor>>,
}

impl Mailer {
    /// Create a new mailer; without SMTP settings it runs in demo mode
    pub fn new(config: Option<EmailConfig>) -> ApiResult<Self> {
        let transport = match &config {
            Some(email_config) => {
                let creds = Credentials::new(
                    email_config.username.clone(),
                    email_config.password.clone(),
                );

                let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(
                    &email_config.smtp_host,
                )
                .map_err(|e| ApiError::Internal(format!("SMTP setup failed: {}", e)))?
                .port(email_config.smtp_port)
                .credentials(creds)
                .build();

                Some(transport)
            }
            None => {
                tracing::warn!("SMTP not configured, emails will only be logged");
                None
            }
        };

        Ok(Self { config, transport })
    }

    /// Send an email verification code
    pub async fn send_verification_code(&self, to_email: &str, code: &str) -> ApiResult<()> {
        let body = format!(
            r#"
Hello,

Your verification code is: {}

The code expires in 15 minutes.

If you did not request this code, you can ignore this email.

SaaSPro
"#,
            code
        );

        self.send_email(to_email, "Your verification code", &body).await
    }

    /// Send a rendered notification
    pub async fn send_notification(&self, to_email: &str, message: &Notification) -> ApiResult<()> {
        self.send_email(to_email, &message.title, &message.text_body)
            .await
    }

    /// Send a plain-text email, or log it in demo mode
    async fn send_email(&self, to: &str, subject: &str, body: &str) -> ApiResult<()> {
        let (Some(transport), Some(config)) = (&self.transport, &self.config) else {
            tracing::info!("[demo mail] to={} subject={:?}", to, subject);
            tracing::debug!("[demo mail] body: {}", body.trim());
            return Ok(());
        };

        let email = Message::builder()
            .from(config.from_address.parse().map_err(|e| {
                ApiError::Internal(format!("Invalid from address: {}", e))
            })?)
            .to(to.parse().map_err(|e| {
                ApiError::Validation(format!("Invalid recipient address: {}", e))
            })?)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())
            .map_err(|e| ApiError::Internal(format!("Failed to build email: {}", e)))?;

        transport
            .send(email)
            .await
            .map_err(|e| ApiError::Upstream(format!("Failed to send email: {}", e)))?;

        tracing::info!("Sent email to {}: {}", to, subject);
        Ok(())
    }

    /// Check if email is configured
    pub fn is_configured(&self) -> bool {
        self.transport.is_some()
    }
}

#[async_trait]
impl DeliveryChannel for Mailer {
    fn name(&self) -> &'static str {
        "email"
    }

    fn accepts(&self, recipient: &Recipient) -> bool {
        recipient.email.is_some()
    }

    async fn deliver(&self, recipient: &Recipient, message: &Notification) -> anyhow::Result<()> {
        let Some(email) = &recipient.email else {
            anyhow::bail!("recipient has no email address");
        };
        self.send_notification(email, message).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifications::{render, NotificationEvent};

    #[tokio::test]
    async fn test_demo_mode_succeeds() {
        let mailer = Mailer::new(None).unwrap();
        assert!(!mailer.is_configured());
        mailer
            .send_verification_code("user@example.com", "123456")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_channel_skips_missing_address() {
        let mailer = Mailer::new(None).unwrap();
        let recipient = Recipient {
            user_id: uuid::Uuid::new_v4(),
            email: None,
            telegram_id: Some(1),
        };
        assert!(!mailer.accepts(&recipient));

        let message = render(&NotificationEvent::TwoFactorEnabled, chrono::Utc::now());
        assert!(mailer.deliver(&recipient, &message).await.is_err());
    }

    #[tokio::test]
    async fn test_configured_transport() {
        let mailer = Mailer::new(Some(EmailConfig {
            smtp_host: "smtp.example.com".into(),
            smtp_port: 587,
            username: "mailer".into(),
            password: "secret".into(),
            from_address: "noreply@example.com".into(),
        }))
        .unwrap();
        assert!(mailer.is_configured());
    }
}
