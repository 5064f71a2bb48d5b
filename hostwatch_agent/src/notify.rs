//! Outbound notification transports.
//!
//! The collection loop only needs `send(title, body) -> Result`. The email
//! transport talks SMTP through `lettre`; the tracing transport writes the
//! alert to the log and is used when no mail credentials are configured.

use std::fmt;
use std::future::Future;

use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::{info, warn};

pub const DEFAULT_SMTP_HOST: &str = "smtp.gmail.com";
pub const DEFAULT_SMTP_PORT: u16 = 587;

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("SMTP transport error: {0}")]
    Transport(#[from] lettre::transport::smtp::Error),

    #[error("email address parse error: {0}")]
    Address(#[from] lettre::address::AddressError),

    #[error("email build error: {0}")]
    Build(String),

    #[error("notification send timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("notification transport panicked: {0}")]
    Panicked(String),
}

pub trait Notifier: Send + Sync + 'static {
    fn send(&self, title: &str, body: &str) -> impl Future<Output = Result<(), NotifyError>> + Send;
}

// ---------- Email ----------

/// SMTP settings. The sender account doubles as the login and, unless
/// `to` says otherwise, as the recipient.
#[derive(Clone)]
pub struct EmailConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub username: String,
    pub password: String,
    pub to: Option<String>,
}

impl fmt::Debug for EmailConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmailConfig")
            .field("smtp_host", &self.smtp_host)
            .field("smtp_port", &self.smtp_port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("to", &self.to)
            .finish()
    }
}

pub struct EmailNotifier {
    from: Mailbox,
    to: Mailbox,
    mailer: AsyncSmtpTransport<Tokio1Executor>,
}

impl EmailNotifier {
    pub fn new(config: &EmailConfig) -> Result<Self, NotifyError> {
        let from: Mailbox = config.username.parse()?;
        let to: Mailbox = config.to.as_deref().unwrap_or(&config.username).parse()?;
        let mailer = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)?
            .port(config.smtp_port)
            .credentials(Credentials::new(
                config.username.clone(),
                config.password.clone(),
            ))
            .build();
        Ok(Self { from, to, mailer })
    }
}

impl Notifier for EmailNotifier {
    async fn send(&self, title: &str, body: &str) -> Result<(), NotifyError> {
        let email = Message::builder()
            .from(self.from.clone())
            .to(self.to.clone())
            .subject(title)
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())
            .map_err(|e| NotifyError::Build(e.to_string()))?;
        let response = self.mailer.send(email).await?;
        info!(to = %self.to, code = %response.code(), "alert email sent");
        Ok(())
    }
}

// ---------- Log only ----------

#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    async fn send(&self, title: &str, body: &str) -> Result<(), NotifyError> {
        warn!(title, "{body}");
        Ok(())
    }
}
