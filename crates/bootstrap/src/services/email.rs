//! Enrollment email delivery.
//!
//! Uses SMTP via lettre with Askama HTML/text templates when SMTP is
//! configured. Without SMTP the link is written to the log, which is how a
//! fresh deployment hands the first admin their setup link.

use askama::Template;
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{MultiPart, SinglePart, header::ContentType},
    transport::smtp::{Error as SmtpError, authentication::Credentials},
};
use secrecy::ExposeSecret;
use thiserror::Error;

use crate::config::EmailConfig;

const ENROLLMENT_SUBJECT: &str = "Set up your administrator account";

/// HTML template for the enrollment email.
#[derive(Template)]
#[template(path = "email/enrollment.html")]
struct EnrollmentEmailHtml<'a> {
    username: &'a str,
    url: &'a str,
}

/// Plain text template for the enrollment email.
#[derive(Template)]
#[template(path = "email/enrollment.txt")]
struct EnrollmentEmailText<'a> {
    username: &'a str,
    url: &'a str,
}

/// Errors that can occur when sending email.
#[derive(Debug, Error)]
pub enum EmailError {
    /// SMTP transport error.
    #[error("SMTP error: {0}")]
    Smtp(#[from] SmtpError),

    /// Failed to build email message.
    #[error("Failed to build message: {0}")]
    MessageBuild(#[from] lettre::error::Error),

    /// Invalid email address.
    #[error("Invalid email address: {0}")]
    InvalidAddress(String),

    /// Template rendering error.
    #[error("Template error: {0}")]
    Template(#[from] askama::Error),

    /// Delivery refused for a reason outside the transport.
    #[error("Delivery failed: {0}")]
    Delivery(String),
}

/// A password-setup message for a freshly created account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrollmentMessage {
    pub to: String,
    pub username: String,
    pub url: String,
}

/// Sends enrollment links.
#[allow(async_fn_in_trait)]
pub trait EnrollmentMailer {
    /// Deliver one enrollment message.
    async fn send_enrollment(&self, message: &EnrollmentMessage) -> Result<(), EmailError>;
}

/// SMTP delivery for enrollment messages.
#[derive(Clone)]
pub struct SmtpMailer {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from_address: String,
}

impl SmtpMailer {
    /// Create a mailer from configuration.
    ///
    /// # Errors
    ///
    /// Returns error if the SMTP relay cannot be configured.
    pub fn new(config: &EmailConfig) -> Result<Self, SmtpError> {
        let credentials = Credentials::new(
            config.smtp_username.clone(),
            config.smtp_password.expose_secret().to_string(),
        );

        let mailer = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)?
            .port(config.smtp_port)
            .credentials(credentials)
            .build();

        Ok(Self {
            mailer,
            from_address: config.from_address.clone(),
        })
    }
}

impl EnrollmentMailer for SmtpMailer {
    async fn send_enrollment(&self, message: &EnrollmentMessage) -> Result<(), EmailError> {
        let (html, text) = render_enrollment(message)?;

        let email = Message::builder()
            .from(
                self.from_address
                    .parse()
                    .map_err(|_| EmailError::InvalidAddress(self.from_address.clone()))?,
            )
            .to(message
                .to
                .parse()
                .map_err(|_| EmailError::InvalidAddress(message.to.clone()))?)
            .subject(ENROLLMENT_SUBJECT)
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(text),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(html),
                    ),
            )?;

        self.mailer.send(email).await?;

        tracing::info!(to = %message.to, "enrollment email sent");
        Ok(())
    }
}

/// Writes the enrollment link to the log instead of mailing it.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogMailer;

impl EnrollmentMailer for LogMailer {
    async fn send_enrollment(&self, message: &EnrollmentMessage) -> Result<(), EmailError> {
        let (_, text) = render_enrollment(message)?;
        tracing::info!(
            to = %message.to,
            username = %message.username,
            "Enrollment email URL: {}",
            message.url
        );
        tracing::debug!(body = %text, "enrollment email body");
        Ok(())
    }
}

/// The mailer chosen at startup.
#[derive(Clone)]
pub enum Mailer {
    Smtp(Box<SmtpMailer>),
    Log(LogMailer),
}

impl Mailer {
    /// SMTP when configured, otherwise the log.
    ///
    /// # Errors
    ///
    /// Returns error if SMTP is configured but the relay cannot be set up.
    pub fn from_config(config: Option<&EmailConfig>) -> Result<Self, SmtpError> {
        match config {
            Some(config) => Ok(Self::Smtp(Box::new(SmtpMailer::new(config)?))),
            None => {
                tracing::warn!("SMTP not configured; enrollment links will be logged");
                Ok(Self::Log(LogMailer))
            }
        }
    }
}

impl EnrollmentMailer for Mailer {
    async fn send_enrollment(&self, message: &EnrollmentMessage) -> Result<(), EmailError> {
        match self {
            Self::Smtp(smtp) => smtp.send_enrollment(message).await,
            Self::Log(log) => log.send_enrollment(message).await,
        }
    }
}

/// Render the HTML and plain text bodies.
fn render_enrollment(message: &EnrollmentMessage) -> Result<(String, String), EmailError> {
    let html = EnrollmentEmailHtml {
        username: &message.username,
        url: &message.url,
    }
    .render()?;
    let text = EnrollmentEmailText {
        username: &message.username,
        url: &message.url,
    }
    .render()?;
    Ok((html, text))
}
