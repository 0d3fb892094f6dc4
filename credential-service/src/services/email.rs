use askama::Template;
use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    Message, SmtpTransport, Transport,
};
use secrecy::ExposeSecret;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::config::SmtpConfig;

/// Implicit-TLS SMTP port; any other port negotiates STARTTLS.
const SMTPS_PORT: u16 = 465;

pub fn confirmation_link(base_url: &str, token: &str) -> String {
    format!(
        "{}/api/mailing/confirm_email/{}",
        base_url.trim_end_matches('/'),
        token
    )
}

pub fn reset_link(base_url: &str, token: &str) -> String {
    format!(
        "{}/api/mailing/reset_password/{}",
        base_url.trim_end_matches('/'),
        token
    )
}

/// Outbound mail. Callers dispatch these without awaiting delivery, so
/// implementations only report failures; nothing is retried.
#[async_trait]
pub trait EmailProvider: Send + Sync {
    async fn send_verification(
        &self,
        to_email: &str,
        username: &str,
        base_url: &str,
        token: &str,
    ) -> Result<(), anyhow::Error>;

    async fn send_password_reset(
        &self,
        to_email: &str,
        username: &str,
        base_url: &str,
        token: &str,
    ) -> Result<(), anyhow::Error>;
}

#[derive(Clone)]
pub struct EmailService {
    mailer: SmtpTransport,
    from: Mailbox,
    reset_ttl_seconds: u64,
}

impl EmailService {
    /// `reset_ttl_seconds` is quoted in the reset mail; it should match the
    /// lifetime of the stored reset token.
    pub fn new(config: &SmtpConfig, reset_ttl_seconds: u64) -> Result<Self, anyhow::Error> {
        let creds = Credentials::new(
            config.username.clone(),
            config.password.expose_secret().clone(),
        );

        let builder = if config.port == SMTPS_PORT {
            SmtpTransport::relay(&config.host)
        } else {
            SmtpTransport::starttls_relay(&config.host)
        }
        .map_err(|e| anyhow::anyhow!("Invalid SMTP relay {}: {}", config.host, e))?;

        let mailer = builder
            .credentials(creds)
            .port(config.port)
            .timeout(Some(Duration::from_secs(10)))
            .build();

        let from = Mailbox::new(
            Some(config.from_name.clone()),
            config
                .from_email
                .parse()
                .map_err(|e| anyhow::anyhow!("MAIL_FROM: {}", e))?,
        );

        tracing::info!(host = %config.host, port = config.port, "Email service initialized");

        Ok(Self {
            mailer,
            from,
            reset_ttl_seconds,
        })
    }

    async fn send_email(
        &self,
        to_email: &str,
        subject: &str,
        plain_body: String,
        html_body: String,
    ) -> Result<(), anyhow::Error> {
        let email = Message::builder()
            .from(self.from.clone())
            .to(to_email.parse()?)
            .subject(subject)
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(plain_body),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(html_body),
                    ),
            )?;

        // SmtpTransport is blocking
        let mailer = self.mailer.clone();
        let result = tokio::task::spawn_blocking(move || mailer.send(&email)).await?;

        match result {
            Ok(_) => {
                tracing::info!(to = %to_email, subject = %subject, "Email sent successfully");
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, to = %to_email, "Failed to send email");
                Err(anyhow::anyhow!("SMTP delivery failed: {}", e))
            }
        }
    }
}

#[async_trait]
impl EmailProvider for EmailService {
    async fn send_verification(
        &self,
        to_email: &str,
        username: &str,
        base_url: &str,
        token: &str,
    ) -> Result<(), anyhow::Error> {
        let link = confirmation_link(base_url, token);
        let (plain_body, html_body) = verification_bodies(username, &link)?;

        self.send_email(to_email, "Confirm your email", plain_body, html_body)
            .await
    }

    async fn send_password_reset(
        &self,
        to_email: &str,
        username: &str,
        base_url: &str,
        token: &str,
    ) -> Result<(), anyhow::Error> {
        let link = reset_link(base_url, token);
        let (plain_body, html_body) =
            password_reset_bodies(username, &link, self.reset_ttl_seconds)?;

        self.send_email(to_email, "Reset your password", plain_body, html_body)
            .await
    }
}

#[derive(Template)]
#[template(path = "email/verification.txt")]
struct VerificationText<'a> {
    username: &'a str,
    link: &'a str,
}

#[derive(Template)]
#[template(path = "email/verification.html")]
struct VerificationHtml<'a> {
    username: &'a str,
    link: &'a str,
}

#[derive(Template)]
#[template(path = "email/password_reset.txt")]
struct PasswordResetText<'a> {
    username: &'a str,
    link: &'a str,
    expires_in: &'a str,
}

#[derive(Template)]
#[template(path = "email/password_reset.html")]
struct PasswordResetHtml<'a> {
    username: &'a str,
    link: &'a str,
    expires_in: &'a str,
}

/// Plain and HTML bodies of the confirmation mail. The HTML template escapes
/// every value.
fn verification_bodies(username: &str, link: &str) -> Result<(String, String), anyhow::Error> {
    Ok((
        VerificationText { username, link }.render()?,
        VerificationHtml { username, link }.render()?,
    ))
}

fn password_reset_bodies(
    username: &str,
    link: &str,
    ttl_seconds: u64,
) -> Result<(String, String), anyhow::Error> {
    let expires_in = describe_ttl(ttl_seconds);
    let expires_in = expires_in.as_str();
    Ok((
        PasswordResetText {
            username,
            link,
            expires_in,
        }
        .render()?,
        PasswordResetHtml {
            username,
            link,
            expires_in,
        }
        .render()?,
    ))
}

/// "15 minutes", "1 hour", "90 seconds".
fn describe_ttl(seconds: u64) -> String {
    let (amount, unit) = if seconds >= 3600 && seconds % 3600 == 0 {
        (seconds / 3600, "hour")
    } else if seconds >= 60 && seconds % 60 == 0 {
        (seconds / 60, "minute")
    } else {
        (seconds, "second")
    };
    let plural = if amount == 1 { "" } else { "s" };
    format!("{} {}{}", amount, unit, plural)
}

#[derive(Clone)]
pub struct MockEmailService;

#[async_trait]
impl EmailProvider for MockEmailService {
    async fn send_verification(
        &self,
        _to_email: &str,
        _username: &str,
        _base_url: &str,
        _token: &str,
    ) -> Result<(), anyhow::Error> {
        Ok(())
    }

    async fn send_password_reset(
        &self,
        _to_email: &str,
        _username: &str,
        _base_url: &str,
        _token: &str,
    ) -> Result<(), anyhow::Error> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailKind {
    Verification,
    PasswordReset,
}

/// A message captured by [`RecordingEmailService`].
#[derive(Debug, Clone)]
pub struct SentMail {
    pub kind: MailKind,
    pub to: String,
    pub username: String,
    pub token: String,
}

/// Hands every message to a channel instead of delivering it.
#[derive(Clone)]
pub struct RecordingEmailService {
    sender: mpsc::UnboundedSender<SentMail>,
}

impl RecordingEmailService {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SentMail>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    fn record(&self, kind: MailKind, to: &str, username: &str, token: &str) {
        // A dropped receiver just means nobody is listening
        let _ = self.sender.send(SentMail {
            kind,
            to: to.to_string(),
            username: username.to_string(),
            token: token.to_string(),
        });
    }
}

#[async_trait]
impl EmailProvider for RecordingEmailService {
    async fn send_verification(
        &self,
        to_email: &str,
        username: &str,
        _base_url: &str,
        token: &str,
    ) -> Result<(), anyhow::Error> {
        self.record(MailKind::Verification, to_email, username, token);
        Ok(())
    }

    async fn send_password_reset(
        &self,
        to_email: &str,
        username: &str,
        _base_url: &str,
        token: &str,
    ) -> Result<(), anyhow::Error> {
        self.record(MailKind::PasswordReset, to_email, username, token);
        Ok(())
    }
}
