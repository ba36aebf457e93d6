//! Transactional email: welcome and password-reset messages.
//!
//! Handlers talk to a [`Mailer`]. Production uses [`SmtpMailer`]; without SMTP
//! settings the server falls back to [`LogMailer`], which only logs.

use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::EmailConfig;

#[derive(Debug, Error)]
pub enum EmailError {
    #[error("SMTP is not configured: {0}")]
    NotConfigured(&'static str),
    #[error("invalid address: {0}")]
    Address(#[from] lettre::address::AddressError),
    #[error("failed to build message: {0}")]
    Message(#[from] lettre::error::Error),
    #[error("SMTP transport error: {0}")]
    Transport(#[from] lettre::transport::smtp::Error),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

#[async_trait]
pub trait Mailer: Send + Sync {
    /// Send one message with HTML and plain text versions
    async fn send(&self, to: &str, subject: &str, html: &str, text: &str) -> Result<(), EmailError>;
}

/// The emails the application sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Template {
    Welcome,
    PasswordReset,
}

impl Template {
    pub fn subject(&self) -> &'static str {
        match self {
            Template::Welcome => "Welcome to the Natours Family!",
            Template::PasswordReset => "Your password reset token (valid for only 10 minutes)",
        }
    }

    pub fn render_html(&self, first_name: &str, url: &str) -> String {
        let (lead, action, footer) = self.copy();
        format!(
            r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>{subject}</title>
    <style>
        body {{ font-family: 'Lato', 'Helvetica Neue', Arial, sans-serif; background-color: #f7f7f7; margin: 0; }}
        .card {{ max-width: 560px; margin: 40px auto; background: #fff; border-radius: 4px; padding: 32px; }}
        .card p {{ color: #555; line-height: 1.6; margin: 0 0 16px; }}
        .button {{ display: inline-block; background: #55c57a; color: #fff !important; text-decoration: none;
                   padding: 12px 28px; border-radius: 100px; font-weight: 600; }}
    </style>
</head>
<body>
    <div class="card">
        <p>Hi {first_name},</p>
        <p>{lead}</p>
        <p><a href="{url}" class="button">{action}</a></p>
        <p>{footer}</p>
        <p>- The Natours team</p>
    </div>
</body>
</html>"#,
            subject = self.subject(),
            first_name = html_escape(first_name),
            lead = lead,
            url = html_escape(url),
            action = action,
            footer = footer,
        )
    }

    pub fn render_text(&self, first_name: &str, url: &str) -> String {
        let (lead, action, footer) = self.copy();
        format!(
            "Hi {first_name},\n\n{lead}\n\n{action}: {url}\n\n{footer}\n\n- The Natours team",
            first_name = first_name,
            lead = lead,
            action = action,
            url = url,
            footer = footer,
        )
    }

    fn copy(&self) -> (&'static str, &'static str, &'static str) {
        match self {
            Template::Welcome => (
                "Welcome to Natours, we're glad to have you! We're all a big family here, so make sure to upload your user photo so we get to know you a bit better!",
                "Upload user photo",
                "If you need any help with booking your next tour, please don't hesitate to contact us!",
            ),
            Template::PasswordReset => (
                "Forgot your password? Submit a PATCH request with your new password and passwordConfirm to the link below.",
                "Reset your password",
                "If you didn't forget your password, please ignore this email!",
            ),
        }
    }
}

/// Render `template` for one recipient and send it, giving up after `timeout`.
pub async fn send_template(
    mailer: &dyn Mailer,
    to: &str,
    first_name: &str,
    url: &str,
    template: Template,
    timeout: Duration,
) -> Result<(), EmailError> {
    let html = template.render_html(first_name, url);
    let text = template.render_text(first_name, url);
    tokio::time::timeout(timeout, mailer.send(to, template.subject(), &html, &text))
        .await
        .map_err(|_| EmailError::Timeout(timeout))?
}

/// SMTP delivery through lettre
pub struct SmtpMailer {
    config: EmailConfig,
}

impl SmtpMailer {
    pub fn new(config: EmailConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, to_email: &str, subject: &str, html: &str, text: &str) -> Result<(), EmailError> {
        let smtp_host = self
            .config
            .smtp_host
            .as_ref()
            .ok_or(EmailError::NotConfigured("SMTP host"))?;
        let from_address = self
            .config
            .from_address
            .as_ref()
            .ok_or(EmailError::NotConfigured("from address"))?;

        // Build the from mailbox with name
        let from: Mailbox = format!("{} <{}>", self.config.from_name, from_address).parse()?;
        let to: Mailbox = to_email.parse()?;

        let email = Message::builder()
            .from(from)
            .to(to)
            .subject(subject)
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(text.to_string()),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(html.to_string()),
                    ),
            )?;

        let mailer = if self.config.smtp_tls {
            AsyncSmtpTransport::<Tokio1Executor>::relay(smtp_host)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(smtp_host)
        }
        .port(self.config.smtp_port)
        .timeout(Some(self.config.timeout()));

        let mailer = if let (Some(username), Some(password)) =
            (&self.config.smtp_username, &self.config.smtp_password)
        {
            mailer.credentials(Credentials::new(username.clone(), password.clone()))
        } else {
            mailer
        };

        mailer.build().send(email).await?;

        tracing::info!(to = %to_email, subject = %subject, "Email sent successfully");
        Ok(())
    }
}

/// Writes messages to the log instead of sending them. Used when SMTP is not configured.
#[derive(Debug, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, to: &str, subject: &str, _html: &str, text: &str) -> Result<(), EmailError> {
        tracing::warn!(to = %to, subject = %subject, "Email not configured, logging message instead");
        tracing::debug!(body = %text, "Unsent email body");
        Ok(())
    }
}

pub fn mailer_from_config(config: &EmailConfig) -> Arc<dyn Mailer> {
    if config.is_configured() {
        Arc::new(SmtpMailer::new(config.clone()))
    } else {
        Arc::new(LogMailer)
    }
}

/// Escape HTML special characters
pub(crate) fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Debug, Clone)]
    pub struct SentEmail {
        pub to: String,
        pub subject: String,
        pub text: String,
    }

    /// Records messages in memory. Fails every send while `fail` is set.
    #[derive(Debug, Default)]
    pub struct RecordingMailer {
        pub sent: Mutex<Vec<SentEmail>>,
        pub fail: AtomicBool,
    }

    impl RecordingMailer {
        pub fn failing() -> Self {
            Self {
                fail: AtomicBool::new(true),
                ..Default::default()
            }
        }

        pub fn last(&self) -> Option<SentEmail> {
            self.sent.lock().last().cloned()
        }
    }

    #[async_trait]
    impl Mailer for RecordingMailer {
        async fn send(&self, to: &str, subject: &str, _html: &str, text: &str) -> Result<(), EmailError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(EmailError::NotConfigured("recording mailer set to fail"));
            }
            self.sent.lock().push(SentEmail {
                to: to.to_string(),
                subject: subject.to_string(),
                text: text.to_string(),
            });
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::RecordingMailer;
    use super::*;

    #[test]
    fn test_html_escape() {
        assert_eq!(html_escape("<script>"), "&lt;script&gt;");
        assert_eq!(html_escape("Tom & Jerry"), "Tom &amp; Jerry");
    }

    #[test]
    fn test_render_password_reset() {
        let url = "http://localhost:3000/api/v1/users/resetPassword/abc";
        let text = Template::PasswordReset.render_text("Laura", url);
        assert!(text.starts_with("Hi Laura,"));
        assert!(text.contains(url));

        let html = Template::PasswordReset.render_html("<Laura>", url);
        assert!(html.contains("Hi &lt;Laura&gt;,"));
        assert!(html.contains("<!DOCTYPE html>"));
    }

    #[tokio::test]
    async fn test_send_template_records_message() {
        let mailer = RecordingMailer::default();
        send_template(
            &mailer,
            "laura@example.com",
            "Laura",
            "http://localhost:3000/me",
            Template::Welcome,
            Duration::from_secs(1),
        )
        .await
        .unwrap();

        let sent = mailer.last().unwrap();
        assert_eq!(sent.to, "laura@example.com");
        assert_eq!(sent.subject, "Welcome to the Natours Family!");
        assert!(sent.text.contains("http://localhost:3000/me"));
    }

    #[tokio::test]
    async fn test_smtp_without_host_is_not_configured() {
        let mailer = SmtpMailer::new(EmailConfig::default());
        let err = mailer
            .send("laura@example.com", "Hi", "<p>Hi</p>", "Hi")
            .await
            .unwrap_err();
        assert!(matches!(err, EmailError::NotConfigured(_)));
    }

    #[tokio::test]
    async fn test_slow_mailer_times_out() {
        struct Stalled;

        #[async_trait]
        impl Mailer for Stalled {
            async fn send(&self, _: &str, _: &str, _: &str, _: &str) -> Result<(), EmailError> {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            }
        }

        let err = send_template(&Stalled, "a@b.co", "A", "u", Template::Welcome, Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, EmailError::Timeout(_)));
    }
}
