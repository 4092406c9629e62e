//! Transactional email through SES.

use aws_sdk_ses::types::{Body, Content, Destination, Message};
use std::time::Duration;
use tracing::info;

use crate::{Config, Error, Result};

/// A rendered email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Email {
    pub subject: String,
    pub html: String,
    pub text: String,
}

/// "1 hour", "30 minutes", "2 days": the largest unit that divides evenly.
fn describe_lifetime(lifetime: Duration) -> String {
    let secs = lifetime.as_secs().max(1);
    let (count, unit) = [(86_400, "day"), (3_600, "hour"), (60, "minute")]
        .into_iter()
        .find(|(size, _)| secs % size == 0)
        .map(|(size, unit)| (secs / size, unit))
        .unwrap_or((secs, "second"));

    if count == 1 {
        format!("1 {}", unit)
    } else {
        format!("{} {}s", count, unit)
    }
}

/// Build the password reset email for `token`, valid for `expires_in`.
pub fn password_reset_email(frontend_url: &str, token: &str, expires_in: Duration) -> Email {
    let lifetime = describe_lifetime(expires_in);
    let reset_url = format!(
        "{}/reset-password?token={}",
        frontend_url.trim_end_matches('/'),
        urlencoding::encode(token)
    );

    let html = format!(
        r#"<!DOCTYPE html>
<html>
<head><meta charset="UTF-8"></head>
<body style="font-family: sans-serif; padding: 20px;">
    <h2>Reset your password</h2>
    <p>Click the link below to reset your password:</p>
    <p><a href="{url}">{url}</a></p>
    <p>This link will expire in {lifetime}.</p>
    <hr>
    <p style="color: #666; font-size: 12px;">If you didn't request this, please ignore this email.</p>
</body>
</html>"#,
        url = reset_url,
        lifetime = lifetime
    );

    let text = format!(
        "Reset your password by opening the link below:\n\n{}\n\nThis link will expire in {}. \
         If you didn't request this, please ignore this email.",
        reset_url, lifetime
    );

    Email {
        subject: "Reset your password".to_string(),
        html,
        text,
    }
}

/// Sends mail from a fixed address.
#[derive(Debug, Clone)]
pub struct Mailer {
    client: aws_sdk_ses::Client,
    from_email: String,
    frontend_url: String,
    reset_ttl: Duration,
}

impl Mailer {
    /// `None` when no sender address is configured.
    pub fn from_config(client: aws_sdk_ses::Client, config: &Config) -> Option<Self> {
        config.from_email.as_ref().map(|from| Self {
            client,
            from_email: from.clone(),
            frontend_url: config.frontend_url.clone(),
            reset_ttl: config.jwt.reset_ttl,
        })
    }

    pub async fn send_password_reset(&self, to_email: &str, token: &str) -> Result<String> {
        let email = password_reset_email(&self.frontend_url, token, self.reset_ttl);
        let message_id = self.send(to_email, &email).await?;
        info!(message_id = %message_id, "Password reset email sent");
        Ok(message_id)
    }

    async fn send(&self, to_email: &str, email: &Email) -> Result<String> {
        let content = |data: &str| {
            Content::builder()
                .data(data)
                .charset("UTF-8")
                .build()
                .map_err(|e| Error::Aws(format!("Failed to build email content: {}", e)))
        };

        let body = Body::builder()
            .html(content(&email.html)?)
            .text(content(&email.text)?)
            .build();

        let message = Message::builder()
            .subject(content(&email.subject)?)
            .body(body)
            .build();

        let destination = Destination::builder().to_addresses(to_email).build();

        let result = self
            .client
            .send_email()
            .source(&self.from_email)
            .destination(destination)
            .message(message)
            .send()
            .await
            .map_err(|e| Error::Aws(format!("Failed to send email: {}", e)))?;

        Ok(result.message_id().to_string())
    }
}
