//! Email dispatch behind a trait seam, with bounded retry.
//!
//! The actual delivery mechanism is a swappable external service, so the app
//! only depends on the [Mailer] trait. [send_with_retry] wraps any mailer
//! with the fixed three-attempt exponential backoff the OTP flow requires.

use std::time::Duration;

use async_trait::async_trait;

use crate::Error;

/// How many delivery attempts are made before giving up.
pub const MAX_SEND_ATTEMPTS: u32 = 3;

const BACKOFF_BASE: Duration = Duration::from_secs(1);

/// An email ready for dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    /// The recipient address.
    pub to: String,
    /// The subject line.
    pub subject: String,
    /// The plain-text body.
    pub body: String,
}

/// Build the message carrying a one-time code.
pub fn otp_message(to: &str, code: &str) -> EmailMessage {
    EmailMessage {
        to: to.to_string(),
        subject: "Your verification code".to_string(),
        body: format!(
            "Your verification code (valid for 5 minutes): {code}\n\
             Do not share this code with anyone."
        ),
    }
}

/// Delivers email through some external provider.
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Attempt to deliver `message` once.
    ///
    /// # Errors
    /// Returns an [Error::EmailDelivery] describing the provider failure.
    async fn send(&self, message: &EmailMessage) -> Result<(), Error>;
}

/// Deliver `message`, retrying up to [MAX_SEND_ATTEMPTS] times with
/// exponential backoff (1s, 2s, ...) between attempts.
///
/// # Errors
/// This function will return the last [Error::EmailDelivery] once every
/// attempt has failed. Nothing is queued for later retry.
pub async fn send_with_retry(mailer: &dyn Mailer, message: &EmailMessage) -> Result<(), Error> {
    let mut last_error = Error::EmailDelivery("no attempts made".to_string());

    for attempt in 0..MAX_SEND_ATTEMPTS {
        match mailer.send(message).await {
            Ok(()) => return Ok(()),
            Err(error) => {
                tracing::warn!(
                    "email delivery attempt {}/{} failed: {}",
                    attempt + 1,
                    MAX_SEND_ATTEMPTS,
                    error
                );
                last_error = error;
            }
        }

        if attempt + 1 < MAX_SEND_ATTEMPTS {
            tokio::time::sleep(BACKOFF_BASE * 2u32.pow(attempt)).await;
        }
    }

    Err(Error::EmailDelivery(format!(
        "failed after {MAX_SEND_ATTEMPTS} attempts: {last_error}"
    )))
}

/// A mailer that writes messages to the log instead of delivering them.
///
/// Useful for local development where no SMTP credentials exist.
#[derive(Debug, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, message: &EmailMessage) -> Result<(), Error> {
        tracing::info!(
            "email to {}: {} / {}",
            message.to,
            message.subject,
            message.body
        );

        Ok(())
    }
}
