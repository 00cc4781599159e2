//! Delivery of freshly issued codes.

use anyhow::Result;
use std::time::Duration;
use tracing::info;

#[derive(Clone, Debug)]
pub struct OtpMessage {
    pub to_email: String,
    pub code: String,
    pub expires_in: Duration,
}

/// Delivery abstraction; SMTP or a provider API live behind this.
pub trait OtpMailer: Send + Sync {
    /// Deliver a message or return an error so the request can report failure.
    fn send(&self, message: &OtpMessage) -> Result<()>;
}

/// Local dev mailer. Logs the delivery but never the code itself.
#[derive(Clone, Debug)]
pub struct LogOtpMailer;

impl OtpMailer for LogOtpMailer {
    fn send(&self, message: &OtpMessage) -> Result<()> {
        info!(
            to_email = %message.to_email,
            expires_in_seconds = message.expires_in.as_secs(),
            "otp delivery stub"
        );
        Ok(())
    }
}
