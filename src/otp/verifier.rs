//! Issue and redeem one-time passcodes.
//!
//! Flow Overview:
//! 1) `issue` generates a code for a known email, stores its peppered hash and
//!    hands the code to the mailer. Unknown emails are skipped silently.
//! 2) `verify` looks the hash up (most recent unused, unexpired row), falls
//!    back to the plaintext column on legacy schemas, then consumes the row with
//!    a conditional update. Losing that race is a failure.
//! 3) Both paths emit an audit event in the background.
//!
//! Every rejection is reported as `InvalidOrExpired`; the audit trail keeps the
//! real reason.

use anyhow::Error;
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};
use uuid::Uuid;

use super::hash::{generate_code, hash_code, normalize_email, valid_code, valid_email};
use super::mailer::{OtpMailer, OtpMessage};
use super::store::{HashLookup, NewOtp, OtpRecord, OtpStore};
use crate::audit::{AuditEvent, AuditLogger, AuditOutcome};
use crate::clock::Entropy;
use crate::identity::IdentityStore;
use crate::session::{Role, SessionClaims};

const DEFAULT_OTP_TTL_SECONDS: u64 = 10 * 60;
const ACTION_REQUEST: &str = "otp.request";
const ACTION_VERIFY: &str = "otp.verify";

#[derive(Debug, thiserror::Error)]
pub enum OtpError {
    #[error("invalid or expired code")]
    InvalidOrExpired,
    #[error("invalid email")]
    InvalidEmail,
    #[error("one-time passcodes are not configured")]
    Config,
    #[error("otp store failure: {0:#}")]
    Store(Error),
}

/// Identity established by a redeemed code.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserClaim {
    pub user_id: Uuid,
    pub email: String,
    pub role: Role,
    pub tenant_id: Option<String>,
}

impl UserClaim {
    #[must_use]
    pub fn session_claims(&self) -> SessionClaims {
        SessionClaims {
            subject_id: self.user_id.to_string(),
            role: self.role.clone(),
            tenant_id: self.tenant_id.clone(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IssueOutcome {
    Sent,
    UnknownEmail,
}

#[derive(Clone, Debug)]
pub struct OtpConfig {
    pepper: Option<SecretString>,
    require_hash: bool,
    ttl: Duration,
}

impl OtpConfig {
    /// Empty peppers count as missing.
    #[must_use]
    pub fn new(pepper: Option<SecretString>) -> Self {
        Self {
            pepper: pepper.filter(|pepper| !pepper.expose_secret().is_empty()),
            require_hash: false,
            ttl: Duration::from_secs(DEFAULT_OTP_TTL_SECONDS),
        }
    }

    #[must_use]
    pub fn with_require_hash(mut self, require_hash: bool) -> Self {
        self.require_hash = require_hash;
        self
    }

    #[must_use]
    pub fn with_ttl_seconds(mut self, seconds: u64) -> Self {
        self.ttl = Duration::from_secs(seconds);
        self
    }

    #[must_use]
    pub fn hashing_enabled(&self) -> bool {
        self.pepper.is_some()
    }

    #[must_use]
    pub fn require_hash(&self) -> bool {
        self.require_hash
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

/// Internal reason for a rejection; only the audit trail sees it.
enum Rejection {
    Invalid(&'static str),
    Config,
    Store(Error),
}

impl From<Error> for Rejection {
    fn from(err: Error) -> Self {
        Self::Store(err)
    }
}

pub struct OtpVerifier {
    store: Arc<dyn OtpStore>,
    identities: Arc<dyn IdentityStore>,
    mailer: Arc<dyn OtpMailer>,
    entropy: Arc<dyn Entropy>,
    audit: AuditLogger,
    config: OtpConfig,
}

impl OtpVerifier {
    #[must_use]
    pub fn new(
        store: Arc<dyn OtpStore>,
        identities: Arc<dyn IdentityStore>,
        mailer: Arc<dyn OtpMailer>,
        entropy: Arc<dyn Entropy>,
        audit: AuditLogger,
        config: OtpConfig,
    ) -> Self {
        Self {
            store,
            identities,
            mailer,
            entropy,
            audit,
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &OtpConfig {
        &self.config
    }

    /// Issue and deliver a code for `email`.
    ///
    /// # Errors
    /// `InvalidEmail` for malformed input, `Config` when hash-only mode is on
    /// without a pepper, `Store` when persistence or delivery fails.
    pub async fn issue(&self, email: &str, ip: Option<&str>) -> Result<IssueOutcome, OtpError> {
        let email = normalize_email(email);
        if !valid_email(&email) {
            return Err(OtpError::InvalidEmail);
        }
        if self.config.require_hash && self.config.pepper.is_none() {
            error!("otp hash-only mode is enabled but no otp pepper is configured");
            return Err(OtpError::Config);
        }

        let subject = self.audit.subject_hash(&email);
        let result = self.issue_inner(&email).await;
        let event = match &result {
            Ok(IssueOutcome::Sent) => AuditEvent::new(ACTION_REQUEST, AuditOutcome::Success),
            Ok(IssueOutcome::UnknownEmail) => AuditEvent::new(ACTION_REQUEST, AuditOutcome::Failure)
                .with_detail("unknown_email"),
            Err(_) => AuditEvent::new(ACTION_REQUEST, AuditOutcome::Failure).with_detail("error"),
        };
        self.audit.emit(event.with_subject(subject).with_ip(ip));
        result.map_err(OtpError::Store)
    }

    async fn issue_inner(&self, email: &str) -> Result<IssueOutcome, Error> {
        if self.identities.find_by_email(email).await?.is_none() {
            return Ok(IssueOutcome::UnknownEmail);
        }

        let code = generate_code(self.entropy.as_ref())?;
        let (code_hash, plaintext) = match &self.config.pepper {
            Some(pepper) => (Some(hash_code(email, &code, pepper)?), None),
            None => {
                warn!("issuing a plaintext otp code; configure an otp pepper");
                (None, Some(code.clone()))
            }
        };
        let otp = NewOtp {
            email: email.to_string(),
            code_hash,
            code: plaintext,
            ttl: self.config.ttl,
        };
        self.store.insert(&otp).await?;

        self.mailer.send(&OtpMessage {
            to_email: email.to_string(),
            code,
            expires_in: self.config.ttl,
        })?;
        Ok(IssueOutcome::Sent)
    }

    /// Redeem `code` for `email`.
    ///
    /// # Errors
    /// `InvalidOrExpired` for any rejected code, `Config` when hash-only mode
    /// is on without a pepper, `Store` when the store is unreachable.
    pub async fn verify(&self, email: &str, code: &str, ip: Option<&str>) -> Result<UserClaim, OtpError> {
        let email = normalize_email(email);
        let subject = self.audit.subject_hash(&email);

        let result = self.verify_inner(&email, code.trim()).await;
        let event = match &result {
            Ok(_) => AuditEvent::new(ACTION_VERIFY, AuditOutcome::Success),
            Err(Rejection::Invalid(reason)) => {
                AuditEvent::new(ACTION_VERIFY, AuditOutcome::Failure).with_detail(reason)
            }
            Err(Rejection::Config) => {
                AuditEvent::new(ACTION_VERIFY, AuditOutcome::Failure).with_detail("not_configured")
            }
            Err(Rejection::Store(_)) => {
                AuditEvent::new(ACTION_VERIFY, AuditOutcome::Failure).with_detail("error")
            }
        };
        self.audit.emit(event.with_subject(subject).with_ip(ip));

        result.map_err(|rejection| match rejection {
            Rejection::Invalid(_) => OtpError::InvalidOrExpired,
            Rejection::Config => OtpError::Config,
            Rejection::Store(err) => OtpError::Store(err),
        })
    }

    async fn verify_inner(&self, email: &str, code: &str) -> Result<UserClaim, Rejection> {
        if !valid_email(email) || !valid_code(code) {
            return Err(Rejection::Invalid("malformed"));
        }
        if self.config.require_hash && self.config.pepper.is_none() {
            error!("otp hash-only mode is enabled but no otp pepper is configured");
            return Err(Rejection::Config);
        }

        let mut record: Option<OtpRecord> = None;
        let mut legacy_schema = false;
        if let Some(pepper) = &self.config.pepper {
            let digest = hash_code(email, code, pepper)?;
            match self.store.find_by_hash(email, &digest).await? {
                HashLookup::Found(found) => record = Some(found),
                HashLookup::NotFound => {}
                HashLookup::Unsupported => legacy_schema = true,
            }
        }

        let plaintext_allowed = self.config.pepper.is_none() || legacy_schema;
        if record.is_none() && plaintext_allowed {
            if self.config.require_hash {
                error!("otp store has no code_hash column and hash-only mode forbids plaintext codes");
                return Err(Rejection::Invalid("hash_unsupported"));
            }
            // Deprecated: plaintext rows predate peppered hashes.
            warn!("otp verification using the legacy plaintext code lookup");
            record = self.store.find_by_code(email, code).await?;
        }

        let Some(record) = record else {
            return Err(Rejection::Invalid("no_match"));
        };
        if !self.store.mark_used(record.id).await? {
            return Err(Rejection::Invalid("already_used"));
        }

        let Some(user) = self.identities.find_by_email(email).await? else {
            return Err(Rejection::Invalid("unknown_user"));
        };
        Ok(UserClaim {
            user_id: user.id,
            email: user.email,
            role: user.role,
            tenant_id: user.tenant_id,
        })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::{OtpMailer, OtpMessage};
    use anyhow::Result;
    use std::sync::Mutex;

    #[derive(Default)]
    pub(crate) struct RecordingMailer {
        messages: Mutex<Vec<OtpMessage>>,
    }

    impl RecordingMailer {
        pub(crate) fn last_code(&self) -> Option<String> {
            self.messages
                .lock()
                .ok()
                .and_then(|messages| messages.last().map(|message| message.code.clone()))
        }
    }

    impl OtpMailer for RecordingMailer {
        fn send(&self, message: &OtpMessage) -> Result<()> {
            if let Ok(mut messages) = self.messages.lock() {
                messages.push(message.clone());
            }
            Ok(())
        }
    }
}
