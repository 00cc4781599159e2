//! Fire-and-forget audit trail for security-relevant events.
//!
//! Callers build an [`AuditEvent`] and hand it to [`AuditLogger::emit`], which
//! spawns the write and returns immediately. Sink failures are logged and
//! dropped; they never change the outcome of the request that produced them.
//!
//! Email addresses never reach the sink. The subject is an HMAC of the
//! normalized address keyed with the audit pepper, so events for the same user
//! can be correlated without storing who the user is.

use anyhow::{Context, Result};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use sqlx::PgPool;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{info, warn, Instrument};

use crate::clock::{Clock, SystemClock};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuditOutcome {
    Success,
    Failure,
}

impl AuditOutcome {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuditEvent {
    pub action: &'static str,
    pub outcome: AuditOutcome,
    pub subject: Option<String>,
    pub ip: Option<String>,
    pub detail: Option<String>,
    /// Unix millis, stamped by [`AuditLogger::emit`].
    pub occurred_at_ms: i64,
}

impl AuditEvent {
    #[must_use]
    pub fn new(action: &'static str, outcome: AuditOutcome) -> Self {
        Self {
            action,
            outcome,
            subject: None,
            ip: None,
            detail: None,
            occurred_at_ms: 0,
        }
    }

    #[must_use]
    pub fn with_subject(mut self, subject: Option<String>) -> Self {
        self.subject = subject;
        self
    }

    #[must_use]
    pub fn with_ip(mut self, ip: Option<&str>) -> Self {
        self.ip = ip.map(str::to_string);
        self
    }

    #[must_use]
    pub fn with_detail(mut self, detail: &str) -> Self {
        self.detail = Some(detail.to_string());
        self
    }
}

pub type AuditFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

/// Append-only destination for audit events.
pub trait AuditSink: Send + Sync {
    fn record<'a>(&'a self, event: &'a AuditEvent) -> AuditFuture<'a>;
}

/// Writes events to the structured log only.
#[derive(Clone, Debug)]
pub struct LogAuditSink;

impl AuditSink for LogAuditSink {
    fn record<'a>(&'a self, event: &'a AuditEvent) -> AuditFuture<'a> {
        Box::pin(async move {
            info!(
                action = event.action,
                outcome = event.outcome.as_str(),
                subject = event.subject.as_deref().unwrap_or("-"),
                ip = event.ip.as_deref().unwrap_or("-"),
                detail = event.detail.as_deref().unwrap_or("-"),
                occurred_at_ms = event.occurred_at_ms,
                "audit"
            );
            Ok(())
        })
    }
}

/// Appends events to the `audit_log` table.
#[derive(Clone, Debug)]
pub struct PgAuditSink {
    pool: PgPool,
}

impl PgAuditSink {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl AuditSink for PgAuditSink {
    fn record<'a>(&'a self, event: &'a AuditEvent) -> AuditFuture<'a> {
        Box::pin(async move {
            let query = r"
                INSERT INTO audit_log (action, outcome, subject_hash, ip_address, detail, occurred_at)
                VALUES ($1, $2, $3, $4, $5, to_timestamp($6::float8 / 1000.0))
            ";
            let span = tracing::info_span!(
                "db.query",
                db.system = "postgresql",
                db.operation = "INSERT",
                db.statement = query
            );
            sqlx::query(query)
                .bind(event.action)
                .bind(event.outcome.as_str())
                .bind(event.subject.as_deref())
                .bind(event.ip.as_deref())
                .bind(event.detail.as_deref())
                .bind(event.occurred_at_ms)
                .execute(&self.pool)
                .instrument(span)
                .await
                .context("failed to insert audit event")?;
            Ok(())
        })
    }
}

#[derive(Clone)]
pub struct AuditLogger {
    sink: Arc<dyn AuditSink>,
    pepper: Option<SecretString>,
    clock: Arc<dyn Clock>,
}

impl AuditLogger {
    #[must_use]
    pub fn new(sink: Arc<dyn AuditSink>, pepper: Option<SecretString>) -> Self {
        let pepper = pepper.filter(|pepper| !pepper.expose_secret().is_empty());
        Self {
            sink,
            pepper,
            clock: Arc::new(SystemClock),
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Peppered digest of a normalized email; `None` without a pepper, since an
    /// unkeyed hash of an email is trivially reversible by enumeration.
    #[must_use]
    pub fn subject_hash(&self, email: &str) -> Option<String> {
        let pepper = self.pepper.as_ref()?;
        let mut mac = Hmac::<Sha256>::new_from_slice(pepper.expose_secret().as_bytes()).ok()?;
        mac.update(b"audit:");
        mac.update(email.as_bytes());
        Some(hex::encode(mac.finalize().into_bytes()))
    }

    /// Record `event` in the background. Never fails and never blocks.
    pub fn emit(&self, mut event: AuditEvent) {
        event.occurred_at_ms = self.clock.now_millis();
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(action = event.action, "audit event dropped: no async runtime");
            return;
        };
        let sink = Arc::clone(&self.sink);
        runtime.spawn(async move {
            if let Err(err) = sink.record(&event).await {
                warn!(action = event.action, "audit sink failed: {err:#}");
            }
        });
    }
}

impl std::fmt::Debug for AuditLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLogger")
            .field("hashing", &self.pepper.is_some())
            .finish_non_exhaustive()
    }
}
