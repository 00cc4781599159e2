//! Persistence for one-time passcodes.
//!
//! Rows live in `otp_codes`. Current rows carry `code_hash`; older deployments
//! only have a plaintext `code` column, which [`HashLookup::Unsupported`]
//! reports so the verifier can decide whether to fall back.

use anyhow::{Context, Result};
use sqlx::{PgPool, Row};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::Instrument;
use uuid::Uuid;

use crate::clock::Clock;

/// Postgres SQLSTATE for a reference to a column that does not exist.
const UNDEFINED_COLUMN: &str = "42703";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OtpRecord {
    pub id: Uuid,
    pub email: String,
}

#[derive(Clone, Debug)]
pub struct NewOtp {
    pub email: String,
    pub code_hash: Option<String>,
    /// Only set when no pepper is configured.
    pub code: Option<String>,
    pub ttl: Duration,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HashLookup {
    Found(OtpRecord),
    NotFound,
    /// The store has no hash column (legacy schema).
    Unsupported,
}

pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

pub trait OtpStore: Send + Sync {
    fn insert<'a>(&'a self, otp: &'a NewOtp) -> StoreFuture<'a, Uuid>;

    /// Most recent unused, unexpired record for `email` with this hash.
    fn find_by_hash<'a>(&'a self, email: &'a str, code_hash: &'a str) -> StoreFuture<'a, HashLookup>;

    /// Legacy plaintext lookup with the same filters as `find_by_hash`.
    fn find_by_code<'a>(&'a self, email: &'a str, code: &'a str) -> StoreFuture<'a, Option<OtpRecord>>;

    /// Mark a record used if it is still unused and unexpired.
    /// Returns `false` when another caller got there first.
    fn mark_used(&self, id: Uuid) -> StoreFuture<'_, bool>;
}

pub(crate) fn is_undefined_column(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err
            .code()
            .is_some_and(|code| code.as_ref() == UNDEFINED_COLUMN),
        _ => false,
    }
}

#[derive(Clone, Debug)]
pub struct PgOtpStore {
    pool: PgPool,
}

impl PgOtpStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl OtpStore for PgOtpStore {
    fn insert<'a>(&'a self, otp: &'a NewOtp) -> StoreFuture<'a, Uuid> {
        Box::pin(async move {
            let query = r"
                INSERT INTO otp_codes (email, code, code_hash, expires_at)
                VALUES ($1, $2, $3, NOW() + ($4 * INTERVAL '1 second'))
                RETURNING id
            ";
            let span = tracing::info_span!(
                "db.query",
                db.system = "postgresql",
                db.operation = "INSERT",
                db.statement = query
            );
            let ttl_seconds = i64::try_from(otp.ttl.as_secs()).unwrap_or(i64::MAX);
            let row = sqlx::query(query)
                .bind(&otp.email)
                .bind(otp.code.as_deref())
                .bind(otp.code_hash.as_deref())
                .bind(ttl_seconds)
                .fetch_one(&self.pool)
                .instrument(span)
                .await
                .context("failed to insert otp code")?;
            Ok(row.get("id"))
        })
    }

    fn find_by_hash<'a>(&'a self, email: &'a str, code_hash: &'a str) -> StoreFuture<'a, HashLookup> {
        Box::pin(async move {
            let query = r"
                SELECT id, email
                FROM otp_codes
                WHERE email = $1
                  AND code_hash = $2
                  AND used = FALSE
                  AND expires_at > NOW()
                ORDER BY created_at DESC
                LIMIT 1
            ";
            let span = tracing::info_span!(
                "db.query",
                db.system = "postgresql",
                db.operation = "SELECT",
                db.statement = query
            );
            let row = sqlx::query(query)
                .bind(email)
                .bind(code_hash)
                .fetch_optional(&self.pool)
                .instrument(span)
                .await;

            match row {
                Ok(Some(row)) => Ok(HashLookup::Found(OtpRecord {
                    id: row.get("id"),
                    email: row.get("email"),
                })),
                Ok(None) => Ok(HashLookup::NotFound),
                Err(err) if is_undefined_column(&err) => Ok(HashLookup::Unsupported),
                Err(err) => Err(err).context("failed to lookup otp code by hash"),
            }
        })
    }

    fn find_by_code<'a>(&'a self, email: &'a str, code: &'a str) -> StoreFuture<'a, Option<OtpRecord>> {
        Box::pin(async move {
            let query = r"
                SELECT id, email
                FROM otp_codes
                WHERE email = $1
                  AND code = $2
                  AND used = FALSE
                  AND expires_at > NOW()
                ORDER BY created_at DESC
                LIMIT 1
            ";
            let span = tracing::info_span!(
                "db.query",
                db.system = "postgresql",
                db.operation = "SELECT",
                db.statement = query
            );
            let row = sqlx::query(query)
                .bind(email)
                .bind(code)
                .fetch_optional(&self.pool)
                .instrument(span)
                .await
                .context("failed to lookup otp code")?;

            Ok(row.map(|row| OtpRecord {
                id: row.get("id"),
                email: row.get("email"),
            }))
        })
    }

    fn mark_used(&self, id: Uuid) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            // The guard on `used` makes this a compare-and-swap.
            let query = r"
                UPDATE otp_codes
                SET used = TRUE, used_at = NOW()
                WHERE id = $1
                  AND used = FALSE
                  AND expires_at > NOW()
            ";
            let span = tracing::info_span!(
                "db.query",
                db.system = "postgresql",
                db.operation = "UPDATE",
                db.statement = query
            );
            let result = sqlx::query(query)
                .bind(id)
                .execute(&self.pool)
                .instrument(span)
                .await
                .context("failed to mark otp code used")?;
            Ok(result.rows_affected() == 1)
        })
    }
}

#[derive(Clone, Debug)]
struct MemoryOtp {
    id: Uuid,
    email: String,
    code: Option<String>,
    code_hash: Option<String>,
    expires_at_ms: i64,
    used: bool,
}

/// Process-local OTP table with the same semantics as `otp_codes`.
pub struct MemoryOtpStore {
    rows: Mutex<Vec<MemoryOtp>>,
    clock: Arc<dyn Clock>,
    legacy: bool,
}

impl MemoryOtpStore {
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            rows: Mutex::new(Vec::new()),
            clock,
            legacy: false,
        }
    }

    /// Behave like a schema without `code_hash`.
    #[must_use]
    pub fn legacy(clock: Arc<dyn Clock>) -> Self {
        Self {
            legacy: true,
            ..Self::new(clock)
        }
    }

    fn lookup(&self, rows: &[MemoryOtp], email: &str, matches: impl Fn(&MemoryOtp) -> bool) -> Option<OtpRecord> {
        let now = self.clock.now_millis();
        // Insertion order doubles as creation order.
        rows.iter()
            .rev()
            .find(|row| row.email == email && !row.used && row.expires_at_ms > now && matches(row))
            .map(|row| OtpRecord {
                id: row.id,
                email: row.email.clone(),
            })
    }
}

impl OtpStore for MemoryOtpStore {
    fn insert<'a>(&'a self, otp: &'a NewOtp) -> StoreFuture<'a, Uuid> {
        Box::pin(async move {
            if self.legacy && otp.code_hash.is_some() {
                anyhow::bail!("column \"code_hash\" of relation \"otp_codes\" does not exist");
            }
            let ttl_ms = i64::try_from(otp.ttl.as_millis()).unwrap_or(i64::MAX);
            let row = MemoryOtp {
                id: Uuid::new_v4(),
                email: otp.email.clone(),
                code: otp.code.clone(),
                code_hash: otp.code_hash.clone(),
                expires_at_ms: self.clock.now_millis().saturating_add(ttl_ms),
                used: false,
            };
            let id = row.id;
            self.rows.lock().await.push(row);
            Ok(id)
        })
    }

    fn find_by_hash<'a>(&'a self, email: &'a str, code_hash: &'a str) -> StoreFuture<'a, HashLookup> {
        Box::pin(async move {
            if self.legacy {
                return Ok(HashLookup::Unsupported);
            }
            let rows = self.rows.lock().await;
            Ok(self
                .lookup(&rows, email, |row| row.code_hash.as_deref() == Some(code_hash))
                .map_or(HashLookup::NotFound, HashLookup::Found))
        })
    }

    fn find_by_code<'a>(&'a self, email: &'a str, code: &'a str) -> StoreFuture<'a, Option<OtpRecord>> {
        Box::pin(async move {
            let rows = self.rows.lock().await;
            Ok(self.lookup(&rows, email, |row| row.code.as_deref() == Some(code)))
        })
    }

    fn mark_used(&self, id: Uuid) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            let now = self.clock.now_millis();
            let mut rows = self.rows.lock().await;
            match rows.iter_mut().find(|row| row.id == id) {
                Some(row) if !row.used && row.expires_at_ms > now => {
                    row.used = true;
                    Ok(true)
                }
                _ => Ok(false),
            }
        })
    }
}
