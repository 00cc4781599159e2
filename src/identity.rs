//! Identity lookups (email -> user, role, tenant).
//!
//! User management lives elsewhere; this crate only reads the `users` table.

use anyhow::{Context, Result};
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use tokio::sync::RwLock;
use tracing::Instrument;
use uuid::Uuid;

use crate::session::Role;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserRecord {
    pub id: Uuid,
    pub email: String,
    pub role: Role,
    pub tenant_id: Option<String>,
}

pub type IdentityFuture<'a> = Pin<Box<dyn Future<Output = Result<Option<UserRecord>>> + Send + 'a>>;

pub trait IdentityStore: Send + Sync {
    /// `email` is already normalized.
    fn find_by_email<'a>(&'a self, email: &'a str) -> IdentityFuture<'a>;
}

#[derive(Clone, Debug)]
pub struct PgIdentityStore {
    pool: PgPool,
}

impl PgIdentityStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl IdentityStore for PgIdentityStore {
    fn find_by_email<'a>(&'a self, email: &'a str) -> IdentityFuture<'a> {
        Box::pin(async move {
            let query = r"
                SELECT id, email, role, organization_id
                FROM users
                WHERE lower(email) = $1
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
                .fetch_optional(&self.pool)
                .instrument(span)
                .await
                .context("failed to lookup user by email")?;

            Ok(row.map(|row| UserRecord {
                id: row.get("id"),
                email: row.get("email"),
                role: Role::from(row.get::<String, _>("role")),
                tenant_id: row.get("organization_id"),
            }))
        })
    }
}

/// In-process directory, keyed by normalized email.
#[derive(Debug, Default)]
pub struct MemoryIdentityStore {
    users: RwLock<HashMap<String, UserRecord>>,
}

impl MemoryIdentityStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, user: UserRecord) {
        self.users
            .write()
            .await
            .insert(user.email.trim().to_lowercase(), user);
    }
}

impl IdentityStore for MemoryIdentityStore {
    fn find_by_email<'a>(&'a self, email: &'a str) -> IdentityFuture<'a> {
        Box::pin(async move { Ok(self.users.read().await.get(email).cloned()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_normalizes_on_insert() -> Result<()> {
        let store = MemoryIdentityStore::new();
        let user = UserRecord {
            id: Uuid::new_v4(),
            email: "Ana@Example.com".to_string(),
            role: Role::OrgAdmin,
            tenant_id: Some("org-1".to_string()),
        };
        store.insert(user.clone()).await;

        assert_eq!(store.find_by_email("ana@example.com").await?, Some(user));
        assert_eq!(store.find_by_email("bob@example.com").await?, None);
        Ok(())
    }
}
