//! Stateless session tokens: `base64url(json payload) "." base64url(hmac)`.
//!
//! The MAC is HMAC-SHA256 over the encoded payload segment, exactly as it
//! travels on the wire. Verification recomputes it and compares the encoded
//! forms in constant time before the payload is even decoded.

use base64ct::{Base64UrlUnpadded, Encoding};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::fmt;
use std::sync::Arc;
use subtle::ConstantTimeEq;

use crate::clock::Clock;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// No signing secret: sessions are disabled, not broken.
    #[error("session signing secret is not configured")]
    Config,
    #[error("invalid session token")]
    InvalidToken,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Role {
    SuperAdmin,
    OrgAdmin,
    User,
    Other(String),
}

impl Role {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::SuperAdmin => "super_admin",
            Self::OrgAdmin => "org_admin",
            Self::User => "user",
            Self::Other(role) => role,
        }
    }
}

impl From<String> for Role {
    fn from(value: String) -> Self {
        match value.as_str() {
            "super_admin" => Self::SuperAdmin,
            "org_admin" => Self::OrgAdmin,
            "user" => Self::User,
            _ => Self::Other(value),
        }
    }
}

impl From<&str> for Role {
    fn from(value: &str) -> Self {
        Self::from(value.to_string())
    }
}

impl From<Role> for String {
    fn from(role: Role) -> Self {
        match role {
            Role::Other(role) => role,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity to be signed; `expires_at` is added by [`SessionCodec::sign`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionClaims {
    pub subject_id: String,
    pub role: Role,
    pub tenant_id: Option<String>,
}

/// Field order is the serialization order, which keeps signing deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionPayload {
    pub subject_id: String,
    pub role: Role,
    pub tenant_id: Option<String>,
    pub expires_at: i64,
}

impl SessionPayload {
    #[must_use]
    pub fn claims(&self) -> SessionClaims {
        SessionClaims {
            subject_id: self.subject_id.clone(),
            role: self.role.clone(),
            tenant_id: self.tenant_id.clone(),
        }
    }
}

pub struct SessionCodec {
    secret: Option<SecretString>,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for SessionCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCodec")
            .field("configured", &self.is_configured())
            .finish_non_exhaustive()
    }
}

impl SessionCodec {
    /// Empty secrets count as missing.
    #[must_use]
    pub fn new(secret: Option<SecretString>, clock: Arc<dyn Clock>) -> Self {
        let secret = secret.filter(|secret| !secret.expose_secret().is_empty());
        Self { secret, clock }
    }

    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.secret.is_some()
    }

    /// Sign `claims` for `ttl_seconds` from now.
    ///
    /// # Errors
    /// Returns `SessionError::Config` when no signing secret is configured.
    pub fn sign(&self, claims: &SessionClaims, ttl_seconds: i64) -> Result<String, SessionError> {
        let secret = self.secret.as_ref().ok_or(SessionError::Config)?;
        let payload = SessionPayload {
            subject_id: claims.subject_id.clone(),
            role: claims.role.clone(),
            tenant_id: claims.tenant_id.clone(),
            expires_at: self.clock.now_seconds().saturating_add(ttl_seconds),
        };
        let json = serde_json::to_vec(&payload).map_err(|_| SessionError::InvalidToken)?;
        let body = Base64UrlUnpadded::encode_string(&json);
        let mac = compute_mac(secret, body.as_bytes())?;
        Ok(format!("{body}.{mac}"))
    }

    /// Verify a token and return its payload.
    ///
    /// # Errors
    /// Returns `SessionError::Config` when no secret is configured and
    /// `SessionError::InvalidToken` for any malformed, forged or expired token.
    pub fn verify(&self, token: &str) -> Result<SessionPayload, SessionError> {
        let secret = self.secret.as_ref().ok_or(SessionError::Config)?;

        let mut segments = token.split('.');
        let (Some(body), Some(presented), None) =
            (segments.next(), segments.next(), segments.next())
        else {
            return Err(SessionError::InvalidToken);
        };
        if body.is_empty() || presented.is_empty() {
            return Err(SessionError::InvalidToken);
        }

        let expected = compute_mac(secret, body.as_bytes())?;
        if expected.len() != presented.len() {
            return Err(SessionError::InvalidToken);
        }
        if !bool::from(expected.as_bytes().ct_eq(presented.as_bytes())) {
            return Err(SessionError::InvalidToken);
        }

        let json = Base64UrlUnpadded::decode_vec(body).map_err(|_| SessionError::InvalidToken)?;
        let payload: SessionPayload =
            serde_json::from_slice(&json).map_err(|_| SessionError::InvalidToken)?;
        if payload.subject_id.trim().is_empty() {
            return Err(SessionError::InvalidToken);
        }
        if payload.expires_at <= self.clock.now_seconds() {
            return Err(SessionError::InvalidToken);
        }
        Ok(payload)
    }
}

fn compute_mac(secret: &SecretString, message: &[u8]) -> Result<String, SessionError> {
    let mut mac = HmacSha256::new_from_slice(secret.expose_secret().as_bytes())
        .map_err(|_| SessionError::Config)?;
    mac.update(message);
    Ok(Base64UrlUnpadded::encode_string(&mac.finalize().into_bytes()))
}
