//! Code generation, normalization and peppered hashing.

use anyhow::{anyhow, Result};
use hmac::{Hmac, Mac};
use regex::Regex;
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use std::sync::OnceLock;

use crate::clock::Entropy;

pub const CODE_LENGTH: usize = 6;

const CODE_SPACE: u32 = 1_000_000;

/// Normalize an email for hashing and lookups.
#[must_use]
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn email_regex() -> Option<&'static Regex> {
    static EMAIL: OnceLock<Option<Regex>> = OnceLock::new();
    EMAIL
        .get_or_init(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").ok())
        .as_ref()
}

/// Basic email format check on already-normalized input.
#[must_use]
pub fn valid_email(email_normalized: &str) -> bool {
    email_regex().is_some_and(|regex| regex.is_match(email_normalized))
}

#[must_use]
pub fn valid_code(code: &str) -> bool {
    code.len() == CODE_LENGTH && code.bytes().all(|byte| byte.is_ascii_digit())
}

/// HMAC-SHA256 over `email:code`, hex encoded. This is what `otp_codes.code_hash` stores.
///
/// # Errors
/// Returns an error if the pepper cannot be used as an HMAC key.
pub fn hash_code(email: &str, code: &str, pepper: &SecretString) -> Result<String> {
    let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(pepper.expose_secret().as_bytes())
        .map_err(|_| anyhow!("invalid otp pepper"))?;
    mac.update(email.as_bytes());
    mac.update(b":");
    mac.update(code.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Uniform six-digit code. Rejection sampling avoids modulo bias.
///
/// # Errors
/// Returns an error if the entropy source fails.
pub fn generate_code(entropy: &dyn Entropy) -> Result<String> {
    let limit = u32::MAX - (u32::MAX % CODE_SPACE);
    loop {
        let mut bytes = [0u8; 4];
        entropy.fill(&mut bytes)?;
        let candidate = u32::from_be_bytes(bytes);
        if candidate < limit {
            return Ok(format!("{:06}", candidate % CODE_SPACE));
        }
    }
}
