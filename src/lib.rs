//! # Visio360 gate (sessions, one-time passcodes, rate limiting)
//!
//! `visio360` is the authentication and abuse-control layer in front of the
//! Visio360 evaluation platform. It owns three things:
//!
//! - **Sessions:** stateless HMAC-signed tokens carried in the
//!   `visio360_session` cookie (or a bearer header). There is no session table;
//!   a token is valid while its signature checks out and it has not expired.
//! - **One-time passcodes:** six-digit codes mailed to the user, stored as a
//!   peppered HMAC digest and consumed with a conditional update so a code can
//!   be redeemed at most once. Legacy plaintext rows are still accepted unless
//!   hash-only mode is enabled.
//! - **Rate limiting:** fixed-window counters keyed by IP or subject, backed by
//!   a shared Redis-compatible REST store when configured and by process memory
//!   otherwise. Remote failures fall back to memory (fail open).
//!
//! Security failures are flattened on the wire: a caller never learns whether a
//! token was tampered with or expired, or whether a code was wrong or used.

pub mod api;
pub mod audit;
pub mod cli;
pub mod clock;
pub mod identity;
pub mod otp;
pub mod rate_limit;
pub mod session;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            // Acceptable in non-git build environments
            return;
        }
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
    }

    #[test]
    fn test_app_user_agent_format() {
        assert!(APP_USER_AGENT.starts_with(env!("CARGO_PKG_NAME")));
        assert!(APP_USER_AGENT.contains(env!("CARGO_PKG_VERSION")));
    }
}
