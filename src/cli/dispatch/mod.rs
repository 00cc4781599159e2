//! Map validated CLI arguments to an action.

use crate::cli::actions::{server::Args, Action};
use crate::cli::commands::{auth, rate_limit};
use anyhow::{Context, Result};

/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>("port").copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>("dsn")
        .cloned()
        .context("missing required argument: --dsn")?;

    let auth_opts = auth::Options::parse(matches)?;
    let rate_limit_opts = rate_limit::Options::parse(matches)?;

    Ok(Action::Server(Args {
        port,
        dsn,
        frontend_base_url: auth_opts.frontend_base_url,
        session_secret: auth_opts.session_secret,
        session_ttl_seconds: auth_opts.session_ttl_seconds,
        otp_pepper: auth_opts.otp_pepper,
        audit_pepper: auth_opts.audit_pepper,
        otp_require_hash: auth_opts.otp_require_hash,
        otp_ttl_seconds: auth_opts.otp_ttl_seconds,
        rate_limit_remote: rate_limit_opts.remote,
        rate_limit_timeout_ms: rate_limit_opts.timeout_ms,
        rate_limit_cooldown_seconds: rate_limit_opts.cooldown_seconds,
        rate_limit_sweep_seconds: rate_limit_opts.sweep_seconds,
    }))
}
