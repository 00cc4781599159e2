use anyhow::{Context, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};
use secrecy::{ExposeSecret, SecretString};

pub const ARG_FRONTEND_BASE_URL: &str = "frontend-base-url";
pub const ARG_SESSION_SECRET: &str = "session-secret";
pub const ARG_SESSION_TTL_SECONDS: &str = "session-ttl-seconds";
pub const ARG_OTP_PEPPER: &str = "otp-pepper";
pub const ARG_AUDIT_PEPPER: &str = "audit-pepper";
pub const ARG_OTP_REQUIRE_HASH: &str = "otp-require-hash";
pub const ARG_OTP_TTL_SECONDS: &str = "otp-ttl-seconds";

#[must_use]
pub fn with_args(command: Command) -> Command {
    let command = with_session_args(command);
    with_otp_args(command)
}

fn with_session_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_FRONTEND_BASE_URL)
                .long(ARG_FRONTEND_BASE_URL)
                .help("Frontend base URL; a plain http:// URL drops the Secure cookie flag")
                .env("VISIO360_FRONTEND_BASE_URL")
                .default_value("https://visio360.app"),
        )
        .arg(
            Arg::new(ARG_SESSION_SECRET)
                .long(ARG_SESSION_SECRET)
                .help("Secret used to sign session tokens; sessions are disabled without it")
                .env("VISIO360_SESSION_SECRET")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_SESSION_TTL_SECONDS)
                .long(ARG_SESSION_TTL_SECONDS)
                .help("Session cookie TTL in seconds")
                .env("VISIO360_SESSION_TTL_SECONDS")
                .default_value("604800")
                .value_parser(clap::value_parser!(i64).range(1..)),
        )
}

fn with_otp_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_OTP_PEPPER)
                .long(ARG_OTP_PEPPER)
                .help("Pepper for hashing one-time passcodes at rest")
                .env("VISIO360_OTP_PEPPER")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_AUDIT_PEPPER)
                .long(ARG_AUDIT_PEPPER)
                .help("Pepper for audit subject hashes (defaults to the OTP pepper)")
                .env("VISIO360_AUDIT_PEPPER")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_OTP_REQUIRE_HASH)
                .long(ARG_OTP_REQUIRE_HASH)
                .help("Refuse plaintext one-time passcodes")
                .env("VISIO360_OTP_REQUIRE_HASH")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new(ARG_OTP_TTL_SECONDS)
                .long(ARG_OTP_TTL_SECONDS)
                .help("One-time passcode lifetime in seconds")
                .env("VISIO360_OTP_TTL_SECONDS")
                .default_value("600")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
}

/// Empty values count as unset.
pub(crate) fn secret(matches: &ArgMatches, id: &str) -> Option<SecretString> {
    matches
        .get_one::<String>(id)
        .filter(|value| !value.trim().is_empty())
        .map(|value| SecretString::from(value.clone()))
}

#[derive(Debug)]
pub struct Options {
    pub frontend_base_url: String,
    pub session_secret: Option<SecretString>,
    pub session_ttl_seconds: i64,
    pub otp_pepper: Option<SecretString>,
    pub audit_pepper: Option<SecretString>,
    pub otp_require_hash: bool,
    pub otp_ttl_seconds: u64,
}

impl Options {
    /// # Errors
    /// Returns an error if a defaulted argument is missing.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let otp_pepper = secret(matches, ARG_OTP_PEPPER);
        let audit_pepper = secret(matches, ARG_AUDIT_PEPPER).or_else(|| {
            otp_pepper
                .as_ref()
                .map(|pepper| SecretString::from(pepper.expose_secret().to_string()))
        });

        Ok(Self {
            frontend_base_url: matches
                .get_one::<String>(ARG_FRONTEND_BASE_URL)
                .cloned()
                .context("missing required argument: --frontend-base-url")?,
            session_secret: secret(matches, ARG_SESSION_SECRET),
            session_ttl_seconds: matches
                .get_one::<i64>(ARG_SESSION_TTL_SECONDS)
                .copied()
                .context("missing required argument: --session-ttl-seconds")?,
            otp_pepper,
            audit_pepper,
            otp_require_hash: matches.get_flag(ARG_OTP_REQUIRE_HASH),
            otp_ttl_seconds: matches
                .get_one::<u64>(ARG_OTP_TTL_SECONDS)
                .copied()
                .context("missing required argument: --otp-ttl-seconds")?,
        })
    }
}
