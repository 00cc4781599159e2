use anyhow::{Context, Result};
use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;
use tracing::warn;

use super::auth::secret;

pub const ARG_RATE_LIMIT_URL: &str = "rate-limit-url";
pub const ARG_RATE_LIMIT_TOKEN: &str = "rate-limit-token";
pub const ARG_RATE_LIMIT_TIMEOUT_MS: &str = "rate-limit-timeout-ms";
pub const ARG_RATE_LIMIT_COOLDOWN_SECONDS: &str = "rate-limit-cooldown-seconds";
pub const ARG_RATE_LIMIT_SWEEP_SECONDS: &str = "rate-limit-sweep-seconds";

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_RATE_LIMIT_URL)
                .long(ARG_RATE_LIMIT_URL)
                .help("REST endpoint of the shared rate limit store; in-process counters without it")
                .env("VISIO360_RATE_LIMIT_URL"),
        )
        .arg(
            Arg::new(ARG_RATE_LIMIT_TOKEN)
                .long(ARG_RATE_LIMIT_TOKEN)
                .help("Bearer token for the shared rate limit store")
                .env("VISIO360_RATE_LIMIT_TOKEN")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_RATE_LIMIT_TIMEOUT_MS)
                .long(ARG_RATE_LIMIT_TIMEOUT_MS)
                .help("Timeout for each call to the shared rate limit store")
                .env("VISIO360_RATE_LIMIT_TIMEOUT_MS")
                .default_value("500")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_RATE_LIMIT_COOLDOWN_SECONDS)
                .long(ARG_RATE_LIMIT_COOLDOWN_SECONDS)
                .help("Seconds to skip the shared store after it fails (0 retries every call)")
                .env("VISIO360_RATE_LIMIT_COOLDOWN_SECONDS")
                .default_value("5")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_RATE_LIMIT_SWEEP_SECONDS)
                .long(ARG_RATE_LIMIT_SWEEP_SECONDS)
                .help("Interval for evicting expired in-process windows")
                .env("VISIO360_RATE_LIMIT_SWEEP_SECONDS")
                .default_value("60")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
}

#[derive(Debug)]
pub struct Remote {
    pub url: String,
    pub token: SecretString,
}

#[derive(Debug)]
pub struct Options {
    /// Set only when both URL and token are present.
    pub remote: Option<Remote>,
    pub timeout_ms: u64,
    pub cooldown_seconds: u64,
    pub sweep_seconds: u64,
}

impl Options {
    /// # Errors
    /// Returns an error if a defaulted argument is missing.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let url = matches
            .get_one::<String>(ARG_RATE_LIMIT_URL)
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty());
        let token = secret(matches, ARG_RATE_LIMIT_TOKEN);

        let remote = match (url, token) {
            (Some(url), Some(token)) => Some(Remote { url, token }),
            (Some(_), None) => {
                warn!("--{ARG_RATE_LIMIT_URL} is set without --{ARG_RATE_LIMIT_TOKEN}; using in-process rate limiting");
                None
            }
            _ => None,
        };

        Ok(Self {
            remote,
            timeout_ms: matches
                .get_one::<u64>(ARG_RATE_LIMIT_TIMEOUT_MS)
                .copied()
                .context("missing required argument: --rate-limit-timeout-ms")?,
            cooldown_seconds: matches
                .get_one::<u64>(ARG_RATE_LIMIT_COOLDOWN_SECONDS)
                .copied()
                .context("missing required argument: --rate-limit-cooldown-seconds")?,
            sweep_seconds: matches
                .get_one::<u64>(ARG_RATE_LIMIT_SWEEP_SECONDS)
                .copied()
                .context("missing required argument: --rate-limit-sweep-seconds")?,
        })
    }
}
