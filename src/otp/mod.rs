//! One-time passcode login.

mod hash;
mod mailer;
mod store;
mod verifier;

pub use hash::{generate_code, hash_code, normalize_email, valid_code, valid_email, CODE_LENGTH};
pub use mailer::{LogOtpMailer, OtpMailer, OtpMessage};
pub use store::{HashLookup, MemoryOtpStore, NewOtp, OtpRecord, OtpStore, PgOtpStore, StoreFuture};
pub use verifier::{IssueOutcome, OtpConfig, OtpError, OtpVerifier, UserClaim};

#[cfg(test)]
pub(crate) use verifier::testing;
