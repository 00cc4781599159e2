//! Auth handlers and supporting modules.
//!
//! Sessions are stateless signed tokens carried in the `visio360_session`
//! cookie or a bearer header. They are minted by redeeming a one-time passcode.
//!
//! ## Rate Limiting
//!
//! - **OTP request:** 5 per 15 minutes per IP and per email.
//! - **OTP verify:** 10 per 15 minutes per IP, 5 per 15 minutes per email.
//! - **Authenticated API:** 120 per minute per subject.
//!
//! Every limited response carries `X-RateLimit-*` headers; blocked ones add
//! `Retry-After`.

pub(crate) mod otp;
pub(crate) mod principal;
pub(crate) mod session;
mod state;
pub(crate) mod types;

pub use state::{AuthConfig, AuthState};

#[cfg(test)]
mod tests;
