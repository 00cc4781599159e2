//! Stateless signed sessions.
//!
//! A session is nothing more than a signed [`SessionPayload`]; there is no
//! server-side record to revoke. Rotating the signing secret logs everyone out.

mod cookie;
mod token;

pub use cookie::{clear_session_cookie, extract_session_token, session_cookie, SESSION_COOKIE_NAME};
pub use token::{Role, SessionClaims, SessionCodec, SessionError, SessionPayload};
