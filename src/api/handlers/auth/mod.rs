//! Admin authentication: session tokens and login rate limiting.
//!
//! ## Sessions
//!
//! Sessions are stateless signed tokens (`v4.public`-style, Ed25519): the
//! whole session lives in the client's cookie and there is no server-side
//! session table. The trade-off is explicit: no revocation before expiry,
//! in exchange for zero shared session state. Exposure is bounded by a 24 h
//! token TTL, a 7 d maximum session age, and a 4 h inactivity limit.
//!
//! ## Login Rate Limiting
//!
//! Failed logins are tallied per client IP in `PostgreSQL`:
//!
//! - **Attempt limit:** 5 failures, then a 15-minute block.
//! - **Reset window:** the tally is forgiven after 1 h without attempts.
//! - **Degraded store:** fail-open by default (availability over strict
//!   lockout), configurable to fail-closed.

mod codec;
pub(crate) mod login;
mod rate_limit;
pub(crate) mod session;
mod state;
mod store;
mod sweeper;
mod token;
pub(crate) mod types;
mod utils;

pub use codec::TokenError;
pub use rate_limit::{CheckOutcome, LoginAttemptLimiter};
pub use state::{AuthConfig, AuthState};
pub use store::{AttemptRecord, AttemptStore, MemoryAttemptStore, PgAttemptStore};
pub use sweeper::spawn_attempt_sweeper;
pub use token::{IssuedToken, Session, SessionTokenService};
