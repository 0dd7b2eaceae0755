//! Authenticated-session lifecycle.
//!
//! - [`store`]: durable [`SessionBundle`] file (cookies + token)
//! - [`manager`]: login state machine and the serialized remote operations
//!
//! ```text
//! Unauthenticated ──(stored cookies accepted)──► Authenticated
//! Unauthenticated ──(interactive QR login)─────► Authenticated
//! Authenticated ───(redirect / invalid session)─► Unauthenticated
//! ```

pub mod manager;
pub mod store;

pub use manager::{SessionConfig, SessionManager, SessionPhase};
pub use store::{Cookie, SessionBundle, SessionStore};
