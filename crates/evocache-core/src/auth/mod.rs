//! Authentication session management.
//!
//! `Session` holds the access/refresh token pair returned by the backend
//! and persists it to `session.json` in the cache directory. The API client
//! refreshes the access token on 401 and clears the session when the refresh
//! itself fails.

pub mod session;

pub use session::{Session, SessionData};
