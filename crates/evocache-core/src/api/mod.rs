//! REST client for the EVO backend.
//!
//! All endpoints live under the configured base URL (default
//! `http://localhost:3001/api`) and authorize with a bearer token.

pub mod backend;
pub mod client;
pub mod error;

#[cfg(test)]
pub(crate) mod test_server;

pub use backend::Backend;
pub use client::ApiClient;
pub use error::ApiError;
