//! Core library for evocache.
//!
//! Offline support for the EVO goal and course backend: a versioned,
//! time-bounded cache of courses and the dashboard over a pluggable
//! key-value store, an application-level connectivity tracker gated by a
//! health probe, and the REST client that feeds both.

pub mod api;
pub mod auth;
pub mod cache;
pub mod clock;
pub mod config;
pub mod connectivity;
pub mod models;
pub mod service;
pub mod storage;

pub use api::{ApiClient, ApiError, Backend};
pub use auth::Session;
pub use cache::{CacheConfig, CacheError, OfflineCache};
pub use clock::Clock;
pub use config::Config;
pub use connectivity::{ConnectivityState, ConnectivityTracker, HealthProbe, HttpHealthProbe, Subscription};
pub use service::{LoadResult, OfflineDataService};
pub use storage::{FileStore, KeyValueStore, MemoryStore, StorageChange, StorageError};
