//! Connectivity tracking.
//!
//! `ConnectivityTracker` owns the application-level offline flag. It is
//! deliberately distinct from link state: a link coming up only counts once
//! the `HealthProbe` reaches the server. Transitions are persisted to the
//! shared store, broadcast to listeners, and counted in a generation number
//! that in-flight fetches use to detect that they were overtaken.

pub mod listeners;
pub mod probe;
pub mod tracker;

pub use listeners::Subscription;
pub use probe::{HealthProbe, HttpHealthProbe, PROBE_TIMEOUT};
pub use tracker::{ConnectivityState, ConnectivityTracker, FetchGuard, StaleNotice, OFFLINE_MODE_KEY};
