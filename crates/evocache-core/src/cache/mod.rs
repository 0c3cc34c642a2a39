//! Local caching module for offline data access.
//!
//! This module provides the `OfflineCache` for storing and retrieving
//! courses and the dashboard bundle. Every payload is wrapped in a
//! `CachedEnvelope` carrying its write time and schema version.
//!
//! Cached data types:
//! - Single courses (`offline_course_<id>`), valid for 30 days
//! - The dashboard bundle (`offline_dashboard`), valid for 24 hours

pub mod envelope;
pub mod error;
pub mod manager;

pub use envelope::{CachedEnvelope, Validity, CURRENT_DATA_VERSION};
pub use error::CacheError;
pub use manager::{
    CacheAges, CacheConfig, DashboardWrite, OfflineCache, SweepReport, COURSE_KEY_PREFIX,
    DASHBOARD_KEY,
};
