use std::sync::Arc;

use chrono::Duration;
use serde::{de::DeserializeOwned, de::IgnoredAny, Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::models::{Course, DashboardBundle};
use crate::storage::KeyValueStore;

use super::envelope::{CachedEnvelope, Validity};
use super::CacheError;

/// Key prefix of cached courses; the course id follows.
pub const COURSE_KEY_PREFIX: &str = "offline_course_";

/// Key of the cached dashboard bundle. One per device, not per user.
pub const DASHBOARD_KEY: &str = "offline_dashboard";

/// Courses stay readable offline for 30 days.
const COURSE_MAX_AGE_DAYS: i64 = 30;

/// The dashboard aggregates fast-changing progress, so it expires after a day.
const DASHBOARD_MAX_AGE_HOURS: i64 = 24;

/// Minimum interval between two dashboard writes.
const DASHBOARD_DEBOUNCE_MINUTES: i64 = 5;

/// Upper bound on cached courses before the oldest are evicted.
const DEFAULT_MAX_COURSES: usize = 50;

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub course_max_age: Duration,
    pub dashboard_max_age: Duration,
    /// `Duration::zero()` disables debouncing.
    pub dashboard_debounce: Duration,
    /// `None` means unbounded.
    pub max_courses: Option<usize>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            course_max_age: Duration::days(COURSE_MAX_AGE_DAYS),
            dashboard_max_age: Duration::hours(DASHBOARD_MAX_AGE_HOURS),
            dashboard_debounce: Duration::minutes(DASHBOARD_DEBOUNCE_MINUTES),
            max_courses: Some(DEFAULT_MAX_COURSES),
        }
    }
}

/// Result of `save_dashboard`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DashboardWrite {
    Written,
    /// A bundle younger than the debounce window is already stored.
    Skipped,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub examined: usize,
    pub removed: usize,
}

/// Just enough of a cached dashboard to read its sync time without
/// requiring the rest of the payload to parse.
#[derive(Deserialize)]
struct SyncStamp {
    #[serde(rename = "lastSyncTimestamp", default)]
    last_sync_timestamp: Option<i64>,
}

/// Versioned, expiring cache of courses and the dashboard bundle.
///
/// Reads never fail: anything absent, corrupt, from another schema version
/// or past its max age reads as `None`, and the offending key is removed.
pub struct OfflineCache {
    store: Arc<dyn KeyValueStore>,
    clock: Clock,
    config: CacheConfig,
}

impl OfflineCache {
    pub fn new(store: Arc<dyn KeyValueStore>, clock: Clock, config: CacheConfig) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    fn course_key(course_id: i64) -> String {
        format!("{}{}", COURSE_KEY_PREFIX, course_id)
    }

    fn write<T: Serialize>(&self, key: &str, data: &T) -> Result<(), CacheError> {
        let envelope = CachedEnvelope::new(data, self.clock.now_millis());
        let contents = serde_json::to_string(&envelope).map_err(|source| CacheError::Serialize {
            key: key.to_string(),
            source,
        })?;
        self.store
            .set(key, &contents)
            .map_err(|source| CacheError::StorageWrite {
                key: key.to_string(),
                source,
            })
    }

    fn read_raw(&self, key: &str) -> Option<String> {
        match self.store.get(key) {
            Ok(contents) => contents,
            Err(e) => {
                warn!(key = key, error = %e, "Failed to read cache entry");
                None
            }
        }
    }

    fn prune(&self, key: &str) {
        if let Err(e) = self.store.remove(key) {
            warn!(key = key, error = %e, "Failed to remove invalid cache entry");
        }
    }

    /// Load an envelope, pruning it if it is unparseable or invalid.
    fn load_valid<T: DeserializeOwned>(
        &self,
        key: &str,
        max_age: Duration,
    ) -> Option<CachedEnvelope<T>> {
        let contents = self.read_raw(key)?;

        let envelope: CachedEnvelope<T> = match serde_json::from_str(&contents) {
            Ok(envelope) => envelope,
            Err(e) => {
                debug!(key = key, error = %e, "Discarding unparseable cache entry");
                self.prune(key);
                return None;
            }
        };

        match envelope.validity(self.clock.now_millis(), max_age) {
            Validity::Valid => Some(envelope),
            Validity::VersionMismatch => {
                debug!(key = key, version = envelope.version, "Discarding cache entry from another schema version");
                self.prune(key);
                None
            }
            Validity::Expired => {
                debug!(key = key, "Discarding expired cache entry");
                self.prune(key);
                None
            }
        }
    }

    // ===== Courses =====

    pub fn save_course(&self, course_id: i64, course: &Course) -> Result<(), CacheError> {
        self.write(&Self::course_key(course_id), course)?;
        debug!(course_id, "Saved course for offline use");
        self.enforce_course_capacity(course_id);
        Ok(())
    }

    pub fn get_course(&self, course_id: i64) -> Option<Course> {
        self.load_valid(&Self::course_key(course_id), self.config.course_max_age)
            .map(|envelope| envelope.data)
    }

    /// Whether `get_course` would return a course. Applies the same validity
    /// rules, so an expired entry is pruned here too.
    pub fn is_course_available(&self, course_id: i64) -> bool {
        self.get_course(course_id).is_some()
    }

    /// Evict a cached course. Removing an absent course is a no-op.
    pub fn remove_course(&self, course_id: i64) {
        let key = Self::course_key(course_id);
        match self.store.remove(&key) {
            Ok(()) => debug!(course_id, "Removed offline course"),
            Err(e) => warn!(course_id, error = %e, "Failed to remove offline course"),
        }
    }

    /// Ids of all stored courses, valid or not, in ascending order.
    pub fn offline_course_ids(&self) -> Vec<i64> {
        let keys = match self.store.keys() {
            Ok(keys) => keys,
            Err(e) => {
                warn!(error = %e, "Failed to list cache keys");
                return Vec::new();
            }
        };
        let mut ids: Vec<i64> = keys
            .iter()
            .filter_map(|k| k.strip_prefix(COURSE_KEY_PREFIX))
            .filter_map(|id| id.parse().ok())
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Evict the oldest-written courses once more than `max_courses` are
    /// stored. The course just saved is never a candidate.
    fn enforce_course_capacity(&self, just_saved: i64) {
        let Some(max) = self.config.max_courses else {
            return;
        };
        let ids = self.offline_course_ids();
        if ids.len() <= max {
            return;
        }

        let mut candidates: Vec<(i64, i64)> = ids
            .into_iter()
            .filter(|&id| id != just_saved)
            .map(|id| {
                // Unreadable entries sort first so they go before real data
                let written = self
                    .read_raw(&Self::course_key(id))
                    .and_then(|raw| serde_json::from_str::<CachedEnvelope<IgnoredAny>>(&raw).ok())
                    .map(|e| e.timestamp)
                    .unwrap_or(i64::MIN);
                (written, id)
            })
            .collect();
        candidates.sort_unstable();

        let excess = candidates.len() + 1 - max;
        for &(_, id) in candidates.iter().take(excess) {
            info!(course_id = id, max_courses = max, "Evicting offline course over capacity");
            self.remove_course(id);
        }
    }

    // ===== Dashboard =====

    /// Save the dashboard bundle, stamping its `last_sync_timestamp`.
    ///
    /// Skipped without touching storage when the stored bundle is still
    /// younger than the debounce window.
    pub fn save_dashboard(&self, bundle: &DashboardBundle) -> Result<DashboardWrite, CacheError> {
        let now = self.clock.now_millis();
        let debounce = self.config.dashboard_debounce;

        if debounce > Duration::zero() {
            if let Some(existing) =
                self.load_valid::<IgnoredAny>(DASHBOARD_KEY, self.config.dashboard_max_age)
            {
                if existing.age_millis(now) < debounce.num_milliseconds() {
                    debug!(age_ms = existing.age_millis(now), "Dashboard saved recently, skipping write");
                    return Ok(DashboardWrite::Skipped);
                }
            }
        }

        let mut stamped = bundle.clone();
        stamped.last_sync_timestamp = Some(now);
        self.write(DASHBOARD_KEY, &stamped)?;
        debug!(goals = stamped.goals.len(), courses = stamped.courses.len(), "Saved dashboard for offline use");
        Ok(DashboardWrite::Written)
    }

    pub fn get_dashboard(&self) -> Option<DashboardBundle> {
        self.load_valid(DASHBOARD_KEY, self.config.dashboard_max_age)
            .map(|envelope| envelope.data)
    }

    /// Sync time of the stored dashboard, read without validation or pruning.
    pub fn dashboard_last_sync(&self) -> Option<i64> {
        let raw = self.read_raw(DASHBOARD_KEY)?;
        serde_json::from_str::<CachedEnvelope<SyncStamp>>(&raw)
            .ok()
            .and_then(|e| e.data.last_sync_timestamp)
    }

    /// Whether a dashboard entry is stored at all, valid or not.
    pub fn has_dashboard(&self) -> bool {
        self.read_raw(DASHBOARD_KEY).is_some()
    }

    // ===== Maintenance =====

    /// Prune every expired, version-mismatched or corrupt cache entry.
    pub fn sweep_expired(&self) -> SweepReport {
        let mut report = SweepReport::default();

        for id in self.offline_course_ids() {
            report.examined += 1;
            if self
                .load_valid::<IgnoredAny>(&Self::course_key(id), self.config.course_max_age)
                .is_none()
            {
                report.removed += 1;
            }
        }

        if self.read_raw(DASHBOARD_KEY).is_some() {
            report.examined += 1;
            if self
                .load_valid::<IgnoredAny>(DASHBOARD_KEY, self.config.dashboard_max_age)
                .is_none()
            {
                report.removed += 1;
            }
        }

        if report.removed > 0 {
            info!(examined = report.examined, removed = report.removed, "Swept offline cache");
        }
        report
    }

    /// Ages of everything cached, for status display. Does not prune.
    pub fn cache_ages(&self) -> CacheAges {
        let now = self.clock.now_millis();
        let age_of = |key: &str| {
            self.read_raw(key)
                .and_then(|raw| serde_json::from_str::<CachedEnvelope<IgnoredAny>>(&raw).ok())
                .map(|e| e.age_display(now))
        };

        CacheAges {
            dashboard: age_of(DASHBOARD_KEY),
            courses: self
                .offline_course_ids()
                .into_iter()
                .filter_map(|id| age_of(&Self::course_key(id)).map(|age| (id, age)))
                .collect(),
        }
    }
}

#[derive(Debug, Default)]
pub struct CacheAges {
    pub dashboard: Option<String>,
    pub courses: Vec<(i64, String)>,
}

impl CacheAges {
    pub fn dashboard_age(&self) -> String {
        self.dashboard.clone().unwrap_or_else(|| "never".to_string())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CURRENT_DATA_VERSION;
    use crate::models::{Goal, Lesson};
    use crate::storage::{MemoryStore, StorageError};
    use chrono::{DateTime, Utc};
    use serde_json::Map;

    fn start() -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn setup() -> (Arc<MemoryStore>, Clock, OfflineCache) {
        let store = Arc::new(MemoryStore::new());
        let clock = Clock::manual(start());
        let cache = OfflineCache::new(store.clone(), clock.clone(), CacheConfig::default());
        (store, clock, cache)
    }

    fn course(id: i64) -> Course {
        Course {
            id,
            name: format!("Course {}", id),
            description: "Build better habits".to_string(),
            image: Some("/img/c.png".to_string()),
            lessons: vec![Lesson {
                id: 1,
                title: "Intro".to_string(),
                subtitle: Some("Start here".to_string()),
                content: "Welcome".to_string(),
                duration: 5,
                order: Some(1),
            }],
            extra: Map::new(),
        }
    }

    fn bundle() -> DashboardBundle {
        DashboardBundle::new(
            vec![Goal {
                id: 1,
                goal_name: "Read daily".to_string(),
                reason: String::new(),
                destination: String::new(),
                new_self: String::new(),
                daily_action: "Read".to_string(),
                daily_learning: "Notes".to_string(),
                daily_visualization: "Library".to_string(),
                duration: 30,
            }],
            vec![],
            vec![],
        )
    }

    #[test]
    fn test_course_round_trip() {
        let (_, _, cache) = setup();
        let original = course(12);

        cache.save_course(12, &original).unwrap();

        assert_eq!(cache.get_course(12), Some(original));
        assert!(cache.is_course_available(12));
        assert_eq!(cache.get_course(13), None);
    }

    #[test]
    fn test_course_expiry_boundary() {
        let (store, clock, cache) = setup();
        cache.save_course(1, &course(1)).unwrap();

        clock.advance(Duration::days(29) + Duration::hours(23));
        assert!(cache.get_course(1).is_some());

        clock.set(start() + Duration::days(30) + Duration::hours(1));
        assert!(cache.get_course(1).is_none());
        assert_eq!(store.get("offline_course_1").unwrap(), None);
    }

    #[test]
    fn test_version_mismatch_is_absent() {
        let (store, _, cache) = setup();
        let stale = CachedEnvelope {
            timestamp: start().timestamp_millis(),
            data: course(5),
            version: CURRENT_DATA_VERSION - 1,
        };
        store
            .set("offline_course_5", &serde_json::to_string(&stale).unwrap())
            .unwrap();
        let stale_dashboard = CachedEnvelope {
            timestamp: start().timestamp_millis(),
            data: bundle(),
            version: CURRENT_DATA_VERSION - 1,
        };
        store
            .set(DASHBOARD_KEY, &serde_json::to_string(&stale_dashboard).unwrap())
            .unwrap();

        assert_eq!(cache.get_course(5), None);
        assert_eq!(cache.get_dashboard(), None);
        assert_eq!(store.get("offline_course_5").unwrap(), None);
        assert_eq!(store.get(DASHBOARD_KEY).unwrap(), None);
    }

    #[test]
    fn test_out_of_range_timestamp_is_pruned() {
        let (store, _, cache) = setup();
        let raw = format!(
            r#"{{"timestamp":{},"data":{},"version":{}}}"#,
            i64::MIN,
            serde_json::to_string(&course(1)).unwrap(),
            CURRENT_DATA_VERSION
        );
        store.set("offline_course_1", &raw).unwrap();
        store
            .set(
                DASHBOARD_KEY,
                &format!(r#"{{"timestamp":{},"data":{{}},"version":{}}}"#, i64::MIN, CURRENT_DATA_VERSION),
            )
            .unwrap();

        assert_eq!(cache.get_course(1), None);
        assert_eq!(store.get("offline_course_1").unwrap(), None);
        assert_eq!(cache.get_dashboard(), None);
        assert!(!cache.has_dashboard());
    }

    #[test]
    fn test_corrupt_entry_is_pruned() {
        let (store, _, cache) = setup();
        store.set("offline_course_8", "{not json").unwrap();

        assert_eq!(cache.get_course(8), None);
        assert_eq!(store.get("offline_course_8").unwrap(), None);
    }

    #[test]
    fn test_remove_course_is_idempotent() {
        let (_, _, cache) = setup();
        cache.save_course(3, &course(3)).unwrap();

        cache.remove_course(3);
        assert!(!cache.is_course_available(3));
        cache.remove_course(3);
        assert!(!cache.is_course_available(3));
    }

    #[test]
    fn test_availability_prunes_expired_entry() {
        let (store, clock, cache) = setup();
        cache.save_course(4, &course(4)).unwrap();

        clock.advance(Duration::days(31));
        assert!(!cache.is_course_available(4));
        assert_eq!(store.get("offline_course_4").unwrap(), None);
    }

    #[test]
    fn test_offline_course_ids() {
        let (store, _, cache) = setup();
        cache.save_course(20, &course(20)).unwrap();
        cache.save_course(3, &course(3)).unwrap();
        store.set("offline_course_abc", "x").unwrap();
        store.set("token", "x").unwrap();

        assert_eq!(cache.offline_course_ids(), vec![3, 20]);
    }

    #[test]
    fn test_quota_error_is_reported() {
        let store = Arc::new(MemoryStore::with_quota(32));
        let cache = OfflineCache::new(store, Clock::manual(start()), CacheConfig::default());

        let err = cache.save_course(1, &course(1)).unwrap_err();
        assert!(err.is_quota_exceeded());
        assert!(matches!(
            err,
            CacheError::StorageWrite {
                source: StorageError::QuotaExceeded { .. },
                ..
            }
        ));
    }

    #[test]
    fn test_capacity_evicts_oldest_course() {
        let store = Arc::new(MemoryStore::new());
        let clock = Clock::manual(start());
        let config = CacheConfig {
            max_courses: Some(2),
            ..CacheConfig::default()
        };
        let cache = OfflineCache::new(store, clock.clone(), config);

        cache.save_course(1, &course(1)).unwrap();
        clock.advance(Duration::minutes(1));
        cache.save_course(2, &course(2)).unwrap();
        clock.advance(Duration::minutes(1));
        // Refreshing course 1 makes course 2 the oldest
        cache.save_course(1, &course(1)).unwrap();
        clock.advance(Duration::minutes(1));
        cache.save_course(3, &course(3)).unwrap();

        assert_eq!(cache.offline_course_ids(), vec![1, 3]);
    }

    #[test]
    fn test_dashboard_round_trip_stamps_sync_time() {
        let (_, clock, cache) = setup();
        assert_eq!(cache.save_dashboard(&bundle()).unwrap(), DashboardWrite::Written);

        let loaded = cache.get_dashboard().unwrap();
        assert_eq!(loaded.goals, bundle().goals);
        assert_eq!(loaded.last_sync_timestamp, Some(clock.now_millis()));
        assert_eq!(cache.dashboard_last_sync(), Some(clock.now_millis()));
    }

    #[test]
    fn test_dashboard_debounce() {
        let (_, clock, cache) = setup();
        cache.save_dashboard(&bundle()).unwrap();
        let first_sync = cache.dashboard_last_sync();

        clock.advance(Duration::minutes(4));
        let mut changed = bundle();
        changed.goals.clear();
        assert_eq!(cache.save_dashboard(&changed).unwrap(), DashboardWrite::Skipped);
        assert_eq!(cache.get_dashboard().unwrap().goals.len(), 1);
        assert_eq!(cache.dashboard_last_sync(), first_sync);

        clock.advance(Duration::minutes(2));
        assert_eq!(cache.save_dashboard(&changed).unwrap(), DashboardWrite::Written);
        assert!(cache.get_dashboard().unwrap().goals.is_empty());
    }

    #[test]
    fn test_debounce_disabled() {
        let store = Arc::new(MemoryStore::new());
        let config = CacheConfig {
            dashboard_debounce: Duration::zero(),
            ..CacheConfig::default()
        };
        let cache = OfflineCache::new(store, Clock::manual(start()), config);

        cache.save_dashboard(&bundle()).unwrap();
        assert_eq!(cache.save_dashboard(&bundle()).unwrap(), DashboardWrite::Written);
    }

    #[test]
    fn test_dashboard_expiry() {
        let (_, clock, cache) = setup();
        cache.save_dashboard(&bundle()).unwrap();

        clock.advance(Duration::hours(10));
        assert!(cache.get_dashboard().is_some());

        clock.advance(Duration::hours(15));
        assert!(cache.get_dashboard().is_none());
        assert_eq!(cache.dashboard_last_sync(), None);
    }

    #[test]
    fn test_sweep_expired() {
        let (store, clock, cache) = setup();
        cache.save_course(1, &course(1)).unwrap();
        cache.save_dashboard(&bundle()).unwrap();
        clock.advance(Duration::days(20));
        cache.save_course(2, &course(2)).unwrap();
        store.set("offline_course_3", "garbage").unwrap();
        clock.advance(Duration::days(15));

        let report = cache.sweep_expired();

        assert_eq!(report, SweepReport { examined: 4, removed: 3 });
        assert_eq!(cache.offline_course_ids(), vec![2]);
    }

    #[test]
    fn test_cache_ages() {
        let (_, clock, cache) = setup();
        assert_eq!(cache.cache_ages().dashboard_age(), "never");

        cache.save_dashboard(&bundle()).unwrap();
        cache.save_course(7, &course(7)).unwrap();
        clock.advance(Duration::minutes(5));

        let ages = cache.cache_ages();
        assert_eq!(ages.dashboard_age(), "5m ago");
        assert_eq!(ages.courses, vec![(7, "5m ago".to_string())]);
    }
}
