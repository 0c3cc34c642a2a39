//! Offline-aware data loading.
//!
//! `OfflineDataService` decides between the network and the offline cache:
//! online it fetches and refreshes the cache, offline (or when the fetch
//! fails) it serves whatever valid cached copy exists.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::api::{ApiError, Backend};
use crate::cache::{DashboardWrite, OfflineCache};
use crate::connectivity::ConnectivityTracker;
use crate::models::{Course, DashboardBundle};

/// Outcome of an offline-aware load.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadResult<T> {
    /// Fetched from the server just now.
    Fresh(T),
    /// Served from the offline cache.
    Cached(T),
    /// Offline (or the fetch failed) and nothing valid is cached.
    Unavailable,
}

impl<T> LoadResult<T> {
    pub fn into_option(self) -> Option<T> {
        match self {
            LoadResult::Fresh(data) | LoadResult::Cached(data) => Some(data),
            LoadResult::Unavailable => None,
        }
    }

    pub fn as_ref(&self) -> Option<&T> {
        match self {
            LoadResult::Fresh(data) | LoadResult::Cached(data) => Some(data),
            LoadResult::Unavailable => None,
        }
    }

    /// The data came from the cache rather than the server.
    pub fn is_stale(&self) -> bool {
        matches!(self, LoadResult::Cached(_))
    }

    pub fn is_available(&self) -> bool {
        !matches!(self, LoadResult::Unavailable)
    }
}

impl<T> From<Option<T>> for LoadResult<T> {
    fn from(cached: Option<T>) -> Self {
        cached.map_or(LoadResult::Unavailable, LoadResult::Cached)
    }
}

pub struct OfflineDataService {
    backend: Arc<dyn Backend>,
    cache: Arc<OfflineCache>,
    tracker: Arc<ConnectivityTracker>,
}

impl OfflineDataService {
    pub fn new(
        backend: Arc<dyn Backend>,
        cache: Arc<OfflineCache>,
        tracker: Arc<ConnectivityTracker>,
    ) -> Self {
        Self {
            backend,
            cache,
            tracker,
        }
    }

    pub fn cache(&self) -> &Arc<OfflineCache> {
        &self.cache
    }

    pub fn tracker(&self) -> &Arc<ConnectivityTracker> {
        &self.tracker
    }

    /// Load goals, goal progress and enrolled courses as one bundle.
    pub async fn load_dashboard(&self) -> LoadResult<DashboardBundle> {
        if self.tracker.is_offline() {
            debug!("Offline, serving cached dashboard");
            return self.cache.get_dashboard().into();
        }

        let guard = self.tracker.begin_fetch();
        let fetched = futures::try_join!(
            self.backend.fetch_goals(),
            self.backend.fetch_goal_progress(),
            self.backend.fetch_my_courses(),
        );

        let (goals, progress, courses) = match fetched {
            Ok(parts) => parts,
            Err(e) => {
                Self::log_fetch_error("dashboard", &e);
                return self.cache.get_dashboard().into();
            }
        };

        if !guard.is_current(&self.tracker) {
            info!("Connectivity changed during dashboard fetch, discarding result");
            return self.cache.get_dashboard().into();
        }

        let mut bundle = DashboardBundle::new(goals, progress, courses);
        match self.cache.save_dashboard(&bundle) {
            Ok(DashboardWrite::Written) => {}
            Ok(DashboardWrite::Skipped) => debug!("Dashboard cache write debounced"),
            Err(e) => warn!(error = %e, "Failed to cache dashboard"),
        }
        bundle.last_sync_timestamp = Some(self.cache.clock().now_millis());
        LoadResult::Fresh(bundle)
    }

    /// Load a course, keeping a copy for offline reading.
    pub async fn load_course(&self, course_id: i64) -> LoadResult<Course> {
        if self.tracker.is_offline() {
            debug!(course_id, "Offline, serving cached course");
            return self.cache.get_course(course_id).into();
        }

        let guard = self.tracker.begin_fetch();
        let course = match self.backend.fetch_course(course_id).await {
            Ok(course) => course,
            Err(e) => {
                Self::log_fetch_error("course", &e);
                return self.cache.get_course(course_id).into();
            }
        };

        if !guard.is_current(&self.tracker) {
            info!(course_id, "Connectivity changed during course fetch, discarding result");
            return self.cache.get_course(course_id).into();
        }

        if let Err(e) = self.cache.save_course(course_id, &course) {
            warn!(course_id, error = %e, "Failed to cache course");
        }
        LoadResult::Fresh(course)
    }

    fn log_fetch_error(what: &str, e: &ApiError) {
        if e.requires_login() {
            warn!(what, error = %e, "Not signed in, falling back to cache");
        } else if e.is_network() {
            info!(what, error = %e, "Server unreachable, falling back to cache");
        } else {
            warn!(what, error = %e, "Fetch failed, falling back to cache");
        }
    }
}
