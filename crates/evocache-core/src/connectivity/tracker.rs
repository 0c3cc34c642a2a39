use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use chrono::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::OfflineCache;
use crate::clock::Clock;
use crate::storage::{KeyValueStore, StorageChange};

use super::listeners::{ListenerSet, Subscription};
use super::probe::HealthProbe;

/// Storage key of the persisted offline flag (`"true"` / `"false"`).
pub const OFFLINE_MODE_KEY: &str = "app_offline_mode";

/// A cached dashboard older than this is reported stale on reconnect.
const SYNC_INTERVAL_MINUTES: i64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityState {
    Online,
    Offline,
}

impl ConnectivityState {
    fn from_offline(offline: bool) -> Self {
        if offline {
            Self::Offline
        } else {
            Self::Online
        }
    }
}

impl std::fmt::Display for ConnectivityState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Online => write!(f, "online"),
            Self::Offline => write!(f, "offline"),
        }
    }
}

/// Sent on the staleness channel when the app comes online with an old
/// cached dashboard. A dashboard without a recorded sync time counts as
/// stale, with both fields `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaleNotice {
    /// Epoch milliseconds of the cached dashboard's last sync.
    pub last_sync: Option<i64>,
    pub age_ms: Option<i64>,
}

impl StaleNotice {
    pub fn age_minutes(&self) -> Option<i64> {
        self.age_ms.map(|ms| ms / 60_000)
    }
}

/// Snapshot of the connectivity generation, taken when a fetch starts.
///
/// Any transition after the snapshot makes it stale, and the fetch's result
/// should be dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchGuard {
    generation: u64,
}

impl FetchGuard {
    pub fn is_current(&self, tracker: &ConnectivityTracker) -> bool {
        tracker.generation() == self.generation
    }
}

/// Application-level offline flag, gated by an active reachability probe.
///
/// The link going down flips the tracker offline immediately; the link
/// coming back only flips it online once the health probe succeeds.
pub struct ConnectivityTracker {
    store: Arc<dyn KeyValueStore>,
    probe: Arc<dyn HealthProbe>,
    cache: Option<Arc<OfflineCache>>,
    clock: Clock,
    offline: AtomicBool,
    link_up: AtomicBool,
    generation: AtomicU64,
    sync_interval: Duration,
    mode_listeners: ListenerSet<bool>,
    stale_listeners: ListenerSet<StaleNotice>,
}

impl ConnectivityTracker {
    /// Create a tracker. The initial state comes from the persisted flag if
    /// there is one, otherwise from `link_up`.
    pub fn new(store: Arc<dyn KeyValueStore>, probe: Arc<dyn HealthProbe>, link_up: bool) -> Self {
        let offline = match store.get(OFFLINE_MODE_KEY) {
            Ok(Some(flag)) => flag == "true",
            Ok(None) => !link_up,
            Err(e) => {
                warn!(error = %e, "Failed to read persisted offline flag");
                !link_up
            }
        };
        debug!(offline, link_up, "Connectivity tracker initialized");

        Self {
            store,
            probe,
            cache: None,
            clock: Clock::system(),
            offline: AtomicBool::new(offline),
            link_up: AtomicBool::new(link_up),
            generation: AtomicU64::new(0),
            sync_interval: Duration::minutes(SYNC_INTERVAL_MINUTES),
            mode_listeners: ListenerSet::new(),
            stale_listeners: ListenerSet::new(),
        }
    }

    /// Attach the cache whose dashboard is checked for staleness whenever the
    /// tracker enters `Online`. Adopts the cache's clock.
    pub fn with_cache(mut self, cache: Arc<OfflineCache>) -> Self {
        self.clock = cache.clock().clone();
        self.cache = Some(cache);
        self
    }

    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval;
        self
    }

    // ===== State =====

    pub fn state(&self) -> ConnectivityState {
        ConnectivityState::from_offline(self.is_offline())
    }

    pub fn is_offline(&self) -> bool {
        self.offline.load(Ordering::SeqCst)
    }

    /// Online means the link is up AND the application is not in offline mode.
    pub fn is_online(&self) -> bool {
        self.is_link_up() && !self.is_offline()
    }

    pub fn is_link_up(&self) -> bool {
        self.link_up.load(Ordering::SeqCst)
    }

    /// Number of transitions so far.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn begin_fetch(&self) -> FetchGuard {
        FetchGuard {
            generation: self.generation(),
        }
    }

    // ===== Transitions =====

    /// Set offline mode without any network check. No-op if unchanged.
    pub fn set_offline_mode(&self, offline: bool) {
        self.transition(offline, false);
    }

    /// Like `set_offline_mode`, but persists and notifies even when the state
    /// does not change.
    pub fn force_offline_mode(&self, offline: bool) {
        self.transition(offline, true);
    }

    fn transition(&self, offline: bool, force: bool) -> bool {
        let previous = self.offline.swap(offline, Ordering::SeqCst);
        let changed = previous != offline;
        if !changed && !force {
            return false;
        }

        if changed {
            self.generation.fetch_add(1, Ordering::SeqCst);
        }
        info!(
            state = %ConnectivityState::from_offline(offline),
            forced = force,
            "Connectivity mode changed"
        );

        let flag = if offline { "true" } else { "false" };
        if let Err(e) = self.store.set(OFFLINE_MODE_KEY, flag) {
            warn!(error = %e, "Failed to persist offline flag");
        }

        self.mode_listeners.notify(offline);

        if !offline {
            self.check_dashboard_staleness();
        }
        changed
    }

    fn check_dashboard_staleness(&self) {
        let Some(cache) = &self.cache else {
            return;
        };
        let notice = match cache.dashboard_last_sync() {
            Some(last_sync) => {
                let age_ms = self.clock.now_millis().saturating_sub(last_sync);
                if age_ms <= self.sync_interval.num_milliseconds() {
                    return;
                }
                StaleNotice {
                    last_sync: Some(last_sync),
                    age_ms: Some(age_ms),
                }
            }
            None if cache.has_dashboard() => StaleNotice {
                last_sync: None,
                age_ms: None,
            },
            None => return,
        };

        debug!(age_ms = ?notice.age_ms, "Cached dashboard is due for a refresh");
        self.stale_listeners.notify(notice);
    }

    // ===== Link events =====

    /// The network link went down: go offline immediately.
    pub fn handle_link_offline(&self) {
        debug!("Link reports offline");
        self.link_up.store(false, Ordering::SeqCst);
        self.set_offline_mode(true);
    }

    /// The network link came back. Goes online only if the health probe
    /// confirms the server is reachable; returns whether it did.
    pub async fn handle_link_online(&self) -> bool {
        debug!("Link reports online");
        self.link_up.store(true, Ordering::SeqCst);
        self.probe_and_update().await
    }

    /// Run the health probe now and go online if it succeeds. A failed probe
    /// never forces the tracker offline.
    pub async fn probe_and_update(&self) -> bool {
        if self.probe.check().await {
            self.set_offline_mode(false);
            true
        } else {
            info!("Server unreachable, staying in current mode");
            false
        }
    }

    // ===== Cross-instance sync =====

    /// React to a write on the shared store made by another instance.
    /// Returns whether the in-memory state changed.
    pub fn apply_storage_change(&self, change: &StorageChange) -> bool {
        if change.key != OFFLINE_MODE_KEY {
            return false;
        }
        let offline = change.new_value.as_deref() == Some("true");
        let previous = self.offline.swap(offline, Ordering::SeqCst);
        if previous == offline {
            return false;
        }

        self.generation.fetch_add(1, Ordering::SeqCst);
        debug!(offline, "Offline flag changed by another instance");
        self.mode_listeners.notify(offline);
        true
    }

    /// Re-read the persisted flag after missed change events.
    /// Returns whether the in-memory state changed.
    pub fn resync_from_store(&self) -> bool {
        match self.store.get(OFFLINE_MODE_KEY) {
            Ok(Some(flag)) => self.apply_storage_change(&StorageChange {
                key: OFFLINE_MODE_KEY.to_string(),
                new_value: Some(flag),
            }),
            Ok(None) => false,
            Err(e) => {
                warn!(error = %e, "Failed to read persisted offline flag");
                false
            }
        }
    }

    /// Follow the store's change broadcast and apply offline-flag writes.
    /// The task ends when the tracker is dropped or the store goes away.
    pub fn spawn_storage_sync(self: &Arc<Self>) -> JoinHandle<()> {
        let mut changes = self.store.subscribe();
        let tracker: Weak<Self> = Arc::downgrade(self);

        tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(change) => match tracker.upgrade() {
                        Some(tracker) => {
                            tracker.apply_storage_change(&change);
                        }
                        None => break,
                    },
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Storage change listener lagged, re-reading offline flag");
                        match tracker.upgrade() {
                            Some(tracker) => {
                                tracker.resync_from_store();
                            }
                            None => break,
                        }
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    // ===== Subscriptions =====

    /// Called with the new `offline` value on every transition.
    pub fn add_offline_mode_listener<F>(&self, listener: F) -> Subscription
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        self.mode_listeners.add(listener)
    }

    /// Called when the tracker enters `Online` and the cached dashboard is
    /// older than the sync interval.
    pub fn add_stale_data_listener<F>(&self, listener: F) -> Subscription
    where
        F: Fn(StaleNotice) + Send + Sync + 'static,
    {
        self.stale_listeners.add(listener)
    }

    pub fn listener_count(&self) -> usize {
        self.mode_listeners.len() + self.stale_listeners.len()
    }
}

// ============================================================================
// Tests
// ============================================================================
