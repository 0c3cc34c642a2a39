use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Schema tag written into every envelope. Bump it when a cached payload
/// shape changes incompatibly; older entries are then treated as absent.
pub const CURRENT_DATA_VERSION: u32 = 1;

const MILLIS_PER_MINUTE: i64 = 60_000;

/// Wrapper persisted around every cached payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedEnvelope<T> {
    /// Write time, epoch milliseconds.
    pub timestamp: i64,
    pub data: T,
    pub version: u32,
}

/// Outcome of checking an envelope against the current version and a max age.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validity {
    Valid,
    VersionMismatch,
    Expired,
}

impl<T> CachedEnvelope<T> {
    pub fn new(data: T, now_millis: i64) -> Self {
        Self {
            timestamp: now_millis,
            data,
            version: CURRENT_DATA_VERSION,
        }
    }

    pub fn age_millis(&self, now_millis: i64) -> i64 {
        now_millis.saturating_sub(self.timestamp)
    }

    pub fn age_minutes(&self, now_millis: i64) -> i64 {
        self.age_millis(now_millis) / MILLIS_PER_MINUTE
    }

    pub fn validity(&self, now_millis: i64, max_age: Duration) -> Validity {
        if self.version != CURRENT_DATA_VERSION {
            Validity::VersionMismatch
        } else if self.age_millis(now_millis) > max_age.num_milliseconds() {
            Validity::Expired
        } else {
            Validity::Valid
        }
    }

    pub fn age_display(&self, now_millis: i64) -> String {
        let minutes = self.age_minutes(now_millis);
        if minutes < 1 {
            // Also covers clock skew (negative ages)
            "just now".to_string()
        } else if minutes < 60 {
            format!("{}m ago", minutes)
        } else if minutes < 1440 {
            let hours = minutes / 60;
            if minutes % 60 >= 30 {
                format!("{}h ago", hours + 1)
            } else {
                format!("{}h ago", hours)
            }
        } else {
            let days = minutes / 1440;
            if (minutes % 1440) / 60 >= 12 {
                format!("{}d ago", days + 1)
            } else {
                format!("{}d ago", days)
            }
        }
    }
}
