use serde::{Deserialize, Serialize};

#[cfg(feature = "ts")]
use ts_rs::TS;

use super::{Goal, GoalProgress, UserCourse};

/// Everything the dashboard shows, cached as a single unit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(TS), ts(export))]
pub struct DashboardBundle {
    #[serde(default)]
    pub goals: Vec<Goal>,
    #[serde(default)]
    pub progress: Vec<GoalProgress>,
    #[serde(default)]
    pub courses: Vec<UserCourse>,
    /// Epoch milliseconds of the last successful save.
    #[serde(rename = "lastSyncTimestamp", default)]
    pub last_sync_timestamp: Option<i64>,
}

impl DashboardBundle {
    pub fn new(goals: Vec<Goal>, progress: Vec<GoalProgress>, courses: Vec<UserCourse>) -> Self {
        Self {
            goals,
            progress,
            courses,
            last_sync_timestamp: None,
        }
    }

    pub fn progress_for(&self, goal_id: i64) -> Option<&GoalProgress> {
        self.progress.iter().find(|p| p.goal_id == goal_id)
    }

    /// Longest current streak across all goals.
    pub fn best_streak(&self) -> i32 {
        self.progress.iter().map(|p| p.streak).max().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.goals.is_empty() && self.courses.is_empty()
    }
}
