use serde::{Deserialize, Serialize};

#[cfg(feature = "ts")]
use ts_rs::TS;

/// A self-improvement goal as returned by `GET /goals`.
///
/// The backend sends these fields in snake_case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(TS), ts(export))]
pub struct Goal {
    pub id: i64,
    pub goal_name: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub destination: String,
    #[serde(default)]
    pub new_self: String,
    #[serde(default)]
    pub daily_action: String,
    #[serde(default)]
    pub daily_learning: String,
    #[serde(default)]
    pub daily_visualization: String,
    /// Planned length of the goal in days.
    pub duration: i32,
}

/// Kind of daily sub-task derived from a goal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Action,
    Learning,
    Visualization,
}

/// One checkbox on the daily task list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub kind: TaskKind,
    pub name: String,
    pub completed: bool,
}

impl Goal {
    /// The three daily sub-tasks every goal carries, all unchecked.
    pub fn daily_tasks(&self) -> Vec<Task> {
        [
            (1, TaskKind::Action, &self.daily_action),
            (2, TaskKind::Learning, &self.daily_learning),
            (3, TaskKind::Visualization, &self.daily_visualization),
        ]
        .into_iter()
        .map(|(id, kind, name)| Task {
            id,
            kind,
            name: name.clone(),
            completed: false,
        })
        .collect()
    }
}

/// Share of tasks checked off, 0-100.
pub fn tasks_percent(tasks: &[Task]) -> f32 {
    if tasks.is_empty() {
        return 0.0;
    }
    let done = tasks.iter().filter(|t| t.completed).count();
    done as f32 / tasks.len() as f32 * 100.0
}

/// Completion record for one goal, from `GET /goals/progress`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(TS), ts(export))]
pub struct GoalProgress {
    pub id: i64,
    #[serde(rename = "userId")]
    pub user_id: i64,
    #[serde(rename = "goalId")]
    pub goal_id: i64,
    #[serde(rename = "completedDays", default)]
    pub completed_days: i32,
    #[serde(rename = "lastCompletionDate")]
    pub last_completion_date: Option<String>,
    #[serde(default)]
    pub streak: i32,
}

impl GoalProgress {
    /// Percentage of the goal's duration already completed, capped at 100.
    pub fn percent_complete(&self, duration: i32) -> f32 {
        if duration <= 0 {
            return 0.0;
        }
        (self.completed_days as f32 / duration as f32 * 100.0).min(100.0)
    }
}
