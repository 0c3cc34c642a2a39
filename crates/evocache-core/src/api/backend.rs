use async_trait::async_trait;

use crate::models::{Course, Goal, GoalProgress, UserCourse};

use super::ApiError;

/// The read operations the offline data layer needs from the server.
///
/// `ApiClient` is the production implementation; tests substitute fakes.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn fetch_goals(&self) -> Result<Vec<Goal>, ApiError>;

    async fn fetch_goal_progress(&self) -> Result<Vec<GoalProgress>, ApiError>;

    async fn fetch_my_courses(&self) -> Result<Vec<UserCourse>, ApiError>;

    async fn fetch_course(&self, course_id: i64) -> Result<Course, ApiError>;
}
