//! Data models for EVO entities.
//!
//! - `Goal`, `Task`, `GoalProgress`: goals with their daily sub-tasks and streaks
//! - `Course`, `Lesson`, `UserCourse`, `CourseProgress`: courses and enrollment
//! - `DashboardBundle`: the aggregate cached for the dashboard
//! - `UserProfile`: the signed-in user

pub mod course;
pub mod dashboard;
pub mod goal;
pub mod user;

pub use course::{CompletedLesson, Course, CourseProgress, Lesson, UserCourse};
pub use dashboard::DashboardBundle;
pub use goal::{tasks_percent, Goal, GoalProgress, Task, TaskKind};
pub use user::{ProfileUpdate, UserProfile};
