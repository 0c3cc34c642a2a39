use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[cfg(feature = "ts")]
use ts_rs::TS;

/// One lesson of a course.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(TS), ts(export))]
pub struct Lesson {
    pub id: i64,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
    #[serde(default)]
    pub content: String,
    /// Expected reading time in minutes.
    #[serde(default)]
    pub duration: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<i32>,
}

/// A full course record, the unit saved for offline reading.
///
/// Fields the client does not model are kept in `extra` so a cached copy
/// serializes back to exactly what the backend sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(TS), ts(export))]
pub struct Course {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default)]
    pub lessons: Vec<Lesson>,
    #[serde(flatten)]
    #[cfg_attr(feature = "ts", ts(skip))]
    pub extra: Map<String, Value>,
}

impl Course {
    /// Lessons in reading order: explicit `order` first, then by id.
    pub fn ordered_lessons(&self) -> Vec<&Lesson> {
        let mut lessons: Vec<&Lesson> = self.lessons.iter().collect();
        lessons.sort_by_key(|l| (l.order.unwrap_or(i32::MAX), l.id));
        lessons
    }

    /// Total reading time of all lessons in minutes.
    pub fn total_duration(&self) -> i32 {
        self.lessons.iter().map(|l| l.duration).sum()
    }
}

/// An enrolled course, from `GET /courses/my/courses`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(TS), ts(export))]
pub struct UserCourse {
    pub id: i64,
    /// Completion percentage reported by the backend.
    #[serde(default)]
    pub progress: f64,
    #[serde(rename = "completedAt")]
    pub completed_at: Option<String>,
    pub course: Course,
}

impl UserCourse {
    pub fn is_completed(&self) -> bool {
        self.completed_at.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedLesson {
    pub id: i64,
    #[serde(rename = "lessonId")]
    pub lesson_id: i64,
    #[serde(rename = "completedAt")]
    pub completed_at: String,
}

/// Response of `GET /courses/:id/progress`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourseProgress {
    #[serde(rename = "userCourse")]
    pub user_course: UserCourse,
    #[serde(rename = "completedLessons", default)]
    pub completed_lessons: Vec<CompletedLesson>,
}

impl CourseProgress {
    pub fn is_lesson_completed(&self, lesson_id: i64) -> bool {
        self.completed_lessons.iter().any(|c| c.lesson_id == lesson_id)
    }

    /// Index into `user_course.course.lessons` where the learner should
    /// resume: the first unfinished lesson, the last lesson when all are
    /// done, or the first lesson when nothing is done yet.
    pub fn resume_index(&self) -> usize {
        let lessons = &self.user_course.course.lessons;
        if lessons.is_empty() || self.completed_lessons.is_empty() {
            return 0;
        }
        lessons
            .iter()
            .position(|l| !self.is_lesson_completed(l.id))
            .unwrap_or(lessons.len() - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lesson(id: i64, order: Option<i32>) -> Lesson {
        Lesson {
            id,
            title: format!("Lesson {}", id),
            subtitle: None,
            content: String::new(),
            duration: 10,
            order,
        }
    }

    fn progress(completed: &[i64]) -> CourseProgress {
        CourseProgress {
            user_course: UserCourse {
                id: 1,
                progress: 0.0,
                completed_at: None,
                course: Course {
                    id: 9,
                    name: "Habits".to_string(),
                    description: String::new(),
                    image: None,
                    lessons: vec![lesson(1, None), lesson(2, None), lesson(3, None)],
                    extra: Map::new(),
                },
            },
            completed_lessons: completed
                .iter()
                .map(|&lesson_id| CompletedLesson {
                    id: lesson_id * 10,
                    lesson_id,
                    completed_at: "2024-01-01T00:00:00Z".to_string(),
                })
                .collect(),
        }
    }

    #[test]
    fn test_ordered_lessons() {
        let course = Course {
            id: 1,
            name: "C".to_string(),
            description: String::new(),
            image: None,
            lessons: vec![lesson(5, Some(2)), lesson(3, None), lesson(9, Some(1))],
            extra: Map::new(),
        };
        let ids: Vec<i64> = course.ordered_lessons().iter().map(|l| l.id).collect();
        assert_eq!(ids, vec![9, 5, 3]);
        assert_eq!(course.total_duration(), 30);
    }

    #[test]
    fn test_resume_index() {
        assert_eq!(progress(&[]).resume_index(), 0);
        assert_eq!(progress(&[1]).resume_index(), 1);
        assert_eq!(progress(&[1, 3]).resume_index(), 1);
        assert_eq!(progress(&[1, 2, 3]).resume_index(), 2);
    }

    #[test]
    fn test_course_keeps_unknown_fields() {
        let json = r#"{"id":3,"name":"Focus","description":"d","lessons":[],"level":"beginner"}"#;
        let course: Course = serde_json::from_str(json).unwrap();
        assert_eq!(course.extra.get("level"), Some(&Value::from("beginner")));

        let back = serde_json::to_value(&course).unwrap();
        assert_eq!(back["level"], "beginner");
    }
}
