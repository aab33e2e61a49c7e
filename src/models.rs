use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use std::fmt;
use std::str::FromStr;
use validator::{Validate, ValidationError};

use crate::error::AppError;

/// Sentinel for "no option selected" in an answer.
pub const NO_SELECTION: i64 = -1;

/// One immutable version of a logical question.
#[derive(Debug, Clone, Serialize)]
pub struct Question {
    pub id: i64,
    pub version: i64,
    pub title: String,
    pub text: String,
    pub options: Vec<String>,
    pub correct_option: i64,
    pub points: i64,
    pub author_id: i64,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbQuestion {
    pub id: i64,
    pub version: i64,
    pub title: String,
    pub text: String,
    pub options: Json<Vec<String>>,
    pub correct_option: i64,
    pub points: i64,
    pub author_id: i64,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
}

impl From<DbQuestion> for Question {
    fn from(db: DbQuestion) -> Self {
        Self {
            id: db.id,
            version: db.version,
            title: db.title,
            text: db.text,
            options: db.options.0,
            correct_option: db.correct_option,
            points: db.points,
            author_id: db.author_id,
            is_deleted: db.is_deleted,
            created_at: db.created_at,
        }
    }
}

/// What a test taker sees: everything but the correct option.
#[derive(Debug, Clone, Serialize)]
pub struct QuestionView {
    pub id: i64,
    pub version: i64,
    pub title: String,
    pub text: String,
    pub options: Vec<String>,
    pub points: i64,
    pub order_index: i64,
}

impl QuestionView {
    pub fn from_question(question: Question, order_index: i64) -> Self {
        Self {
            id: question.id,
            version: question.version,
            title: question.title,
            text: question.text,
            options: question.options,
            points: question.points,
            order_index,
        }
    }
}

fn validate_options(options: &Vec<String>) -> Result<(), ValidationError> {
    if options.len() != 2 {
        return Err(ValidationError::new("options")
            .with_message("A question must have exactly 2 options".into()));
    }
    if options.iter().any(|o| o.trim().is_empty()) {
        return Err(ValidationError::new("options").with_message("Options cannot be empty".into()));
    }
    Ok(())
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewQuestion {
    #[validate(length(min = 1, message = "Title is required"))]
    pub title: String,
    #[validate(length(min = 1, message = "Question text is required"))]
    pub text: String,
    #[validate(custom(function = "validate_options"))]
    pub options: Vec<String>,
    #[validate(range(min = 0, max = 1, message = "Correct option must be 0 or 1"))]
    pub correct_option: i64,
    #[validate(range(min = 1, message = "Points must be positive"))]
    pub points: i64,
}

/// Partial update. Absent fields keep their current value.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct QuestionPatch {
    #[validate(length(min = 1, message = "Title cannot be empty"))]
    pub title: Option<String>,
    #[validate(length(min = 1, message = "Question text cannot be empty"))]
    pub text: Option<String>,
    #[validate(custom(function = "validate_options"))]
    pub options: Option<Vec<String>>,
    #[validate(range(min = 0, max = 1, message = "Correct option must be 0 or 1"))]
    pub correct_option: Option<i64>,
    #[validate(range(min = 1, message = "Points must be positive"))]
    pub points: Option<i64>,
}

impl QuestionPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.text.is_none()
            && self.options.is_none()
            && self.correct_option.is_none()
            && self.points.is_none()
    }

    pub fn apply_to(&self, current: &Question) -> NewQuestion {
        NewQuestion {
            title: self.title.clone().unwrap_or_else(|| current.title.clone()),
            text: self.text.clone().unwrap_or_else(|| current.text.clone()),
            options: self
                .options
                .clone()
                .unwrap_or_else(|| current.options.clone()),
            correct_option: self.correct_option.unwrap_or(current.correct_option),
            points: self.points.unwrap_or(current.points),
        }
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Test {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub course_id: i64,
    pub teacher_id: i64,
    pub is_active: bool,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub question_count: i64,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewTest {
    #[validate(length(min = 1, message = "Test title is required"))]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[validate(range(min = 1, message = "A course id is required"))]
    pub course_id: i64,
}

/// Partial test edit. `question_ids` replaces the whole question list and is
/// refused while the test is active; title and description edits are not.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct TestPatch {
    #[validate(length(min = 1, message = "Test title cannot be empty"))]
    pub title: Option<String>,
    pub description: Option<String>,
    pub question_ids: Option<Vec<i64>>,
}

impl TestPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.description.is_none() && self.question_ids.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct TestQuestion {
    pub test_id: i64,
    pub question_id: i64,
    pub order_index: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    InProgress,
    Completed,
    Cancelled,
}

impl AttemptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptStatus::InProgress => "in_progress",
            AttemptStatus::Completed => "completed",
            AttemptStatus::Cancelled => "cancelled",
        }
    }
}

impl FromStr for AttemptStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in_progress" => Ok(AttemptStatus::InProgress),
            "completed" => Ok(AttemptStatus::Completed),
            "cancelled" => Ok(AttemptStatus::Cancelled),
            _ => Err(AppError::Internal(format!("Unknown attempt status: {}", s))),
        }
    }
}

impl fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Attempt {
    pub id: i64,
    pub test_id: i64,
    pub user_id: i64,
    pub status: AttemptStatus,
    pub score: Option<i64>,
    pub max_score: Option<i64>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbAttempt {
    pub id: i64,
    pub test_id: i64,
    pub user_id: i64,
    pub status: String,
    pub score: Option<i64>,
    pub max_score: Option<i64>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<DbAttempt> for Attempt {
    type Error = AppError;

    fn try_from(db: DbAttempt) -> Result<Self, Self::Error> {
        Ok(Self {
            id: db.id,
            test_id: db.test_id,
            user_id: db.user_id,
            status: db.status.parse()?,
            score: db.score,
            max_score: db.max_score,
            started_at: db.started_at,
            completed_at: db.completed_at,
        })
    }
}

impl Attempt {
    pub fn is_in_progress(&self) -> bool {
        self.status == AttemptStatus::InProgress
    }
}

/// Outcome of completing an attempt.
#[derive(Debug, Clone, Serialize)]
pub struct CompletedAttempt {
    pub attempt: Attempt,
    pub score: i64,
    pub max_score: i64,
}

/// Result of closing a test: the test and every attempt it force-completed.
#[derive(Debug, Clone, Serialize)]
pub struct Deactivation {
    pub test: Test,
    pub completed_attempts: Vec<CompletedAttempt>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Answer {
    pub id: i64,
    pub attempt_id: i64,
    pub question_id: i64,
    pub question_version: i64,
    pub selected_option: i64,
    pub is_correct: Option<bool>,
    pub answered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct TestResult {
    pub test_id: i64,
    pub user_id: i64,
    pub attempt_id: i64,
    pub score: i64,
    pub max_score: i64,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    TestStarted,
    TestCompleted,
    TestActivated,
    TestDeactivated,
    AttemptForceCompleted,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::TestStarted => "test_started",
            NotificationKind::TestCompleted => "test_completed",
            NotificationKind::TestActivated => "test_activated",
            NotificationKind::TestDeactivated => "test_deactivated",
            NotificationKind::AttemptForceCompleted => "attempt_force_completed",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NewNotification {
    pub user_id: i64,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Notification {
    pub id: i64,
    pub user_id: i64,
    #[sqlx(rename = "type")]
    pub kind: String,
    pub title: String,
    pub message: String,
    pub data: Json<serde_json::Value>,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
    pub read_at: Option<DateTime<Utc>>,
}
