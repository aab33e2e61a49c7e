use async_trait::async_trait;
use serde_json::json;
use sqlx::{Pool, Sqlite};

use crate::db::create_notification;
use crate::error::AppError;
use crate::models::{NewNotification, NotificationKind, Test};

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(&self, notification: NewNotification) -> Result<(), AppError>;
}

/// Stores notifications in the `notifications` table.
pub struct SqliteNotificationSink {
    pool: Pool<Sqlite>,
}

impl SqliteNotificationSink {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NotificationSink for SqliteNotificationSink {
    async fn send(&self, notification: NewNotification) -> Result<(), AppError> {
        create_notification(&self.pool, &notification).await?;
        Ok(())
    }
}

/// Fire-and-forget: a failed delivery is logged and never reaches the caller.
pub async fn emit(sink: &dyn NotificationSink, notification: NewNotification) {
    let user_id = notification.user_id;
    let kind = notification.kind.as_str();

    if let Err(e) = sink.send(notification).await {
        e.log_and_record(&format!("deliver {} notification to user {}", kind, user_id));
    }
}

pub fn test_started(user_id: i64, test: &Test, attempt_id: i64) -> NewNotification {
    NewNotification {
        user_id,
        kind: NotificationKind::TestStarted,
        title: "Test started".to_string(),
        message: format!("You started the test \"{}\"", test.title),
        data: json!({
            "test_id": test.id,
            "test_title": test.title,
            "attempt_id": attempt_id,
        }),
    }
}

pub fn test_completed(
    user_id: i64,
    test: &Test,
    attempt_id: i64,
    score: i64,
    max_score: i64,
) -> NewNotification {
    NewNotification {
        user_id,
        kind: NotificationKind::TestCompleted,
        title: "Test completed".to_string(),
        message: format!(
            "You scored {} of {} on \"{}\"",
            score, max_score, test.title
        ),
        data: json!({
            "test_id": test.id,
            "test_title": test.title,
            "attempt_id": attempt_id,
            "score": score,
            "max_score": max_score,
        }),
    }
}

pub fn test_activated(test: &Test) -> NewNotification {
    NewNotification {
        user_id: test.teacher_id,
        kind: NotificationKind::TestActivated,
        title: "Test activated".to_string(),
        message: format!("Test \"{}\" is now open for attempts", test.title),
        data: json!({
            "test_id": test.id,
            "test_title": test.title,
            "course_id": test.course_id,
        }),
    }
}

pub fn test_deactivated(test: &Test, force_completed: usize) -> NewNotification {
    NewNotification {
        user_id: test.teacher_id,
        kind: NotificationKind::TestDeactivated,
        title: "Test deactivated".to_string(),
        message: format!(
            "Test \"{}\" was closed; {} attempt(s) in progress were completed",
            test.title, force_completed
        ),
        data: json!({
            "test_id": test.id,
            "test_title": test.title,
            "course_id": test.course_id,
            "force_completed": force_completed,
        }),
    }
}

pub fn attempt_force_completed(
    user_id: i64,
    test: &Test,
    attempt_id: i64,
    score: i64,
    max_score: i64,
) -> NewNotification {
    NewNotification {
        user_id,
        kind: NotificationKind::AttemptForceCompleted,
        title: "Attempt closed".to_string(),
        message: format!(
            "\"{}\" was closed by the teacher; your attempt was submitted with {} of {}",
            test.title, score, max_score
        ),
        data: json!({
            "test_id": test.id,
            "test_title": test.title,
            "attempt_id": attempt_id,
            "score": score,
            "max_score": max_score,
        }),
    }
}
