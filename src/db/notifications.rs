use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{Pool, Sqlite};
use tracing::{info, instrument};

use crate::error::AppError;
use crate::models::{NewNotification, Notification};

const NOTIFICATION_COLUMNS: &str =
    "id, user_id, type, title, message, data, is_read, created_at, read_at";

#[instrument(skip(pool, notification), fields(user_id = notification.user_id, kind = notification.kind.as_str()))]
pub async fn create_notification(
    pool: &Pool<Sqlite>,
    notification: &NewNotification,
) -> Result<Notification, AppError> {
    info!("Creating notification");
    let created = sqlx::query_as::<_, Notification>(&format!(
        "INSERT INTO notifications (user_id, type, title, message, data, is_read, created_at)
         VALUES (?, ?, ?, ?, ?, FALSE, ?)
         RETURNING {}",
        NOTIFICATION_COLUMNS
    ))
    .bind(notification.user_id)
    .bind(notification.kind.as_str())
    .bind(&notification.title)
    .bind(&notification.message)
    .bind(Json(&notification.data))
    .bind(Utc::now())
    .fetch_one(pool)
    .await?;

    Ok(created)
}

/// Newest first.
#[instrument(skip(pool))]
pub async fn get_notifications_for_user(
    pool: &Pool<Sqlite>,
    user_id: i64,
) -> Result<Vec<Notification>, AppError> {
    let notifications = sqlx::query_as::<_, Notification>(&format!(
        "SELECT {} FROM notifications WHERE user_id = ? ORDER BY created_at DESC, id DESC",
        NOTIFICATION_COLUMNS
    ))
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(notifications)
}

#[instrument(skip(pool))]
pub async fn get_unread_count(pool: &Pool<Sqlite>, user_id: i64) -> Result<i64, AppError> {
    let (count,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM notifications WHERE user_id = ? AND is_read = FALSE",
    )
    .bind(user_id)
    .fetch_one(pool)
    .await?;

    Ok(count)
}

#[instrument(skip(pool))]
pub async fn mark_notification_read(
    pool: &Pool<Sqlite>,
    id: i64,
    user_id: i64,
) -> Result<(), AppError> {
    let res = sqlx::query(
        "UPDATE notifications SET is_read = TRUE, read_at = COALESCE(read_at, ?)
         WHERE id = ? AND user_id = ?",
    )
    .bind(Utc::now())
    .bind(id)
    .bind(user_id)
    .execute(pool)
    .await?;

    if res.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("Notification {} not found", id)));
    }

    Ok(())
}

#[instrument(skip(pool))]
pub async fn mark_all_notifications_read(pool: &Pool<Sqlite>, user_id: i64) -> Result<u64, AppError> {
    let res = sqlx::query(
        "UPDATE notifications SET is_read = TRUE, read_at = ? WHERE user_id = ? AND is_read = FALSE",
    )
    .bind(Utc::now())
    .bind(user_id)
    .execute(pool)
    .await?;

    Ok(res.rows_affected())
}

#[instrument(skip(pool))]
pub async fn delete_notification(pool: &Pool<Sqlite>, id: i64, user_id: i64) -> Result<(), AppError> {
    let res = sqlx::query("DELETE FROM notifications WHERE id = ? AND user_id = ?")
        .bind(id)
        .bind(user_id)
        .execute(pool)
        .await?;

    if res.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("Notification {} not found", id)));
    }

    Ok(())
}

#[instrument(skip(pool))]
pub async fn delete_all_notifications(pool: &Pool<Sqlite>, user_id: i64) -> Result<u64, AppError> {
    let res = sqlx::query("DELETE FROM notifications WHERE user_id = ?")
        .bind(user_id)
        .execute(pool)
        .await?;

    Ok(res.rows_affected())
}

/// Removes read notifications created before `cutoff`.
#[instrument(skip(pool))]
pub async fn clean_read_notifications(
    pool: &Pool<Sqlite>,
    cutoff: DateTime<Utc>,
) -> Result<u64, AppError> {
    let res = sqlx::query("DELETE FROM notifications WHERE is_read = TRUE AND created_at < ?")
        .bind(cutoff)
        .execute(pool)
        .await?;

    Ok(res.rows_affected())
}
