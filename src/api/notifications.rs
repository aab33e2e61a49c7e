use super::Api;
use crate::auth::{AuthContext, Permission};
use crate::db;
use crate::error::AppError;
use crate::models::Notification;

impl Api {
    pub async fn get_notifications(&self, auth: &AuthContext) -> Result<Vec<Notification>, AppError> {
        auth.require_permission(Permission::NotificationRead)?;
        db::get_notifications_for_user(&self.pool, auth.user_id).await
    }

    pub async fn get_unread_count(&self, auth: &AuthContext) -> Result<i64, AppError> {
        auth.require_permission(Permission::NotificationRead)?;
        db::get_unread_count(&self.pool, auth.user_id).await
    }

    pub async fn mark_notification_read(&self, auth: &AuthContext, id: i64) -> Result<(), AppError> {
        auth.require_permission(Permission::NotificationRead)?;
        db::mark_notification_read(&self.pool, id, auth.user_id).await
    }

    pub async fn mark_all_notifications_read(&self, auth: &AuthContext) -> Result<u64, AppError> {
        auth.require_permission(Permission::NotificationRead)?;
        db::mark_all_notifications_read(&self.pool, auth.user_id).await
    }

    pub async fn delete_notification(&self, auth: &AuthContext, id: i64) -> Result<(), AppError> {
        auth.require_any_permission(&[
            Permission::NotificationManage,
            Permission::NotificationManageSelf,
        ])?;
        db::delete_notification(&self.pool, id, auth.user_id).await
    }

    pub async fn delete_all_notifications(&self, auth: &AuthContext) -> Result<u64, AppError> {
        auth.require_any_permission(&[
            Permission::NotificationManage,
            Permission::NotificationManageSelf,
        ])?;
        db::delete_all_notifications(&self.pool, auth.user_id).await
    }
}
