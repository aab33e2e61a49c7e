//! In-process API. Every call takes the caller's [`AuthContext`], checks
//! permissions and ownership, runs the store operation, then emits any
//! notifications after the change has committed.

mod attempts;
mod composition;
mod notifications;
mod questions;
mod users;

use std::sync::Arc;

use sqlx::{Pool, Sqlite};

use crate::auth::AuthContext;
use crate::db;
use crate::error::AppError;
use crate::notifier::{NotificationSink, SqliteNotificationSink};

#[derive(Clone)]
pub struct Api {
    pool: Pool<Sqlite>,
    notifier: Arc<dyn NotificationSink>,
}

impl Api {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        let notifier = Arc::new(SqliteNotificationSink::new(pool.clone()));
        Self { pool, notifier }
    }

    pub fn with_notifier(pool: Pool<Sqlite>, notifier: Arc<dyn NotificationSink>) -> Self {
        Self { pool, notifier }
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Resolves the caller from the user directory. Blocked users are refused.
    pub async fn auth_context(&self, user_id: i64) -> Result<AuthContext, AppError> {
        db::get_auth_context(&self.pool, user_id).await
    }
}
