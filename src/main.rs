use std::time::Duration;

use chrono::Utc;
use quiz_platform::auth::{NewUser, Role};
use quiz_platform::db::{self, clean_read_notifications};
use quiz_platform::env::{BootstrapAdmin, Settings, load_environment};
use quiz_platform::error::AppError;
use quiz_platform::telemetry::init_tracing;
use sqlx::{Pool, Sqlite};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Anyhow(anyhow::Error),
    #[error("Application error: {0}")]
    App(#[from] AppError),
}

impl From<anyhow::Error> for Error {
    fn from(value: anyhow::Error) -> Self {
        Error::Anyhow(value)
    }
}

/// Makes sure the configured bootstrap account exists and holds `admin`.
async fn ensure_bootstrap_admin(pool: &Pool<Sqlite>, admin: &BootstrapAdmin) -> Result<(), AppError> {
    match db::get_user_by_email(pool, &admin.email).await? {
        Some(user) if user.roles.contains(&Role::Admin) => Ok(()),
        Some(user) => {
            info!(user_id = user.id, "Granting admin role to bootstrap user");
            db::add_user_role(pool, user.id, Role::Admin).await
        }
        None => {
            let user = db::create_user(
                pool,
                &NewUser {
                    full_name: admin.full_name.clone(),
                    email: admin.email.clone(),
                    roles: vec![Role::Admin],
                },
            )
            .await?;
            info!(user_id = user.id, "Created bootstrap admin");
            Ok(())
        }
    }
}

fn spawn_notification_cleanup(pool: Pool<Sqlite>, retention_days: i64) {
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(5)).await;

        loop {
            let cutoff = Utc::now() - chrono::Duration::days(retention_days);
            match clean_read_notifications(&pool, cutoff).await {
                Ok(count) => {
                    if count > 0 {
                        info!("Cleaned up {} read notifications", count);
                    }
                }
                Err(e) => e.log_and_record("clean read notifications"),
            }

            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
    });
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    if let Err(e) = load_environment() {
        return Err(anyhow::anyhow!("Failed to load environment: {}", e).into());
    }

    let settings = Settings::from_env()?;
    let _guard = init_tracing(&settings)?;

    info!(profile = %settings.profile, "Starting quiz platform");

    let pool = db::connect(&settings).await?;
    db::run_migrations(&pool).await?;

    if let Some(admin) = &settings.bootstrap_admin {
        ensure_bootstrap_admin(&pool, admin).await?;
    }

    spawn_notification_cleanup(pool.clone(), settings.notification_retention_days);

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to listen for shutdown signal: {}", e))?;

    info!("Shutting down");
    pool.close().await;

    Ok(())
}
