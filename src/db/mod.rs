pub mod attempts;
pub mod composition;
pub mod notifications;
pub mod questions;
pub mod users;

pub use attempts::*;
pub use composition::*;
pub use notifications::*;
pub use questions::*;
pub use users::*;

use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use tracing::{info, instrument};

use crate::env::Settings;
use crate::error::AppError;

#[instrument(skip_all, fields(database_url = %settings.database_url))]
pub async fn connect(settings: &Settings) -> Result<Pool<Sqlite>, AppError> {
    info!("Connecting to database");
    let options = SqliteConnectOptions::from_str(&settings.database_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(settings.busy_timeout)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(settings.max_connections)
        .connect_with(options)
        .await?;

    Ok(pool)
}

#[instrument(skip_all)]
pub async fn run_migrations(pool: &Pool<Sqlite>) -> Result<(), AppError> {
    info!("Running database migrations...");
    sqlx::migrate!("./migrations").run(pool).await?;
    info!("Migrations completed successfully");
    Ok(())
}
