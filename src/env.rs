use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use tracing::{info, warn};

use crate::error::AppError;

/// Ten years. Keeps the cleanup cutoff well inside chrono's range.
pub const MAX_RETENTION_DAYS: i64 = 3650;

pub fn load_environment() -> Result<(), Box<dyn std::error::Error>> {
    let is_production =
        dotenvy::var("APP_PROFILE").unwrap_or("development".to_string()) == "production";

    let env_files = if is_production {
        vec!["config/common.env", "config/prod.env", ".secrets.env"]
    } else {
        vec!["config/common.env", "config/dev.env", ".secrets.env"]
    };

    for env_file in env_files {
        load_env_file(env_file)?;
    }

    Ok(())
}

fn load_env_file(path: &str) -> Result<(), Box<dyn std::error::Error>> {
    if !Path::new(path).exists() {
        warn!("Warning: Environment file {} not found, skipping", path);
        return Ok(());
    }

    dotenvy::from_filename_override(path)?;
    info!("Loaded environment from: {}", path);
    Ok(())
}

#[derive(Debug, Clone)]
pub struct BootstrapAdmin {
    pub email: String,
    pub full_name: String,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub profile: String,
    pub database_url: String,
    pub max_connections: u32,
    pub busy_timeout: Duration,
    pub otlp_endpoint: Option<String>,
    pub honeycomb_api_key: Option<String>,
    pub notification_retention_days: i64,
    pub bootstrap_admin: Option<BootstrapAdmin>,
}

impl Settings {
    pub fn from_env() -> Result<Self, AppError> {
        let bootstrap_admin = optional("BOOTSTRAP_ADMIN_EMAIL").map(|email| BootstrapAdmin {
            full_name: optional("BOOTSTRAP_ADMIN_NAME")
                .unwrap_or_else(|| "Administrator".to_string()),
            email,
        });

        let settings = Self {
            profile: optional("APP_PROFILE").unwrap_or_else(|| "development".to_string()),
            database_url: optional("DATABASE_URL")
                .unwrap_or_else(|| "sqlite://quiz.db".to_string()),
            max_connections: parse_or("DB_MAX_CONNECTIONS", 10)?,
            busy_timeout: Duration::from_millis(parse_or("DB_BUSY_TIMEOUT_MS", 5000)?),
            otlp_endpoint: optional("OTEL_EXPORTER_OTLP_ENDPOINT"),
            honeycomb_api_key: optional("HONEYCOMB_API_KEY"),
            notification_retention_days: parse_or("NOTIFICATION_RETENTION_DAYS", 30)?,
            bootstrap_admin,
        };

        if settings.max_connections == 0 {
            return Err(AppError::Config(
                "DB_MAX_CONNECTIONS must be at least 1".to_string(),
            ));
        }
        if !(1..=MAX_RETENTION_DAYS).contains(&settings.notification_retention_days) {
            return Err(AppError::Config(format!(
                "NOTIFICATION_RETENTION_DAYS must be between 1 and {}",
                MAX_RETENTION_DAYS
            )));
        }

        Ok(settings)
    }
}

fn optional(key: &str) -> Option<String> {
    dotenvy::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_or<T: FromStr>(key: &str, default: T) -> Result<T, AppError>
where
    T::Err: std::fmt::Display,
{
    match optional(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| AppError::Config(format!("Invalid value for {}: {}", key, e))),
        None => Ok(default),
    }
}
