pub mod api;
pub mod auth;
pub mod db;
pub mod env;
pub mod error;
pub mod models;
pub mod notifier;
pub mod telemetry;
#[cfg(test)]
mod test;

pub use api::Api;
pub use auth::{AuthContext, Permission, Role};
pub use error::AppError;
