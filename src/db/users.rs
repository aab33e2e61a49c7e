use chrono::Utc;
use sqlx::{Pool, Sqlite, SqliteConnection};
use tracing::{info, instrument};
use validator::Validate;

use crate::auth::{AuthContext, DbUser, NewUser, Role, User};
use crate::error::AppError;

async fn fetch_roles(conn: &mut SqliteConnection, user_id: i64) -> Result<Vec<Role>, AppError> {
    let rows: Vec<(String,)> =
        sqlx::query_as("SELECT role FROM user_roles WHERE user_id = ? ORDER BY role")
            .bind(user_id)
            .fetch_all(&mut *conn)
            .await?;

    let mut roles = rows
        .into_iter()
        .map(|(role,)| {
            role.parse::<Role>()
                .map_err(|e| AppError::Internal(e.to_string()))
        })
        .collect::<Result<Vec<_>, _>>()?;
    roles.sort();
    Ok(roles)
}

async fn user_exists(conn: &mut SqliteConnection, user_id: i64) -> Result<bool, AppError> {
    let (exists,): (i64,) = sqlx::query_as("SELECT EXISTS(SELECT 1 FROM users WHERE id = ?)")
        .bind(user_id)
        .fetch_one(&mut *conn)
        .await?;
    Ok(exists != 0)
}

async fn count_admins_in(conn: &mut SqliteConnection) -> Result<i64, AppError> {
    let (count,): (i64,) =
        sqlx::query_as("SELECT COUNT(DISTINCT user_id) FROM user_roles WHERE role = 'admin'")
            .fetch_one(&mut *conn)
            .await?;
    Ok(count)
}

fn dedup_roles(roles: &[Role]) -> Vec<Role> {
    let mut roles = roles.to_vec();
    roles.sort();
    roles.dedup();
    roles
}

#[instrument(skip(pool))]
pub async fn create_user(pool: &Pool<Sqlite>, new_user: &NewUser) -> Result<User, AppError> {
    info!("Creating new user");
    new_user.validate()?;

    let roles = dedup_roles(&new_user.roles);
    let now = Utc::now();
    let mut tx = pool.begin().await?;

    let res = sqlx::query(
        "INSERT INTO users (full_name, email, is_blocked, created_at) VALUES (?, ?, FALSE, ?)",
    )
    .bind(&new_user.full_name)
    .bind(&new_user.email)
    .bind(now)
    .execute(&mut *tx)
    .await
    .map_err(|e| {
        AppError::from_unique_violation(e, format!("Email '{}' is already registered", new_user.email))
    })?;
    let user_id = res.last_insert_rowid();

    for role in &roles {
        sqlx::query("INSERT INTO user_roles (user_id, role) VALUES (?, ?)")
            .bind(user_id)
            .bind(role.as_str())
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;

    Ok(User {
        id: user_id,
        full_name: new_user.full_name.clone(),
        email: new_user.email.clone(),
        is_blocked: false,
        roles,
        created_at: now,
    })
}

#[instrument(skip(pool))]
pub async fn get_user(pool: &Pool<Sqlite>, id: i64) -> Result<User, AppError> {
    info!("Fetching user by ID");
    let mut conn = pool.acquire().await?;

    let row = sqlx::query_as::<_, DbUser>(
        "SELECT id, full_name, email, is_blocked, created_at FROM users WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;

    match row {
        Some(user) => {
            let roles = fetch_roles(&mut conn, id).await?;
            Ok(user.with_roles(roles))
        }
        _ => Err(AppError::NotFound(format!(
            "User with id {} not found in database",
            id
        ))),
    }
}

#[instrument(skip(pool))]
pub async fn get_user_by_email(pool: &Pool<Sqlite>, email: &str) -> Result<Option<User>, AppError> {
    let mut conn = pool.acquire().await?;

    let row = sqlx::query_as::<_, DbUser>(
        "SELECT id, full_name, email, is_blocked, created_at FROM users WHERE email = ?",
    )
    .bind(email)
    .fetch_optional(&mut *conn)
    .await?;

    match row {
        Some(user) => {
            let roles = fetch_roles(&mut conn, user.id).await?;
            Ok(Some(user.with_roles(roles)))
        }
        None => Ok(None),
    }
}

#[instrument(skip(pool))]
pub async fn get_user_roles(pool: &Pool<Sqlite>, user_id: i64) -> Result<Vec<Role>, AppError> {
    let mut conn = pool.acquire().await?;
    if !user_exists(&mut conn, user_id).await? {
        return Err(AppError::NotFound(format!("User {} not found", user_id)));
    }
    fetch_roles(&mut conn, user_id).await
}

#[instrument(skip(pool))]
pub async fn add_user_role(pool: &Pool<Sqlite>, user_id: i64, role: Role) -> Result<(), AppError> {
    info!("Adding role to user");
    let mut conn = pool.acquire().await?;
    if !user_exists(&mut conn, user_id).await? {
        return Err(AppError::NotFound(format!("User {} not found", user_id)));
    }

    sqlx::query("INSERT INTO user_roles (user_id, role) VALUES (?, ?) ON CONFLICT DO NOTHING")
        .bind(user_id)
        .bind(role.as_str())
        .execute(&mut *conn)
        .await?;

    Ok(())
}

/// Replaces the user's role set. Rejected if it would leave the system
/// without an admin; the count is taken after the write, inside the same
/// transaction, so concurrent demotions cannot both succeed.
#[instrument(skip(pool))]
pub async fn update_user_roles(
    pool: &Pool<Sqlite>,
    user_id: i64,
    roles: &[Role],
) -> Result<Vec<Role>, AppError> {
    info!("Updating user roles");
    if roles.is_empty() {
        return Err(AppError::Validation(
            "User must have at least one role".to_string(),
        ));
    }
    let roles = dedup_roles(roles);

    let mut tx = pool.begin().await?;

    // Write first so the transaction holds the write lock before counting.
    sqlx::query("DELETE FROM user_roles WHERE user_id = ?")
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

    if !user_exists(&mut tx, user_id).await? {
        return Err(AppError::NotFound(format!("User {} not found", user_id)));
    }

    for role in &roles {
        sqlx::query("INSERT INTO user_roles (user_id, role) VALUES (?, ?)")
            .bind(user_id)
            .bind(role.as_str())
            .execute(&mut *tx)
            .await?;
    }

    if count_admins_in(&mut tx).await? == 0 {
        tracing::warn!(user_id, "Refusing to remove the last admin");
        return Err(AppError::Conflict(
            "Cannot remove the admin role from the last admin".to_string(),
        ));
    }

    tx.commit().await?;
    info!(roles = ?roles, "User roles updated");

    Ok(roles)
}

#[instrument(skip(pool))]
pub async fn set_user_blocked(
    pool: &Pool<Sqlite>,
    user_id: i64,
    blocked: bool,
) -> Result<(), AppError> {
    info!("Updating user block status");
    let res = sqlx::query("UPDATE users SET is_blocked = ? WHERE id = ?")
        .bind(blocked)
        .bind(user_id)
        .execute(pool)
        .await?;

    if res.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("User {} not found", user_id)));
    }

    Ok(())
}

#[instrument(skip(pool))]
pub async fn get_block_status(pool: &Pool<Sqlite>, user_id: i64) -> Result<bool, AppError> {
    let row: Option<(bool,)> = sqlx::query_as("SELECT is_blocked FROM users WHERE id = ?")
        .bind(user_id)
        .fetch_optional(pool)
        .await?;

    row.map(|(blocked,)| blocked)
        .ok_or_else(|| AppError::NotFound(format!("User {} not found", user_id)))
}

#[instrument(skip(pool))]
pub async fn count_admins(pool: &Pool<Sqlite>) -> Result<i64, AppError> {
    let mut conn = pool.acquire().await?;
    count_admins_in(&mut conn).await
}

/// Loads the caller from the user directory. Blocked users are refused.
#[instrument(skip(pool))]
pub async fn get_auth_context(pool: &Pool<Sqlite>, user_id: i64) -> Result<AuthContext, AppError> {
    let user = get_user(pool, user_id).await?;

    if user.is_blocked {
        tracing::warn!(user_id, "Blocked user attempted access");
        return Err(AppError::Forbidden("User is blocked".to_string()));
    }

    Ok(AuthContext::new(user.id, user.roles))
}
