use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use validator::Validate;

use super::{Permission, Role, permissions_for_roles};
use crate::error::AppError;

#[derive(Debug, Serialize, Clone)]
pub struct User {
    pub id: i64,
    pub full_name: String,
    pub email: String,
    pub is_blocked: bool,
    pub roles: Vec<Role>,
    pub created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbUser {
    pub id: i64,
    pub full_name: String,
    pub email: String,
    pub is_blocked: bool,
    pub created_at: DateTime<Utc>,
}

impl DbUser {
    pub fn with_roles(self, roles: Vec<Role>) -> User {
        User {
            id: self.id,
            full_name: self.full_name,
            email: self.email,
            is_blocked: self.is_blocked,
            roles,
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewUser {
    #[validate(length(min = 1, message = "Full name is required"))]
    pub full_name: String,
    #[validate(email(message = "A valid email is required"))]
    pub email: String,
    pub roles: Vec<Role>,
}

/// The authenticated caller. Built from token claims at the boundary or
/// loaded from the user directory, then passed into every operation.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user_id: i64,
    pub roles: Vec<Role>,
    pub permissions: HashSet<Permission>,
}

impl AuthContext {
    pub fn new(user_id: i64, roles: Vec<Role>) -> Self {
        let permissions = permissions_for_roles(&roles);
        Self {
            user_id,
            roles,
            permissions,
        }
    }

    pub fn has_permission(&self, permission: Permission) -> bool {
        self.permissions.contains(&permission)
    }

    pub fn has_any_permission(&self, permissions: &[Permission]) -> bool {
        permissions.iter().any(|p| self.has_permission(*p))
    }

    /// General wins outright; the own variant only when the caller is `owner_id`.
    pub fn is_owner_or_has_general(
        &self,
        general: Permission,
        own: Permission,
        owner_id: i64,
    ) -> bool {
        self.has_permission(general) || (self.has_permission(own) && self.user_id == owner_id)
    }

    pub fn require_permission(&self, permission: Permission) -> Result<(), AppError> {
        if self.has_permission(permission) {
            Ok(())
        } else {
            tracing::warn!(
                user_id = self.user_id,
                permission = %permission,
                "Permission denied"
            );
            Err(AppError::Forbidden(format!(
                "Missing permission {}",
                permission
            )))
        }
    }

    pub fn require_any_permission(&self, permissions: &[Permission]) -> Result<(), AppError> {
        if self.has_any_permission(permissions) {
            Ok(())
        } else {
            tracing::warn!(
                user_id = self.user_id,
                permissions = ?permissions,
                "Permission denied (require any)"
            );
            Err(AppError::Forbidden("Insufficient permissions".to_string()))
        }
    }

    pub fn require_owner_or_general(
        &self,
        general: Permission,
        own: Permission,
        owner_id: i64,
    ) -> Result<(), AppError> {
        if self.is_owner_or_has_general(general, own, owner_id) {
            Ok(())
        } else {
            tracing::warn!(
                user_id = self.user_id,
                owner_id,
                general = %general,
                own = %own,
                "Permission denied (ownership)"
            );
            Err(AppError::Forbidden(format!(
                "Requires {} or ownership with {}",
                general, own
            )))
        }
    }

    /// The caller must be `owner_id` and hold the self-scoped permission.
    pub fn require_self(&self, permission: Permission, owner_id: i64) -> Result<(), AppError> {
        self.require_permission(permission)?;
        if self.user_id == owner_id {
            Ok(())
        } else {
            tracing::warn!(
                user_id = self.user_id,
                owner_id,
                permission = %permission,
                "Permission denied (not owner)"
            );
            Err(AppError::Forbidden(
                "You can only act on your own records".to_string(),
            ))
        }
    }
}
