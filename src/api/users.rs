use super::Api;
use crate::auth::{AuthContext, NewUser, Permission, Role, User};
use crate::db;
use crate::error::AppError;

impl Api {
    pub async fn create_user(&self, auth: &AuthContext, new_user: &NewUser) -> Result<User, AppError> {
        auth.require_permission(Permission::UserListWrite)?;
        db::create_user(&self.pool, new_user).await
    }

    pub async fn get_user(&self, auth: &AuthContext, user_id: i64) -> Result<User, AppError> {
        auth.require_owner_or_general(
            Permission::UserDataRead,
            Permission::UserDataReadSelf,
            user_id,
        )?;
        db::get_user(&self.pool, user_id).await
    }

    pub async fn get_user_roles(&self, auth: &AuthContext, user_id: i64) -> Result<Vec<Role>, AppError> {
        auth.require_owner_or_general(
            Permission::UserDataRead,
            Permission::UserDataReadSelf,
            user_id,
        )?;
        db::get_user_roles(&self.pool, user_id).await
    }

    pub async fn update_user_roles(
        &self,
        auth: &AuthContext,
        user_id: i64,
        roles: &[Role],
    ) -> Result<Vec<Role>, AppError> {
        auth.require_permission(Permission::UserRoleManage)?;
        db::update_user_roles(&self.pool, user_id, roles).await
    }

    pub async fn add_user_role(
        &self,
        auth: &AuthContext,
        user_id: i64,
        role: Role,
    ) -> Result<(), AppError> {
        auth.require_permission(Permission::UserRoleManage)?;
        db::add_user_role(&self.pool, user_id, role).await
    }

    pub async fn block_user(&self, auth: &AuthContext, user_id: i64) -> Result<(), AppError> {
        auth.require_permission(Permission::UserBlockManage)?;
        if user_id == auth.user_id {
            return Err(AppError::Validation("You cannot block yourself".to_string()));
        }
        db::set_user_blocked(&self.pool, user_id, true).await
    }

    pub async fn unblock_user(&self, auth: &AuthContext, user_id: i64) -> Result<(), AppError> {
        auth.require_permission(Permission::UserBlockManage)?;
        db::set_user_blocked(&self.pool, user_id, false).await
    }

    pub async fn get_block_status(&self, auth: &AuthContext, user_id: i64) -> Result<bool, AppError> {
        auth.require_permission(Permission::UserBlockManage)?;
        db::get_block_status(&self.pool, user_id).await
    }
}
