use super::Api;
use crate::auth::{AuthContext, Permission};
use crate::db;
use crate::error::AppError;
use crate::models::{NewQuestion, Question, QuestionPatch};

pub(super) fn require_question_access(
    auth: &AuthContext,
    question: &Question,
) -> Result<(), AppError> {
    auth.require_owner_or_general(
        Permission::CourseTestWrite,
        Permission::CourseTestWriteOwn,
        question.author_id,
    )
}

impl Api {
    pub async fn create_question(
        &self,
        auth: &AuthContext,
        question: &NewQuestion,
    ) -> Result<Question, AppError> {
        auth.require_any_permission(&[Permission::CourseTestWrite, Permission::CourseTestWriteOwn])?;
        db::create_question(&self.pool, auth.user_id, question).await
    }

    pub async fn get_question(&self, auth: &AuthContext, id: i64) -> Result<Question, AppError> {
        let question = db::get_current_question(&self.pool, id).await?;
        require_question_access(auth, &question)?;
        Ok(question)
    }

    pub async fn get_question_version(
        &self,
        auth: &AuthContext,
        id: i64,
        version: i64,
    ) -> Result<Question, AppError> {
        let question = db::get_question_version(&self.pool, id, version).await?;
        require_question_access(auth, &question)?;
        Ok(question)
    }

    pub async fn get_question_versions(
        &self,
        auth: &AuthContext,
        id: i64,
    ) -> Result<Vec<Question>, AppError> {
        let versions = db::get_question_versions(&self.pool, id).await?;
        if let Some(latest) = versions.first() {
            require_question_access(auth, latest)?;
        }
        Ok(versions)
    }

    pub async fn get_questions_by_author(
        &self,
        auth: &AuthContext,
        author_id: i64,
    ) -> Result<Vec<Question>, AppError> {
        auth.require_owner_or_general(
            Permission::CourseTestWrite,
            Permission::CourseTestWriteOwn,
            author_id,
        )?;
        db::get_questions_by_author(&self.pool, author_id).await
    }

    /// General holders see every deleted question, owners only their own.
    pub async fn get_deleted_questions(&self, auth: &AuthContext) -> Result<Vec<Question>, AppError> {
        auth.require_any_permission(&[Permission::CourseTestWrite, Permission::CourseTestWriteOwn])?;
        let deleted = db::get_deleted_questions(&self.pool).await?;

        if auth.has_permission(Permission::CourseTestWrite) {
            return Ok(deleted);
        }
        Ok(deleted
            .into_iter()
            .filter(|q| q.author_id == auth.user_id)
            .collect())
    }

    pub async fn update_question(
        &self,
        auth: &AuthContext,
        id: i64,
        patch: &QuestionPatch,
    ) -> Result<Question, AppError> {
        let current = db::get_current_question(&self.pool, id).await?;
        require_question_access(auth, &current)?;
        db::update_question(&self.pool, id, patch).await
    }

    pub async fn delete_question(&self, auth: &AuthContext, id: i64) -> Result<(), AppError> {
        let current = db::get_current_question(&self.pool, id).await?;
        require_question_access(auth, &current)?;
        db::soft_delete_question(&self.pool, id).await
    }

    pub async fn restore_question(&self, auth: &AuthContext, id: i64) -> Result<(), AppError> {
        let versions = db::get_question_versions(&self.pool, id).await?;
        if let Some(latest) = versions.first() {
            require_question_access(auth, latest)?;
        }
        db::restore_question(&self.pool, id).await
    }
}
