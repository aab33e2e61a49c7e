use tracing::warn;

use super::Api;
use crate::auth::{AuthContext, Permission};
use crate::db;
use crate::error::AppError;
use crate::models::{Answer, Attempt, CompletedAttempt, Test, TestResult};
use crate::notifier::{self, emit};

impl Api {
    /// Owners read their own attempt with `self_permission`; otherwise the
    /// caller needs result-reading rights on the parent test.
    async fn require_attempt_read(
        &self,
        auth: &AuthContext,
        attempt: &Attempt,
        self_permission: Permission,
    ) -> Result<(), AppError> {
        if attempt.user_id == auth.user_id && auth.has_permission(self_permission) {
            return Ok(());
        }

        let test = db::get_test(&self.pool, attempt.test_id).await?;
        auth.require_owner_or_general(
            Permission::TestAnswerRead,
            Permission::TestAnswerReadOwn,
            test.teacher_id,
        )
    }

    /// Finalises every running attempt and tells each student. Notification
    /// failures are swallowed.
    pub(super) async fn finish_open_attempts(
        &self,
        test: &Test,
    ) -> Result<Vec<CompletedAttempt>, AppError> {
        let completed = db::force_complete_all_for_test(&self.pool, test.id).await?;

        for done in &completed {
            emit(
                self.notifier.as_ref(),
                notifier::attempt_force_completed(
                    done.attempt.user_id,
                    test,
                    done.attempt.id,
                    done.score,
                    done.max_score,
                ),
            )
            .await;
        }

        Ok(completed)
    }

    pub async fn start_attempt(&self, auth: &AuthContext, test_id: i64) -> Result<Attempt, AppError> {
        auth.require_permission(Permission::AttemptCreate)?;

        let test = db::get_test(&self.pool, test_id).await?;
        let attempt = db::start_attempt(&self.pool, test_id, auth.user_id).await?;

        emit(
            self.notifier.as_ref(),
            notifier::test_started(auth.user_id, &test, attempt.id),
        )
        .await;

        Ok(attempt)
    }

    pub async fn submit_answer(
        &self,
        auth: &AuthContext,
        attempt_id: i64,
        question_id: i64,
        question_version: i64,
        selected_option: i64,
    ) -> Result<Answer, AppError> {
        let attempt = db::get_attempt(&self.pool, attempt_id).await?;
        auth.require_self(Permission::AnswerUpdateSelf, attempt.user_id)?;

        db::submit_answer(
            &self.pool,
            attempt_id,
            question_id,
            question_version,
            selected_option,
        )
        .await
    }

    pub async fn complete_attempt(
        &self,
        auth: &AuthContext,
        attempt_id: i64,
    ) -> Result<CompletedAttempt, AppError> {
        let attempt = db::get_attempt(&self.pool, attempt_id).await?;
        auth.require_self(Permission::AttemptCompleteSelf, attempt.user_id)?;

        let completed = db::complete_attempt(&self.pool, attempt_id).await?;

        match db::get_test(&self.pool, attempt.test_id).await {
            Ok(test) => {
                emit(
                    self.notifier.as_ref(),
                    notifier::test_completed(
                        attempt.user_id,
                        &test,
                        attempt_id,
                        completed.score,
                        completed.max_score,
                    ),
                )
                .await;
            }
            Err(e) => warn!(attempt_id, error = %e, "Skipping completion notification"),
        }

        Ok(completed)
    }

    pub async fn cancel_attempt(&self, auth: &AuthContext, attempt_id: i64) -> Result<Attempt, AppError> {
        let attempt = db::get_attempt(&self.pool, attempt_id).await?;
        auth.require_self(Permission::AttemptUpdateSelf, attempt.user_id)?;
        db::cancel_attempt(&self.pool, attempt_id).await
    }

    pub async fn get_attempt(&self, auth: &AuthContext, attempt_id: i64) -> Result<Attempt, AppError> {
        let attempt = db::get_attempt(&self.pool, attempt_id).await?;
        self.require_attempt_read(auth, &attempt, Permission::AttemptReadSelf)
            .await?;
        Ok(attempt)
    }

    pub async fn get_attempt_answers(
        &self,
        auth: &AuthContext,
        attempt_id: i64,
    ) -> Result<Vec<Answer>, AppError> {
        let attempt = db::get_attempt(&self.pool, attempt_id).await?;
        self.require_attempt_read(auth, &attempt, Permission::AnswerReadSelf)
            .await?;
        db::get_attempt_answers(&self.pool, attempt_id).await
    }

    /// The caller's own attempts at a test, newest first.
    pub async fn get_my_attempts(
        &self,
        auth: &AuthContext,
        test_id: i64,
    ) -> Result<Vec<Attempt>, AppError> {
        auth.require_permission(Permission::AttemptReadSelf)?;
        db::get_user_attempts(&self.pool, test_id, auth.user_id).await
    }

    pub async fn get_test_results(
        &self,
        auth: &AuthContext,
        test_id: i64,
    ) -> Result<Vec<TestResult>, AppError> {
        let test = db::get_test(&self.pool, test_id).await?;
        auth.require_owner_or_general(
            Permission::TestAnswerRead,
            Permission::TestAnswerReadOwn,
            test.teacher_id,
        )?;
        db::get_test_results(&self.pool, test_id).await
    }

    pub async fn force_complete_all_for_test(
        &self,
        auth: &AuthContext,
        test_id: i64,
    ) -> Result<Vec<CompletedAttempt>, AppError> {
        let test = db::get_test(&self.pool, test_id).await?;
        auth.require_owner_or_general(
            Permission::TestActivateManage,
            Permission::TestActivateManageOwn,
            test.teacher_id,
        )?;
        self.finish_open_attempts(&test).await
    }
}
