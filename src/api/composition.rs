use tracing::{error, info};

use super::Api;
use super::questions::require_question_access;
use crate::auth::{AuthContext, Permission};
use crate::db;
use crate::error::AppError;
use crate::models::{Deactivation, NewTest, QuestionView, Test, TestPatch, TestQuestion};
use crate::notifier::{self, emit};

fn can_view_test(auth: &AuthContext, test: &Test) -> bool {
    auth.has_any_permission(&[Permission::CourseTestWrite, Permission::CourseTestListRead])
        || (auth.has_permission(Permission::CourseTestReadOwn) && test.teacher_id == auth.user_id)
        || (auth.has_permission(Permission::CourseTestReadEnrolled) && test.is_active)
}

fn require_test_write(auth: &AuthContext, test: &Test) -> Result<(), AppError> {
    auth.require_owner_or_general(
        Permission::CourseTestWrite,
        Permission::CourseTestWriteOwn,
        test.teacher_id,
    )
}

impl Api {
    pub async fn create_test(&self, auth: &AuthContext, new_test: &NewTest) -> Result<Test, AppError> {
        auth.require_any_permission(&[Permission::CourseTestAdd, Permission::CourseTestAddOwn])?;
        db::create_test(&self.pool, auth.user_id, new_test).await
    }

    pub async fn get_test(&self, auth: &AuthContext, id: i64) -> Result<Test, AppError> {
        let test = db::get_test(&self.pool, id).await?;
        if !can_view_test(auth, &test) {
            tracing::warn!(user_id = auth.user_id, test_id = id, "Permission denied (view test)");
            return Err(AppError::Forbidden(format!("Cannot view test {}", id)));
        }
        Ok(test)
    }

    pub async fn get_tests_by_course(
        &self,
        auth: &AuthContext,
        course_id: i64,
    ) -> Result<Vec<Test>, AppError> {
        let tests = db::get_tests_by_course(&self.pool, course_id).await?;
        Ok(tests.into_iter().filter(|t| can_view_test(auth, t)).collect())
    }

    pub async fn get_tests_by_teacher(
        &self,
        auth: &AuthContext,
        teacher_id: i64,
    ) -> Result<Vec<Test>, AppError> {
        auth.require_owner_or_general(
            Permission::CourseTestListRead,
            Permission::CourseTestListOwn,
            teacher_id,
        )?;
        db::get_tests_by_teacher(&self.pool, teacher_id).await
    }

    pub async fn delete_test(&self, auth: &AuthContext, id: i64) -> Result<(), AppError> {
        let test = db::get_test(&self.pool, id).await?;
        require_test_write(auth, &test)?;
        db::soft_delete_test(&self.pool, id).await
    }

    pub async fn restore_test(&self, auth: &AuthContext, id: i64) -> Result<Test, AppError> {
        auth.require_permission(Permission::CourseTestWrite)?;
        db::restore_test(&self.pool, id).await
    }

    /// General holders see every deleted test, owners only their own.
    pub async fn get_deleted_tests(&self, auth: &AuthContext) -> Result<Vec<Test>, AppError> {
        auth.require_any_permission(&[Permission::CourseTestWrite, Permission::CourseTestWriteOwn])?;
        let deleted = db::get_deleted_tests(&self.pool).await?;

        if auth.has_permission(Permission::CourseTestWrite) {
            return Ok(deleted);
        }
        Ok(deleted
            .into_iter()
            .filter(|t| t.teacher_id == auth.user_id)
            .collect())
    }

    pub async fn update_test(
        &self,
        auth: &AuthContext,
        id: i64,
        patch: &TestPatch,
    ) -> Result<Test, AppError> {
        let test = db::get_test(&self.pool, id).await?;
        require_test_write(auth, &test)?;

        if let Some(question_ids) = &patch.question_ids {
            db::validate_question_order(question_ids)?;
            for question_id in question_ids {
                let question = db::get_current_question(&self.pool, *question_id).await?;
                require_question_access(auth, &question)?;
            }
        }

        db::update_test(&self.pool, id, patch).await
    }

    pub async fn add_question_to_test(
        &self,
        auth: &AuthContext,
        test_id: i64,
        question_id: i64,
    ) -> Result<TestQuestion, AppError> {
        let test = db::get_test(&self.pool, test_id).await?;
        auth.require_owner_or_general(
            Permission::CourseTestAdd,
            Permission::CourseTestAddOwn,
            test.teacher_id,
        )?;

        let question = db::get_current_question(&self.pool, question_id).await?;
        require_question_access(auth, &question)?;

        db::add_question_to_test(&self.pool, test_id, question_id).await
    }

    pub async fn remove_question_from_test(
        &self,
        auth: &AuthContext,
        test_id: i64,
        question_id: i64,
    ) -> Result<(), AppError> {
        let test = db::get_test(&self.pool, test_id).await?;
        require_test_write(auth, &test)?;
        db::remove_question_from_test(&self.pool, test_id, question_id).await
    }

    pub async fn set_question_order(
        &self,
        auth: &AuthContext,
        test_id: i64,
        question_ids: &[i64],
    ) -> Result<Vec<TestQuestion>, AppError> {
        let test = db::get_test(&self.pool, test_id).await?;
        require_test_write(auth, &test)?;
        db::validate_question_order(question_ids)?;

        for question_id in question_ids {
            let question = db::get_current_question(&self.pool, *question_id).await?;
            require_question_access(auth, &question)?;
        }

        db::set_question_order(&self.pool, test_id, question_ids).await
    }

    pub async fn get_question_order(
        &self,
        auth: &AuthContext,
        test_id: i64,
    ) -> Result<Vec<i64>, AppError> {
        let test = db::get_test(&self.pool, test_id).await?;
        auth.require_owner_or_general(
            Permission::CourseTestWrite,
            Permission::CourseTestReadOwn,
            test.teacher_id,
        )?;
        db::get_question_order(&self.pool, test_id).await
    }

    /// The test's questions in order, without correct answers.
    pub async fn get_test_questions(
        &self,
        auth: &AuthContext,
        test_id: i64,
    ) -> Result<Vec<QuestionView>, AppError> {
        self.get_test(auth, test_id).await?;
        let questions = db::get_test_questions(&self.pool, test_id).await?;
        Ok(questions
            .into_iter()
            .map(|(order_index, q)| QuestionView::from_question(q, order_index))
            .collect())
    }

    pub async fn activate_test(&self, auth: &AuthContext, test_id: i64) -> Result<Test, AppError> {
        let test = db::get_test(&self.pool, test_id).await?;
        auth.require_owner_or_general(
            Permission::TestActivateManage,
            Permission::TestActivateManageOwn,
            test.teacher_id,
        )?;

        let test = db::activate_test(&self.pool, test_id).await?;
        emit(self.notifier.as_ref(), notifier::test_activated(&test)).await;

        Ok(test)
    }

    /// Closes the test, then finalises any attempts still running. A failure
    /// while finalising is logged; the deactivation itself stands.
    pub async fn deactivate_test(
        &self,
        auth: &AuthContext,
        test_id: i64,
    ) -> Result<Deactivation, AppError> {
        let test = db::get_test(&self.pool, test_id).await?;
        auth.require_owner_or_general(
            Permission::TestActivateManage,
            Permission::TestActivateManageOwn,
            test.teacher_id,
        )?;

        let test = db::deactivate_test(&self.pool, test_id).await?;

        let completed_attempts = match self.finish_open_attempts(&test).await {
            Ok(completed) => completed,
            Err(e) => {
                error!(test_id, error = %e, "Failed to force-complete attempts after deactivation");
                Vec::new()
            }
        };
        info!(
            test_id,
            force_completed = completed_attempts.len(),
            "Test deactivated"
        );

        emit(
            self.notifier.as_ref(),
            notifier::test_deactivated(&test, completed_attempts.len()),
        )
        .await;

        Ok(Deactivation {
            test,
            completed_attempts,
        })
    }
}
