#[cfg(test)]
mod tests {
    use crate::db::{
        get_current_question, get_question_version, get_question_versions,
        get_questions_by_author, restore_question, soft_delete_question, update_question,
    };
    use crate::error::AppError;
    use crate::models::{NewQuestion, QuestionPatch};
    use crate::test::test_utils::TestDbBuilder;

    fn new_question(title: &str) -> NewQuestion {
        NewQuestion {
            title: title.to_string(),
            text: "Which one?".to_string(),
            options: vec!["Yes".to_string(), "No".to_string()],
            correct_option: 0,
            points: 5,
        }
    }

    #[tokio::test]
    async fn test_create_question_starts_at_version_one() {
        let test_db = TestDbBuilder::new()
            .teacher("teacher")
            .build()
            .await
            .expect("Failed to build test database");
        let auth = test_db.auth("teacher").expect("User not found");

        let question = test_db
            .api()
            .create_question(&auth, &new_question("Capitals"))
            .await
            .expect("Failed to create question");

        assert_eq!(question.version, 1);
        assert_eq!(question.author_id, auth.user_id);
        assert_eq!(question.options, vec!["Yes", "No"]);
        assert!(!question.is_deleted);
    }

    #[tokio::test]
    async fn test_create_question_rejects_invalid_content() {
        let test_db = TestDbBuilder::new()
            .teacher("teacher")
            .build()
            .await
            .expect("Failed to build test database");
        let auth = test_db.auth("teacher").expect("User not found");
        let api = test_db.api();

        let mut one_option = new_question("Too few");
        one_option.options = vec!["Only".to_string()];
        let result = api.create_question(&auth, &one_option).await;
        assert!(matches!(result, Err(AppError::Validation(_))));

        let mut bad_correct = new_question("Bad correct");
        bad_correct.correct_option = 2;
        let result = api.create_question(&auth, &bad_correct).await;
        assert!(matches!(result, Err(AppError::Validation(_))));

        let mut zero_points = new_question("Free");
        zero_points.points = 0;
        let result = api.create_question(&auth, &zero_points).await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn test_student_cannot_create_question() {
        let test_db = TestDbBuilder::new()
            .student("student")
            .build()
            .await
            .expect("Failed to build test database");
        let auth = test_db.auth("student").expect("User not found");

        let result = test_db
            .api()
            .create_question(&auth, &new_question("Nope"))
            .await;
        assert!(matches!(result, Err(AppError::Forbidden(_))));
    }

    #[tokio::test]
    async fn test_update_inactive_question_edits_in_place() {
        let test_db = TestDbBuilder::new()
            .teacher("teacher")
            .question("Q1", "teacher", 0, 3)
            .test("Draft", "teacher", &["Q1"])
            .build()
            .await
            .expect("Failed to build test database");
        let question_id = test_db.question_id("Q1").expect("Question not found");

        let patch = QuestionPatch {
            title: Some("Q1 revised".to_string()),
            points: Some(4),
            ..Default::default()
        };
        let updated = update_question(&test_db.pool, question_id, &patch)
            .await
            .expect("Failed to update question");

        assert_eq!(updated.version, 1);
        assert_eq!(updated.title, "Q1 revised");
        assert_eq!(updated.points, 4);

        let versions = get_question_versions(&test_db.pool, question_id)
            .await
            .expect("Failed to get versions");
        assert_eq!(versions.len(), 1);
    }

    #[tokio::test]
    async fn test_update_question_in_active_test_creates_version() {
        let test_db = TestDbBuilder::new()
            .teacher("teacher")
            .question("Q1", "teacher", 0, 3)
            .active_test("Live", "teacher", &["Q1"])
            .build()
            .await
            .expect("Failed to build test database");
        let question_id = test_db.question_id("Q1").expect("Question not found");

        let patch = QuestionPatch {
            correct_option: Some(1),
            ..Default::default()
        };
        let updated = update_question(&test_db.pool, question_id, &patch)
            .await
            .expect("Failed to update question");
        assert_eq!(updated.version, 2);
        assert_eq!(updated.correct_option, 1);

        // The old version is untouched
        let original = get_question_version(&test_db.pool, question_id, 1)
            .await
            .expect("Failed to get version 1");
        assert_eq!(original.correct_option, 0);

        let current = get_current_question(&test_db.pool, question_id)
            .await
            .expect("Failed to get current question");
        assert_eq!(current.version, 2);

        let versions = get_question_versions(&test_db.pool, question_id)
            .await
            .expect("Failed to get versions");
        let numbers: Vec<i64> = versions.iter().map(|v| v.version).collect();
        assert_eq!(numbers, vec![2, 1]);
    }

    #[tokio::test]
    async fn test_update_question_rejects_empty_patch() {
        let test_db = TestDbBuilder::new()
            .teacher("teacher")
            .question("Q1", "teacher", 0, 3)
            .build()
            .await
            .expect("Failed to build test database");
        let question_id = test_db.question_id("Q1").expect("Question not found");

        let result = update_question(&test_db.pool, question_id, &QuestionPatch::default()).await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn test_update_question_rejects_third_option() {
        let test_db = TestDbBuilder::new()
            .teacher("teacher")
            .question("Q1", "teacher", 1, 3)
            .build()
            .await
            .expect("Failed to build test database");
        let question_id = test_db.question_id("Q1").expect("Question not found");

        let patch = QuestionPatch {
            options: Some(vec!["A".to_string(), "B".to_string(), "C".to_string()]),
            ..Default::default()
        };
        let result = update_question(&test_db.pool, question_id, &patch).await;
        assert!(matches!(result, Err(AppError::Validation(_))));

        let current = get_current_question(&test_db.pool, question_id)
            .await
            .expect("Failed to get current question");
        assert_eq!(current.options, vec!["A", "B"]);
    }

    #[tokio::test]
    async fn test_other_teacher_cannot_update_question() {
        let test_db = TestDbBuilder::new()
            .teacher("author")
            .teacher("other")
            .admin("admin")
            .question("Q1", "author", 0, 3)
            .build()
            .await
            .expect("Failed to build test database");
        let question_id = test_db.question_id("Q1").expect("Question not found");
        let api = test_db.api();

        let patch = QuestionPatch {
            title: Some("Hijacked".to_string()),
            ..Default::default()
        };

        let other = test_db.auth("other").expect("User not found");
        let result = api.update_question(&other, question_id, &patch).await;
        assert!(matches!(result, Err(AppError::Forbidden(_))));

        let admin = test_db.auth("admin").expect("User not found");
        let updated = api
            .update_question(&admin, question_id, &patch)
            .await
            .expect("Admin should update any question");
        assert_eq!(updated.title, "Hijacked");
    }

    #[tokio::test]
    async fn test_delete_question_linked_to_test_conflicts() {
        let test_db = TestDbBuilder::new()
            .teacher("teacher")
            .question("Q1", "teacher", 0, 3)
            .test("Draft", "teacher", &["Q1"])
            .build()
            .await
            .expect("Failed to build test database");
        let question_id = test_db.question_id("Q1").expect("Question not found");

        let result = soft_delete_question(&test_db.pool, question_id).await;
        assert!(matches!(result, Err(AppError::Conflict(_))));

        let current = get_current_question(&test_db.pool, question_id)
            .await
            .expect("Question should still be visible");
        assert!(!current.is_deleted);
    }

    #[tokio::test]
    async fn test_delete_and_restore_question() {
        let test_db = TestDbBuilder::new()
            .teacher("teacher")
            .question("Q1", "teacher", 0, 3)
            .question("Q2", "teacher", 1, 2)
            .build()
            .await
            .expect("Failed to build test database");
        let q1 = test_db.question_id("Q1").expect("Question not found");
        let auth = test_db.auth("teacher").expect("User not found");
        let api = test_db.api();

        soft_delete_question(&test_db.pool, q1)
            .await
            .expect("Failed to delete question");

        let result = get_current_question(&test_db.pool, q1).await;
        assert!(matches!(result, Err(AppError::NotFound(_))));

        // Versions stay readable for answers that pin them
        let pinned = get_question_version(&test_db.pool, q1, 1)
            .await
            .expect("Deleted question version should stay readable");
        assert_eq!(pinned.title, "Q1");

        let by_author = get_questions_by_author(&test_db.pool, auth.user_id)
            .await
            .expect("Failed to list questions");
        assert_eq!(by_author.len(), 1);

        let deleted = api
            .get_deleted_questions(&auth)
            .await
            .expect("Failed to list deleted questions");
        assert_eq!(deleted.len(), 1);
        assert_eq!(deleted[0].id, q1);

        restore_question(&test_db.pool, q1)
            .await
            .expect("Failed to restore question");
        let restored = get_current_question(&test_db.pool, q1)
            .await
            .expect("Restored question should be visible");
        assert!(!restored.is_deleted);

        // Restoring a live question is a miss
        let result = restore_question(&test_db.pool, q1).await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_deleted_questions_filtered_to_own_for_teachers() {
        let test_db = TestDbBuilder::new()
            .teacher("alice")
            .teacher("bob")
            .admin("admin")
            .question("Alice Q", "alice", 0, 1)
            .question("Bob Q", "bob", 0, 1)
            .build()
            .await
            .expect("Failed to build test database");
        let api = test_db.api();

        for title in ["Alice Q", "Bob Q"] {
            let id = test_db.question_id(title).expect("Question not found");
            soft_delete_question(&test_db.pool, id)
                .await
                .expect("Failed to delete question");
        }

        let alice = test_db.auth("alice").expect("User not found");
        let own = api
            .get_deleted_questions(&alice)
            .await
            .expect("Failed to list deleted questions");
        assert_eq!(own.len(), 1);
        assert_eq!(own[0].title, "Alice Q");

        let admin = test_db.auth("admin").expect("User not found");
        let all = api
            .get_deleted_questions(&admin)
            .await
            .expect("Failed to list deleted questions");
        assert_eq!(all.len(), 2);
    }
}
