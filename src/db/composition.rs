use std::collections::HashSet;

use chrono::Utc;
use sqlx::{Pool, Sqlite, SqliteConnection};
use tracing::{info, instrument};
use validator::Validate;

use super::questions::fetch_current_question;
use crate::error::AppError;
use crate::models::{DbQuestion, NewTest, Question, Test, TestPatch, TestQuestion};

const TEST_SELECT: &str = "SELECT t.id, t.title, t.description, t.course_id, t.teacher_id, \
     t.is_active, t.is_deleted, t.created_at, \
     (SELECT COUNT(*) FROM test_questions tq WHERE tq.test_id = t.id) AS question_count \
     FROM tests t";

pub(crate) async fn fetch_test(
    conn: &mut SqliteConnection,
    id: i64,
) -> Result<Option<Test>, AppError> {
    let test = sqlx::query_as::<_, Test>(&format!(
        "{} WHERE t.id = ? AND t.is_deleted = FALSE",
        TEST_SELECT
    ))
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(test)
}

/// SQLite has no `SELECT ... FOR UPDATE`. A no-op write on the row takes the
/// database write lock for the rest of the transaction, then the row is read.
pub(crate) async fn lock_test(conn: &mut SqliteConnection, id: i64) -> Result<Test, AppError> {
    let locked = sqlx::query("UPDATE tests SET id = id WHERE id = ? AND is_deleted = FALSE")
        .bind(id)
        .execute(&mut *conn)
        .await?;
    if locked.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("Test {} not found", id)));
    }

    fetch_test(conn, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Test {} not found", id)))
}

fn ensure_inactive(test: &Test) -> Result<(), AppError> {
    if test.is_active {
        return Err(AppError::Conflict(format!(
            "Test {} is active; its questions cannot be changed",
            test.id
        )));
    }
    Ok(())
}

async fn fetch_links(conn: &mut SqliteConnection, test_id: i64) -> Result<Vec<TestQuestion>, AppError> {
    let links = sqlx::query_as::<_, TestQuestion>(
        "SELECT test_id, question_id, order_index FROM test_questions
         WHERE test_id = ? ORDER BY order_index",
    )
    .bind(test_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(links)
}

/// Drops every link of the test and writes `question_ids` back with dense
/// 0-based positions.
async fn rewrite_links(
    conn: &mut SqliteConnection,
    test_id: i64,
    question_ids: &[i64],
) -> Result<Vec<TestQuestion>, AppError> {
    sqlx::query("DELETE FROM test_questions WHERE test_id = ?")
        .bind(test_id)
        .execute(&mut *conn)
        .await?;

    let mut links = Vec::with_capacity(question_ids.len());
    for (position, question_id) in question_ids.iter().enumerate() {
        let order_index = position as i64;
        sqlx::query("INSERT INTO test_questions (test_id, question_id, order_index) VALUES (?, ?, ?)")
            .bind(test_id)
            .bind(question_id)
            .bind(order_index)
            .execute(&mut *conn)
            .await?;
        links.push(TestQuestion {
            test_id,
            question_id: *question_id,
            order_index,
        });
    }

    Ok(links)
}

/// Rejects empty lists and lists with repeated ids.
pub fn validate_question_order(question_ids: &[i64]) -> Result<(), AppError> {
    if question_ids.is_empty() {
        return Err(AppError::Validation(
            "Question order cannot be empty".to_string(),
        ));
    }

    let mut seen = HashSet::with_capacity(question_ids.len());
    for id in question_ids {
        if !seen.insert(id) {
            return Err(AppError::Validation(format!(
                "Question {} appears more than once",
                id
            )));
        }
    }

    Ok(())
}

#[instrument(skip(pool))]
pub async fn create_test(
    pool: &Pool<Sqlite>,
    teacher_id: i64,
    new_test: &NewTest,
) -> Result<Test, AppError> {
    info!("Creating test");
    new_test.validate()?;

    let mut tx = pool.begin().await?;

    let res = sqlx::query(
        "INSERT INTO tests (title, description, course_id, teacher_id, is_active, is_deleted, created_at)
         VALUES (?, ?, ?, ?, FALSE, FALSE, ?)",
    )
    .bind(&new_test.title)
    .bind(&new_test.description)
    .bind(new_test.course_id)
    .bind(teacher_id)
    .bind(Utc::now())
    .execute(&mut *tx)
    .await?;
    let id = res.last_insert_rowid();

    let test = fetch_test(&mut tx, id)
        .await?
        .ok_or_else(|| AppError::Internal(format!("Test {} vanished after insert", id)))?;

    tx.commit().await?;
    info!(test_id = id, "Test created");

    Ok(test)
}

#[instrument(skip(pool))]
pub async fn get_test(pool: &Pool<Sqlite>, id: i64) -> Result<Test, AppError> {
    let mut conn = pool.acquire().await?;
    fetch_test(&mut conn, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Test {} not found", id)))
}

#[instrument(skip(pool))]
pub async fn get_tests_by_course(pool: &Pool<Sqlite>, course_id: i64) -> Result<Vec<Test>, AppError> {
    let tests = sqlx::query_as::<_, Test>(&format!(
        "{} WHERE t.course_id = ? AND t.is_deleted = FALSE ORDER BY t.id",
        TEST_SELECT
    ))
    .bind(course_id)
    .fetch_all(pool)
    .await?;

    Ok(tests)
}

#[instrument(skip(pool))]
pub async fn get_tests_by_teacher(pool: &Pool<Sqlite>, teacher_id: i64) -> Result<Vec<Test>, AppError> {
    let tests = sqlx::query_as::<_, Test>(&format!(
        "{} WHERE t.teacher_id = ? AND t.is_deleted = FALSE ORDER BY t.id",
        TEST_SELECT
    ))
    .bind(teacher_id)
    .fetch_all(pool)
    .await?;

    Ok(tests)
}

#[instrument(skip(pool))]
pub async fn soft_delete_test(pool: &Pool<Sqlite>, id: i64) -> Result<(), AppError> {
    info!("Deleting test");
    let mut tx = pool.begin().await?;
    lock_test(&mut tx, id).await?;

    let (in_progress,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM attempts WHERE test_id = ? AND status = 'in_progress'",
    )
    .bind(id)
    .fetch_one(&mut *tx)
    .await?;
    if in_progress > 0 {
        return Err(AppError::Conflict(
            "Cannot delete a test with attempts in progress".to_string(),
        ));
    }

    sqlx::query("UPDATE tests SET is_deleted = TRUE, is_active = FALSE WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(())
}

#[instrument(skip(pool))]
pub async fn restore_test(pool: &Pool<Sqlite>, id: i64) -> Result<Test, AppError> {
    info!("Restoring test");
    let res = sqlx::query("UPDATE tests SET is_deleted = FALSE WHERE id = ? AND is_deleted = TRUE")
        .bind(id)
        .execute(pool)
        .await?;

    if res.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("Deleted test {} not found", id)));
    }

    get_test(pool, id).await
}

/// Soft-deleted tests, newest first.
#[instrument(skip(pool))]
pub async fn get_deleted_tests(pool: &Pool<Sqlite>) -> Result<Vec<Test>, AppError> {
    let tests = sqlx::query_as::<_, Test>(&format!(
        "{} WHERE t.is_deleted = TRUE ORDER BY t.created_at DESC, t.id DESC",
        TEST_SELECT
    ))
    .fetch_all(pool)
    .await?;

    Ok(tests)
}

#[instrument(skip(pool, patch))]
pub async fn update_test(pool: &Pool<Sqlite>, id: i64, patch: &TestPatch) -> Result<Test, AppError> {
    info!("Updating test");
    patch.validate()?;
    if patch.is_empty() {
        return Err(AppError::Validation("Nothing to update".to_string()));
    }
    if let Some(question_ids) = &patch.question_ids {
        validate_question_order(question_ids)?;
    }

    let mut tx = pool.begin().await?;

    let test = lock_test(&mut tx, id).await?;
    if let Some(question_ids) = &patch.question_ids {
        ensure_inactive(&test)?;
        for question_id in question_ids {
            if fetch_current_question(&mut tx, *question_id).await?.is_none() {
                return Err(AppError::NotFound(format!("Question {} not found", question_id)));
            }
        }
        rewrite_links(&mut tx, id, question_ids).await?;
    }

    sqlx::query("UPDATE tests SET title = ?, description = ? WHERE id = ?")
        .bind(patch.title.as_ref().unwrap_or(&test.title))
        .bind(patch.description.as_ref().unwrap_or(&test.description))
        .bind(id)
        .execute(&mut *tx)
        .await?;

    let updated = fetch_test(&mut tx, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Test {} not found", id)))?;

    tx.commit().await?;
    info!(test_id = id, "Test updated");

    Ok(updated)
}

#[instrument(skip(pool))]
pub async fn add_question_to_test(
    pool: &Pool<Sqlite>,
    test_id: i64,
    question_id: i64,
) -> Result<TestQuestion, AppError> {
    info!("Adding question to test");
    let mut tx = pool.begin().await?;

    let test = lock_test(&mut tx, test_id).await?;
    ensure_inactive(&test)?;

    if fetch_current_question(&mut tx, question_id).await?.is_none() {
        return Err(AppError::NotFound(format!("Question {} not found", question_id)));
    }

    let (already_linked,): (i64,) = sqlx::query_as(
        "SELECT EXISTS(SELECT 1 FROM test_questions WHERE test_id = ? AND question_id = ?)",
    )
    .bind(test_id)
    .bind(question_id)
    .fetch_one(&mut *tx)
    .await?;
    if already_linked != 0 {
        return Err(AppError::Conflict(format!(
            "Question {} is already in test {}",
            question_id, test_id
        )));
    }

    let (order_index,): (i64,) = sqlx::query_as(
        "SELECT COALESCE(MAX(order_index), -1) + 1 FROM test_questions WHERE test_id = ?",
    )
    .bind(test_id)
    .fetch_one(&mut *tx)
    .await?;

    sqlx::query("INSERT INTO test_questions (test_id, question_id, order_index) VALUES (?, ?, ?)")
        .bind(test_id)
        .bind(question_id)
        .bind(order_index)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    Ok(TestQuestion {
        test_id,
        question_id,
        order_index,
    })
}

#[instrument(skip(pool))]
pub async fn remove_question_from_test(
    pool: &Pool<Sqlite>,
    test_id: i64,
    question_id: i64,
) -> Result<(), AppError> {
    info!("Removing question from test");
    let mut tx = pool.begin().await?;

    let test = lock_test(&mut tx, test_id).await?;
    ensure_inactive(&test)?;

    let links = fetch_links(&mut tx, test_id).await?;
    if !links.iter().any(|l| l.question_id == question_id) {
        return Err(AppError::NotFound(format!(
            "Question {} is not in test {}",
            question_id, test_id
        )));
    }

    let remaining: Vec<i64> = links
        .iter()
        .map(|l| l.question_id)
        .filter(|id| *id != question_id)
        .collect();
    rewrite_links(&mut tx, test_id, &remaining).await?;

    tx.commit().await?;
    Ok(())
}

/// All-or-nothing replace of the test's question list.
#[instrument(skip(pool))]
pub async fn set_question_order(
    pool: &Pool<Sqlite>,
    test_id: i64,
    question_ids: &[i64],
) -> Result<Vec<TestQuestion>, AppError> {
    info!("Setting question order");
    validate_question_order(question_ids)?;

    let mut tx = pool.begin().await?;

    let test = lock_test(&mut tx, test_id).await?;
    ensure_inactive(&test)?;

    for question_id in question_ids {
        if fetch_current_question(&mut tx, *question_id).await?.is_none() {
            return Err(AppError::NotFound(format!("Question {} not found", question_id)));
        }
    }

    let links = rewrite_links(&mut tx, test_id, question_ids).await?;

    tx.commit().await?;
    info!(test_id, count = links.len(), "Question order replaced");

    Ok(links)
}

#[instrument(skip(pool))]
pub async fn get_question_order(pool: &Pool<Sqlite>, test_id: i64) -> Result<Vec<i64>, AppError> {
    let mut conn = pool.acquire().await?;
    if fetch_test(&mut conn, test_id).await?.is_none() {
        return Err(AppError::NotFound(format!("Test {} not found", test_id)));
    }

    let links = fetch_links(&mut conn, test_id).await?;
    Ok(links.into_iter().map(|l| l.question_id).collect())
}

/// Current version of each linked question, in test order.
#[instrument(skip(pool))]
pub async fn get_test_questions(
    pool: &Pool<Sqlite>,
    test_id: i64,
) -> Result<Vec<(i64, Question)>, AppError> {
    let mut conn = pool.acquire().await?;
    if fetch_test(&mut conn, test_id).await?.is_none() {
        return Err(AppError::NotFound(format!("Test {} not found", test_id)));
    }

    let rows = sqlx::query_as::<_, DbQuestionWithOrder>(
        "SELECT tq.order_index, q.id, v.version, v.title, v.text, v.options, v.correct_option,
                v.points, q.author_id, q.is_deleted, v.created_at
         FROM test_questions tq
         JOIN questions q ON q.id = tq.question_id
         JOIN question_versions v ON v.question_id = q.id
         WHERE tq.test_id = ?
           AND v.version = (SELECT MAX(version) FROM question_versions WHERE question_id = q.id)
         ORDER BY tq.order_index",
    )
    .bind(test_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| (row.order_index, Question::from(row.question)))
        .collect())
}

#[derive(sqlx::FromRow)]
struct DbQuestionWithOrder {
    order_index: i64,
    #[sqlx(flatten)]
    question: DbQuestion,
}

#[instrument(skip(pool))]
pub async fn activate_test(pool: &Pool<Sqlite>, test_id: i64) -> Result<Test, AppError> {
    info!("Activating test");
    let mut tx = pool.begin().await?;

    let test = lock_test(&mut tx, test_id).await?;
    if test.is_active {
        return Err(AppError::Conflict(format!("Test {} is already active", test_id)));
    }
    if test.question_count == 0 {
        return Err(AppError::Conflict(
            "Cannot activate a test without questions".to_string(),
        ));
    }

    sqlx::query("UPDATE tests SET is_active = TRUE WHERE id = ?")
        .bind(test_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    info!(test_id, "Test activated");

    Ok(Test {
        is_active: true,
        ..test
    })
}

/// Flips the flag only. In-progress attempts are finalised separately by
/// `force_complete_all_for_test`.
#[instrument(skip(pool))]
pub async fn deactivate_test(pool: &Pool<Sqlite>, test_id: i64) -> Result<Test, AppError> {
    info!("Deactivating test");
    let mut tx = pool.begin().await?;

    let test = lock_test(&mut tx, test_id).await?;
    if !test.is_active {
        return Err(AppError::Conflict(format!("Test {} is not active", test_id)));
    }

    sqlx::query("UPDATE tests SET is_active = FALSE WHERE id = ?")
        .bind(test_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    info!(test_id, "Test deactivated");

    Ok(Test {
        is_active: false,
        ..test
    })
}
