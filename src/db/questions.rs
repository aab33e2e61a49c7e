use chrono::Utc;
use sqlx::types::Json;
use sqlx::{Pool, Sqlite, SqliteConnection};
use tracing::{info, instrument};
use validator::Validate;

use crate::error::AppError;
use crate::models::{DbQuestion, NewQuestion, Question, QuestionPatch};

const QUESTION_SELECT: &str = "SELECT q.id, v.version, v.title, v.text, v.options, \
     v.correct_option, v.points, q.author_id, q.is_deleted, v.created_at \
     FROM questions q JOIN question_versions v ON v.question_id = q.id";

/// Current version of a live (non-deleted) question.
pub(crate) async fn fetch_current_question(
    conn: &mut SqliteConnection,
    id: i64,
) -> Result<Option<Question>, AppError> {
    let row = sqlx::query_as::<_, DbQuestion>(&format!(
        "{} WHERE q.id = ? AND q.is_deleted = FALSE ORDER BY v.version DESC LIMIT 1",
        QUESTION_SELECT
    ))
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(row.map(Question::from))
}

pub(crate) async fn fetch_question_version(
    conn: &mut SqliteConnection,
    id: i64,
    version: i64,
) -> Result<Option<Question>, AppError> {
    let row = sqlx::query_as::<_, DbQuestion>(&format!(
        "{} WHERE q.id = ? AND v.version = ?",
        QUESTION_SELECT
    ))
    .bind(id)
    .bind(version)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(row.map(Question::from))
}

async fn insert_version(
    conn: &mut SqliteConnection,
    id: i64,
    version: i64,
    content: &NewQuestion,
) -> Result<(), AppError> {
    sqlx::query(
        "INSERT INTO question_versions
         (question_id, version, title, text, options, correct_option, points, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(id)
    .bind(version)
    .bind(&content.title)
    .bind(&content.text)
    .bind(Json(&content.options))
    .bind(content.correct_option)
    .bind(content.points)
    .bind(Utc::now())
    .execute(&mut *conn)
    .await
    .map_err(|e| {
        AppError::from_unique_violation(e, format!("Question {} version {} already exists", id, version))
    })?;

    Ok(())
}

#[instrument(skip(pool))]
pub async fn create_question(
    pool: &Pool<Sqlite>,
    author_id: i64,
    new_question: &NewQuestion,
) -> Result<Question, AppError> {
    info!("Creating question");
    new_question.validate()?;

    let mut tx = pool.begin().await?;

    let (author_exists,): (i64,) =
        sqlx::query_as("SELECT EXISTS(SELECT 1 FROM users WHERE id = ?)")
            .bind(author_id)
            .fetch_one(&mut *tx)
            .await?;
    if author_exists == 0 {
        return Err(AppError::NotFound(format!("Author {} not found", author_id)));
    }

    let res = sqlx::query("INSERT INTO questions (author_id, is_deleted, created_at) VALUES (?, FALSE, ?)")
        .bind(author_id)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;
    let id = res.last_insert_rowid();

    insert_version(&mut tx, id, 1, new_question).await?;

    let question = fetch_question_version(&mut tx, id, 1)
        .await?
        .ok_or_else(|| AppError::Internal(format!("Question {} vanished after insert", id)))?;

    tx.commit().await?;
    info!(question_id = id, "Question created");

    Ok(question)
}

#[instrument(skip(pool))]
pub async fn get_current_question(pool: &Pool<Sqlite>, id: i64) -> Result<Question, AppError> {
    let mut conn = pool.acquire().await?;
    fetch_current_question(&mut conn, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Question {} not found", id)))
}

/// Exact version lookup; ignores the delete flag so old answers stay gradable.
#[instrument(skip(pool))]
pub async fn get_question_version(
    pool: &Pool<Sqlite>,
    id: i64,
    version: i64,
) -> Result<Question, AppError> {
    let mut conn = pool.acquire().await?;
    fetch_question_version(&mut conn, id, version)
        .await?
        .ok_or_else(|| {
            AppError::NotFound(format!("Question {} version {} not found", id, version))
        })
}

/// Every version, newest first, deleted or not.
#[instrument(skip(pool))]
pub async fn get_question_versions(pool: &Pool<Sqlite>, id: i64) -> Result<Vec<Question>, AppError> {
    let rows = sqlx::query_as::<_, DbQuestion>(&format!(
        "{} WHERE q.id = ? ORDER BY v.version DESC",
        QUESTION_SELECT
    ))
    .bind(id)
    .fetch_all(pool)
    .await?;

    if rows.is_empty() {
        return Err(AppError::NotFound(format!("Question {} not found", id)));
    }

    Ok(rows.into_iter().map(Question::from).collect())
}

#[instrument(skip(pool))]
pub async fn get_questions_by_author(
    pool: &Pool<Sqlite>,
    author_id: i64,
) -> Result<Vec<Question>, AppError> {
    let rows = sqlx::query_as::<_, DbQuestion>(&format!(
        "{} WHERE q.author_id = ? AND q.is_deleted = FALSE
         AND v.version = (SELECT MAX(version) FROM question_versions WHERE question_id = q.id)
         ORDER BY q.id",
        QUESTION_SELECT
    ))
    .bind(author_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(Question::from).collect())
}

/// Latest version of every soft-deleted question.
#[instrument(skip(pool))]
pub async fn get_deleted_questions(pool: &Pool<Sqlite>) -> Result<Vec<Question>, AppError> {
    let rows = sqlx::query_as::<_, DbQuestion>(&format!(
        "{} WHERE q.is_deleted = TRUE
         AND v.version = (SELECT MAX(version) FROM question_versions WHERE question_id = q.id)
         ORDER BY q.id",
        QUESTION_SELECT
    ))
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(Question::from).collect())
}

/// Applies `patch` to the current version. While any active, non-deleted test
/// links the question a new version is appended instead, so answers pinned to
/// the old version keep their grade.
#[instrument(skip(pool))]
pub async fn update_question(
    pool: &Pool<Sqlite>,
    id: i64,
    patch: &QuestionPatch,
) -> Result<Question, AppError> {
    info!("Updating question");
    patch.validate()?;
    if patch.is_empty() {
        return Err(AppError::Validation("Nothing to update".to_string()));
    }

    let mut tx = pool.begin().await?;

    let locked = sqlx::query("UPDATE questions SET id = id WHERE id = ? AND is_deleted = FALSE")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    if locked.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("Question {} not found", id)));
    }

    let current = fetch_current_question(&mut tx, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Question {} not found", id)))?;
    let content = patch.apply_to(&current);

    let (in_active_test,): (i64,) = sqlx::query_as(
        "SELECT EXISTS(
             SELECT 1 FROM test_questions tq JOIN tests t ON t.id = tq.test_id
             WHERE tq.question_id = ? AND t.is_active = TRUE AND t.is_deleted = FALSE
         )",
    )
    .bind(id)
    .fetch_one(&mut *tx)
    .await?;

    let version = if in_active_test != 0 {
        let next = current.version + 1;
        insert_version(&mut tx, id, next, &content).await?;
        info!(question_id = id, version = next, "Question used by an active test, created new version");
        next
    } else {
        sqlx::query(
            "UPDATE question_versions
             SET title = ?, text = ?, options = ?, correct_option = ?, points = ?
             WHERE question_id = ? AND version = ?",
        )
        .bind(&content.title)
        .bind(&content.text)
        .bind(Json(&content.options))
        .bind(content.correct_option)
        .bind(content.points)
        .bind(id)
        .bind(current.version)
        .execute(&mut *tx)
        .await?;
        info!(question_id = id, version = current.version, "Question updated in place");
        current.version
    };

    let updated = fetch_question_version(&mut tx, id, version)
        .await?
        .ok_or_else(|| AppError::Internal(format!("Question {} version {} vanished", id, version)))?;

    tx.commit().await?;

    Ok(updated)
}

#[instrument(skip(pool))]
pub async fn soft_delete_question(pool: &Pool<Sqlite>, id: i64) -> Result<(), AppError> {
    info!("Deleting question");
    let mut tx = pool.begin().await?;

    let locked = sqlx::query("UPDATE questions SET id = id WHERE id = ? AND is_deleted = FALSE")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    if locked.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("Question {} not found", id)));
    }

    let (link_count,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM test_questions WHERE question_id = ?")
            .bind(id)
            .fetch_one(&mut *tx)
            .await?;
    if link_count > 0 {
        return Err(AppError::Conflict(
            "Cannot delete question that is used in tests".to_string(),
        ));
    }

    sqlx::query("UPDATE questions SET is_deleted = TRUE WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(())
}

#[instrument(skip(pool))]
pub async fn restore_question(pool: &Pool<Sqlite>, id: i64) -> Result<(), AppError> {
    info!("Restoring question");
    let res = sqlx::query("UPDATE questions SET is_deleted = FALSE WHERE id = ? AND is_deleted = TRUE")
        .bind(id)
        .execute(pool)
        .await?;

    if res.rows_affected() == 0 {
        return Err(AppError::NotFound(format!(
            "Deleted question {} not found",
            id
        )));
    }

    Ok(())
}
