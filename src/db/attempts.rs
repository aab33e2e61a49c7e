use chrono::Utc;
use sqlx::{Pool, Sqlite, SqliteConnection};
use tracing::{info, instrument, warn};

use super::composition::lock_test;
use crate::error::AppError;
use crate::models::{
    Answer, Attempt, AttemptStatus, CompletedAttempt, DbAttempt, NO_SELECTION, TestResult,
};

const ATTEMPT_COLUMNS: &str =
    "id, test_id, user_id, status, score, max_score, started_at, completed_at";

async fn fetch_attempt(conn: &mut SqliteConnection, id: i64) -> Result<Option<Attempt>, AppError> {
    let row = sqlx::query_as::<_, DbAttempt>(&format!(
        "SELECT {} FROM attempts WHERE id = ?",
        ATTEMPT_COLUMNS
    ))
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;

    row.map(Attempt::try_from).transpose()
}

/// Takes the write lock via a no-op update on the attempt row, then re-reads it.
async fn lock_attempt(conn: &mut SqliteConnection, id: i64) -> Result<Attempt, AppError> {
    let locked = sqlx::query("UPDATE attempts SET id = id WHERE id = ?")
        .bind(id)
        .execute(&mut *conn)
        .await?;
    if locked.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("Attempt {} not found", id)));
    }

    fetch_attempt(conn, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Attempt {} not found", id)))
}

fn ensure_in_progress(attempt: &Attempt) -> Result<(), AppError> {
    if !attempt.is_in_progress() {
        return Err(AppError::Conflict(format!(
            "Attempt {} is not in progress (status: {})",
            attempt.id, attempt.status
        )));
    }
    Ok(())
}

/// Scores the attempt from its answers against the pinned question versions,
/// closes it and upserts the leaderboard row. Caller owns the transaction.
async fn finalize_attempt(
    conn: &mut SqliteConnection,
    attempt_id: i64,
) -> Result<CompletedAttempt, AppError> {
    let attempt = lock_attempt(conn, attempt_id).await?;
    ensure_in_progress(&attempt)?;

    let (score, max_score): (i64, i64) = sqlx::query_as(
        "SELECT
             COALESCE(SUM(CASE WHEN a.is_correct = TRUE THEN v.points ELSE 0 END), 0),
             COALESCE(SUM(v.points), 0)
         FROM attempt_answers a
         JOIN question_versions v
           ON v.question_id = a.question_id AND v.version = a.question_version
         WHERE a.attempt_id = ?",
    )
    .bind(attempt_id)
    .fetch_one(&mut *conn)
    .await?;

    let completed_at = Utc::now();

    sqlx::query(
        "UPDATE attempts SET status = ?, score = ?, max_score = ?, completed_at = ? WHERE id = ?",
    )
    .bind(AttemptStatus::Completed.as_str())
    .bind(score)
    .bind(max_score)
    .bind(completed_at)
    .bind(attempt_id)
    .execute(&mut *conn)
    .await?;

    sqlx::query(
        "INSERT INTO test_results (test_id, user_id, attempt_id, score, max_score, completed_at)
         VALUES (?, ?, ?, ?, ?, ?)
         ON CONFLICT (test_id, user_id) DO UPDATE SET
             attempt_id = excluded.attempt_id,
             score = excluded.score,
             max_score = excluded.max_score,
             completed_at = excluded.completed_at",
    )
    .bind(attempt.test_id)
    .bind(attempt.user_id)
    .bind(attempt_id)
    .bind(score)
    .bind(max_score)
    .bind(completed_at)
    .execute(&mut *conn)
    .await?;

    Ok(CompletedAttempt {
        attempt: Attempt {
            status: AttemptStatus::Completed,
            score: Some(score),
            max_score: Some(max_score),
            completed_at: Some(completed_at),
            ..attempt
        },
        score,
        max_score,
    })
}

#[instrument(skip(pool))]
pub async fn start_attempt(
    pool: &Pool<Sqlite>,
    test_id: i64,
    user_id: i64,
) -> Result<Attempt, AppError> {
    info!("Starting attempt");
    let mut tx = pool.begin().await?;

    // Serialises starts for the same test; the partial unique index backs it up.
    let test = lock_test(&mut tx, test_id).await?;
    if !test.is_active {
        return Err(AppError::Forbidden(format!("Test {} is not active", test_id)));
    }

    let (existing,): (i64,) = sqlx::query_as(
        "SELECT EXISTS(
             SELECT 1 FROM attempts WHERE test_id = ? AND user_id = ? AND status = 'in_progress'
         )",
    )
    .bind(test_id)
    .bind(user_id)
    .fetch_one(&mut *tx)
    .await?;
    if existing != 0 {
        return Err(AppError::Conflict(
            "Active attempt already exists for this test".to_string(),
        ));
    }

    let row = sqlx::query_as::<_, DbAttempt>(&format!(
        "INSERT INTO attempts (test_id, user_id, status, started_at)
         VALUES (?, ?, ?, ?)
         RETURNING {}",
        ATTEMPT_COLUMNS
    ))
    .bind(test_id)
    .bind(user_id)
    .bind(AttemptStatus::InProgress.as_str())
    .bind(Utc::now())
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| {
        AppError::from_unique_violation(e, "Active attempt already exists for this test")
    })?;

    tx.commit().await?;

    let attempt = Attempt::try_from(row)?;
    info!(attempt_id = attempt.id, "Attempt started");
    Ok(attempt)
}

#[instrument(skip(pool))]
pub async fn get_attempt(pool: &Pool<Sqlite>, id: i64) -> Result<Attempt, AppError> {
    let mut conn = pool.acquire().await?;
    fetch_attempt(&mut conn, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Attempt {} not found", id)))
}

/// All attempts a user made at a test, newest first.
#[instrument(skip(pool))]
pub async fn get_user_attempts(
    pool: &Pool<Sqlite>,
    test_id: i64,
    user_id: i64,
) -> Result<Vec<Attempt>, AppError> {
    let rows = sqlx::query_as::<_, DbAttempt>(&format!(
        "SELECT {} FROM attempts WHERE test_id = ? AND user_id = ? ORDER BY id DESC",
        ATTEMPT_COLUMNS
    ))
    .bind(test_id)
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(Attempt::try_from).collect()
}

/// Records or replaces the answer for `question_id`, graded against the exact
/// `question_version` supplied.
#[instrument(skip(pool))]
pub async fn submit_answer(
    pool: &Pool<Sqlite>,
    attempt_id: i64,
    question_id: i64,
    question_version: i64,
    selected_option: i64,
) -> Result<Answer, AppError> {
    info!("Submitting answer");
    if selected_option < NO_SELECTION {
        return Err(AppError::Validation(format!(
            "Selected option {} is invalid",
            selected_option
        )));
    }

    let mut tx = pool.begin().await?;

    let attempt = lock_attempt(&mut tx, attempt_id).await?;
    ensure_in_progress(&attempt)?;

    let correct: Option<(i64,)> = sqlx::query_as(
        "SELECT correct_option FROM question_versions WHERE question_id = ? AND version = ?",
    )
    .bind(question_id)
    .bind(question_version)
    .fetch_optional(&mut *tx)
    .await?;
    let (correct_option,) = correct.ok_or_else(|| {
        AppError::NotFound(format!(
            "Question {} version {} not found",
            question_id, question_version
        ))
    })?;
    let is_correct = selected_option == correct_option;

    let answer = sqlx::query_as::<_, Answer>(
        "INSERT INTO attempt_answers
             (attempt_id, question_id, question_version, selected_option, is_correct, answered_at)
         VALUES (?, ?, ?, ?, ?, ?)
         ON CONFLICT (attempt_id, question_id) DO UPDATE SET
             question_version = excluded.question_version,
             selected_option = excluded.selected_option,
             is_correct = excluded.is_correct,
             answered_at = excluded.answered_at
         RETURNING id, attempt_id, question_id, question_version, selected_option, is_correct, answered_at",
    )
    .bind(attempt_id)
    .bind(question_id)
    .bind(question_version)
    .bind(selected_option)
    .bind(is_correct)
    .bind(Utc::now())
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(answer)
}

#[instrument(skip(pool))]
pub async fn get_attempt_answers(
    pool: &Pool<Sqlite>,
    attempt_id: i64,
) -> Result<Vec<Answer>, AppError> {
    let answers = sqlx::query_as::<_, Answer>(
        "SELECT id, attempt_id, question_id, question_version, selected_option, is_correct, answered_at
         FROM attempt_answers WHERE attempt_id = ? ORDER BY id",
    )
    .bind(attempt_id)
    .fetch_all(pool)
    .await?;

    Ok(answers)
}

#[instrument(skip(pool))]
pub async fn complete_attempt(
    pool: &Pool<Sqlite>,
    attempt_id: i64,
) -> Result<CompletedAttempt, AppError> {
    info!("Completing attempt");
    let mut tx = pool.begin().await?;
    let completed = finalize_attempt(&mut tx, attempt_id).await?;
    tx.commit().await?;

    info!(
        score = completed.score,
        max_score = completed.max_score,
        "Attempt completed"
    );
    Ok(completed)
}

#[instrument(skip(pool))]
pub async fn cancel_attempt(pool: &Pool<Sqlite>, attempt_id: i64) -> Result<Attempt, AppError> {
    info!("Cancelling attempt");
    let mut tx = pool.begin().await?;

    let attempt = lock_attempt(&mut tx, attempt_id).await?;
    ensure_in_progress(&attempt)?;

    sqlx::query("UPDATE attempts SET status = ? WHERE id = ?")
        .bind(AttemptStatus::Cancelled.as_str())
        .bind(attempt_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    Ok(Attempt {
        status: AttemptStatus::Cancelled,
        ..attempt
    })
}

/// Completion ranking for a test: best score first, earliest finisher on ties.
#[instrument(skip(pool))]
pub async fn get_test_results(pool: &Pool<Sqlite>, test_id: i64) -> Result<Vec<TestResult>, AppError> {
    let results = sqlx::query_as::<_, TestResult>(
        "SELECT test_id, user_id, attempt_id, score, max_score, completed_at
         FROM test_results WHERE test_id = ?
         ORDER BY score DESC, completed_at ASC",
    )
    .bind(test_id)
    .fetch_all(pool)
    .await?;

    Ok(results)
}

/// Finalises every in-progress attempt of the test, each in its own
/// transaction and scored like a normal completion. Attempts that fail (for
/// example, completed concurrently) are logged and skipped.
#[instrument(skip(pool))]
pub async fn force_complete_all_for_test(
    pool: &Pool<Sqlite>,
    test_id: i64,
) -> Result<Vec<CompletedAttempt>, AppError> {
    info!("Force-completing attempts");
    let ids: Vec<(i64,)> = sqlx::query_as(
        "SELECT id FROM attempts WHERE test_id = ? AND status = 'in_progress' ORDER BY id",
    )
    .bind(test_id)
    .fetch_all(pool)
    .await?;

    let mut completed = Vec::with_capacity(ids.len());
    for (attempt_id,) in ids {
        let result = async {
            let mut tx = pool.begin().await?;
            let done = finalize_attempt(&mut tx, attempt_id).await?;
            tx.commit().await?;
            Ok::<_, AppError>(done)
        }
        .await;

        match result {
            Ok(done) => completed.push(done),
            Err(e) => {
                warn!(attempt_id, error = %e, "Failed to force-complete attempt");
            }
        }
    }

    info!(count = completed.len(), "Attempts force-completed");
    Ok(completed)
}
