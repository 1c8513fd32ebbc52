// Persistence collaborator: all reads and writes of the document schemas.
//
// Writes go through a bounded retry loop (3 attempts, doubling backoff)
// before surfacing; persistence failures are never swallowed. Queries use
// the runtime sqlx API against the migrated schema.

use std::time::Duration;

use uuid::Uuid;

use crate::db::Db;
use crate::models::{ChatMessage, CourseProgress, LiveClass, Quiz, QuizQuestion, QuizResult};

const WRITE_ATTEMPTS: u32 = 3;

fn backoff(attempt: u32) -> Duration {
    Duration::from_millis(100 * 2u64.pow(attempt - 1))
}

macro_rules! retry_write {
    ($label:literal, $op:expr) => {{
        let mut attempt: u32 = 1;
        loop {
            match $op {
                Ok(v) => break Ok(v),
                Err(e) if attempt < WRITE_ATTEMPTS => {
                    tracing::warn!(error = %e, attempt, op = $label, "write failed, retrying");
                    tokio::time::sleep(backoff(attempt)).await;
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!(error = %e, op = $label, "write failed after retries");
                    break Err(e);
                }
            }
        }
    }};
}

// --- live classes ---

pub async fn insert_live_class(db: &Db, class: &LiveClass) -> Result<(), sqlx::Error> {
    retry_write!("live class insert", {
        sqlx::query(
            r#"
            INSERT INTO live_classes
                (id, title, description, instructor, instructor_id, scheduled_at,
                 duration_minutes, status, course_id, participants, room_code, created_at)
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12)
            "#,
        )
        .bind(class.id)
        .bind(&class.title)
        .bind(&class.description)
        .bind(&class.instructor)
        .bind(&class.instructor_id)
        .bind(class.scheduled_at)
        .bind(class.duration_minutes)
        .bind(&class.status)
        .bind(class.course_id)
        .bind(&class.participants)
        .bind(&class.room_code)
        .bind(class.created_at)
        .execute(db)
        .await
        .map(|_| ())
    })
}

pub async fn fetch_live_class(db: &Db, id: Uuid) -> Result<Option<LiveClass>, sqlx::Error> {
    sqlx::query_as::<_, LiveClass>(
        "SELECT * FROM live_classes WHERE id = $1 AND deleted_at IS NULL",
    )
    .bind(id)
    .fetch_optional(db)
    .await
}

pub async fn list_live_classes(db: &Db) -> Result<Vec<LiveClass>, sqlx::Error> {
    sqlx::query_as::<_, LiveClass>(
        "SELECT * FROM live_classes WHERE deleted_at IS NULL ORDER BY scheduled_at DESC",
    )
    .fetch_all(db)
    .await
}

pub async fn update_class_status(db: &Db, id: Uuid, status: &str) -> Result<(), sqlx::Error> {
    retry_write!("class status update", {
        sqlx::query("UPDATE live_classes SET status = $2 WHERE id = $1")
            .bind(id)
            .bind(status)
            .execute(db)
            .await
            .map(|_| ())
    })
}

pub async fn set_participants(
    db: &Db,
    id: Uuid,
    participants: &[String],
) -> Result<(), sqlx::Error> {
    retry_write!("participant set update", {
        sqlx::query("UPDATE live_classes SET participants = $2 WHERE id = $1")
            .bind(id)
            .bind(participants)
            .execute(db)
            .await
            .map(|_| ())
    })
}

// Soft delete: chat history keeps its referent.
pub async fn soft_delete_class(db: &Db, id: Uuid) -> Result<(), sqlx::Error> {
    retry_write!("class soft delete", {
        sqlx::query("UPDATE live_classes SET deleted_at = now() WHERE id = $1")
            .bind(id)
            .execute(db)
            .await
            .map(|_| ())
    })
}

// --- chat messages ---

pub async fn insert_chat_message(db: &Db, m: &ChatMessage) -> Result<(), sqlx::Error> {
    retry_write!("chat message insert", {
        sqlx::query(
            r#"
            INSERT INTO chat_messages
                (id, class_id, seq, sender_id, sender_name, sender_email, message, sent_at)
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8)
            "#,
        )
        .bind(m.id)
        .bind(m.class_id)
        .bind(m.seq)
        .bind(&m.sender_id)
        .bind(&m.sender_name)
        .bind(&m.sender_email)
        .bind(&m.message)
        .bind(m.sent_at)
        .execute(db)
        .await
        .map(|_| ())
    })
}

pub async fn fetch_chat_messages(db: &Db, class_id: Uuid) -> Result<Vec<ChatMessage>, sqlx::Error> {
    sqlx::query_as::<_, ChatMessage>(
        "SELECT * FROM chat_messages WHERE class_id = $1 ORDER BY sent_at ASC, seq ASC",
    )
    .bind(class_id)
    .fetch_all(db)
    .await
}

// --- quizzes ---

pub async fn insert_quiz(
    db: &Db,
    quiz: &Quiz,
    questions: &[QuizQuestion],
) -> Result<(), sqlx::Error> {
    retry_write!("quiz insert", {
        async {
            let mut tx = db.begin().await?;
            sqlx::query(
                r#"
                INSERT INTO quizzes (id, title, description, course_id, published, created_at)
                VALUES ($1,$2,$3,$4,$5,$6)
                "#,
            )
            .bind(quiz.id)
            .bind(&quiz.title)
            .bind(&quiz.description)
            .bind(quiz.course_id)
            .bind(quiz.published)
            .bind(quiz.created_at)
            .execute(&mut *tx)
            .await?;

            for q in questions {
                sqlx::query(
                    r#"
                    INSERT INTO quiz_questions (id, quiz_id, position, prompt, options, correct_index)
                    VALUES ($1,$2,$3,$4,$5,$6)
                    "#,
                )
                .bind(q.id)
                .bind(q.quiz_id)
                .bind(q.position)
                .bind(&q.prompt)
                .bind(&q.options)
                .bind(q.correct_index)
                .execute(&mut *tx)
                .await?;
            }
            tx.commit().await
        }
        .await
    })
}

pub async fn fetch_quiz(db: &Db, id: Uuid) -> Result<Option<Quiz>, sqlx::Error> {
    sqlx::query_as::<_, Quiz>("SELECT * FROM quizzes WHERE id = $1")
        .bind(id)
        .fetch_optional(db)
        .await
}

pub async fn fetch_quiz_questions(db: &Db, quiz_id: Uuid) -> Result<Vec<QuizQuestion>, sqlx::Error> {
    sqlx::query_as::<_, QuizQuestion>(
        "SELECT * FROM quiz_questions WHERE quiz_id = $1 ORDER BY position ASC",
    )
    .bind(quiz_id)
    .fetch_all(db)
    .await
}

// --- quiz results ---

// Results are append-only; retakes accumulate history.
pub async fn insert_quiz_result(db: &Db, r: &QuizResult) -> Result<(), sqlx::Error> {
    retry_write!("quiz result insert", {
        sqlx::query(
            r#"
            INSERT INTO quiz_results
                (id, user_id, quiz_id, score, total_questions, passed, completed_at)
            VALUES ($1,$2,$3,$4,$5,$6,$7)
            "#,
        )
        .bind(r.id)
        .bind(&r.user_id)
        .bind(r.quiz_id)
        .bind(r.score)
        .bind(r.total_questions)
        .bind(r.passed)
        .bind(r.completed_at)
        .execute(db)
        .await
        .map(|_| ())
    })
}

pub async fn list_results_for_user(db: &Db, user_id: &str) -> Result<Vec<QuizResult>, sqlx::Error> {
    sqlx::query_as::<_, QuizResult>(
        "SELECT * FROM quiz_results WHERE user_id = $1 ORDER BY completed_at DESC",
    )
    .bind(user_id)
    .fetch_all(db)
    .await
}

// --- course progress ---

pub async fn fetch_progress(
    db: &Db,
    user_id: &str,
    course_id: Uuid,
) -> Result<Option<CourseProgress>, sqlx::Error> {
    sqlx::query_as::<_, CourseProgress>(
        "SELECT * FROM course_progress WHERE user_id = $1 AND course_id = $2",
    )
    .bind(user_id)
    .bind(course_id)
    .fetch_optional(db)
    .await
}

pub async fn upsert_progress(db: &Db, p: &CourseProgress) -> Result<(), sqlx::Error> {
    retry_write!("course progress upsert", {
        sqlx::query(
            r#"
            INSERT INTO course_progress
                (user_id, course_id, completed_modules, progress, enrolled_at,
                 last_accessed_module, last_accessed_at)
            VALUES ($1,$2,$3,$4,$5,$6,$7)
            ON CONFLICT (user_id, course_id)
            DO UPDATE SET
                completed_modules = EXCLUDED.completed_modules,
                progress = EXCLUDED.progress,
                last_accessed_module = EXCLUDED.last_accessed_module,
                last_accessed_at = EXCLUDED.last_accessed_at
            "#,
        )
        .bind(&p.user_id)
        .bind(p.course_id)
        .bind(&p.completed_modules)
        .bind(p.progress)
        .bind(p.enrolled_at)
        .bind(&p.last_accessed_module)
        .bind(p.last_accessed_at)
        .execute(db)
        .await
        .map(|_| ())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles() {
        assert_eq!(backoff(1), Duration::from_millis(100));
        assert_eq!(backoff(2), Duration::from_millis(200));
        assert_eq!(backoff(3), Duration::from_millis(400));
    }
}
