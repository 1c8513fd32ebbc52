use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DisplayFromStr};
use std::collections::HashMap;
use uuid::Uuid;

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone)]
pub struct LiveClass {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub instructor: String,
    pub instructor_id: String,
    pub scheduled_at: DateTime<Utc>,
    pub duration_minutes: i32,
    pub status: String,
    pub course_id: Uuid,
    pub participants: Vec<String>,
    pub room_code: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone)]
pub struct ChatMessage {
    pub id: Uuid,
    pub class_id: Uuid,
    pub seq: i64,
    pub sender_id: String,
    pub sender_name: String,
    pub sender_email: Option<String>,
    pub message: String,
    pub sent_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone)]
pub struct Quiz {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub course_id: Option<Uuid>,
    pub published: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone)]
pub struct QuizQuestion {
    pub id: Uuid,
    pub quiz_id: Uuid,
    pub position: i32,
    pub prompt: String,
    pub options: Vec<String>,
    pub correct_index: i32,
}

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone)]
pub struct QuizResult {
    pub id: Uuid,
    pub user_id: String,
    pub quiz_id: Uuid,
    pub score: i32,
    pub total_questions: i32,
    pub passed: bool,
    pub completed_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone)]
pub struct CourseProgress {
    pub user_id: String,
    pub course_id: Uuid,
    pub completed_modules: Vec<String>,
    pub progress: i32,
    pub enrolled_at: DateTime<Utc>,
    pub last_accessed_module: Option<String>,
    pub last_accessed_at: Option<DateTime<Utc>>,
}

// --- request / response shapes ---

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ScheduleClassReq {
    pub title: String,
    pub description: Option<String>,
    pub instructor: String,
    pub instructor_id: String,
    pub scheduled_at: DateTime<Utc>,
    pub duration_minutes: i32,
    pub course_id: Uuid,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LifecycleReq {
    pub caller_id: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PresenceReq {
    pub user_id: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PostMessageReq {
    pub sender_id: String,
    pub sender_name: String,
    pub sender_email: Option<String>,
    pub message: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct NewQuestion {
    pub prompt: String,
    pub options: Vec<String>,
    pub correct_index: i32,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CreateQuizReq {
    pub title: String,
    pub description: Option<String>,
    pub course_id: Option<Uuid>,
    pub published: bool,
    pub questions: Vec<NewQuestion>,
}

/// Question as served to takers: the correct index never leaves the server.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct QuestionView {
    pub id: Uuid,
    pub position: i32,
    pub prompt: String,
    pub options: Vec<String>,
}

impl From<QuizQuestion> for QuestionView {
    fn from(q: QuizQuestion) -> Self {
        QuestionView {
            id: q.id,
            position: q.position,
            prompt: q.prompt,
            options: q.options,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct QuizView {
    #[serde(flatten)]
    pub quiz: Quiz,
    pub questions: Vec<QuestionView>,
}

/// Answers arrive as a JSON object keyed by question position
/// ("0", "1", ...), one chosen option index per question.
#[serde_as]
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SubmitAttemptReq {
    pub user_id: String,
    #[serde_as(as = "HashMap<DisplayFromStr, _>")]
    pub answers: HashMap<usize, usize>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AttemptOutcome {
    pub score: i32,
    pub total_questions: i32,
    pub passed: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct MarkModuleReq {
    pub total_modules: i64,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ClassView {
    #[serde(flatten)]
    pub class: LiveClass,
    pub watching: usize,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ParticipantsView {
    pub participants: Vec<String>,
    pub count: usize,
}
