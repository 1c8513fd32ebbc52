use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::sse::{Event, KeepAlive, Sse},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use futures::stream::{self, Stream, StreamExt};
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

use crate::{
    assessment::{self, PassPolicy},
    db::Db,
    error::ApiError,
    grants::{self, MediaConfig},
    models::*,
    progress,
    session::{self, LiveSession, SessionEvent, SessionHub, SessionStatus},
    store,
};

#[derive(Clone)]
pub struct AppState {
    pub db: Db,
    pub hub: Arc<SessionHub>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        // scheduling + lifecycle
        .route("/api/classes", post(schedule_class).get(list_classes))
        .route("/api/classes/:class_id", get(get_class).delete(delete_class))
        .route("/api/classes/:class_id/start", post(start_class))
        .route("/api/classes/:class_id/end", post(end_class))
        // presence
        .route("/api/classes/:class_id/join", post(join_class))
        .route("/api/classes/:class_id/leave", post(leave_class))
        .route("/api/classes/:class_id/heartbeat", post(heartbeat))
        .route("/api/classes/:class_id/participants", get(get_participants))
        // chat
        .route("/api/classes/:class_id/messages", post(post_message))
        .route("/api/classes/:class_id/events", get(class_events))
        // media collaborator boundary
        .route("/api/media-token", get(media_token))
        // assessments + progress
        .route("/api/quizzes", post(create_quiz))
        .route("/api/quizzes/:quiz_id", get(get_quiz))
        .route("/api/quizzes/:quiz_id/submit", post(submit_attempt))
        .route("/api/users/:user_id/results", get(list_results))
        .route("/api/progress/:user_id/:course_id", get(get_progress))
        .route(
            "/api/progress/:user_id/:course_id/modules/:module_id",
            post(mark_module_complete),
        )
        .with_state(state)
}

/// Returns the in-memory session, hydrating it from the store on first
/// touch. Concurrent hydrations of the same class collapse to one winner
/// inside the hub.
async fn live_session(state: &AppState, class_id: Uuid) -> Result<Arc<LiveSession>, ApiError> {
    if let Some(session) = state.hub.get(&class_id) {
        return Ok(session);
    }
    let class = store::fetch_live_class(&state.db, class_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("class {class_id}")))?;
    let history = store::fetch_chat_messages(&state.db, class_id).await?;
    state.hub.install(&class, history)
}

// --- scheduling + lifecycle ---

async fn schedule_class(
    State(state): State<AppState>,
    Json(req): Json<ScheduleClassReq>,
) -> Result<Json<LiveClass>, ApiError> {
    let class = session::schedule(req)?;
    store::insert_live_class(&state.db, &class).await?;
    state.hub.install(&class, Vec::new())?;
    tracing::info!(class_id = %class.id, "scheduled live class");
    Ok(Json(class))
}

async fn list_classes(State(state): State<AppState>) -> Result<Json<Vec<LiveClass>>, ApiError> {
    Ok(Json(store::list_live_classes(&state.db).await?))
}

async fn get_class(
    State(state): State<AppState>,
    Path(class_id): Path<Uuid>,
) -> Result<Json<ClassView>, ApiError> {
    let class = store::fetch_live_class(&state.db, class_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("class {class_id}")))?;
    let watching = state
        .hub
        .get(&class_id)
        .map(|s| s.participant_count())
        .unwrap_or(class.participants.len());
    Ok(Json(ClassView { class, watching }))
}

async fn start_class(
    State(state): State<AppState>,
    Path(class_id): Path<Uuid>,
    Json(req): Json<LifecycleReq>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let session = live_session(&state, class_id).await?;
    let status = session.start(&req.caller_id)?;
    store::update_class_status(&state.db, class_id, status.as_str()).await?;
    tracing::info!(class_id = %class_id, "session started");
    Ok(Json(serde_json::json!({ "status": status.as_str() })))
}

async fn end_class(
    State(state): State<AppState>,
    Path(class_id): Path<Uuid>,
    Json(req): Json<LifecycleReq>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let session = live_session(&state, class_id).await?;
    let status = session.end(&req.caller_id)?;
    store::update_class_status(&state.db, class_id, status.as_str()).await?;
    tracing::info!(class_id = %class_id, "session ended");
    Ok(Json(serde_json::json!({ "status": status.as_str() })))
}

async fn delete_class(
    State(state): State<AppState>,
    Path(class_id): Path<Uuid>,
    Json(req): Json<LifecycleReq>,
) -> Result<StatusCode, ApiError> {
    let session = live_session(&state, class_id).await?;
    if req.caller_id != session.instructor_id {
        return Err(ApiError::Authorization(
            "only the instructor may delete a class".into(),
        ));
    }
    store::soft_delete_class(&state.db, class_id).await?;
    state.hub.remove(&class_id);
    Ok(StatusCode::NO_CONTENT)
}

// --- presence ---

async fn join_class(
    State(state): State<AppState>,
    Path(class_id): Path<Uuid>,
    Json(req): Json<PresenceReq>,
) -> Result<Json<ParticipantsView>, ApiError> {
    let session = live_session(&state, class_id).await?;
    let changed = session.join(&req.user_id)?;
    let participants = session.participants();
    if changed {
        store::set_participants(&state.db, class_id, &participants).await?;
    }
    Ok(Json(ParticipantsView {
        count: participants.len(),
        participants,
    }))
}

async fn leave_class(
    State(state): State<AppState>,
    Path(class_id): Path<Uuid>,
    Json(req): Json<PresenceReq>,
) -> Result<Json<ParticipantsView>, ApiError> {
    let session = live_session(&state, class_id).await?;
    let changed = session.leave(&req.user_id);
    let participants = session.participants();
    if changed {
        store::set_participants(&state.db, class_id, &participants).await?;
    }
    Ok(Json(ParticipantsView {
        count: participants.len(),
        participants,
    }))
}

async fn heartbeat(
    State(state): State<AppState>,
    Path(class_id): Path<Uuid>,
    Json(req): Json<PresenceReq>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let session = live_session(&state, class_id).await?;
    // Unknown ids are not an error: a client racing its own eviction just
    // re-joins.
    let present = session.heartbeat(&req.user_id);
    Ok(Json(serde_json::json!({ "present": present })))
}

async fn get_participants(
    State(state): State<AppState>,
    Path(class_id): Path<Uuid>,
) -> Result<Json<ParticipantsView>, ApiError> {
    let session = live_session(&state, class_id).await?;
    let participants = session.participants();
    Ok(Json(ParticipantsView {
        count: participants.len(),
        participants,
    }))
}

// --- chat ---

async fn post_message(
    State(state): State<AppState>,
    Path(class_id): Path<Uuid>,
    Json(req): Json<PostMessageReq>,
) -> Result<Json<ChatMessage>, ApiError> {
    let session = live_session(&state, class_id).await?;
    let message = session.post(
        &req.sender_id,
        &req.sender_name,
        req.sender_email.as_deref(),
        &req.message,
    )?;
    store::insert_chat_message(&state.db, &message).await?;
    Ok(Json(message))
}

#[derive(Deserialize)]
struct EventsQuery {
    after: Option<i64>,
}

/// SSE feed of one session: a status event, replay of chat since `after`
/// (or the `Last-Event-ID` header on reconnect), then live events in the
/// authoritative order. Event ids carry the chat sequence number so a
/// client that lagged can resume without gaps.
async fn class_events(
    State(state): State<AppState>,
    Path(class_id): Path<Uuid>,
    Query(query): Query<EventsQuery>,
    headers: HeaderMap,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let session = live_session(&state, class_id).await?;

    let after = query
        .after
        .or_else(|| {
            headers
                .get("last-event-id")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
        })
        .unwrap_or(0);

    let (status, replay, rx) = session.subscribe(after);

    let initial = stream::iter(
        std::iter::once(status_event(status))
            .chain(replay.into_iter().map(message_event))
            .map(Ok::<Event, Infallible>),
    );
    let live = BroadcastStream::new(rx).map(|item| {
        let event = match item {
            Ok(SessionEvent::Message(m)) => message_event(m),
            Ok(SessionEvent::Status(s)) => status_event(s),
            // Dropped from the broadcast buffer: tell the client to come
            // back with its last seen sequence number.
            Err(BroadcastStreamRecvError::Lagged(skipped)) => Event::default()
                .event("reset")
                .data(format!(r#"{{"skipped":{skipped}}}"#)),
        };
        Ok::<Event, Infallible>(event)
    });

    Ok(Sse::new(initial.chain(live)).keep_alive(KeepAlive::default()))
}

fn message_event(m: ChatMessage) -> Event {
    let id = m.seq.to_string();
    let data = serde_json::to_string(&m).unwrap_or_else(|_| "{}".into());
    Event::default().event("message").id(id).data(data)
}

fn status_event(status: SessionStatus) -> Event {
    Event::default()
        .event("status")
        .data(format!(r#"{{"status":"{}"}}"#, status.as_str()))
}

// --- media collaborator boundary ---

#[derive(Deserialize)]
struct MediaTokenQuery {
    class_id: Option<Uuid>,
    identity: Option<String>,
    username: Option<String>,
    #[serde(default)]
    is_host: bool,
}

async fn media_token(
    State(state): State<AppState>,
    Query(query): Query<MediaTokenQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let class_id = query
        .class_id
        .ok_or_else(|| ApiError::Validation("missing \"class_id\" query parameter".into()))?;
    let identity = query
        .identity
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::Validation("missing \"identity\" query parameter".into()))?;
    let username = query
        .username
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::Validation("missing \"username\" query parameter".into()))?;

    let cfg = MediaConfig::from_env()?;
    let session = live_session(&state, class_id).await?;
    let grant = grants::issue_access_grant(
        &cfg,
        class_id,
        &session.instructor_id,
        session.status(),
        &identity,
        &username,
        query.is_host,
    )?;
    Ok(([(header::CACHE_CONTROL, "no-store")], Json(grant)))
}

// --- assessments ---

async fn create_quiz(
    State(state): State<AppState>,
    Json(req): Json<CreateQuizReq>,
) -> Result<Json<QuizView>, ApiError> {
    let title = req.title.trim();
    if title.is_empty() {
        return Err(ApiError::Validation("title is required".into()));
    }
    let quiz = Quiz {
        id: Uuid::new_v4(),
        title: title.to_string(),
        description: req.description,
        course_id: req.course_id,
        published: req.published,
        created_at: Utc::now(),
    };
    let questions: Vec<QuizQuestion> = req
        .questions
        .into_iter()
        .enumerate()
        .map(|(i, q)| QuizQuestion {
            id: Uuid::new_v4(),
            quiz_id: quiz.id,
            position: i as i32,
            prompt: q.prompt,
            options: q.options,
            correct_index: q.correct_index,
        })
        .collect();
    assessment::validate_questions(&questions)?;

    store::insert_quiz(&state.db, &quiz, &questions).await?;
    tracing::info!(quiz_id = %quiz.id, questions = questions.len(), "created quiz");
    Ok(Json(QuizView {
        quiz,
        questions: questions.into_iter().map(Into::into).collect(),
    }))
}

async fn get_quiz(
    State(state): State<AppState>,
    Path(quiz_id): Path<Uuid>,
) -> Result<Json<QuizView>, ApiError> {
    let quiz = store::fetch_quiz(&state.db, quiz_id)
        .await?
        .filter(|q| q.published)
        .ok_or_else(|| ApiError::NotFound(format!("quiz {quiz_id}")))?;
    let questions = store::fetch_quiz_questions(&state.db, quiz_id).await?;
    Ok(Json(QuizView {
        quiz,
        questions: questions.into_iter().map(Into::into).collect(),
    }))
}

async fn submit_attempt(
    State(state): State<AppState>,
    Path(quiz_id): Path<Uuid>,
    Json(req): Json<SubmitAttemptReq>,
) -> Result<Json<AttemptOutcome>, ApiError> {
    if req.user_id.trim().is_empty() {
        return Err(ApiError::Validation("user_id is required".into()));
    }
    let quiz = store::fetch_quiz(&state.db, quiz_id)
        .await?
        .filter(|q| q.published)
        .ok_or_else(|| ApiError::NotFound(format!("quiz {quiz_id}")))?;
    let questions = store::fetch_quiz_questions(&state.db, quiz.id).await?;

    // All rejections happen before anything is persisted: a refused
    // attempt leaves no result behind.
    assessment::validate_questions(&questions)?;
    assessment::validate_attempt(&questions, &req.answers)?;
    let scored = assessment::score(&questions, &req.answers, PassPolicy::default());

    let result = QuizResult {
        id: Uuid::new_v4(),
        user_id: req.user_id,
        quiz_id: quiz.id,
        score: scored.score as i32,
        total_questions: scored.total as i32,
        passed: scored.passed,
        completed_at: Utc::now(),
    };
    store::insert_quiz_result(&state.db, &result).await?;
    Ok(Json(AttemptOutcome {
        score: result.score,
        total_questions: result.total_questions,
        passed: result.passed,
    }))
}

async fn list_results(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<QuizResult>>, ApiError> {
    Ok(Json(store::list_results_for_user(&state.db, &user_id).await?))
}

// --- course progress ---

async fn get_progress(
    State(state): State<AppState>,
    Path((user_id, course_id)): Path<(String, Uuid)>,
) -> Result<Json<CourseProgress>, ApiError> {
    if let Some(record) = store::fetch_progress(&state.db, &user_id, course_id).await? {
        return Ok(Json(record));
    }
    // First access creates the record lazily.
    let record = progress::new_progress(&user_id, course_id);
    store::upsert_progress(&state.db, &record).await?;
    Ok(Json(record))
}

async fn mark_module_complete(
    State(state): State<AppState>,
    Path((user_id, course_id, module_id)): Path<(String, Uuid, String)>,
    Json(req): Json<MarkModuleReq>,
) -> Result<Json<CourseProgress>, ApiError> {
    let mut record = store::fetch_progress(&state.db, &user_id, course_id)
        .await?
        .unwrap_or_else(|| progress::new_progress(&user_id, course_id));
    progress::apply_completion(&mut record, &module_id, req.total_modules)?;
    store::upsert_progress(&state.db, &record).await?;
    Ok(Json(record))
}
