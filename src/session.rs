// Live class lifecycle and the per-session authoritative state.
//
// Every session is an independent unit of concurrency. All mutations of a
// session (status transitions, joins, chat posts) are serialized through a
// single mutex; broadcast sends happen inside that critical section so the
// event order every subscriber sees equals the assigned sequence order.
// Durable writes happen at the route layer after the guard is dropped.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use rand::Rng;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::chat::ChatLog;
use crate::error::ApiError;
use crate::models::{ChatMessage, LiveClass, ScheduleClassReq};
use crate::presence::Roster;

pub const MIN_DURATION_MINUTES: i32 = 15;
pub const MAX_DURATION_MINUTES: i32 = 180;

const EVENT_BUFFER: usize = 256;
const ROOM_CODE_LEN: usize = 6;
const ROOM_CODE_CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Upcoming,
    Live,
    Ended,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Upcoming => "upcoming",
            SessionStatus::Live => "live",
            SessionStatus::Ended => "ended",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "upcoming" => Some(SessionStatus::Upcoming),
            "live" => Some(SessionStatus::Live),
            "ended" => Some(SessionStatus::Ended),
            _ => None,
        }
    }

    // The lifecycle is forward-only: ended is terminal, and a session never
    // skips live.
    fn can_transition(self, to: SessionStatus) -> bool {
        matches!(
            (self, to),
            (SessionStatus::Upcoming, SessionStatus::Live)
                | (SessionStatus::Live, SessionStatus::Ended)
        )
    }
}

/// Events pushed to session subscribers, in the single authoritative order.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Message(ChatMessage),
    Status(SessionStatus),
}

/// Validates a scheduling request and produces the initial record: status
/// `upcoming`, empty participant set, generated join code.
pub fn schedule(req: ScheduleClassReq) -> Result<LiveClass, ApiError> {
    let title = req.title.trim();
    if title.is_empty() {
        return Err(ApiError::Validation("title is required".into()));
    }
    if req.instructor_id.trim().is_empty() || req.instructor.trim().is_empty() {
        return Err(ApiError::Validation("instructor is required".into()));
    }
    if !(MIN_DURATION_MINUTES..=MAX_DURATION_MINUTES).contains(&req.duration_minutes) {
        return Err(ApiError::Validation(format!(
            "duration must be between {} and {} minutes",
            MIN_DURATION_MINUTES, MAX_DURATION_MINUTES
        )));
    }

    Ok(LiveClass {
        id: Uuid::new_v4(),
        title: title.to_string(),
        description: req.description,
        instructor: req.instructor,
        instructor_id: req.instructor_id,
        scheduled_at: req.scheduled_at,
        duration_minutes: req.duration_minutes,
        status: SessionStatus::Upcoming.as_str().to_string(),
        course_id: req.course_id,
        participants: Vec::new(),
        room_code: room_code(),
        created_at: Utc::now(),
        deleted_at: None,
    })
}

fn room_code() -> String {
    let mut rng = rand::thread_rng();
    (0..ROOM_CODE_LEN)
        .map(|_| ROOM_CODE_CHARS[rng.gen_range(0..ROOM_CODE_CHARS.len())] as char)
        .collect()
}

struct SessionInner {
    status: SessionStatus,
    roster: Roster,
    chat: ChatLog,
}

/// One scheduled class and its live state. Identity fields are immutable
/// for the lifetime of the session; everything mutable sits behind the
/// inner mutex.
pub struct LiveSession {
    pub id: Uuid,
    pub instructor_id: String,
    inner: Mutex<SessionInner>,
    events: broadcast::Sender<SessionEvent>,
}

impl LiveSession {
    fn new(class: &LiveClass, status: SessionStatus, history: Vec<ChatMessage>) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        LiveSession {
            id: class.id,
            instructor_id: class.instructor_id.clone(),
            inner: Mutex::new(SessionInner {
                status,
                roster: Roster::from_ids(class.participants.iter().cloned()),
                chat: ChatLog::from_history(history),
            }),
            events,
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.inner.lock().unwrap().status
    }

    fn authorize_instructor(&self, caller_id: &str) -> Result<(), ApiError> {
        if caller_id != self.instructor_id {
            return Err(ApiError::Authorization(
                "only the instructor may change session status".into(),
            ));
        }
        Ok(())
    }

    fn transition(&self, to: SessionStatus) -> Result<SessionStatus, ApiError> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.status.can_transition(to) {
            return Err(ApiError::InvalidTransition {
                from: inner.status.as_str(),
                to: to.as_str(),
            });
        }
        inner.status = to;
        let _ = self.events.send(SessionEvent::Status(to));
        Ok(to)
    }

    /// upcoming -> live. Instructor only.
    pub fn start(&self, caller_id: &str) -> Result<SessionStatus, ApiError> {
        self.authorize_instructor(caller_id)?;
        self.transition(SessionStatus::Live)
    }

    /// live -> ended. Instructor only. Participants are not ejected; the
    /// session just stops accepting joins and posts.
    pub fn end(&self, caller_id: &str) -> Result<SessionStatus, ApiError> {
        self.authorize_instructor(caller_id)?;
        self.transition(SessionStatus::Ended)
    }

    /// Idempotent join. Students may join a live session; the instructor
    /// may additionally pre-join while upcoming to test audio and video.
    /// Returns true when the roster changed.
    pub fn join(&self, user_id: &str) -> Result<bool, ApiError> {
        let mut inner = self.inner.lock().unwrap();
        match inner.status {
            SessionStatus::Live => {}
            SessionStatus::Upcoming if user_id == self.instructor_id => {}
            SessionStatus::Upcoming => {
                return Err(ApiError::SessionNotJoinable(
                    "session has not started".into(),
                ))
            }
            SessionStatus::Ended => {
                return Err(ApiError::SessionNotJoinable("session has ended".into()))
            }
        }
        Ok(inner.roster.join(user_id))
    }

    /// Leaving is allowed in any state (graceful drain after end).
    pub fn leave(&self, user_id: &str) -> bool {
        self.inner.lock().unwrap().roster.leave(user_id)
    }

    pub fn heartbeat(&self, user_id: &str) -> bool {
        self.inner.lock().unwrap().roster.heartbeat(user_id)
    }

    pub fn participants(&self) -> Vec<String> {
        self.inner.lock().unwrap().roster.snapshot()
    }

    pub fn participant_count(&self) -> usize {
        self.inner.lock().unwrap().roster.count()
    }

    /// Appends a chat message and fans it out to subscribers. The broadcast
    /// happens under the session lock, which is what makes the delivered
    /// order identical for every subscriber.
    pub fn post(
        &self,
        sender_id: &str,
        sender_name: &str,
        sender_email: Option<&str>,
        text: &str,
    ) -> Result<ChatMessage, ApiError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ApiError::Validation("message is empty".into()));
        }
        let mut inner = self.inner.lock().unwrap();
        if inner.status != SessionStatus::Live {
            return Err(ApiError::SessionClosed);
        }
        let message = inner
            .chat
            .append(self.id, sender_id, sender_name, sender_email, text);
        let _ = self.events.send(SessionEvent::Message(message.clone()));
        Ok(message)
    }

    /// Snapshot-plus-follow subscription. Replay and receiver are taken
    /// under the same lock, so a subscriber sees every message with
    /// seq > after exactly once.
    pub fn subscribe(
        &self,
        after: i64,
    ) -> (
        SessionStatus,
        Vec<ChatMessage>,
        broadcast::Receiver<SessionEvent>,
    ) {
        let inner = self.inner.lock().unwrap();
        let replay = inner.chat.replay_after(after);
        let rx = self.events.subscribe();
        (inner.status, replay, rx)
    }

    /// Evicts participants whose last heartbeat is older than `timeout`.
    pub fn evict_stale(&self, timeout: Duration) -> Vec<String> {
        self.inner.lock().unwrap().roster.evict_stale(timeout)
    }
}

/// Registry of in-memory sessions, keyed by class id. Sessions hydrate
/// lazily from the store on first touch.
#[derive(Default)]
pub struct SessionHub {
    sessions: DashMap<Uuid, Arc<LiveSession>>,
}

impl SessionHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &Uuid) -> Option<Arc<LiveSession>> {
        self.sessions.get(id).map(|s| s.value().clone())
    }

    /// Installs a session from its persisted record and chat history.
    /// Concurrent installs of the same class resolve to one winner.
    pub fn install(
        &self,
        class: &LiveClass,
        history: Vec<ChatMessage>,
    ) -> Result<Arc<LiveSession>, ApiError> {
        let status = SessionStatus::parse(&class.status).ok_or_else(|| {
            ApiError::Validation(format!("unknown session status {:?}", class.status))
        })?;
        let session = self
            .sessions
            .entry(class.id)
            .or_insert_with(|| Arc::new(LiveSession::new(class, status, history)))
            .value()
            .clone();
        Ok(session)
    }

    pub fn remove(&self, id: &Uuid) {
        self.sessions.remove(id);
    }

    pub fn snapshot(&self) -> Vec<Arc<LiveSession>> {
        self.sessions.iter().map(|s| s.value().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::error::TryRecvError;

    fn request(instructor_id: &str) -> ScheduleClassReq {
        ScheduleClassReq {
            title: "Intro to Anatomy".into(),
            description: Some("Skeletal system".into()),
            instructor: "Dr. Adams".into(),
            instructor_id: instructor_id.into(),
            scheduled_at: Utc::now(),
            duration_minutes: 45,
            course_id: Uuid::new_v4(),
        }
    }

    fn session(instructor_id: &str) -> LiveSession {
        let class = schedule(request(instructor_id)).unwrap();
        LiveSession::new(&class, SessionStatus::Upcoming, Vec::new())
    }

    #[test]
    fn schedule_validates_input() {
        let class = schedule(request("t1")).unwrap();
        assert_eq!(class.status, "upcoming");
        assert!(class.participants.is_empty());
        assert_eq!(class.room_code.len(), 6);
        assert!(class
            .room_code
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));

        let mut bad = request("t1");
        bad.title = "   ".into();
        assert!(matches!(schedule(bad), Err(ApiError::Validation(_))));

        let mut bad = request("t1");
        bad.duration_minutes = 14;
        assert!(matches!(schedule(bad), Err(ApiError::Validation(_))));

        let mut bad = request("t1");
        bad.duration_minutes = 181;
        assert!(matches!(schedule(bad), Err(ApiError::Validation(_))));

        let mut ok = request("t1");
        ok.duration_minutes = 15;
        assert!(schedule(ok).is_ok());
    }

    #[test]
    fn lifecycle_is_forward_only() {
        let s = session("t1");

        // Ending before starting is not a thing.
        assert!(matches!(
            s.end("t1"),
            Err(ApiError::InvalidTransition { from: "upcoming", to: "ended" })
        ));

        assert!(matches!(s.start("student"), Err(ApiError::Authorization(_))));
        assert_eq!(s.start("t1").unwrap(), SessionStatus::Live);

        // Re-entering live is rejected, never silently absorbed.
        assert!(matches!(
            s.start("t1"),
            Err(ApiError::InvalidTransition { from: "live", to: "live" })
        ));

        assert!(matches!(s.end("student"), Err(ApiError::Authorization(_))));
        assert_eq!(s.end("t1").unwrap(), SessionStatus::Ended);

        // Ended is terminal.
        assert!(matches!(s.start("t1"), Err(ApiError::InvalidTransition { .. })));
        assert!(matches!(s.end("t1"), Err(ApiError::InvalidTransition { .. })));
    }

    #[test]
    fn join_rules_follow_status() {
        let s = session("t1");

        assert!(matches!(
            s.join("student-a"),
            Err(ApiError::SessionNotJoinable(_))
        ));
        // Instructor pre-join while upcoming is the one privileged exception.
        assert!(s.join("t1").unwrap());

        s.start("t1").unwrap();
        assert!(s.join("student-a").unwrap());
        assert!(!s.join("student-a").unwrap());
        assert_eq!(s.participant_count(), 2);

        s.end("t1").unwrap();
        assert!(matches!(
            s.join("student-b"),
            Err(ApiError::SessionNotJoinable(_))
        ));
        // Existing participants drain gracefully.
        assert!(s.leave("student-a"));
        assert_eq!(s.participant_count(), 1);
    }

    #[test]
    fn post_requires_live() {
        let s = session("t1");
        assert!(matches!(
            s.post("u1", "User One", None, "hi"),
            Err(ApiError::SessionClosed)
        ));
        s.start("t1").unwrap();
        assert!(matches!(
            s.post("u1", "User One", None, "   "),
            Err(ApiError::Validation(_))
        ));
        let msg = s.post("u1", "User One", None, "  hi  ").unwrap();
        assert_eq!(msg.message, "hi");
    }

    #[tokio::test]
    async fn subscribers_see_posts_in_order() {
        let s = session("t1");
        s.start("t1").unwrap();

        let (_, replay, mut rx) = s.subscribe(0);
        assert!(replay.is_empty());

        s.post("u1", "User One", None, "hi").unwrap();
        s.post("u2", "User Two", None, "hello").unwrap();

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        match (first, second) {
            (SessionEvent::Message(a), SessionEvent::Message(b)) => {
                assert_eq!(a.message, "hi");
                assert_eq!(b.message, "hello");
                assert!(a.seq < b.seq);
            }
            other => panic!("unexpected events: {:?}", other),
        }
    }

    #[tokio::test]
    async fn replay_and_follow_do_not_overlap() {
        let s = session("t1");
        s.start("t1").unwrap();
        s.post("u1", "User One", None, "hi").unwrap();
        s.post("u1", "User One", None, "hello").unwrap();

        let (_, replay, mut rx) = s.subscribe(0);
        let texts: Vec<&str> = replay.iter().map(|m| m.message.as_str()).collect();
        assert_eq!(texts, vec!["hi", "hello"]);
        // Nothing was posted after subscribing, so the live feed is empty.
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));

        // A cursor resumes mid-stream.
        let (_, tail, _) = s.subscribe(1);
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].message, "hello");
    }

    #[tokio::test]
    async fn status_changes_are_events() {
        let s = session("t1");
        let (status, _, mut rx) = s.subscribe(0);
        assert_eq!(status, SessionStatus::Upcoming);

        s.start("t1").unwrap();
        match rx.recv().await.unwrap() {
            SessionEvent::Status(status) => assert_eq!(status, SessionStatus::Live),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn end_to_end_session_flow() {
        let class = schedule(request("t1")).unwrap();
        assert_eq!(class.status, "upcoming");
        let s = LiveSession::new(&class, SessionStatus::Upcoming, Vec::new());

        s.start("t1").unwrap();
        assert_eq!(s.status(), SessionStatus::Live);

        s.join("student-a").unwrap();
        s.join("student-a").unwrap();
        assert_eq!(s.participants(), vec!["student-a".to_string()]);

        let (_, _, mut rx) = s.subscribe(0);
        s.post("student-a", "Student A", None, "hi").unwrap();
        s.post("student-a", "Student A", None, "hello").unwrap();
        let mut seen = Vec::new();
        for _ in 0..2 {
            if let SessionEvent::Message(m) = rx.recv().await.unwrap() {
                seen.push(m.message);
            }
        }
        assert_eq!(seen, vec!["hi".to_string(), "hello".to_string()]);

        s.end("t1").unwrap();
        assert_eq!(s.status(), SessionStatus::Ended);
        assert!(matches!(
            s.post("student-a", "Student A", None, "late"),
            Err(ApiError::SessionClosed)
        ));
    }

    #[test]
    fn hub_installs_once() {
        let hub = SessionHub::new();
        let class = schedule(request("t1")).unwrap();

        let a = hub.install(&class, Vec::new()).unwrap();
        let b = hub.install(&class, Vec::new()).unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        hub.remove(&class.id);
        assert!(hub.get(&class.id).is_none());
    }

    #[test]
    fn hub_rejects_corrupt_status() {
        let hub = SessionHub::new();
        let mut class = schedule(request("t1")).unwrap();
        class.status = "paused".into();
        assert!(matches!(
            hub.install(&class, Vec::new()),
            Err(ApiError::Validation(_))
        ));
    }
}
