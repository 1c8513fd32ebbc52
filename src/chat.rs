// Append-only, sequence-numbered chat log for one live session.
//
// The log assigns the single authoritative order: a per-session `seq`
// handed out under the session lock. Subscribers replay from the log and
// then follow the session's broadcast channel; equal timestamps are
// disambiguated by seq.

use chrono::Utc;
use uuid::Uuid;

use crate::models::ChatMessage;

#[derive(Debug)]
pub struct ChatLog {
    messages: Vec<ChatMessage>,
    next_seq: i64,
}

impl ChatLog {
    pub fn new() -> Self {
        ChatLog {
            messages: Vec::new(),
            next_seq: 1,
        }
    }

    /// Rebuilds a log from persisted history. The next sequence number
    /// continues after the highest stored one.
    pub fn from_history(messages: Vec<ChatMessage>) -> Self {
        let next_seq = messages.iter().map(|m| m.seq).max().unwrap_or(0) + 1;
        ChatLog { messages, next_seq }
    }

    /// Appends a message, assigning the next sequence number and the
    /// server-side timestamp. Messages are immutable once appended.
    pub fn append(
        &mut self,
        class_id: Uuid,
        sender_id: &str,
        sender_name: &str,
        sender_email: Option<&str>,
        text: &str,
    ) -> ChatMessage {
        let message = ChatMessage {
            id: Uuid::new_v4(),
            class_id,
            seq: self.next_seq,
            sender_id: sender_id.to_string(),
            sender_name: sender_name.to_string(),
            sender_email: sender_email.map(str::to_string),
            message: text.to_string(),
            sent_at: Utc::now(),
        };
        self.next_seq += 1;
        self.messages.push(message.clone());
        message
    }

    /// All messages with seq greater than `after`, in order. `after = 0`
    /// replays the whole session.
    pub fn replay_after(&self, after: i64) -> Vec<ChatMessage> {
        self.messages
            .iter()
            .filter(|m| m.seq > after)
            .cloned()
            .collect()
    }

    pub fn last_seq(&self) -> i64 {
        self.next_seq - 1
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_is_monotonic() {
        let class_id = Uuid::new_v4();
        let mut log = ChatLog::new();
        let a = log.append(class_id, "u1", "User One", None, "hi");
        let b = log.append(class_id, "u2", "User Two", None, "hello");
        assert_eq!(a.seq, 1);
        assert_eq!(b.seq, 2);
        assert!(a.sent_at <= b.sent_at);
        assert_eq!(log.last_seq(), 2);
    }

    #[test]
    fn replay_preserves_post_order() {
        let class_id = Uuid::new_v4();
        let mut log = ChatLog::new();
        log.append(class_id, "u1", "User One", None, "hi");
        log.append(class_id, "u2", "User Two", None, "hello");

        let all: Vec<String> = log
            .replay_after(0)
            .into_iter()
            .map(|m| m.message)
            .collect();
        assert_eq!(all, vec!["hi".to_string(), "hello".to_string()]);

        let tail = log.replay_after(1);
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].message, "hello");
    }

    #[test]
    fn history_resume_continues_sequence() {
        let class_id = Uuid::new_v4();
        let mut log = ChatLog::new();
        log.append(class_id, "u1", "User One", None, "one");
        log.append(class_id, "u1", "User One", None, "two");

        let mut resumed = ChatLog::from_history(log.replay_after(0));
        let next = resumed.append(class_id, "u1", "User One", None, "three");
        assert_eq!(next.seq, 3);
        assert_eq!(resumed.len(), 3);
    }
}
