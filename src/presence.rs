// Deduplicated participant roster for one live session.
//
// The roster is the authoritative "who is watching" set. Joins are
// idempotent; liveness comes from heartbeats, and a sweeper evicts entries
// whose last heartbeat is older than the grace period.

use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
pub struct Roster {
    seen: HashMap<String, Instant>,
}

impl Roster {
    pub fn from_ids<I: IntoIterator<Item = String>>(ids: I) -> Self {
        let now = Instant::now();
        Roster {
            seen: ids.into_iter().map(|id| (id, now)).collect(),
        }
    }

    /// Idempotent set-insert. Returns true if the user was newly added.
    pub fn join(&mut self, user_id: &str) -> bool {
        let now = Instant::now();
        self.seen.insert(user_id.to_string(), now).is_none()
    }

    /// Idempotent remove. Returns true if the user was present.
    pub fn leave(&mut self, user_id: &str) -> bool {
        self.seen.remove(user_id).is_some()
    }

    /// Refreshes a participant's last-seen instant. No-op for unknown ids,
    /// so a client racing its own eviction can just re-join.
    pub fn heartbeat(&mut self, user_id: &str) -> bool {
        match self.seen.get_mut(user_id) {
            Some(at) => {
                *at = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Snapshot of current participant ids, sorted for stable output.
    pub fn snapshot(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.seen.keys().cloned().collect();
        ids.sort();
        ids
    }

    // Count is derived from the same map as the snapshot; there is no
    // separate counter to drift.
    pub fn count(&self) -> usize {
        self.seen.len()
    }

    /// Removes everyone silent for longer than `timeout`; returns the
    /// evicted ids.
    pub fn evict_stale(&mut self, timeout: Duration) -> Vec<String> {
        let now = Instant::now();
        let stale: Vec<String> = self
            .seen
            .iter()
            .filter(|(_, at)| now.duration_since(**at) >= timeout)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &stale {
            self.seen.remove(id);
        }
        stale
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_is_idempotent() {
        let mut roster = Roster::default();
        assert!(roster.join("a"));
        assert!(!roster.join("a"));
        assert_eq!(roster.snapshot(), vec!["a".to_string()]);
        assert_eq!(roster.count(), 1);
    }

    #[test]
    fn count_matches_snapshot() {
        let mut roster = Roster::default();
        for id in ["a", "b", "c", "b"] {
            roster.join(id);
        }
        assert_eq!(roster.count(), roster.snapshot().len());
        assert_eq!(roster.count(), 3);
    }

    #[test]
    fn leave_and_heartbeat() {
        let mut roster = Roster::from_ids(["a".to_string(), "b".to_string()]);
        assert!(roster.leave("a"));
        assert!(!roster.leave("a"));
        assert!(roster.heartbeat("b"));
        assert!(!roster.heartbeat("a"));
        assert_eq!(roster.count(), 1);
    }

    #[test]
    fn eviction_by_timeout() {
        let mut roster = Roster::from_ids(["a".to_string(), "b".to_string()]);
        // Nobody is stale against a generous timeout.
        assert!(roster.evict_stale(Duration::from_secs(3600)).is_empty());
        assert_eq!(roster.count(), 2);

        // Everybody is stale against a zero timeout.
        let mut evicted = roster.evict_stale(Duration::ZERO);
        evicted.sort();
        assert_eq!(evicted, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(roster.count(), 0);
    }
}
