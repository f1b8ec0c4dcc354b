// ============================
// crates/backend-lib/src/typing.rs
// ============================
//! Ephemeral, self-expiring typing state.
//!
//! One entry per (room, user) with a deadline, refreshed on every
//! `typing_start`. An entry past its deadline is treated as absent even
//! before the sweeper evicts it, so expiry and explicit stop are both
//! idempotent and produce at most one `typing_stopped` broadcast.
//!
//! The tracker itself never broadcasts; it reports which transitions
//! happened and the connection layer / sweeper task turn those into
//! events.

use std::time::Duration;

use dashmap::DashMap;
use huddle_common::{RoomId, UserId};
use tokio::time::Instant;

pub struct TypingTracker {
    entries: DashMap<(RoomId, UserId), Instant>,
    ttl: Duration,
}

impl TypingTracker {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Record or refresh typing state. Returns `true` when this begins a
    /// new burst (no live entry existed), i.e. when a `typing_started`
    /// broadcast is due. Repeated keystrokes inside the window refresh
    /// the deadline without re-broadcasting.
    pub fn start(&self, room: &RoomId, user_id: &str) -> bool {
        let now = Instant::now();
        let key = (room.clone(), user_id.to_string());
        let was_live = self
            .entries
            .insert(key, now + self.ttl)
            .is_some_and(|deadline| deadline > now);
        !was_live
    }

    /// Explicit stop. Returns `true` when a live entry was removed, i.e.
    /// when a `typing_stopped` broadcast is due.
    pub fn stop(&self, room: &RoomId, user_id: &str) -> bool {
        let now = Instant::now();
        self.entries
            .remove(&(room.clone(), user_id.to_string()))
            .is_some_and(|(_, deadline)| deadline > now)
    }

    /// Whether a live (unexpired) entry exists.
    pub fn is_typing(&self, room: &RoomId, user_id: &str) -> bool {
        let now = Instant::now();
        self.entries
            .get(&(room.clone(), user_id.to_string()))
            .is_some_and(|deadline| *deadline > now)
    }

    /// Drop every entry for this user in this room (room-leave path).
    /// Returns whether a live entry was cleared.
    pub fn clear(&self, room: &RoomId, user_id: &str) -> bool {
        self.stop(room, user_id)
    }

    /// Evict expired entries, returning the (room, user) pairs whose
    /// burst just ended. Called periodically by the sweeper task.
    pub fn sweep(&self) -> Vec<(RoomId, UserId)> {
        let now = Instant::now();
        let expired: Vec<(RoomId, UserId)> = self
            .entries
            .iter()
            .filter(|e| *e.value() <= now)
            .map(|e| e.key().clone())
            .collect();
        for key in &expired {
            // re-check under removal: a refresh may have raced the scan
            self.entries.remove_if(key, |_, deadline| *deadline <= now);
        }
        expired
            .into_iter()
            .filter(|key| !self.entries.contains_key(key))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(3);

    #[tokio::test(start_paused = true)]
    async fn repeated_starts_within_window_broadcast_once() {
        let tracker = TypingTracker::new(TTL);
        let room = RoomId::channel("general");
        assert!(tracker.start(&room, "alice"));
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(!tracker.start(&room, "alice"));
        assert!(tracker.is_typing(&room, "alice"));
    }

    #[tokio::test(start_paused = true)]
    async fn entry_past_deadline_is_treated_as_absent() {
        let tracker = TypingTracker::new(TTL);
        let room = RoomId::channel("general");
        tracker.start(&room, "alice");
        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(!tracker.is_typing(&room, "alice"));
        // a new start after expiry is a fresh burst even if the sweeper
        // has not run yet
        assert!(tracker.start(&room, "alice"));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_idempotent() {
        let tracker = TypingTracker::new(TTL);
        let room = RoomId::channel("general");
        tracker.start(&room, "alice");
        assert!(tracker.stop(&room, "alice"));
        assert!(!tracker.stop(&room, "alice"));
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_reports_each_expiry_once() {
        let tracker = TypingTracker::new(TTL);
        let room = RoomId::channel("general");
        tracker.start(&room, "alice");
        tracker.start(&room, "bob");
        tokio::time::advance(Duration::from_secs(2)).await;
        tracker.start(&room, "bob"); // bob refreshes, alice will expire
        tokio::time::advance(Duration::from_secs(2)).await;

        let ended = tracker.sweep();
        assert_eq!(ended, vec![(room.clone(), "alice".to_string())]);
        assert!(tracker.is_typing(&room, "bob"));

        tokio::time::advance(Duration::from_secs(2)).await;
        let ended = tracker.sweep();
        assert_eq!(ended, vec![(room.clone(), "bob".to_string())]);
        assert!(tracker.sweep().is_empty());
    }

}
