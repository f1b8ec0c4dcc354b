// ============================
// crates/backend-lib/src/store.rs
// ============================
//! Durable-state collaborator.
//!
//! The core orchestrates reads and writes of messages and meeting
//! sessions through this trait; the storage engine behind it is out of
//! scope. The one transactional requirement is
//! [`Store::create_session_if_absent`]: the existing-active-session check
//! and the insert must be serializable with respect to concurrent calls
//! for the same channel. `MemoryStore` satisfies that by doing both under
//! one write lock; a SQL implementation would use a partial unique index
//! on `(channel_id) WHERE is_active`.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use huddle_common::{MeetingSession, Message, Participant, RoomId, UserId};
use parking_lot::RwLock;
use uuid::Uuid;

use crate::error::AppError;

#[async_trait]
pub trait Store: Send + Sync {
    // -- messages --------------------------------------------------------

    async fn append_message(&self, message: Message) -> Result<(), AppError>;

    async fn message(&self, id: Uuid) -> Result<Option<Message>, AppError>;

    /// Flip the soft-delete flag and strip content. Returns the redacted
    /// message. Deleting an already-deleted message is a no-op that still
    /// returns it.
    async fn soft_delete_message(&self, id: Uuid, at: DateTime<Utc>) -> Result<Message, AppError>;

    /// Returns whether the aggregate changed (duplicate adds do not).
    async fn add_reaction(&self, id: Uuid, user_id: &str, emoji: &str) -> Result<bool, AppError>;

    /// Returns whether the aggregate changed (absent reactions do not).
    async fn remove_reaction(&self, id: Uuid, user_id: &str, emoji: &str)
        -> Result<bool, AppError>;

    async fn set_read_marker(
        &self,
        room: &RoomId,
        user_id: &str,
        message_id: Uuid,
    ) -> Result<(), AppError>;

    async fn read_marker(&self, room: &RoomId, user_id: &str) -> Result<Option<Uuid>, AppError>;

    // -- meeting sessions ------------------------------------------------

    /// Atomic check-then-create: fails with [`AppError::Conflict`] when an
    /// active session already exists for the channel, otherwise inserts
    /// the session with its host enrolled as first participant. This is
    /// the serialization point that closes the two-hosts race.
    async fn create_session_if_absent(
        &self,
        session: MeetingSession,
    ) -> Result<MeetingSession, AppError>;

    async fn active_session(&self, channel_id: &str) -> Result<Option<MeetingSession>, AppError>;

    /// Lookup by the external room handle, for webhook-driven signals.
    async fn active_session_by_handle(
        &self,
        handle: &str,
    ) -> Result<Option<MeetingSession>, AppError>;

    /// Insert a participant row, or clear `left_at` on rejoin.
    async fn upsert_participant(
        &self,
        session_id: Uuid,
        user_id: &str,
        at: DateTime<Utc>,
    ) -> Result<Participant, AppError>;

    async fn participant(
        &self,
        session_id: Uuid,
        user_id: &str,
    ) -> Result<Option<Participant>, AppError>;

    /// Set `left_at` if currently unset. Returns whether anything changed,
    /// so a double leave cannot decrement the remaining count twice.
    async fn mark_participant_left(
        &self,
        session_id: Uuid,
        user_id: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, AppError>;

    async fn active_participant_count(&self, session_id: Uuid) -> Result<usize, AppError>;

    /// Flip the session to Ended. Idempotent: returns `true` only for the
    /// call that performed the transition.
    async fn end_session(&self, session_id: Uuid, at: DateTime<Utc>) -> Result<bool, AppError>;

    /// Like [`Store::end_session`] but also marks every still-active
    /// participant as left (bulk), for the host-end path.
    async fn end_session_draining(
        &self,
        session_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<bool, AppError>;
}

#[derive(Default)]
struct Inner {
    messages: HashMap<Uuid, Message>,
    read_markers: HashMap<(RoomId, UserId), Uuid>,
    sessions: HashMap<Uuid, MeetingSession>,
    participants: HashMap<Uuid, Vec<Participant>>,
}

/// In-process implementation of [`Store`].
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn append_message(&self, message: Message) -> Result<(), AppError> {
        self.inner.write().messages.insert(message.id, message);
        Ok(())
    }

    async fn message(&self, id: Uuid) -> Result<Option<Message>, AppError> {
        Ok(self.inner.read().messages.get(&id).cloned())
    }

    async fn soft_delete_message(&self, id: Uuid, at: DateTime<Utc>) -> Result<Message, AppError> {
        let mut inner = self.inner.write();
        let msg = inner
            .messages
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("message {id}")))?;
        if !msg.is_deleted {
            msg.redact(at);
        }
        Ok(msg.clone())
    }

    async fn add_reaction(&self, id: Uuid, user_id: &str, emoji: &str) -> Result<bool, AppError> {
        let mut inner = self.inner.write();
        let msg = inner
            .messages
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("message {id}")))?;
        Ok(msg.reactions.apply_add(emoji, user_id))
    }

    async fn remove_reaction(
        &self,
        id: Uuid,
        user_id: &str,
        emoji: &str,
    ) -> Result<bool, AppError> {
        let mut inner = self.inner.write();
        let msg = inner
            .messages
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("message {id}")))?;
        Ok(msg.reactions.apply_remove(emoji, user_id))
    }

    async fn set_read_marker(
        &self,
        room: &RoomId,
        user_id: &str,
        message_id: Uuid,
    ) -> Result<(), AppError> {
        self.inner
            .write()
            .read_markers
            .insert((room.clone(), user_id.to_string()), message_id);
        Ok(())
    }

    async fn read_marker(&self, room: &RoomId, user_id: &str) -> Result<Option<Uuid>, AppError> {
        Ok(self
            .inner
            .read()
            .read_markers
            .get(&(room.clone(), user_id.to_string()))
            .copied())
    }

    async fn create_session_if_absent(
        &self,
        session: MeetingSession,
    ) -> Result<MeetingSession, AppError> {
        // check and insert under one write lock: this is the transaction
        let mut inner = self.inner.write();
        if inner
            .sessions
            .values()
            .any(|s| s.channel_id == session.channel_id && s.is_active)
        {
            return Err(AppError::Conflict(format!(
                "channel {} already has an active session",
                session.channel_id
            )));
        }
        let host = Participant {
            user_id: session.host_id.clone(),
            joined_at: session.started_at,
            left_at: None,
        };
        inner.participants.insert(session.id, vec![host]);
        inner.sessions.insert(session.id, session.clone());
        Ok(session)
    }

    async fn active_session(&self, channel_id: &str) -> Result<Option<MeetingSession>, AppError> {
        Ok(self
            .inner
            .read()
            .sessions
            .values()
            .find(|s| s.channel_id == channel_id && s.is_active)
            .cloned())
    }

    async fn active_session_by_handle(
        &self,
        handle: &str,
    ) -> Result<Option<MeetingSession>, AppError> {
        Ok(self
            .inner
            .read()
            .sessions
            .values()
            .find(|s| s.room_handle == handle && s.is_active)
            .cloned())
    }

    async fn upsert_participant(
        &self,
        session_id: Uuid,
        user_id: &str,
        at: DateTime<Utc>,
    ) -> Result<Participant, AppError> {
        let mut inner = self.inner.write();
        let rows = inner
            .participants
            .get_mut(&session_id)
            .ok_or_else(|| AppError::NotFound(format!("session {session_id}")))?;
        if let Some(row) = rows.iter_mut().find(|p| p.user_id == user_id) {
            // rejoin
            row.left_at = None;
            Ok(row.clone())
        } else {
            let row = Participant {
                user_id: user_id.to_string(),
                joined_at: at,
                left_at: None,
            };
            rows.push(row.clone());
            Ok(row)
        }
    }

    async fn participant(
        &self,
        session_id: Uuid,
        user_id: &str,
    ) -> Result<Option<Participant>, AppError> {
        Ok(self
            .inner
            .read()
            .participants
            .get(&session_id)
            .and_then(|rows| rows.iter().find(|p| p.user_id == user_id).cloned()))
    }

    async fn mark_participant_left(
        &self,
        session_id: Uuid,
        user_id: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let mut inner = self.inner.write();
        let rows = inner
            .participants
            .get_mut(&session_id)
            .ok_or_else(|| AppError::NotFound(format!("session {session_id}")))?;
        match rows.iter_mut().find(|p| p.user_id == user_id) {
            Some(row) if row.left_at.is_none() => {
                row.left_at = Some(at);
                Ok(true)
            },
            _ => Ok(false),
        }
    }

    async fn active_participant_count(&self, session_id: Uuid) -> Result<usize, AppError> {
        Ok(self
            .inner
            .read()
            .participants
            .get(&session_id)
            .map_or(0, |rows| rows.iter().filter(|p| p.is_active()).count()))
    }

    async fn end_session(&self, session_id: Uuid, at: DateTime<Utc>) -> Result<bool, AppError> {
        let mut inner = self.inner.write();
        let session = inner
            .sessions
            .get_mut(&session_id)
            .ok_or_else(|| AppError::NotFound(format!("session {session_id}")))?;
        if !session.is_active {
            return Ok(false);
        }
        session.is_active = false;
        session.ended_at = Some(at);
        Ok(true)
    }

    async fn end_session_draining(
        &self,
        session_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let mut inner = self.inner.write();
        let session = inner
            .sessions
            .get_mut(&session_id)
            .ok_or_else(|| AppError::NotFound(format!("session {session_id}")))?;
        let transitioned = session.is_active;
        session.is_active = false;
        if transitioned {
            session.ended_at = Some(at);
        }
        if let Some(rows) = inner.participants.get_mut(&session_id) {
            for row in rows.iter_mut().filter(|p| p.left_at.is_none()) {
                row.left_at = Some(at);
            }
        }
        Ok(transitioned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use huddle_common::ReactionAggregate;

    fn session(channel: &str, host: &str) -> MeetingSession {
        MeetingSession {
            id: Uuid::new_v4(),
            channel_id: channel.to_string(),
            host_id: host.to_string(),
            title: None,
            room_handle: format!("room-{}", Uuid::new_v4()),
            room_url: "https://calls.example/room".to_string(),
            is_active: true,
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    fn message(room: RoomId, author: &str, content: &str) -> Message {
        let now = Utc::now();
        Message {
            id: Uuid::new_v4(),
            room,
            author_id: author.to_string(),
            content: Some(content.to_string()),
            reply_to: None,
            mentions: vec![],
            attachments: vec![],
            reactions: ReactionAggregate::new(),
            is_deleted: false,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn check_then_create_rejects_second_active_session() {
        let store = MemoryStore::new();
        let first = store
            .create_session_if_absent(session("general", "alice"))
            .await
            .unwrap();
        let err = store
            .create_session_if_absent(session("general", "bob"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        // ending the first session frees the channel
        assert!(store.end_session(first.id, Utc::now()).await.unwrap());
        store
            .create_session_if_absent(session("general", "bob"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn host_is_enrolled_at_creation() {
        let store = MemoryStore::new();
        let s = store
            .create_session_if_absent(session("general", "alice"))
            .await
            .unwrap();
        let host = store.participant(s.id, "alice").await.unwrap().unwrap();
        assert!(host.is_active());
        assert_eq!(store.active_participant_count(s.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn leave_is_idempotent_and_rejoin_clears_left_at() {
        let store = MemoryStore::new();
        let s = store
            .create_session_if_absent(session("general", "alice"))
            .await
            .unwrap();
        store.upsert_participant(s.id, "bob", Utc::now()).await.unwrap();
        assert_eq!(store.active_participant_count(s.id).await.unwrap(), 2);

        assert!(store
            .mark_participant_left(s.id, "bob", Utc::now())
            .await
            .unwrap());
        // second leave changes nothing
        assert!(!store
            .mark_participant_left(s.id, "bob", Utc::now())
            .await
            .unwrap());
        assert_eq!(store.active_participant_count(s.id).await.unwrap(), 1);

        let rejoined = store.upsert_participant(s.id, "bob", Utc::now()).await.unwrap();
        assert!(rejoined.is_active());
        assert_eq!(store.active_participant_count(s.id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn end_session_transitions_exactly_once() {
        let store = MemoryStore::new();
        let s = store
            .create_session_if_absent(session("general", "alice"))
            .await
            .unwrap();
        assert!(store.end_session(s.id, Utc::now()).await.unwrap());
        assert!(!store.end_session(s.id, Utc::now()).await.unwrap());
        assert!(store.active_session("general").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn end_session_draining_marks_everyone_left() {
        let store = MemoryStore::new();
        let s = store
            .create_session_if_absent(session("general", "alice"))
            .await
            .unwrap();
        store.upsert_participant(s.id, "bob", Utc::now()).await.unwrap();
        store.upsert_participant(s.id, "carol", Utc::now()).await.unwrap();

        assert!(store.end_session_draining(s.id, Utc::now()).await.unwrap());
        assert_eq!(store.active_participant_count(s.id).await.unwrap(), 0);
        assert!(!store.end_session_draining(s.id, Utc::now()).await.unwrap());
    }

    #[tokio::test]
    async fn lookup_by_handle_only_sees_active_sessions() {
        let store = MemoryStore::new();
        let s = store
            .create_session_if_absent(session("general", "alice"))
            .await
            .unwrap();
        assert!(store
            .active_session_by_handle(&s.room_handle)
            .await
            .unwrap()
            .is_some());
        store.end_session(s.id, Utc::now()).await.unwrap();
        assert!(store
            .active_session_by_handle(&s.room_handle)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn soft_delete_strips_content_and_is_idempotent() {
        let store = MemoryStore::new();
        let msg = message(RoomId::channel("general"), "alice", "secret");
        let id = msg.id;
        store.append_message(msg).await.unwrap();

        let deleted = store.soft_delete_message(id, Utc::now()).await.unwrap();
        assert!(deleted.is_deleted);
        assert!(deleted.content.is_none());

        let again = store.soft_delete_message(id, Utc::now()).await.unwrap();
        assert!(again.is_deleted);

        let stored = store.message(id).await.unwrap().unwrap();
        assert!(stored.content.is_none());
    }

    #[tokio::test]
    async fn reactions_report_whether_anything_changed() {
        let store = MemoryStore::new();
        let msg = message(RoomId::channel("general"), "alice", "hi");
        let id = msg.id;
        store.append_message(msg).await.unwrap();

        assert!(store.add_reaction(id, "bob", "👍").await.unwrap());
        assert!(!store.add_reaction(id, "bob", "👍").await.unwrap());
        assert!(store.remove_reaction(id, "bob", "👍").await.unwrap());
        assert!(!store.remove_reaction(id, "bob", "👍").await.unwrap());
        assert!(store
            .message(id)
            .await
            .unwrap()
            .unwrap()
            .reactions
            .is_empty());
    }
}
