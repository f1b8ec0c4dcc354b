// ================
// crates/common/src/lib.rs
// ================
//! Shared domain types for the Huddle realtime core.
//!
//! These types cross the wire between server and clients, so the merge
//! rules that keep client caches consistent (most importantly the
//! reaction aggregate) live here and nowhere else. The server applies the
//! same `ReactionAggregate::apply_*` functions to its durable copy that a
//! client applies to its cached copy when a delta event arrives.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One live socket. A user may hold several at once.
pub type ConnId = Uuid;

/// Stable identifier of an authenticated user.
pub type UserId = String;

/// Identifier of a channel (also keys meeting sessions).
pub type ChannelId = String;

/// What kind of conversation a room coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomKind {
    Channel,
    Direct,
}

/// Transient coordination handle for a channel or a direct conversation.
///
/// Rooms are not persisted; one exists only while at least one connection
/// is subscribed to it (or ephemeral typing state is pending).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoomId {
    pub kind: RoomKind,
    pub id: String,
}

impl RoomId {
    pub fn channel(id: impl Into<String>) -> Self {
        Self {
            kind: RoomKind::Channel,
            id: id.into(),
        }
    }

    pub fn direct(id: impl Into<String>) -> Self {
        Self {
            kind: RoomKind::Direct,
            id: id.into(),
        }
    }

    pub fn is_direct(&self) -> bool {
        self.kind == RoomKind::Direct
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            RoomKind::Channel => write!(f, "channel:{}", self.id),
            RoomKind::Direct => write!(f, "direct:{}", self.id),
        }
    }
}

/// Channel role as reported by the authorization collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Moderator,
    Member,
    Guest,
}

impl Role {
    /// Admin-equivalent roles get presenter rights on call tokens.
    pub fn is_admin_equivalent(self) -> bool {
        matches!(self, Role::Admin | Role::Moderator)
    }
}

/// A chat message. Never physically removed from the log; `delete` flips
/// `is_deleted` and strips `content`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub room: RoomId,
    pub author_id: UserId,
    /// `None` once the message has been soft-deleted.
    pub content: Option<String>,
    pub reply_to: Option<Uuid>,
    pub mentions: Vec<UserId>,
    pub attachments: Vec<String>,
    pub reactions: ReactionAggregate,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Message {
    /// Strip content in place. Used by the soft-delete path on the server
    /// and by clients applying a `message_deleted` event to a cached copy.
    pub fn redact(&mut self, at: DateTime<Utc>) {
        self.content = None;
        self.is_deleted = true;
        self.updated_at = at;
    }
}

/// Per-emoji reaction entry. `count` is redundant with `users.len()` and
/// kept equal to it at all times.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionEntry {
    pub count: u32,
    pub users: BTreeSet<UserId>,
}

/// Mapping from emoji to the set of users who reacted with it.
///
/// Both mutation paths are idempotent: adding an existing (user, emoji)
/// pair or removing an absent one changes nothing and reports `false`.
/// An emoji entry is pruned the moment its user set empties.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReactionAggregate(pub BTreeMap<String, ReactionEntry>);

impl ReactionAggregate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment-or-append. Returns whether the aggregate changed.
    pub fn apply_add(&mut self, emoji: &str, user_id: &str) -> bool {
        let entry = self.0.entry(emoji.to_string()).or_default();
        if entry.users.insert(user_id.to_string()) {
            entry.count = entry.users.len() as u32;
            true
        } else {
            false
        }
    }

    /// Decrement-or-remove-and-prune-empty. Returns whether the aggregate
    /// changed.
    pub fn apply_remove(&mut self, emoji: &str, user_id: &str) -> bool {
        let Some(entry) = self.0.get_mut(emoji) else {
            return false;
        };
        if !entry.users.remove(user_id) {
            return false;
        }
        entry.count = entry.users.len() as u32;
        if entry.users.is_empty() {
            self.0.remove(emoji);
        }
        true
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn count_for(&self, emoji: &str) -> u32 {
        self.0.get(emoji).map_or(0, |e| e.count)
    }
}

/// One lifecycle instance of a group call bound to one channel.
///
/// At most one session with `is_active == true` exists per channel; that
/// invariant is enforced by the session store's check-then-create.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeetingSession {
    pub id: Uuid,
    pub channel_id: ChannelId,
    pub host_id: UserId,
    pub title: Option<String>,
    /// Opaque handle of the externally provisioned call room.
    pub room_handle: String,
    pub room_url: String,
    pub is_active: bool,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

/// Membership record of one user within one meeting session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub user_id: UserId,
    pub joined_at: DateTime<Utc>,
    /// `None` while the participant is in the call.
    pub left_at: Option<DateTime<Utc>>,
}

impl Participant {
    pub fn is_active(&self) -> bool {
        self.left_at.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reaction_add_is_idempotent_per_user() {
        let mut agg = ReactionAggregate::new();
        assert!(agg.apply_add("👍", "alice"));
        assert!(!agg.apply_add("👍", "alice"));
        assert_eq!(agg.count_for("👍"), 1);
        assert!(agg.apply_add("👍", "bob"));
        assert_eq!(agg.count_for("👍"), 2);
    }

    #[test]
    fn reaction_remove_prunes_empty_entries() {
        let mut agg = ReactionAggregate::new();
        agg.apply_add("🎉", "alice");
        assert!(agg.apply_remove("🎉", "alice"));
        assert!(agg.is_empty());
        // removing a reaction that was never added is a no-op
        assert!(!agg.apply_remove("🎉", "alice"));
        assert!(!agg.apply_remove("🚀", "bob"));
    }

    #[test]
    fn reaction_count_matches_user_set_after_any_sequence() {
        let mut agg = ReactionAggregate::new();
        let ops: &[(&str, &str, bool)] = &[
            ("👍", "a", true),
            ("👍", "a", true),
            ("👍", "b", true),
            ("👍", "a", false),
            ("🔥", "c", false), // remove before any add
            ("🔥", "c", true),
            ("👍", "b", false),
            ("👍", "b", false),
        ];
        for (emoji, user, add) in ops {
            if *add {
                agg.apply_add(emoji, user);
            } else {
                agg.apply_remove(emoji, user);
            }
            for entry in agg.0.values() {
                assert_eq!(entry.count as usize, entry.users.len());
                assert!(!entry.users.is_empty());
            }
        }
        assert_eq!(agg.count_for("👍"), 0);
        assert_eq!(agg.count_for("🔥"), 1);
    }

    #[test]
    fn redact_strips_content_and_flags() {
        let now = Utc::now();
        let mut msg = Message {
            id: Uuid::new_v4(),
            room: RoomId::channel("general"),
            author_id: "alice".into(),
            content: Some("hello".into()),
            reply_to: None,
            mentions: vec![],
            attachments: vec![],
            reactions: ReactionAggregate::new(),
            is_deleted: false,
            created_at: now,
            updated_at: now,
        };
        msg.redact(now);
        assert!(msg.content.is_none());
        assert!(msg.is_deleted);
    }

    #[test]
    fn room_id_display_includes_kind() {
        assert_eq!(RoomId::channel("general").to_string(), "channel:general");
        assert_eq!(RoomId::direct("abc").to_string(), "direct:abc");
        assert!(RoomId::direct("abc").is_direct());
    }
}
