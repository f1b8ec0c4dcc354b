// ============================
// crates/backend-lib/src/presence.rs
// ============================
//! Presence registry: which user-sessions are connected, and which rooms
//! each connection is subscribed to.
//!
//! A user is online iff at least one connection is registered for them
//! (refcount by user id). The registry itself is side-effect free; it
//! reports the online/offline transitions and lets the connection layer
//! do the broadcasting.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use huddle_common::{ConnId, RoomId, UserId};

struct ConnState {
    user_id: UserId,
    rooms: Vec<RoomId>,
}

/// What `unregister` found: whose connection closed, whether that was the
/// user's last one, and which rooms it was still subscribed to.
#[derive(Debug)]
pub struct Departure {
    pub user_id: UserId,
    pub went_offline: bool,
    pub rooms: Vec<RoomId>,
}

#[derive(Default)]
pub struct PresenceRegistry {
    connections: DashMap<ConnId, ConnState>,
    online: DashMap<UserId, usize>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection. Returns whether the user just came online
    /// (this was their first connection).
    pub fn register(&self, conn_id: ConnId, user_id: &str) -> bool {
        self.connections.insert(
            conn_id,
            ConnState {
                user_id: user_id.to_string(),
                rooms: Vec::new(),
            },
        );
        let mut count = self.online.entry(user_id.to_string()).or_insert(0);
        *count += 1;
        *count == 1
    }

    /// Remove a connection. Idempotent: a second call for the same id
    /// returns `None` and changes nothing.
    pub fn unregister(&self, conn_id: ConnId) -> Option<Departure> {
        let (_, state) = self.connections.remove(&conn_id)?;
        let went_offline = match self.online.entry(state.user_id.clone()) {
            Entry::Occupied(mut e) => {
                *e.get_mut() -= 1;
                if *e.get() == 0 {
                    e.remove();
                    true
                } else {
                    false
                }
            },
            Entry::Vacant(_) => false,
        };
        Some(Departure {
            user_id: state.user_id,
            went_offline,
            rooms: state.rooms,
        })
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.online.contains_key(user_id)
    }

    /// Filter the given users down to the ones currently online.
    pub fn online_users<I>(&self, user_ids: I) -> Vec<UserId>
    where
        I: IntoIterator<Item = UserId>,
    {
        user_ids
            .into_iter()
            .filter(|u| self.is_online(u))
            .collect()
    }

    pub fn user_of(&self, conn_id: ConnId) -> Option<UserId> {
        self.connections.get(&conn_id).map(|s| s.user_id.clone())
    }

    pub fn track_join(&self, conn_id: ConnId, room: &RoomId) {
        if let Some(mut state) = self.connections.get_mut(&conn_id) {
            if !state.rooms.contains(room) {
                state.rooms.push(room.clone());
            }
        }
    }

    pub fn track_leave(&self, conn_id: ConnId, room: &RoomId) {
        if let Some(mut state) = self.connections.get_mut(&conn_id) {
            state.rooms.retain(|r| r != room);
        }
    }

    pub fn rooms_of(&self, conn_id: ConnId) -> Vec<RoomId> {
        self.connections
            .get(&conn_id)
            .map(|s| s.rooms.clone())
            .unwrap_or_default()
    }
}
