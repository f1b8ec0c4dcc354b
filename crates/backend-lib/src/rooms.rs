// ============================
// crates/backend-lib/src/rooms.rs
// ============================
//! Room hub and membership semantics.
//!
//! A room is a transient coordination handle: it exists only while it has
//! subscribers, and it maps connection ids (not user ids) to outbound
//! event queues. All subscriber-set mutation goes through the dashmap
//! entry for the room's key, which serializes it per room; no global lock
//! exists anywhere in the hub.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use huddle_common::{ConnId, RoomId, UserId};
use tokio::sync::mpsc;
use tracing::warn;

use crate::access::Access;
use crate::error::AppError;
use crate::messages::ServerEvent;
use crate::presence::PresenceRegistry;
use crate::typing::TypingTracker;

/// Fan-out registry: rooms, per-connection outboxes and a user index so
/// events can be pushed to every connection of one user.
#[derive(Default)]
pub struct RoomHub {
    rooms: DashMap<RoomId, HashMap<ConnId, mpsc::Sender<ServerEvent>>>,
    outboxes: DashMap<ConnId, mpsc::Sender<ServerEvent>>,
    user_conns: DashMap<UserId, Vec<ConnId>>,
}

impl RoomHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a connection's outbox. Must happen before any subscribe.
    pub fn attach(&self, conn_id: ConnId, user_id: &str, tx: mpsc::Sender<ServerEvent>) {
        self.outboxes.insert(conn_id, tx);
        self.user_conns
            .entry(user_id.to_string())
            .or_default()
            .push(conn_id);
    }

    /// Detach a connection entirely (disconnect path). Idempotent.
    pub fn detach(&self, conn_id: ConnId, user_id: &str) {
        self.outboxes.remove(&conn_id);
        if let Some(mut conns) = self.user_conns.get_mut(user_id) {
            conns.retain(|c| *c != conn_id);
        }
        self.user_conns
            .remove_if(user_id, |_, conns| conns.is_empty());
    }

    /// Add the connection to the room's subscriber set. Returns `false`
    /// when it was already subscribed or has no attached outbox.
    pub fn subscribe(&self, room: &RoomId, conn_id: ConnId) -> bool {
        let Some(tx) = self.outboxes.get(&conn_id).map(|t| t.clone()) else {
            return false;
        };
        let mut subs = self.rooms.entry(room.clone()).or_default();
        subs.insert(conn_id, tx).is_none()
    }

    /// Remove the connection from the room, pruning the room when its
    /// subscriber set empties. Returns whether it was subscribed.
    pub fn unsubscribe(&self, room: &RoomId, conn_id: ConnId) -> bool {
        let removed = self
            .rooms
            .get_mut(room)
            .is_some_and(|mut subs| subs.remove(&conn_id).is_some());
        self.rooms.remove_if(room, |_, subs| subs.is_empty());
        removed
    }

    pub fn is_subscribed(&self, room: &RoomId, conn_id: ConnId) -> bool {
        self.rooms
            .get(room)
            .is_some_and(|subs| subs.contains_key(&conn_id))
    }

    /// Connection ids currently subscribed to the room.
    pub fn subscriber_conns(&self, room: &RoomId) -> Vec<ConnId> {
        self.rooms
            .get(room)
            .map(|subs| subs.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn broadcast(&self, room: &RoomId, event: &ServerEvent) {
        self.fan_out(room, None, event);
    }

    pub fn broadcast_except(&self, room: &RoomId, except: ConnId, event: &ServerEvent) {
        self.fan_out(room, Some(except), event);
    }

    /// Push an event to every connection of one user.
    pub fn send_to_user(&self, user_id: &str, event: &ServerEvent) {
        let conns = self
            .user_conns
            .get(user_id)
            .map(|c| c.clone())
            .unwrap_or_default();
        for conn_id in conns {
            self.send_to_conn(conn_id, event);
        }
    }

    pub fn send_to_conn(&self, conn_id: ConnId, event: &ServerEvent) {
        if let Some(tx) = self.outboxes.get(&conn_id) {
            if tx.try_send(event.clone()).is_err() {
                warn!(%conn_id, "dropping event for slow or closed connection");
            }
        }
    }

    pub fn conns_of_user(&self, user_id: &str) -> Vec<ConnId> {
        self.user_conns
            .get(user_id)
            .map(|c| c.clone())
            .unwrap_or_default()
    }

    /// Deliver to every attached connection (presence transitions).
    pub fn broadcast_global(&self, event: &ServerEvent) {
        for entry in self.outboxes.iter() {
            if entry.value().try_send(event.clone()).is_err() {
                warn!(conn_id = %entry.key(), "dropping event for slow or closed connection");
            }
        }
    }

    fn fan_out(&self, room: &RoomId, except: Option<ConnId>, event: &ServerEvent) {
        // clone the sender list out so the shard lock is not held while
        // queueing
        let targets: Vec<(ConnId, mpsc::Sender<ServerEvent>)> = match self.rooms.get(room) {
            Some(subs) => subs
                .iter()
                .filter(|(id, _)| except != Some(**id))
                .map(|(id, tx)| (*id, tx.clone()))
                .collect(),
            None => return,
        };
        for (conn_id, tx) in targets {
            if tx.try_send(event.clone()).is_err() {
                warn!(%conn_id, room = %room, "dropping event for slow or closed connection");
            }
        }
    }
}

/// Join/leave semantics on top of the hub: authorization, online
/// snapshots, membership events and typing cleanup.
pub struct RoomService {
    hub: Arc<RoomHub>,
    presence: Arc<PresenceRegistry>,
    typing: Arc<TypingTracker>,
    access: Arc<dyn Access>,
}

impl RoomService {
    pub fn new(
        hub: Arc<RoomHub>,
        presence: Arc<PresenceRegistry>,
        typing: Arc<TypingTracker>,
        access: Arc<dyn Access>,
    ) -> Self {
        Self {
            hub,
            presence,
            typing,
            access,
        }
    }

    /// Subscribe `conn_id` to a room. The caller must be a member of the
    /// channel (or a participant of the direct conversation); failure is
    /// a permission error with no partial join. Returns the online
    /// snapshot of current subscribers and announces the join to the rest
    /// of the room.
    pub async fn join(
        &self,
        conn_id: ConnId,
        user_id: &str,
        room: &RoomId,
    ) -> Result<Vec<UserId>, AppError> {
        if !self.access.is_member(user_id, room).await {
            return Err(AppError::PermissionDenied(format!(
                "{user_id} is not a member of {room}"
            )));
        }

        // a repeat join from the same connection refreshes the snapshot
        // without re-announcing to the room
        if !self.hub.subscribe(room, conn_id) {
            return Ok(self.online_snapshot(room));
        }
        self.presence.track_join(conn_id, room);

        let online = self.online_snapshot(room);
        self.hub.broadcast_except(
            room,
            conn_id,
            &ServerEvent::RoomJoined {
                room: room.clone(),
                user_id: user_id.to_string(),
                online: online.clone(),
            },
        );
        Ok(online)
    }

    /// Unsubscribe from a room. Leaving a room the connection never
    /// joined is a no-op, not an error. Clears the user's typing state in
    /// the room and announces the departure.
    pub async fn leave(&self, conn_id: ConnId, user_id: &str, room: &RoomId) {
        if !self.hub.unsubscribe(room, conn_id) {
            return;
        }
        self.presence.track_leave(conn_id, room);
        if self.typing.clear(room, user_id) {
            self.hub.broadcast(
                room,
                &ServerEvent::TypingStopped {
                    room: room.clone(),
                    user_id: user_id.to_string(),
                },
            );
        }
        self.hub.broadcast(
            room,
            &ServerEvent::RoomLeft {
                room: room.clone(),
                user_id: user_id.to_string(),
            },
        );
    }

    /// Distinct online users among the room's current subscribers.
    pub fn online_snapshot(&self, room: &RoomId) -> Vec<UserId> {
        let mut users: Vec<UserId> = self
            .hub
            .subscriber_conns(room)
            .into_iter()
            .filter_map(|c| self.presence.user_of(c))
            .collect();
        users.sort();
        users.dedup();
        self.presence.online_users(users)
    }
}
