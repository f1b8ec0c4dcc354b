// ============================
// crates/backend-lib/src/chat.rs
// ============================
//! Message and reaction synchronizer.
//!
//! Accepts send/delete/react intents, applies them through the store and
//! fans the resulting events out to room subscribers. Within one room,
//! broadcast order equals persistence commit order: every mutating path
//! holds that room's order mutex across the store write and the fan-out.
//! Different rooms proceed independently.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use huddle_common::{ConnId, Message, ReactionAggregate, RoomId};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::access::Access;
use crate::error::AppError;
use crate::messages::ServerEvent;
use crate::rooms::RoomHub;
use crate::store::Store;

/// Draft of a message as received from the wire.
pub struct Draft {
    pub content: String,
    pub reply_to: Option<Uuid>,
    pub mentions: Vec<String>,
    pub attachments: Vec<String>,
}

pub struct ChatService {
    hub: Arc<RoomHub>,
    access: Arc<dyn Access>,
    store: Arc<dyn Store>,
    /// Per-room commit-order locks, created lazily. Never a global lock.
    order_locks: DashMap<RoomId, Arc<Mutex<()>>>,
    max_message_len: usize,
}

impl ChatService {
    pub fn new(
        hub: Arc<RoomHub>,
        access: Arc<dyn Access>,
        store: Arc<dyn Store>,
        max_message_len: usize,
    ) -> Self {
        Self {
            hub,
            access,
            store,
            order_locks: DashMap::new(),
            max_message_len,
        }
    }

    fn order_lock(&self, room: &RoomId) -> Arc<Mutex<()>> {
        self.order_locks
            .entry(room.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Validate, persist and fan out a new message. The returned message
    /// is the sender's reply; everyone else subscribed to the room gets a
    /// `message_new` event, and for direct conversations the other
    /// participants' unsubscribed connections get a
    /// `message_notification` for unread badges.
    pub async fn send(
        &self,
        conn_id: ConnId,
        user_id: &str,
        room: &RoomId,
        draft: Draft,
    ) -> Result<Message, AppError> {
        if !self.access.is_member(user_id, room).await {
            return Err(AppError::PermissionDenied(format!(
                "{user_id} is not a member of {room}"
            )));
        }

        let content = draft.content;
        if content.trim().is_empty() {
            return Err(AppError::InvalidInput("message content is empty".into()));
        }
        if content.chars().count() > self.max_message_len {
            return Err(AppError::InvalidInput(format!(
                "message exceeds {} characters",
                self.max_message_len
            )));
        }
        if let Some(parent_id) = draft.reply_to {
            let parent = self
                .store
                .message(parent_id)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("reply target {parent_id}")))?;
            if parent.room != *room {
                return Err(AppError::InvalidInput(
                    "reply target belongs to another room".into(),
                ));
            }
        }
        for mention in &draft.mentions {
            if !self.access.is_member(mention, room).await {
                return Err(AppError::InvalidInput(format!(
                    "mentioned user {mention} is not a member of {room}"
                )));
            }
        }

        let now = Utc::now();
        let message = Message {
            id: Uuid::new_v4(),
            room: room.clone(),
            author_id: user_id.to_string(),
            content: Some(content),
            reply_to: draft.reply_to,
            mentions: draft.mentions,
            attachments: draft.attachments,
            reactions: ReactionAggregate::new(),
            is_deleted: false,
            created_at: now,
            updated_at: now,
        };

        let lock = self.order_lock(room);
        let _order = lock.lock().await;
        self.store.append_message(message.clone()).await?;
        self.hub.broadcast_except(
            room,
            conn_id,
            &ServerEvent::MessageNew {
                message: message.clone(),
            },
        );
        if room.is_direct() {
            self.notify_direct_peers(conn_id, user_id, room, &message).await;
        }
        Ok(message)
    }

    /// Soft-delete. Author only; the event carries the id and nothing
    /// else, so deleted content cannot leak to any client.
    pub async fn delete(
        &self,
        conn_id: ConnId,
        user_id: &str,
        room: &RoomId,
        message_id: Uuid,
    ) -> Result<ServerEvent, AppError> {
        let message = self
            .store
            .message(message_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("message {message_id}")))?;
        if message.room != *room {
            return Err(AppError::NotFound(format!("message {message_id}")));
        }
        if message.author_id != user_id {
            return Err(AppError::PermissionDenied(
                "only the author may delete a message".into(),
            ));
        }

        let lock = self.order_lock(room);
        let _order = lock.lock().await;
        self.store.soft_delete_message(message_id, Utc::now()).await?;
        let event = ServerEvent::MessageDeleted {
            room: room.clone(),
            message_id,
        };
        self.hub.broadcast_except(room, conn_id, &event);
        Ok(event)
    }

    /// Idempotent per (message, user, emoji): a duplicate add changes
    /// nothing and broadcasts nothing.
    pub async fn add_reaction(
        &self,
        conn_id: ConnId,
        user_id: &str,
        room: &RoomId,
        message_id: Uuid,
        emoji: &str,
    ) -> Result<ServerEvent, AppError> {
        self.check_reaction_target(user_id, room, message_id).await?;
        let event = ServerEvent::ReactionAdded {
            room: room.clone(),
            message_id,
            emoji: emoji.to_string(),
            user_id: user_id.to_string(),
        };
        let lock = self.order_lock(room);
        let _order = lock.lock().await;
        if self.store.add_reaction(message_id, user_id, emoji).await? {
            self.hub.broadcast_except(room, conn_id, &event);
        }
        Ok(event)
    }

    /// Removing a reaction that does not exist is a no-op.
    pub async fn remove_reaction(
        &self,
        conn_id: ConnId,
        user_id: &str,
        room: &RoomId,
        message_id: Uuid,
        emoji: &str,
    ) -> Result<ServerEvent, AppError> {
        self.check_reaction_target(user_id, room, message_id).await?;
        let event = ServerEvent::ReactionRemoved {
            room: room.clone(),
            message_id,
            emoji: emoji.to_string(),
            user_id: user_id.to_string(),
        };
        let lock = self.order_lock(room);
        let _order = lock.lock().await;
        if self.store.remove_reaction(message_id, user_id, emoji).await? {
            self.hub.broadcast_except(room, conn_id, &event);
        }
        Ok(event)
    }

    /// Persist a read cursor and let the room (and the reader's other
    /// connections) know.
    pub async fn mark_read(
        &self,
        conn_id: ConnId,
        user_id: &str,
        room: &RoomId,
        message_id: Uuid,
    ) -> Result<ServerEvent, AppError> {
        if !self.access.is_member(user_id, room).await {
            return Err(AppError::PermissionDenied(format!(
                "{user_id} is not a member of {room}"
            )));
        }
        self.store.set_read_marker(room, user_id, message_id).await?;
        let event = ServerEvent::MessagesRead {
            room: room.clone(),
            user_id: user_id.to_string(),
            message_id,
        };
        self.hub.broadcast_except(room, conn_id, &event);
        for other in self.hub.conns_of_user(user_id) {
            if other != conn_id && !self.hub.is_subscribed(room, other) {
                self.hub.send_to_conn(other, &event);
            }
        }
        Ok(event)
    }

    async fn check_reaction_target(
        &self,
        user_id: &str,
        room: &RoomId,
        message_id: Uuid,
    ) -> Result<(), AppError> {
        if !self.access.is_member(user_id, room).await {
            return Err(AppError::PermissionDenied(format!(
                "{user_id} is not a member of {room}"
            )));
        }
        let message = self
            .store
            .message(message_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("message {message_id}")))?;
        if message.room != *room {
            return Err(AppError::NotFound(format!("message {message_id}")));
        }
        Ok(())
    }

    /// Unread-badge delivery: every other participant of the direct
    /// conversation gets the message on each of their connections that is
    /// not already subscribed to the room.
    async fn notify_direct_peers(
        &self,
        conn_id: ConnId,
        author_id: &str,
        room: &RoomId,
        message: &Message,
    ) {
        let event = ServerEvent::MessageNotification {
            room: room.clone(),
            message: message.clone(),
        };
        for peer in self.access.members(room).await {
            if peer == author_id {
                continue;
            }
            for conn in self.hub.conns_of_user(&peer) {
                if conn != conn_id && !self.hub.is_subscribed(room, conn) {
                    self.hub.send_to_conn(conn, &event);
                }
            }
        }
    }
}
