// ================
// crates/backend-lib/src/messages.rs
// ================
//! Wire protocol: commands a client may issue over its socket and events
//! the core fans out to subscribers.

use huddle_common::{MeetingSession, Message, RoomId, UserId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientCommand {
    /// Must be the first frame on every socket.
    Authenticate {
        token: String,
    },
    JoinRoom {
        room: RoomId,
    },
    LeaveRoom {
        room: RoomId,
    },
    SendMessage {
        room: RoomId,
        content: String,
        reply_to: Option<Uuid>,
        #[serde(default)]
        mentions: Vec<UserId>,
        #[serde(default)]
        attachments: Vec<String>,
    },
    DeleteMessage {
        room: RoomId,
        message_id: Uuid,
    },
    AddReaction {
        room: RoomId,
        message_id: Uuid,
        emoji: String,
    },
    RemoveReaction {
        room: RoomId,
        message_id: Uuid,
        emoji: String,
    },
    TypingStart {
        room: RoomId,
    },
    TypingStop {
        room: RoomId,
    },
    MarkRead {
        room: RoomId,
        message_id: Uuid,
    },
    StartMeeting {
        channel_id: String,
        title: Option<String>,
    },
    JoinMeeting {
        channel_id: String,
    },
    GetMeetingToken {
        channel_id: String,
    },
    LeaveMeeting {
        channel_id: String,
    },
    EndMeeting {
        channel_id: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    Authenticated {
        user_id: UserId,
    },
    /// Reply to a successful join, carrying the online-subscriber
    /// snapshot; also broadcast (without snapshot semantics mattering)
    /// to the rest of the room.
    RoomJoined {
        room: RoomId,
        user_id: UserId,
        online: Vec<UserId>,
    },
    RoomLeft {
        room: RoomId,
        user_id: UserId,
    },
    MessageNew {
        message: Message,
    },
    /// Delivered to a direct-conversation recipient's other connections
    /// for unread badges, even when they are not subscribed to the room.
    MessageNotification {
        room: RoomId,
        message: Message,
    },
    /// Carries the id only. Content must never leak after deletion.
    MessageDeleted {
        room: RoomId,
        message_id: Uuid,
    },
    /// Reaction events carry the delta, not the whole aggregate;
    /// subscribers apply the same merge rule as the server.
    ReactionAdded {
        room: RoomId,
        message_id: Uuid,
        emoji: String,
        user_id: UserId,
    },
    ReactionRemoved {
        room: RoomId,
        message_id: Uuid,
        emoji: String,
        user_id: UserId,
    },
    TypingStarted {
        room: RoomId,
        user_id: UserId,
    },
    TypingStopped {
        room: RoomId,
        user_id: UserId,
    },
    UserOnline {
        user_id: UserId,
    },
    UserOffline {
        user_id: UserId,
    },
    MessagesRead {
        room: RoomId,
        user_id: UserId,
        message_id: Uuid,
    },
    MeetingStarted {
        channel_id: String,
        session: MeetingSession,
    },
    /// Reply to join_meeting / start_meeting with the room access
    /// descriptor.
    MeetingJoined {
        session_id: Uuid,
        channel_id: String,
        room_url: String,
        room_handle: String,
    },
    MeetingToken {
        channel_id: String,
        token: String,
    },
    MeetingEnded {
        channel_id: String,
        session_id: Uuid,
    },
    Error {
        kind: String,
        message: String,
    },
}

impl ServerEvent {
    pub fn error(err: &crate::error::AppError) -> Self {
        ServerEvent::Error {
            kind: err.kind().to_string(),
            message: err.public_message(),
        }
    }
}
