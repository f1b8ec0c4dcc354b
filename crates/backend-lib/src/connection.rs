// ============================
// crates/backend-lib/src/connection.rs
// ============================
//! Per-connection command handling, independent of the socket transport.
//!
//! A [`ConnectionHandler`] exists only for an authenticated connection;
//! the first frame of every socket must be `authenticate` and everything
//! else before it is rejected. Command replies go back on the issuing
//! connection; fan-out to other subscribers happens inside the services.

use std::sync::Arc;

use huddle_common::{ConnId, UserId};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::chat::Draft;
use crate::error::AppError;
use crate::messages::{ClientCommand, ServerEvent};
use crate::AppState;

pub struct ConnectionHandler {
    state: Arc<AppState>,
    conn_id: ConnId,
    user_id: UserId,
}

impl std::fmt::Debug for ConnectionHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandler")
            .field("conn_id", &self.conn_id)
            .field("user_id", &self.user_id)
            .finish_non_exhaustive()
    }
}

impl ConnectionHandler {
    /// Verify the handshake token, register presence and attach the
    /// connection's outbox. Broadcasts `user_online` when this was the
    /// user's first connection.
    pub async fn authenticate(
        state: Arc<AppState>,
        conn_id: ConnId,
        token: &str,
        outbox: mpsc::Sender<ServerEvent>,
    ) -> Result<Self, AppError> {
        let Some(user_id) = state.authenticator.verify(token).await else {
            return Err(AppError::PermissionDenied("invalid token".into()));
        };
        // announce before attaching so the connection does not see its
        // own online transition
        if state.presence.register(conn_id, &user_id) {
            state.hub.broadcast_global(&ServerEvent::UserOnline {
                user_id: user_id.clone(),
            });
        }
        state.hub.attach(conn_id, &user_id, outbox);
        info!(%conn_id, user_id, "connection authenticated");
        Ok(Self {
            state,
            conn_id,
            user_id,
        })
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Dispatch one command. `Ok(Some(event))` is the reply to send back
    /// on this connection; `Ok(None)` means the command has no reply of
    /// its own (typing, meeting departures).
    pub async fn handle_command(
        &self,
        cmd: ClientCommand,
    ) -> Result<Option<ServerEvent>, AppError> {
        let state = &self.state;
        match cmd {
            ClientCommand::Authenticate { .. } => Err(AppError::InvalidInput(
                "connection is already authenticated".into(),
            )),
            ClientCommand::JoinRoom { room } => {
                let online = state.rooms.join(self.conn_id, &self.user_id, &room).await?;
                Ok(Some(ServerEvent::RoomJoined {
                    room,
                    user_id: self.user_id.clone(),
                    online,
                }))
            },
            ClientCommand::LeaveRoom { room } => {
                state.rooms.leave(self.conn_id, &self.user_id, &room).await;
                Ok(Some(ServerEvent::RoomLeft {
                    room,
                    user_id: self.user_id.clone(),
                }))
            },
            ClientCommand::SendMessage {
                room,
                content,
                reply_to,
                mentions,
                attachments,
            } => {
                let message = state
                    .chat
                    .send(
                        self.conn_id,
                        &self.user_id,
                        &room,
                        Draft {
                            content,
                            reply_to,
                            mentions,
                            attachments,
                        },
                    )
                    .await?;
                Ok(Some(ServerEvent::MessageNew { message }))
            },
            ClientCommand::DeleteMessage { room, message_id } => {
                let event = state
                    .chat
                    .delete(self.conn_id, &self.user_id, &room, message_id)
                    .await?;
                Ok(Some(event))
            },
            ClientCommand::AddReaction {
                room,
                message_id,
                emoji,
            } => {
                let event = state
                    .chat
                    .add_reaction(self.conn_id, &self.user_id, &room, message_id, &emoji)
                    .await?;
                Ok(Some(event))
            },
            ClientCommand::RemoveReaction {
                room,
                message_id,
                emoji,
            } => {
                let event = state
                    .chat
                    .remove_reaction(self.conn_id, &self.user_id, &room, message_id, &emoji)
                    .await?;
                Ok(Some(event))
            },
            ClientCommand::TypingStart { room } => {
                if !state.hub.is_subscribed(&room, self.conn_id) {
                    return Err(AppError::PermissionDenied(format!(
                        "join {room} before typing in it"
                    )));
                }
                if state.typing.start(&room, &self.user_id) {
                    state.hub.broadcast_except(
                        &room,
                        self.conn_id,
                        &ServerEvent::TypingStarted {
                            room: room.clone(),
                            user_id: self.user_id.clone(),
                        },
                    );
                }
                Ok(None)
            },
            ClientCommand::TypingStop { room } => {
                if state.typing.stop(&room, &self.user_id) {
                    state.hub.broadcast_except(
                        &room,
                        self.conn_id,
                        &ServerEvent::TypingStopped {
                            room: room.clone(),
                            user_id: self.user_id.clone(),
                        },
                    );
                }
                Ok(None)
            },
            ClientCommand::MarkRead { room, message_id } => {
                let event = state
                    .chat
                    .mark_read(self.conn_id, &self.user_id, &room, message_id)
                    .await?;
                Ok(Some(event))
            },
            ClientCommand::StartMeeting { channel_id, title } => {
                let session = state.meetings.start(&channel_id, &self.user_id, title).await?;
                Ok(Some(ServerEvent::MeetingJoined {
                    session_id: session.id,
                    channel_id,
                    room_url: session.room_url,
                    room_handle: session.room_handle,
                }))
            },
            ClientCommand::JoinMeeting { channel_id } => {
                let session = state.meetings.join(&channel_id, &self.user_id).await?;
                Ok(Some(ServerEvent::MeetingJoined {
                    session_id: session.id,
                    channel_id,
                    room_url: session.room_url,
                    room_handle: session.room_handle,
                }))
            },
            ClientCommand::GetMeetingToken { channel_id } => {
                let token = state.meetings.join_token(&channel_id, &self.user_id).await?;
                Ok(Some(ServerEvent::MeetingToken { channel_id, token }))
            },
            ClientCommand::LeaveMeeting { channel_id } => {
                state.meetings.leave(&channel_id, &self.user_id).await?;
                Ok(None)
            },
            ClientCommand::EndMeeting { channel_id } => {
                state.meetings.end(&channel_id, &self.user_id).await?;
                Ok(None)
            },
        }
    }

    /// Disconnect cleanup. Runs to completion regardless of how the
    /// socket closed: leaves every subscribed room (announcing departure
    /// and clearing typing state), releases presence and detaches the
    /// outbox. A user's meeting participation deliberately survives a
    /// dropped socket; only explicit leave/end or the provider's webhook
    /// removes them from a call.
    pub async fn disconnect(self) {
        for room in self.state.presence.rooms_of(self.conn_id) {
            self.state
                .rooms
                .leave(self.conn_id, &self.user_id, &room)
                .await;
        }
        if let Some(departure) = self.state.presence.unregister(self.conn_id) {
            if departure.went_offline {
                self.state.hub.broadcast_global(&ServerEvent::UserOffline {
                    user_id: departure.user_id,
                });
            }
        }
        self.state.hub.detach(self.conn_id, &self.user_id);
        debug!(conn_id = %self.conn_id, user_id = self.user_id, "connection cleaned up");
    }
}
