// ============================
// crates/backend-lib/src/lib.rs
// ============================
//! Realtime collaboration core: presence, rooms, message and reaction
//! sync, typing indicators and meeting lifecycle over a WebSocket edge.
//!
//! The binary crate wires concrete collaborators (roster, store, call
//! provider) into an [`AppState`] and serves [`ws_router::router`].

pub mod access;
pub mod calls;
pub mod chat;
pub mod config;
pub mod connection;
pub mod error;
pub mod meeting;
pub mod messages;
pub mod presence;
pub mod rooms;
pub mod store;
pub mod typing;
pub mod webhook;
pub mod ws_router;

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::debug;

use crate::access::{Access, Authenticator};
use crate::calls::CallProvider;
use crate::chat::ChatService;
use crate::config::Settings;
use crate::meeting::MeetingService;
use crate::messages::ServerEvent;
use crate::presence::PresenceRegistry;
use crate::rooms::{RoomHub, RoomService};
use crate::store::Store;
use crate::typing::TypingTracker;

/// Shared application state handed to every connection and route.
pub struct AppState {
    pub settings: Settings,
    pub authenticator: Arc<dyn Authenticator>,
    pub presence: Arc<PresenceRegistry>,
    pub hub: Arc<RoomHub>,
    pub typing: Arc<TypingTracker>,
    pub rooms: RoomService,
    pub chat: ChatService,
    pub meetings: MeetingService,
}

impl AppState {
    pub fn new(
        settings: Settings,
        access: Arc<dyn Access>,
        authenticator: Arc<dyn Authenticator>,
        store: Arc<dyn Store>,
        provider: Arc<dyn CallProvider>,
    ) -> Arc<Self> {
        let presence = Arc::new(PresenceRegistry::new());
        let hub = Arc::new(RoomHub::new());
        let typing = Arc::new(TypingTracker::new(Duration::from_secs(
            settings.typing_ttl_secs,
        )));
        let rooms = RoomService::new(
            hub.clone(),
            presence.clone(),
            typing.clone(),
            access.clone(),
        );
        let chat = ChatService::new(
            hub.clone(),
            access.clone(),
            store.clone(),
            settings.max_message_len,
        );
        let meetings = MeetingService::new(
            store,
            provider,
            access,
            hub.clone(),
            Duration::from_secs(settings.call_room_expiry_secs),
        );
        Arc::new(Self {
            settings,
            authenticator,
            presence,
            hub,
            typing,
            rooms,
            chat,
            meetings,
        })
    }

    /// Background task that evicts expired typing entries and broadcasts
    /// the `typing_stopped` each expiry owes the room.
    pub fn spawn_typing_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let state = self.clone();
        let period = Duration::from_secs(state.settings.typing_ttl_secs.max(1));
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(period / 2);
            loop {
                tick.tick().await;
                for (room, user_id) in state.typing.sweep() {
                    debug!(%room, user_id, "typing burst expired");
                    state
                        .hub
                        .broadcast(&room, &ServerEvent::TypingStopped { room: room.clone(), user_id });
                }
            }
        })
    }
}
