// ============================
// crates/backend-lib/src/meeting.rs
// ============================
//! Meeting session lifecycle manager.
//!
//! One state machine per channel: `NoSession -> Active -> Ended`, with at
//! most one Active session per channel at any time. Starting provisions
//! an external call room first, then runs the store's atomic
//! check-then-create; a start that loses the race reaps its own orphaned
//! external room best-effort and surfaces `Conflict`. Teardown (explicit
//! end, last participant leaving, webhook force-leave) flips the durable
//! session exactly once; external-room deletion afterwards is best-effort
//! because the room self-expires anyway.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use huddle_common::{ChannelId, MeetingSession, RoomId};
use metrics::counter;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::access::Access;
use crate::calls::CallProvider;
use crate::error::AppError;
use crate::messages::ServerEvent;
use crate::rooms::RoomHub;
use crate::store::Store;

pub struct MeetingService {
    store: Arc<dyn Store>,
    provider: Arc<dyn CallProvider>,
    access: Arc<dyn Access>,
    hub: Arc<RoomHub>,
    /// Serializes the provision + check-then-create window per channel so
    /// a losing start can reap its orphan before returning.
    start_locks: DashMap<ChannelId, Arc<Mutex<()>>>,
    room_expiry: Duration,
}

impl MeetingService {
    pub fn new(
        store: Arc<dyn Store>,
        provider: Arc<dyn CallProvider>,
        access: Arc<dyn Access>,
        hub: Arc<RoomHub>,
        room_expiry: Duration,
    ) -> Self {
        Self {
            store,
            provider,
            access,
            hub,
            start_locks: DashMap::new(),
            room_expiry,
        }
    }

    fn start_lock(&self, channel_id: &str) -> Arc<Mutex<()>> {
        self.start_locks
            .entry(channel_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Start a call on a channel. The host is auto-enrolled as the first
    /// participant. Fails with `Conflict` when another session is already
    /// active; the caller may join that one instead.
    pub async fn start(
        &self,
        channel_id: &str,
        user_id: &str,
        title: Option<String>,
    ) -> Result<MeetingSession, AppError> {
        let channel_room = RoomId::channel(channel_id);
        if !self.access.is_member(user_id, &channel_room).await {
            return Err(AppError::PermissionDenied(format!(
                "{user_id} is not a member of channel {channel_id}"
            )));
        }

        // provision first: a provider failure here is fatal and leaves no
        // durable state behind
        let expires_at = Utc::now().timestamp() + self.room_expiry.as_secs() as i64;
        let room = self.provider.create_room(channel_id, expires_at).await?;

        let lock = self.start_lock(channel_id);
        let _start = lock.lock().await;

        let session = MeetingSession {
            id: Uuid::new_v4(),
            channel_id: channel_id.to_string(),
            host_id: user_id.to_string(),
            title,
            room_handle: room.handle.clone(),
            room_url: room.url,
            is_active: true,
            started_at: Utc::now(),
            ended_at: None,
        };
        match self.store.create_session_if_absent(session).await {
            Ok(session) => {
                counter!("meeting.started").increment(1);
                info!(channel_id, host = user_id, session_id = %session.id, "meeting started");
                self.hub.broadcast(
                    &channel_room,
                    &ServerEvent::MeetingStarted {
                        channel_id: channel_id.to_string(),
                        session: session.clone(),
                    },
                );
                Ok(session)
            },
            Err(err) => {
                // we provisioned a room nobody will use; reap it now
                // rather than waiting for its expiry
                if let Err(del) = self.provider.delete_room(&room.handle).await {
                    warn!(handle = room.handle, error = %del, "failed to reap orphaned call room");
                }
                Err(err)
            },
        }
    }

    /// Join (or rejoin) the channel's active call. Returns the session as
    /// the room access descriptor.
    pub async fn join(&self, channel_id: &str, user_id: &str) -> Result<MeetingSession, AppError> {
        let channel_room = RoomId::channel(channel_id);
        if !self.access.is_member(user_id, &channel_room).await {
            return Err(AppError::PermissionDenied(format!(
                "{user_id} is not a member of channel {channel_id}"
            )));
        }
        let session = self.require_active(channel_id).await?;
        self.store
            .upsert_participant(session.id, user_id, Utc::now())
            .await?;
        Ok(session)
    }

    /// Short-lived provider credential for a recorded participant.
    /// Admin-equivalent channel roles are marked as presenters.
    pub async fn join_token(&self, channel_id: &str, user_id: &str) -> Result<String, AppError> {
        let channel_room = RoomId::channel(channel_id);
        if !self.access.is_member(user_id, &channel_room).await {
            return Err(AppError::PermissionDenied(format!(
                "{user_id} is not a member of channel {channel_id}"
            )));
        }
        let session = self.require_active(channel_id).await?;
        let participant = self
            .store
            .participant(session.id, user_id)
            .await?
            .filter(|p| p.is_active())
            .ok_or_else(|| {
                AppError::PermissionDenied(format!(
                    "{user_id} has not joined the meeting on {channel_id}"
                ))
            })?;
        let is_presenter = self
            .access
            .role_of(&participant.user_id, channel_id)
            .await
            .is_admin_equivalent();
        self.provider
            .create_access_token(&session.room_handle, user_id, is_presenter)
            .await
    }

    /// Mark the participant as left. Idempotent; when the last active
    /// participant leaves, the session winds down.
    pub async fn leave(&self, channel_id: &str, user_id: &str) -> Result<(), AppError> {
        let Some(session) = self.store.active_session(channel_id).await? else {
            // nothing to leave; the session may have just ended under us
            return Ok(());
        };
        self.depart(&session, user_id).await
    }

    /// Host-only: end the session for everyone, draining all still-active
    /// participants in one step.
    pub async fn end(&self, channel_id: &str, user_id: &str) -> Result<(), AppError> {
        let session = self.require_active(channel_id).await?;
        if session.host_id != user_id {
            return Err(AppError::PermissionDenied(
                "only the host may end the meeting".into(),
            ));
        }
        if self
            .store
            .end_session_draining(session.id, Utc::now())
            .await?
        {
            self.finish(&session).await;
        }
        Ok(())
    }

    /// Webhook-driven departure signal, keyed by the external room
    /// handle. A handle with no active session is a no-op.
    pub async fn force_leave(&self, room_handle: &str, user_id: &str) -> Result<(), AppError> {
        let Some(session) = self.store.active_session_by_handle(room_handle).await? else {
            return Ok(());
        };
        self.depart(&session, user_id).await
    }

    async fn depart(&self, session: &MeetingSession, user_id: &str) -> Result<(), AppError> {
        if !self
            .store
            .mark_participant_left(session.id, user_id, Utc::now())
            .await?
        {
            // unknown participant or already left
            return Ok(());
        }
        let remaining = self.store.active_participant_count(session.id).await?;
        if remaining == 0 && self.store.end_session(session.id, Utc::now()).await? {
            self.finish(session).await;
        }
        Ok(())
    }

    /// Post-transition teardown: best-effort external deletion, event and
    /// metrics. The durable state is already Ended when this runs, so a
    /// provider failure here is logged and swallowed.
    async fn finish(&self, session: &MeetingSession) {
        if let Err(err) = self.provider.delete_room(&session.room_handle).await {
            warn!(
                handle = session.room_handle,
                error = %err,
                "external room deletion failed; room will expire on its own"
            );
        }
        counter!("meeting.ended").increment(1);
        info!(channel_id = session.channel_id, session_id = %session.id, "meeting ended");
        self.hub.broadcast(
            &RoomId::channel(&session.channel_id),
            &ServerEvent::MeetingEnded {
                channel_id: session.channel_id.clone(),
                session_id: session.id,
            },
        );
    }

    async fn require_active(&self, channel_id: &str) -> Result<MeetingSession, AppError> {
        self.store
            .active_session(channel_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!("no active meeting on channel {channel_id}"))
            })
    }
}
