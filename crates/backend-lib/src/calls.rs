// ============================
// crates/backend-lib/src/calls.rs
// ============================
//! External call-room provider seam.
//!
//! The lifecycle manager only ever talks to this trait. Provider failures
//! during room *creation* are fatal to the operation; failures during
//! teardown are best-effort and an "already gone" room counts as deleted.

use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

use crate::error::AppError;

/// Access descriptor of a provisioned call room.
#[derive(Debug, Clone)]
pub struct CallRoom {
    pub url: String,
    pub handle: String,
}

#[async_trait]
pub trait CallProvider: Send + Sync {
    /// Provision a room that self-expires at `expires_at` (unix epoch
    /// seconds), so orphans cannot outlive their usefulness.
    async fn create_room(&self, name: &str, expires_at: i64) -> Result<CallRoom, AppError>;

    /// Tear a room down. Must be idempotent: deleting an unknown or
    /// already-expired handle succeeds.
    async fn delete_room(&self, handle: &str) -> Result<(), AppError>;

    /// Short-lived access credential for one participant.
    async fn create_access_token(
        &self,
        handle: &str,
        display_name: &str,
        is_presenter: bool,
    ) -> Result<String, AppError>;
}

/// Self-contained provider for development and tests: fabricates URLs and
/// handles instead of calling a vendor API.
#[derive(Default)]
pub struct LocalCallProvider {
    rooms: DashMap<String, i64>,
}

impl LocalCallProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}

#[async_trait]
impl CallProvider for LocalCallProvider {
    async fn create_room(&self, name: &str, expires_at: i64) -> Result<CallRoom, AppError> {
        let handle = format!("{}-{}", name, Uuid::new_v4());
        self.rooms.insert(handle.clone(), expires_at);
        Ok(CallRoom {
            url: format!("https://calls.local/{handle}"),
            handle,
        })
    }

    async fn delete_room(&self, handle: &str) -> Result<(), AppError> {
        // unknown handle: already gone, which is what we wanted
        self.rooms.remove(handle);
        Ok(())
    }

    async fn create_access_token(
        &self,
        handle: &str,
        display_name: &str,
        is_presenter: bool,
    ) -> Result<String, AppError> {
        if !self.rooms.contains_key(handle) {
            return Err(AppError::NotFound(format!("call room {handle}")));
        }
        let grant = if is_presenter { "presenter" } else { "attendee" };
        Ok(format!("{handle}:{display_name}:{grant}:{}", Uuid::new_v4()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_then_delete_is_idempotent() {
        let provider = LocalCallProvider::new();
        let room = provider.create_room("standup", 1_700_000_000).await.unwrap();
        assert!(room.url.contains(&room.handle));
        assert_eq!(provider.room_count(), 1);

        provider.delete_room(&room.handle).await.unwrap();
        // second delete of the same handle still succeeds
        provider.delete_room(&room.handle).await.unwrap();
        assert_eq!(provider.room_count(), 0);
    }

    #[tokio::test]
    async fn tokens_encode_presenter_grant() {
        let provider = LocalCallProvider::new();
        let room = provider.create_room("standup", 1_700_000_000).await.unwrap();
        let token = provider
            .create_access_token(&room.handle, "alice", true)
            .await
            .unwrap();
        assert!(token.contains("presenter"));
        let token = provider
            .create_access_token(&room.handle, "bob", false)
            .await
            .unwrap();
        assert!(token.contains("attendee"));
        assert!(provider
            .create_access_token("missing", "x", false)
            .await
            .is_err());
    }
}
