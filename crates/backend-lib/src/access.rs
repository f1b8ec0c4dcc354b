// ============================
// crates/backend-lib/src/access.rs
// ============================
//! Authorization and authentication collaborators.
//!
//! Policy design is out of scope for the core: both traits are consumed
//! as allow/deny oracles. `Roster` is the in-memory implementation used
//! by the binary and the tests.

use async_trait::async_trait;
use dashmap::DashMap;
use huddle_common::{ChannelId, Role, RoomId, UserId};

/// Answers "may this user touch this room" and "what is their channel
/// role". Gates join/send/start/end; the core never bypasses it.
#[async_trait]
pub trait Access: Send + Sync {
    async fn is_member(&self, user_id: &str, room: &RoomId) -> bool;
    async fn role_of(&self, user_id: &str, channel_id: &str) -> Role;
    /// Member list of a room; drives direct-conversation notification
    /// delivery to users who are not currently subscribed.
    async fn members(&self, room: &RoomId) -> Vec<UserId>;
}

/// Maps a handshake token to a user id. Token issuance lives elsewhere.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn verify(&self, token: &str) -> Option<UserId>;
}

/// In-memory membership roster.
#[derive(Default)]
pub struct Roster {
    members: DashMap<RoomId, Vec<UserId>>,
    roles: DashMap<(ChannelId, UserId), Role>,
    tokens: DashMap<String, UserId>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_member(&self, room: RoomId, user_id: impl Into<UserId>) {
        let user_id = user_id.into();
        let mut members = self.members.entry(room).or_default();
        if !members.contains(&user_id) {
            members.push(user_id);
        }
    }

    pub fn set_role(&self, channel_id: impl Into<ChannelId>, user_id: impl Into<UserId>, role: Role) {
        self.roles.insert((channel_id.into(), user_id.into()), role);
    }

    pub fn issue_token(&self, token: impl Into<String>, user_id: impl Into<UserId>) {
        self.tokens.insert(token.into(), user_id.into());
    }
}

#[async_trait]
impl Access for Roster {
    async fn is_member(&self, user_id: &str, room: &RoomId) -> bool {
        self.members
            .get(room)
            .is_some_and(|m| m.iter().any(|u| u == user_id))
    }

    async fn role_of(&self, user_id: &str, channel_id: &str) -> Role {
        self.roles
            .get(&(channel_id.to_string(), user_id.to_string()))
            .map_or(Role::Member, |r| *r)
    }

    async fn members(&self, room: &RoomId) -> Vec<UserId> {
        self.members.get(room).map(|m| m.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Authenticator for Roster {
    async fn verify(&self, token: &str) -> Option<UserId> {
        self.tokens.get(token).map(|u| u.clone())
    }
}
