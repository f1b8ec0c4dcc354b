// ============================
// crates/backend-lib/src/config.rs
// ============================
//! Configuration management.
use std::net::SocketAddr;

use anyhow::Result;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Server bind address.
    pub bind_addr: SocketAddr,
    /// Log filter used when RUST_LOG is unset.
    pub log_level: String,
    /// Seconds a typing indicator stays live without a refresh.
    pub typing_ttl_secs: u64,
    /// Lifetime of an externally provisioned call room, in seconds.
    pub call_room_expiry_secs: u64,
    /// Shared secret for verifying call-provider webhooks.
    pub webhook_secret: String,
    /// Maximum accepted message content length, in characters.
    pub max_message_len: usize,
    /// Capacity of each connection's outbound event queue.
    pub event_queue_depth: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:3000".parse().unwrap(),
            log_level: "info".to_string(),
            typing_ttl_secs: 3,
            call_room_expiry_secs: 60 * 60, // external rooms self-expire after 1h
            webhook_secret: "change-me".to_string(),
            max_message_len: 4000,
            event_queue_depth: 64,
        }
    }
}

impl Settings {
    /// Load settings from `huddle.toml` and `HUDDLE_`-prefixed env vars,
    /// falling back to defaults for anything unset.
    pub fn load() -> Result<Self> {
        let settings = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file("huddle.toml"))
            .merge(Env::prefixed("HUDDLE_"))
            .extract()?;
        Ok(settings)
    }
}
