// ============================
// crates/backend-bin/src/main.rs
// ============================
//! Development server binary: in-memory roster, store and call provider
//! behind the realtime core.

use std::sync::Arc;

use anyhow::Result;
use huddle_backend_lib::access::Roster;
use huddle_backend_lib::calls::LocalCallProvider;
use huddle_backend_lib::config::Settings;
use huddle_backend_lib::store::MemoryStore;
use huddle_backend_lib::{ws_router, AppState};
use huddle_common::{Role, RoomId};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::load()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(settings.log_level.clone())),
        )
        .init();

    let roster = Arc::new(Roster::new());
    seed_dev_roster(&roster);

    let state = AppState::new(
        settings.clone(),
        roster.clone(),
        roster,
        Arc::new(MemoryStore::new()),
        Arc::new(LocalCallProvider::new()),
    );
    state.spawn_typing_sweeper();

    let listener = tokio::net::TcpListener::bind(settings.bind_addr).await?;
    info!(addr = %settings.bind_addr, "huddle server listening");
    axum::serve(listener, ws_router::router(state)).await?;
    Ok(())
}

/// Development fixtures: a `general` channel with two users and static
/// tokens so a client can connect without an identity provider.
fn seed_dev_roster(roster: &Roster) {
    let general = RoomId::channel("general");
    for user in ["alice", "bob"] {
        roster.add_member(general.clone(), user);
        roster.issue_token(format!("dev-{user}"), user);
    }
    roster.set_role("general", "alice", Role::Admin);
    info!("seeded dev roster: users alice/bob, tokens dev-alice/dev-bob");
}
