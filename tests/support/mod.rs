//! Shared setup for the integration test binaries in this directory. Not a
//! test target itself (lives under `tests/support/`, the layout cargo uses
//! to exclude a helper module from its own test harness).

use std::collections::HashSet;
use std::sync::Arc;

use game_session_orchestrator::config::Config;
use game_session_orchestrator::protocol::{GameSettings, Room};
use game_session_orchestrator::server::GameServer;
use uuid::Uuid;

/// A config with short timers, suitable for tests that need an action phase
/// or continue phase to actually expire within the test's lifetime.
#[must_use]
pub fn fast_config() -> Config {
    let mut cfg = Config::default();
    cfg.game.default_discussion_time_sec = 1;
    cfg.game.default_continue_time_sec = 1;
    cfg.game.phase_tick_secs = 1;
    cfg.game.debounce_window_ms = 50;
    cfg
}

/// Boots a `GameServer` wired with the given config.
pub async fn build_server(config: Config) -> Arc<GameServer> {
    GameServer::new(config).await.expect("server construction")
}

/// Seeds a room with `admin` plus `extra_members`, all marked ready, and
/// inserts it into the server's store. Returns the room id.
pub async fn seed_ready_room(server: &Arc<GameServer>, admin: Uuid, extra_members: &[Uuid]) -> Uuid {
    let room_id = Uuid::new_v4();
    let mut member_ids = vec![admin];
    member_ids.extend_from_slice(extra_members);
    let room = Room {
        id: room_id,
        name: "Test Room".into(),
        world_id: Uuid::new_v4(),
        admin_id: admin,
        member_ids: member_ids.clone(),
        ready_players: member_ids.into_iter().collect::<HashSet<_>>(),
        max_players: 8,
        settings: GameSettings::from_config(&server.config().game),
        game_id: None,
    };
    server.store().insert_room(room).await.expect("insert_room");
    room_id
}

#[must_use]
pub fn bearer(user_id: Uuid) -> String {
    format!("Bearer {user_id}")
}
