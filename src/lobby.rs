//! `LobbyToGame` (§4.7, C7): atomic promotion of a ready lobby into a running
//! game. The only component that creates a [`Game`]; everything after
//! creation (the first chapter, the opened action phase) is handled by
//! [`crate::engine::GameEngine::initialize_first_chapter`], run as a
//! fire-and-forget background task exactly as the original `create_game`
//! route kicked off story generation without blocking the HTTP response.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use crate::clock::{Clock, IdGen};
use crate::database::GameStore;
use crate::engine::GameEngine;
use crate::protocol::{
    CoreError, Game, GameId, GameSettings, GameState, Member, MemberRole, RoomId, UserId,
};

pub struct LobbyToGame<C: Clock + 'static> {
    store: Arc<dyn GameStore>,
    engine: Arc<GameEngine<C>>,
    clock: Arc<C>,
    id_gen: Arc<dyn IdGen>,
}

impl<C: Clock + 'static> LobbyToGame<C> {
    #[must_use]
    pub fn new(
        store: Arc<dyn GameStore>,
        engine: Arc<GameEngine<C>>,
        clock: Arc<C>,
        id_gen: Arc<dyn IdGen>,
    ) -> Self {
        Self {
            store,
            engine,
            clock,
            id_gen,
        }
    }

    /// Promotes `room_id` into a running game. Idempotent: if the room is
    /// already linked to a game, returns that game's id rather than erroring
    /// (§4.7 preconditions).
    pub async fn start_game_from_room(
        &self,
        room_id: RoomId,
        caller_user_id: UserId,
    ) -> Result<GameId, CoreError> {
        let room = self
            .store
            .find_room(room_id)
            .await?
            .ok_or(CoreError::NotFound("room"))?;

        if let Some(existing) = room.game_id {
            info!(%room_id, game_id = %existing, "start_game_from_room: already linked, returning existing game");
            return Ok(existing);
        }

        if room.admin_id != caller_user_id {
            return Err(CoreError::Forbidden("only the room admin may start the game"));
        }

        if !room.all_members_ready() {
            return Err(CoreError::PreconditionFailed("not all room members are ready"));
        }

        let game_id = self.id_gen.new_id();

        // CAS-link the room to the new game id *before* any Game document
        // exists. A losing race therefore never leaves an orphan Game behind
        // (§4.7 step 3's "delete the orphan game docs" is unnecessary here,
        // there is nothing to delete because nothing was created yet).
        let won = self.store.link_room_to_game(room_id, game_id).await?;
        if !won {
            let room = self
                .store
                .find_room(room_id)
                .await?
                .ok_or(CoreError::NotFound("room"))?;
            return room.game_id.ok_or(CoreError::Conflict(
                "room reports no game_id after a lost start_game_from_room race",
            ));
        }

        let now = self.clock.now();
        let game = Game {
            id: game_id,
            room_id,
            name: room.name.clone(),
            world_id: room.world_id,
            max_chapters: default_max_chapters_for(&room),
            max_players: room.max_players,
            settings: room.settings,
            owner_id: caller_user_id,
            admin_id: caller_user_id,
            current_chapter: 0,
            state: GameState::Initializing,
            action_phase: None,
            continue_ready: HashSet::new(),
            advancing: false,
            created_at: now,
            finished_at: None,
            failure_reason: None,
        };
        self.store.create_game(game).await?;

        let members: Vec<Member> = room
            .member_ids
            .iter()
            .map(|&user_id| Member {
                game_id,
                user_id,
                character_id: None,
                role: if user_id == room.admin_id {
                    MemberRole::Admin
                } else {
                    MemberRole::Player
                },
                joined_at: now,
                is_ready: true,
            })
            .collect();
        self.store.insert_members(members).await?;

        info!(%room_id, %game_id, "room promoted to game, generating first chapter in background");

        let engine = Arc::clone(&self.engine);
        tokio::spawn(async move {
            engine.initialize_first_chapter(game_id).await;
        });

        Ok(game_id)
    }
}

/// `Room` carries no `max_chapters` field (lobby authoring is out of scope);
/// new games start at the server default and an admin can raise or lower it
/// afterward via `update_settings`, bounded by `max_chapters_ceiling`.
fn default_max_chapters_for(room: &crate::protocol::Room) -> u32 {
    let _ = room;
    10
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::Broadcaster;
    use crate::catalog::InMemoryWorldCatalog;
    use crate::clock::test_support::{FixedClock, SequentialIdGen};
    use crate::config::GameConfig;
    use crate::database::InMemoryStore;
    use crate::generator::{FallbackGenerator, NarrativeGenerator};
    use crate::phase_timer::PhaseTimer;
    use crate::protocol::Room;

    fn build(
    ) -> (
        LobbyToGame<FixedClock>,
        Arc<dyn GameStore>,
        Arc<FixedClock>,
    ) {
        let store: Arc<dyn GameStore> = Arc::new(InMemoryStore::new());
        let broadcaster = Arc::new(Broadcaster::new());
        let generator: Arc<dyn NarrativeGenerator> = Arc::new(FallbackGenerator::new());
        let catalog = Arc::new(InMemoryWorldCatalog::new());
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let mut config = GameConfig::default();
        config.phase_tick_secs = 1;
        let phase_timer = Arc::new(PhaseTimer::new(
            Arc::clone(&store),
            Arc::clone(&broadcaster),
            Arc::clone(&clock),
            config.clone(),
        ));
        let engine = Arc::new(GameEngine::new(
            Arc::clone(&store),
            broadcaster,
            generator,
            catalog,
            phase_timer,
            Arc::clone(&clock),
            config,
        ));
        let id_gen = Arc::new(SequentialIdGen::default());
        let lobby = LobbyToGame::new(Arc::clone(&store), engine, Arc::clone(&clock), id_gen);
        (lobby, store, clock)
    }

    fn ready_room(admin: Uuid, members: &[Uuid]) -> Room {
        Room {
            id: Uuid::new_v4(),
            name: "Test Room".into(),
            world_id: Uuid::new_v4(),
            admin_id: admin,
            member_ids: members.to_vec(),
            ready_players: members.iter().copied().collect(),
            max_players: 8,
            settings: GameSettings::from_config(&GameConfig::default()),
            game_id: None,
        }
    }

    #[tokio::test]
    async fn starts_game_and_snapshots_members() {
        let (lobby, store, _clock) = build();
        let admin = Uuid::new_v4();
        let other = Uuid::new_v4();
        let room = ready_room(admin, &[admin, other]);
        let room_id = room.id;
        store.insert_room(room).await.unwrap();

        let game_id = lobby.start_game_from_room(room_id, admin).await.unwrap();

        let game = store.find_game(game_id).await.unwrap().unwrap();
        assert_eq!(game.state, GameState::Initializing);
        assert_eq!(game.current_chapter, 0);

        let members = store.list_members(game_id).await.unwrap();
        assert_eq!(members.len(), 2);
        assert!(members.iter().any(|m| m.role == MemberRole::Admin && m.user_id == admin));
    }

    #[tokio::test]
    async fn rejects_non_admin_caller() {
        let (lobby, store, _clock) = build();
        let admin = Uuid::new_v4();
        let other = Uuid::new_v4();
        let room = ready_room(admin, &[admin, other]);
        let room_id = room.id;
        store.insert_room(room).await.unwrap();

        let err = lobby.start_game_from_room(room_id, other).await.unwrap_err();
        assert!(matches!(err, CoreError::Forbidden(_)));
    }

    #[tokio::test]
    async fn rejects_when_not_all_members_ready() {
        let (lobby, store, _clock) = build();
        let admin = Uuid::new_v4();
        let other = Uuid::new_v4();
        let mut room = ready_room(admin, &[admin, other]);
        room.ready_players.remove(&other);
        let room_id = room.id;
        store.insert_room(room).await.unwrap();

        let err = lobby.start_game_from_room(room_id, admin).await.unwrap_err();
        assert!(matches!(err, CoreError::PreconditionFailed(_)));
    }

    #[tokio::test]
    async fn start_game_from_room_is_idempotent() {
        let (lobby, store, _clock) = build();
        let admin = Uuid::new_v4();
        let room = ready_room(admin, &[admin]);
        let room_id = room.id;
        store.insert_room(room).await.unwrap();

        let first = lobby.start_game_from_room(room_id, admin).await.unwrap();
        let second = lobby.start_game_from_room(room_id, admin).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn unknown_room_is_not_found() {
        let (lobby, _store, _clock) = build();
        let err = lobby
            .start_game_from_room(Uuid::new_v4(), Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }
}
