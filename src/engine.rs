//! `GameEngine` (§4.5, C5): the state machine, its single-flight lock, and
//! the chapter-advancement pipeline. This is the core of the system, every
//! other component exists to feed it a trigger or consume its output.

use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::broadcast::Broadcaster;
use crate::catalog::WorldCatalog;
use crate::clock::Clock;
use crate::config::GameConfig;
use crate::database::GameStore;
use crate::generator::{GenerationContext, NarrativeGenerator};
use crate::phase_timer::{ExpireFuture, PhaseTimer};
use crate::protocol::{
    Action, ActionStatus, Chapter, CoreError, Game, GameId, GameState, GenerationKind, Phase,
    ServerEvent, UserId,
};

pub struct GameEngine<C: Clock + 'static> {
    store: Arc<dyn GameStore>,
    broadcaster: Arc<Broadcaster>,
    generator: Arc<dyn NarrativeGenerator>,
    catalog: Arc<dyn WorldCatalog>,
    phase_timer: Arc<PhaseTimer<C>>,
    clock: Arc<C>,
    config: GameConfig,
}

impl<C: Clock + 'static> GameEngine<C> {
    #[must_use]
    pub fn new(
        store: Arc<dyn GameStore>,
        broadcaster: Arc<Broadcaster>,
        generator: Arc<dyn NarrativeGenerator>,
        catalog: Arc<dyn WorldCatalog>,
        phase_timer: Arc<PhaseTimer<C>>,
        clock: Arc<C>,
        config: GameConfig,
    ) -> Self {
        Self {
            store,
            broadcaster,
            generator,
            catalog,
            phase_timer,
            clock,
            config,
        }
    }

    /// Whether any of §4.5's three closure triggers hold for `game` given
    /// the current member count. Evaluated by `SessionCoordinator` after
    /// `propose_action`/`mark_continue`, and by `PhaseTimer` on every tick.
    #[must_use]
    pub fn closure_trigger_met(&self, game: &Game, members_total: usize) -> bool {
        if game.state != GameState::ActionPhase {
            return false;
        }
        let expired = game
            .action_phase
            .is_some_and(|window| window.is_expired(self.clock.now()));
        if expired {
            return true;
        }
        let ready = game.continue_ready.len();
        if game.settings.require_all_players {
            members_total > 0 && ready == members_total
        } else {
            ready >= self.config.quorum_threshold(members_total)
        }
    }

    /// Acquires the `advancing` single-flight lock and, if won, runs the
    /// advance pipeline. Silently returns if another caller already holds
    /// the lock or the expected chapter has moved on (the normal, expected
    /// outcome for the losing side of a race, §8 scenario S3).
    pub async fn finalize(self: &Arc<Self>, game_id: GameId, expected_chapter: u32) {
        if let Err(err) = self.debounce(game_id).await {
            warn!(%game_id, error = %err, "finalize: debounce read failed");
            return;
        }

        let predicate_chapter = expected_chapter;
        let won = self
            .store
            .update_game_if(
                game_id,
                Box::new(move |g: &Game| {
                    g.state == GameState::ActionPhase
                        && g.current_chapter == predicate_chapter
                        && !g.advancing
                }),
                Box::new(|g: &mut Game| {
                    g.advancing = true;
                    g.state = GameState::Closing;
                }),
            )
            .await;

        match won {
            Ok(true) => {
                let channel = format!("game:{game_id}");
                self.broadcaster.publish(
                    &channel,
                    ServerEvent::PhaseChanged {
                        phase: Phase::Closing,
                        message: None,
                    },
                );
                self.broadcaster.publish(
                    &channel,
                    ServerEvent::StateChanged {
                        state: GameState::Closing,
                    },
                );
                self.advance(game_id, expected_chapter).await;
            }
            Ok(false) => {
                info!(%game_id, expected_chapter, "finalize: lost race or phase already advanced");
            }
            Err(err) => {
                error!(%game_id, error = %err, "finalize: store error acquiring advancing lock");
            }
        }
    }

    /// If invoked within `debounce_window_ms` of the phase's `started_at`,
    /// sleeps out the remainder before the caller proceeds to the CAS. Guards
    /// against spurious expirations from a prior timer's last tick landing
    /// just after a new phase opened.
    async fn debounce(&self, game_id: GameId) -> anyhow::Result<()> {
        let Some(game) = self.store.find_game(game_id).await? else {
            return Ok(());
        };
        let Some(window) = game.action_phase else {
            return Ok(());
        };
        let elapsed = (self.clock.now() - window.started_at).num_milliseconds();
        let window_ms = i64::try_from(self.config.debounce_window_ms).unwrap_or(i64::MAX);
        if elapsed >= 0 && elapsed < window_ms {
            let remaining = u64::try_from(window_ms - elapsed).unwrap_or(0);
            tokio::time::sleep(std::time::Duration::from_millis(remaining)).await;
        }
        Ok(())
    }

    /// Steps 1-9 of §4.5, run once the `advancing` lock is held.
    async fn advance(self: &Arc<Self>, game_id: GameId, closing_chapter: u32) {
        let game = match self.store.find_game(game_id).await {
            Ok(Some(game)) => game,
            Ok(None) => {
                error!(%game_id, "advance: game vanished while holding lock");
                return;
            }
            Err(err) => {
                error!(%game_id, error = %err, "advance: store read failed");
                self.release_lock(game_id).await;
                return;
            }
        };

        if game.state == GameState::Finished || game.current_chapter >= game.max_chapters {
            self.release_lock(game_id).await;
            return;
        }

        let chapters = self.store.list_chapters(game_id).await.unwrap_or_default();
        let previous_chapters: Vec<String> = chapters.into_iter().map(|c| c.content).collect();
        let members = self.store.list_members(game_id).await.unwrap_or_default();
        let mut characters = Vec::with_capacity(members.len());
        for member in &members {
            if let Some(character_id) = member.character_id {
                characters.push(self.catalog.character(character_id).await);
            }
        }
        let world = self.catalog.world(game.world_id).await;
        let pending = self
            .store
            .list_pending_actions(game_id, closing_chapter)
            .await
            .unwrap_or_default();

        let kind = if !pending.is_empty() {
            GenerationKind::WithActions
        } else if closing_chapter == 0 {
            GenerationKind::First
        } else {
            GenerationKind::Automatic
        };

        let ctx = GenerationContext {
            world,
            previous_chapters,
            characters,
            actions: pending.iter().map(|a| a.action_text.clone()).collect(),
            total_chapters: game.max_chapters,
            chapter_index: closing_chapter + 1,
        };

        let text = match self.generator.generate(kind, ctx).await {
            Ok(text) => text,
            Err(err) => {
                error!(%game_id, error = %err, "advance: generator failed mid-game, holding progress");
                self.release_lock(game_id).await;
                return;
            }
        };

        let next_chapter = closing_chapter + 1;
        let appended = match self.store.append_chapter(game_id, next_chapter, text).await {
            Ok(appended) => appended,
            Err(err) => {
                error!(%game_id, error = %err, "advance: append_chapter store error");
                self.release_lock(game_id).await;
                return;
            }
        };
        if !appended {
            info!(%game_id, next_chapter, "advance: chapter already appended by another process");
            self.release_lock(game_id).await;
            return;
        }

        let finishing = next_chapter >= game.max_chapters;
        let now = self.clock.now();
        let mutation_result = self
            .store
            .update_game_if(
                game_id,
                Box::new(|g: &Game| g.advancing),
                Box::new(move |g: &mut Game| {
                    g.current_chapter = next_chapter;
                    g.continue_ready.clear();
                    g.advancing = false;
                    if finishing {
                        g.state = GameState::Finished;
                        g.finished_at = Some(now);
                        g.action_phase = None;
                    } else {
                        g.state = GameState::ActionPhase;
                        g.action_phase = Some(crate::protocol::ActionPhaseWindow::open(
                            now,
                            g.settings.discussion_time_sec,
                        ));
                    }
                }),
            )
            .await;

        if let Err(err) = mutation_result {
            error!(%game_id, error = %err, "advance: failed to clear advancing after chapter append");
            return;
        }

        let channel = format!("game:{game_id}");
        self.broadcaster.publish(
            &channel,
            ServerEvent::ChapterCreated {
                chapter_number: next_chapter,
                discussion_seconds: game.settings.discussion_time_sec,
            },
        );

        if let Err(err) = self.store.archive_pending_actions(game_id, closing_chapter).await {
            warn!(%game_id, error = %err, "advance: archive_pending_actions failed");
        }

        if finishing {
            self.broadcaster.publish(
                &channel,
                ServerEvent::StateChanged {
                    state: GameState::Finished,
                },
            );
            self.broadcaster.publish(&channel, ServerEvent::Finished { game_id });
            info!(%game_id, chapter = next_chapter, "game finished");
            return;
        }

        let Ok(Some(refreshed)) = self.store.find_game(game_id).await else {
            return;
        };
        let Some(window) = refreshed.action_phase else {
            return;
        };

        self.broadcaster.publish(
            &channel,
            ServerEvent::ActionPhaseStarted {
                ends_at: window.ends_at,
                seconds_total: window.seconds_total,
                auto_continue: refreshed.settings.auto_continue,
            },
        );
        self.broadcaster.publish(
            &channel,
            ServerEvent::PhaseChanged {
                phase: Phase::ActionPhase,
                message: None,
            },
        );
        self.broadcaster.publish(
            &channel,
            ServerEvent::StateChanged {
                state: GameState::ActionPhase,
            },
        );
        let total = members.len() as u32;
        self.broadcaster.publish(
            &channel,
            ServerEvent::ContinueUpdate {
                ready_count: 0,
                total,
                remaining_seconds: window.seconds_total,
            },
        );
        info!(%game_id, chapter = next_chapter, "action phase opened");

        let engine = Arc::clone(self);
        let on_expire: crate::phase_timer::ExpireCallback = Arc::new(move || {
            let engine = Arc::clone(&engine);
            Box::pin(async move { engine.finalize(game_id, next_chapter).await }) as ExpireFuture
        });
        self.phase_timer.arm(game_id, next_chapter, on_expire);
    }

    async fn release_lock(&self, game_id: GameId) {
        let _ = self
            .store
            .update_game_if(
                game_id,
                Box::new(|g: &Game| g.advancing),
                Box::new(|g: &mut Game| {
                    g.advancing = false;
                    g.state = GameState::ActionPhase;
                }),
            )
            .await;
    }

    /// Generates and opens the first chapter for a newly `initializing`
    /// game. Run as LobbyToGame's background task; transitions the game to
    /// `action_phase` on success or `failed` on a fatal generator error.
    pub async fn initialize_first_chapter(self: &Arc<Self>, game_id: GameId) {
        let Ok(Some(game)) = self.store.find_game(game_id).await else {
            error!(%game_id, "initialize_first_chapter: game not found");
            return;
        };
        let members = self.store.list_members(game_id).await.unwrap_or_default();
        let mut characters = Vec::with_capacity(members.len());
        for member in &members {
            if let Some(character_id) = member.character_id {
                characters.push(self.catalog.character(character_id).await);
            }
        }
        let world = self.catalog.world(game.world_id).await;
        let ctx = GenerationContext {
            world,
            previous_chapters: vec![],
            characters,
            actions: vec![],
            total_chapters: game.max_chapters,
            chapter_index: 1,
        };

        let text = match self.generator.generate(GenerationKind::First, ctx).await {
            Ok(text) => text,
            Err(err) => {
                error!(%game_id, error = %err, "initialize_first_chapter: fatal generator error");
                let _ = self
                    .store
                    .update_game_if(
                        game_id,
                        Box::new(|g: &Game| g.state == GameState::Initializing),
                        Box::new(|g: &mut Game| {
                            g.state = GameState::Failed;
                            g.failure_reason = Some(err.to_string());
                        }),
                    )
                    .await;
                let channel = format!("game:{game_id}");
                self.broadcaster.publish(
                    &channel,
                    ServerEvent::StateChanged {
                        state: GameState::Failed,
                    },
                );
                self.broadcaster.publish(&channel, ServerEvent::Failed { error: err.to_string() });
                return;
            }
        };

        match self.store.append_chapter(game_id, 1, text).await {
            Ok(true) => {}
            Ok(false) => {
                warn!(%game_id, "initialize_first_chapter: chapter 1 already present");
                return;
            }
            Err(err) => {
                error!(%game_id, error = %err, "initialize_first_chapter: append_chapter failed");
                return;
            }
        }

        let now = self.clock.now();
        let discussion_secs = game.settings.discussion_time_sec;
        let opened = self
            .store
            .update_game_if(
                game_id,
                Box::new(|g: &Game| g.state == GameState::Initializing),
                Box::new(move |g: &mut Game| {
                    g.current_chapter = 1;
                    g.state = GameState::ActionPhase;
                    g.action_phase = Some(crate::protocol::ActionPhaseWindow::open(now, discussion_secs));
                }),
            )
            .await
            .unwrap_or(false);
        if !opened {
            warn!(%game_id, "initialize_first_chapter: game left `initializing` before phase could open");
            return;
        }

        self.broadcaster.publish(
            &format!("room:{}", game.room_id),
            ServerEvent::RoomStarted { game_id },
        );
        let channel = format!("game:{game_id}");
        self.broadcaster.publish(
            &channel,
            ServerEvent::ChapterCreated {
                chapter_number: 1,
                discussion_seconds: discussion_secs,
            },
        );
        self.broadcaster.publish(
            &channel,
            ServerEvent::ActionPhaseStarted {
                ends_at: now + chrono::Duration::seconds(i64::from(discussion_secs)),
                seconds_total: discussion_secs,
                auto_continue: game.settings.auto_continue,
            },
        );
        self.broadcaster.publish(
            &channel,
            ServerEvent::StateChanged {
                state: GameState::ActionPhase,
            },
        );
        info!(%game_id, "first chapter generated, action phase opened");

        let engine = Arc::clone(self);
        let on_expire: crate::phase_timer::ExpireCallback = Arc::new(move || {
            let engine = Arc::clone(&engine);
            Box::pin(async move { engine.finalize(game_id, 1).await }) as ExpireFuture
        });
        self.phase_timer.arm(game_id, 1, on_expire);
    }

    /// Admin chapter override (supplemented, §8): appends a chapter outside
    /// the normal advance flow. Still guarded by the `(game_id,
    /// chapter_number)` uniqueness invariant and forbidden outside the admin
    /// role.
    pub async fn admin_add_chapter(
        &self,
        game_id: GameId,
        admin_id: UserId,
        content: String,
    ) -> Result<Chapter, CoreError> {
        let game = self
            .store
            .find_game(game_id)
            .await?
            .ok_or(CoreError::NotFound("game"))?;
        if !game.is_admin(admin_id) {
            return Err(CoreError::Forbidden("only the game admin may add a chapter"));
        }
        if game.state.is_terminal() {
            return Err(CoreError::Conflict("game already finished or failed"));
        }
        let chapter_number = game.current_chapter + 1;
        let appended = self
            .store
            .append_chapter(game_id, chapter_number, content.clone())
            .await?;
        if !appended {
            return Err(CoreError::Conflict("chapter already exists"));
        }
        Ok(Chapter {
            game_id,
            chapter_number,
            content,
            created_at: self.clock.now(),
        })
    }

    /// Replaces any pending action by the same `(user_id, current_chapter)`
    /// and auto-marks the submitter ready, per §4.6.
    pub async fn record_action(
        &self,
        game_id: GameId,
        game: &Game,
        user_id: UserId,
        character_id: Option<crate::protocol::CharacterId>,
        action_text: String,
    ) -> Result<Action, CoreError> {
        if game.state != GameState::ActionPhase {
            return Err(CoreError::Conflict("game is not in an action phase"));
        }
        let action = Action {
            id: Uuid::new_v4(),
            game_id,
            user_id,
            character_id,
            action_text,
            chapter_number: game.current_chapter,
            status: ActionStatus::Pending,
            created_at: self.clock.now(),
        };
        let stored = self.store.replace_pending_action(action).await?;
        self.store.add_to_continue_ready(game_id, user_id).await?;
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::InMemoryWorldCatalog;
    use crate::clock::test_support::FixedClock;
    use crate::database::InMemoryStore;
    use crate::generator::FallbackGenerator;
    use crate::protocol::{GameSettings, Member, MemberRole};
    use std::collections::HashSet;

    fn build_engine() -> (
        Arc<GameEngine<FixedClock>>,
        Arc<dyn GameStore>,
        Arc<FixedClock>,
    ) {
        let store: Arc<dyn GameStore> = Arc::new(InMemoryStore::new());
        let broadcaster = Arc::new(Broadcaster::new());
        let generator: Arc<dyn NarrativeGenerator> = Arc::new(FallbackGenerator::new());
        let catalog: Arc<dyn WorldCatalog> = Arc::new(InMemoryWorldCatalog::new());
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
        (engine, store, clock)
    }

    fn sample_game(now: chrono::DateTime<Utc>) -> Game {
        Game {
            id: Uuid::new_v4(),
            room_id: Uuid::new_v4(),
            name: "g".into(),
            world_id: Uuid::new_v4(),
            max_chapters: 3,
            max_players: 4,
            settings: GameSettings::from_config(&GameConfig::default()),
            owner_id: Uuid::new_v4(),
            admin_id: Uuid::new_v4(),
            current_chapter: 1,
            state: GameState::ActionPhase,
            action_phase: Some(crate::protocol::ActionPhaseWindow::open(now, 60)),
            continue_ready: HashSet::new(),
            advancing: false,
            created_at: now,
            finished_at: None,
            failure_reason: None,
        }
    }

    #[tokio::test]
    async fn finalize_advances_chapter_and_reopens_action_phase() {
        let (engine, store, clock) = build_engine();
        let game = sample_game(clock.now());
        let game_id = game.id;
        store.create_game(game).await.unwrap();
        store
            .upsert_member(Member {
                game_id,
                user_id: Uuid::new_v4(),
                character_id: None,
                role: MemberRole::Player,
                joined_at: clock.now(),
                is_ready: true,
            })
            .await
            .unwrap();

        clock.advance(chrono::Duration::seconds(2));
        engine.finalize(game_id, 1).await;

        let updated = store.find_game(game_id).await.unwrap().unwrap();
        assert_eq!(updated.current_chapter, 2);
        assert_eq!(updated.state, GameState::ActionPhase);
        assert!(!updated.advancing);
        assert!(updated.continue_ready.is_empty());

        let chapters = store.list_chapters(game_id).await.unwrap();
        assert_eq!(chapters.len(), 1);
        assert_eq!(chapters[0].chapter_number, 2);
    }

    #[tokio::test]
    async fn finalize_transitions_to_finished_on_last_chapter() {
        let (engine, store, clock) = build_engine();
        let mut game = sample_game(clock.now());
        game.current_chapter = 2;
        game.max_chapters = 3;
        let game_id = game.id;
        store.create_game(game).await.unwrap();

        clock.advance(chrono::Duration::seconds(2));
        engine.finalize(game_id, 2).await;

        let updated = store.find_game(game_id).await.unwrap().unwrap();
        assert_eq!(updated.state, GameState::Finished);
        assert_eq!(updated.current_chapter, 3);
        assert!(updated.finished_at.is_some());
    }

    #[tokio::test]
    async fn concurrent_finalize_only_one_advances() {
        let (engine, store, clock) = build_engine();
        let game = sample_game(clock.now());
        let game_id = game.id;
        store.create_game(game).await.unwrap();
        clock.advance(chrono::Duration::seconds(2));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let engine = Arc::clone(&engine);
            handles.push(tokio::spawn(async move {
                engine.finalize(game_id, 1).await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let chapters = store.list_chapters(game_id).await.unwrap();
        assert_eq!(chapters.len(), 1);
        let updated = store.find_game(game_id).await.unwrap().unwrap();
        assert_eq!(updated.current_chapter, 2);
    }

    #[tokio::test]
    async fn debounce_delays_finalize_within_window() {
        let (engine, store, clock) = build_engine();
        let game = sample_game(clock.now());
        let game_id = game.id;
        store.create_game(game).await.unwrap();

        let start = std::time::Instant::now();
        engine.finalize(game_id, 1).await;
        assert!(start.elapsed() >= std::time::Duration::from_millis(900));
    }

    #[tokio::test]
    async fn admin_add_chapter_rejects_non_admin() {
        let (engine, store, clock) = build_engine();
        let game = sample_game(clock.now());
        let game_id = game.id;
        let non_admin = Uuid::new_v4();
        store.create_game(game).await.unwrap();

        let err = engine
            .admin_add_chapter(game_id, non_admin, "patched".into())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Forbidden(_)));
    }

    #[tokio::test]
    async fn record_action_rejects_outside_action_phase() {
        let (engine, store, clock) = build_engine();
        let mut game = sample_game(clock.now());
        game.state = GameState::Closing;
        let game_id = game.id;
        let user_id = Uuid::new_v4();
        store.create_game(game.clone()).await.unwrap();

        let err = engine
            .record_action(game_id, &game, user_id, None, "look around".into())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn closure_trigger_met_for_unanimous_ready() {
        let (engine, _store, clock) = build_engine();
        let mut game = sample_game(clock.now());
        game.action_phase = Some(crate::protocol::ActionPhaseWindow::open(clock.now(), 600));
        let user = Uuid::new_v4();
        game.continue_ready.insert(user);
        assert!(engine.closure_trigger_met(&game, 1));
    }

    #[tokio::test]
    async fn closure_trigger_not_met_when_not_all_ready() {
        let (engine, _store, clock) = build_engine();
        let mut game = sample_game(clock.now());
        game.action_phase = Some(crate::protocol::ActionPhaseWindow::open(clock.now(), 600));
        game.continue_ready.insert(Uuid::new_v4());
        assert!(!engine.closure_trigger_met(&game, 2));
    }
}
