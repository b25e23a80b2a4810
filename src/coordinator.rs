//! `SessionCoordinator` (§4.6, C6): the entry point for every player intent.
//! Composes the [`crate::broadcast::Broadcaster`], the
//! [`crate::phase_timer::PhaseTimer`], and the
//! [`crate::engine::GameEngine`], translating the handful of accepted
//! intents into guarded Store writes, broadcasts, and (if a closure trigger
//! fires) a `finalize` call on the engine.

use std::sync::Arc;

use chrono::Utc;
use tracing::warn;
use uuid::Uuid;

use crate::broadcast::{Broadcaster, Encoded};
use crate::clock::Clock;
use crate::config::GameConfig;
use crate::database::GameStore;
use crate::engine::GameEngine;
use crate::phase_timer::PhaseTimer;
use crate::protocol::{
    validate_settings_patch, validate_text, Action, ActionStatus, CharacterId, CoreError, Game,
    GameId, GameState, Member, MemberRole, Message, MessageKind, ServerEvent, SettingsPatch,
    UserId,
};

/// What a subscriber gets back: the subscription id (for `unsubscribe`), the
/// live receive half, and any events that need to be replayed immediately so
/// a late joiner doesn't have to wait for the next broadcast to catch up.
pub struct Subscription {
    pub id: Uuid,
    pub rx: tokio::sync::mpsc::UnboundedReceiver<Encoded>,
    pub replay: Vec<Encoded>,
}

pub struct SessionCoordinator<C: Clock + 'static> {
    store: Arc<dyn GameStore>,
    broadcaster: Arc<Broadcaster>,
    engine: Arc<GameEngine<C>>,
    phase_timer: Arc<PhaseTimer<C>>,
    config: GameConfig,
    clock: Arc<C>,
}

impl<C: Clock + 'static> SessionCoordinator<C> {
    #[must_use]
    pub fn new(
        store: Arc<dyn GameStore>,
        broadcaster: Arc<Broadcaster>,
        engine: Arc<GameEngine<C>>,
        phase_timer: Arc<PhaseTimer<C>>,
        config: GameConfig,
        clock: Arc<C>,
    ) -> Self {
        Self {
            store,
            broadcaster,
            engine,
            phase_timer,
            config,
            clock,
        }
    }

    fn channel(game_id: GameId) -> String {
        format!("game:{game_id}")
    }

    async fn require_game(&self, game_id: GameId) -> Result<Game, CoreError> {
        self.store
            .find_game(game_id)
            .await?
            .ok_or(CoreError::NotFound("game"))
    }

    /// After a state-mutating intent, checks §4.5's closure triggers and, if
    /// met, cancels any live `PhaseTimer` (best-effort, the `advancing` CAS
    /// is what actually prevents a double-advance) before calling
    /// `finalize` in the background.
    async fn maybe_close_phase(&self, game: &Game) {
        let members_total = self.store.list_members(game.id).await.unwrap_or_default().len();
        if self.engine.closure_trigger_met(game, members_total) {
            self.phase_timer.cancel(game.id);
            let engine = Arc::clone(&self.engine);
            let game_id = game.id;
            let expected_chapter = game.current_chapter;
            tokio::spawn(async move {
                engine.finalize(game_id, expected_chapter).await;
            });
        }
    }

    /// §4.6 `propose_action`.
    pub async fn propose_action(
        &self,
        game_id: GameId,
        user_id: UserId,
        text: &str,
        character_id: Option<CharacterId>,
    ) -> Result<Action, CoreError> {
        let game = self.require_game(game_id).await?;
        if game.state != GameState::ActionPhase {
            return Err(CoreError::Conflict("game is not in an action phase"));
        }
        let action_text = validate_text(text, "action_text")?;

        let action = self
            .engine
            .record_action(game_id, &game, user_id, character_id, action_text)
            .await?;

        let channel = Self::channel(game_id);
        self.broadcast_continue_update(&channel, game_id).await;
        self.broadcaster.publish(
            &channel,
            ServerEvent::ActionsUpdated {
                chapter_number: game.current_chapter,
            },
        );

        let refreshed = self.require_game(game_id).await?;
        self.maybe_close_phase(&refreshed).await;
        Ok(action)
    }

    /// §4.6 `mark_continue`.
    pub async fn mark_continue(
        &self,
        game_id: GameId,
        user_id: UserId,
        ready: bool,
    ) -> Result<(), CoreError> {
        let game = self.require_game(game_id).await?;
        if game.state != GameState::ActionPhase {
            return Err(CoreError::Conflict("game is not in an action phase"));
        }

        if ready {
            self.store.add_to_continue_ready(game_id, user_id).await?;
        } else {
            self.store.pull_from_continue_ready(game_id, user_id).await?;
        }

        let channel = Self::channel(game_id);
        self.broadcast_continue_update(&channel, game_id).await;

        let refreshed = self.require_game(game_id).await?;
        self.maybe_close_phase(&refreshed).await;
        Ok(())
    }

    async fn broadcast_continue_update(&self, channel: &str, game_id: GameId) {
        let Ok(Some(game)) = self.store.find_game(game_id).await else {
            return;
        };
        let total = self.store.list_members(game_id).await.unwrap_or_default().len() as u32;
        let remaining = game
            .action_phase
            .map_or(0, |window| window.remaining_seconds(self.clock.now()));
        self.broadcaster.publish(
            channel,
            ServerEvent::ContinueUpdate {
                ready_count: game.continue_ready.len() as u32,
                total,
                remaining_seconds: remaining,
            },
        );
    }

    /// §4.6 `post_message`. Allowed in any state except `failed`.
    pub async fn post_message(
        &self,
        game_id: GameId,
        user_id: UserId,
        content: &str,
        kind: MessageKind,
    ) -> Result<Message, CoreError> {
        let game = self.require_game(game_id).await?;
        if game.state == GameState::Failed {
            return Err(CoreError::Conflict("game has failed"));
        }
        let content = validate_text(content, "content")?;

        let message = Message {
            id: Uuid::new_v4(),
            game_id,
            user_id,
            content,
            kind,
            timestamp: self.clock.now(),
        };
        self.store.append_message(message.clone()).await?;

        self.broadcaster.publish(
            &Self::channel(game_id),
            ServerEvent::NewMessage {
                id: message.id,
                user_id: message.user_id,
                content: message.content.clone(),
                kind: message.kind,
                timestamp: message.timestamp,
            },
        );
        Ok(message)
    }

    /// §4.6 `leave_game`. Does not itself transition state, but the member
    /// count it shrinks may satisfy a closure trigger the remaining members
    /// would otherwise have to wait out.
    pub async fn leave_game(&self, game_id: GameId, user_id: UserId) -> Result<(), CoreError> {
        let game = self.require_game(game_id).await?;
        self.store.remove_member(game_id, user_id).await?;
        self.store.pull_from_continue_ready(game_id, user_id).await?;

        if game.state == GameState::ActionPhase {
            let refreshed = self.require_game(game_id).await?;
            self.maybe_close_phase(&refreshed).await;
        }
        Ok(())
    }

    /// §4.6 `update_settings`. Admin-only; validated, partial write.
    pub async fn update_settings(
        &self,
        game_id: GameId,
        admin_id: UserId,
        patch: SettingsPatch,
        max_chapters: Option<u32>,
    ) -> Result<(), CoreError> {
        let game = self.require_game(game_id).await?;
        if !game.is_admin(admin_id) {
            return Err(CoreError::Forbidden("only the game admin may change settings"));
        }
        validate_settings_patch(&patch, max_chapters, &self.config)?;

        let applied = self
            .store
            .update_game_if(
                game_id,
                Box::new(|g: &Game| !g.state.is_terminal()),
                Box::new(move |g: &mut Game| {
                    if let Some(v) = patch.allow_suggestions {
                        g.settings.allow_suggestions = v;
                    }
                    if let Some(v) = patch.discussion_time_sec {
                        g.settings.discussion_time_sec = v;
                    }
                    if let Some(v) = patch.auto_continue {
                        g.settings.auto_continue = v;
                    }
                    if let Some(v) = patch.continue_time_sec {
                        g.settings.continue_time_sec = v;
                    }
                    if let Some(v) = patch.require_all_players {
                        g.settings.require_all_players = v;
                    }
                    if let Some(v) = max_chapters {
                        g.max_chapters = v;
                    }
                }),
            )
            .await?;

        if !applied {
            return Err(CoreError::Conflict("game already finished or failed"));
        }
        Ok(())
    }

    /// §4.6 `subscribe`. Verifies membership, auto-repairing it from the
    /// originating room's lobby roster when missing (per SPEC_FULL.md's
    /// websocket auto-repair supplement), and hands back a replay event so a
    /// late joiner can render the in-flight countdown immediately (§8
    /// scenario S6) without waiting for the next live broadcast.
    pub async fn subscribe(
        &self,
        channel: &str,
        user_id: UserId,
    ) -> Result<Subscription, CoreError> {
        if let Some(game_id) = channel.strip_prefix("game:") {
            let game_id: GameId = game_id
                .parse()
                .map_err(|_| CoreError::InvalidArgument("malformed game channel id".into()))?;
            let game = self.require_game(game_id).await?;
            self.ensure_membership(&game, user_id).await?;

            let (id, rx) = self.broadcaster.subscribe(channel);
            let replay = match (game.state, game.action_phase) {
                (GameState::ActionPhase, Some(window)) => vec![Encoded::new(ServerEvent::ActionPhaseStarted {
                    ends_at: window.ends_at,
                    seconds_total: window.seconds_total,
                    auto_continue: game.settings.auto_continue,
                })],
                _ => Vec::new(),
            };
            return Ok(Subscription { id, rx, replay });
        }

        if channel.strip_prefix("room:").is_some() {
            let (id, rx) = self.broadcaster.subscribe(channel);
            return Ok(Subscription {
                id,
                rx,
                replay: Vec::new(),
            });
        }

        Err(CoreError::InvalidArgument(format!(
            "unknown channel prefix: {channel}"
        )))
    }

    async fn ensure_membership(&self, game: &Game, user_id: UserId) -> Result<(), CoreError> {
        if self.store.find_member(game.id, user_id).await?.is_some() {
            return Ok(());
        }

        let Some(room) = self.store.find_room(game.room_id).await? else {
            return Err(CoreError::Unauthorized);
        };
        if !room.member_ids.contains(&user_id) {
            return Err(CoreError::Unauthorized);
        }

        warn!(game_id = %game.id, %user_id, "subscribe: auto-repairing missing member record from room roster");
        self.store
            .upsert_member(Member {
                game_id: game.id,
                user_id,
                character_id: None,
                role: if user_id == room.admin_id {
                    MemberRole::Admin
                } else {
                    MemberRole::Player
                },
                joined_at: self.clock.now(),
                is_ready: true,
            })
            .await?;
        Ok(())
    }

    pub fn unsubscribe(&self, channel: &str, sub_id: Uuid) {
        self.broadcaster.unsubscribe(channel, sub_id);
    }

    pub async fn get_game(&self, game_id: GameId) -> Result<Game, CoreError> {
        self.require_game(game_id).await
    }

    pub async fn list_members(&self, game_id: GameId) -> Result<Vec<Member>, CoreError> {
        self.require_game(game_id).await?;
        Ok(self.store.list_members(game_id).await?)
    }

    pub async fn list_chapters(&self, game_id: GameId) -> Result<Vec<crate::protocol::Chapter>, CoreError> {
        self.require_game(game_id).await?;
        Ok(self.store.list_chapters(game_id).await?)
    }

    pub async fn list_actions(
        &self,
        game_id: GameId,
        status: Option<ActionStatus>,
    ) -> Result<Vec<Action>, CoreError> {
        self.require_game(game_id).await?;
        Ok(self.store.list_actions(game_id, status).await?)
    }

    pub async fn list_messages(
        &self,
        game_id: GameId,
        before: Option<chrono::DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<Message>, CoreError> {
        self.require_game(game_id).await?;
        Ok(self.store.list_messages(game_id, before, limit).await?)
    }

    /// Admin chapter override surfaced at the coordinator boundary (§4.6's
    /// intent list plus the "admin chapter override" supplement).
    pub async fn add_chapter(
        &self,
        game_id: GameId,
        admin_id: UserId,
        content: &str,
    ) -> Result<crate::protocol::Chapter, CoreError> {
        let content = validate_text(content, "content")?;
        let chapter = self.engine.admin_add_chapter(game_id, admin_id, content).await?;
        self.broadcaster.publish(
            &Self::channel(game_id),
            ServerEvent::ChapterCreated {
                chapter_number: chapter.chapter_number,
                discussion_seconds: 0,
            },
        );
        Ok(chapter)
    }

    #[cfg(test)]
    pub(crate) fn test_store(&self) -> &Arc<dyn GameStore> {
        &self.store
    }
}
