//! `PhaseTimer` (§4.4, C4): per-game scheduled task ticking the action-phase
//! countdown. At most one active task per game; `arm` cancels any prior task
//! before scheduling a new one, mirroring the teacher's pattern of keeping a
//! `JoinHandle` registry keyed by id (see `server/connection_manager.rs`'s
//! per-client task bookkeeping) rather than a free-running background loop.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::broadcast::Broadcaster;
use crate::clock::Clock;
use crate::config::GameConfig;
use crate::database::GameStore;
use crate::protocol::{GameId, GameState, ServerEvent};

/// The callback invoked when a phase closes (by expiry or quorum). Bound to
/// a specific `(game_id, expected_chapter)` pair by the caller of
/// [`PhaseTimer::arm`]; typically `GameEngine::finalize` for that pair.
pub type ExpireFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
pub type ExpireCallback = Arc<dyn Fn() -> ExpireFuture + Send + Sync>;

pub struct PhaseTimer<C: Clock + 'static> {
    store: Arc<dyn GameStore>,
    broadcaster: Arc<Broadcaster>,
    clock: Arc<C>,
    config: GameConfig,
    tasks: DashMap<GameId, JoinHandle<()>>,
}

impl<C: Clock + 'static> PhaseTimer<C> {
    #[must_use]
    pub fn new(
        store: Arc<dyn GameStore>,
        broadcaster: Arc<Broadcaster>,
        clock: Arc<C>,
        config: GameConfig,
    ) -> Self {
        Self {
            store,
            broadcaster,
            clock,
            config,
            tasks: DashMap::new(),
        }
    }

    /// Cancels any existing task for `game_id` and schedules a new one that
    /// ticks every [`GameConfig::phase_tick_secs`] (or sooner, as expiry
    /// nears), publishing `game:continue_update` on every tick, and invokes
    /// `on_expire` exactly once when the phase closes.
    pub fn arm(self: &Arc<Self>, game_id: GameId, expected_chapter: u32, on_expire: ExpireCallback) {
        self.cancel(game_id);

        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            this.run(game_id, expected_chapter, on_expire).await;
        });
        self.tasks.insert(game_id, handle);
    }

    /// Cancellation is synchronous with respect to preventing subsequent
    /// ticks; a tick already past its cancellation check may still complete
    /// and publish once (per §4.4).
    pub fn cancel(&self, game_id: GameId) {
        if let Some((_, handle)) = self.tasks.remove(&game_id) {
            handle.abort();
        }
    }

    async fn run(&self, game_id: GameId, expected_chapter: u32, on_expire: ExpireCallback) {
        let tick = Duration::from_secs(self.config.phase_tick_secs);
        loop {
            let Ok(Some(game)) = self.store.find_game(game_id).await else {
                return;
            };
            if game.state != GameState::ActionPhase || game.current_chapter != expected_chapter {
                return;
            }
            let Some(window) = game.action_phase else {
                return;
            };

            let members = self.store.list_members(game_id).await.unwrap_or_default();
            let total = members.len();
            let ready_count = game.continue_ready.len();
            let now = self.clock.now();
            let remaining = window.remaining_seconds(now);

            self.broadcaster.publish(
                &format!("game:{game_id}"),
                ServerEvent::ContinueUpdate {
                    ready_count: ready_count as u32,
                    total: total as u32,
                    remaining_seconds: remaining,
                },
            );
            debug!(%game_id, remaining, ready_count, total, "phase timer tick");

            let quorum_reached = if game.settings.require_all_players {
                total > 0 && ready_count == total
            } else {
                ready_count >= self.config.quorum_threshold(total)
            };

            if window.is_expired(now) || quorum_reached {
                on_expire().await;
                return;
            }

            let sleep_for = tick.min(Duration::from_secs(u64::from(remaining.max(1))));
            tokio::time::sleep(sleep_for).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::test_support::FixedClock;
    use crate::database::InMemoryStore;
    use crate::protocol::{ActionPhaseWindow, Game, GameSettings};
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicU32, Ordering};
    use uuid::Uuid;

    fn game_with_phase(seconds_total: u32, now: chrono::DateTime<chrono::Utc>) -> Game {
        Game {
            id: Uuid::new_v4(),
            room_id: Uuid::new_v4(),
            name: "g".into(),
            world_id: Uuid::new_v4(),
            max_chapters: 5,
            max_players: 4,
            settings: GameSettings::from_config(&GameConfig::default()),
            owner_id: Uuid::new_v4(),
            admin_id: Uuid::new_v4(),
            current_chapter: 1,
            state: GameState::ActionPhase,
            action_phase: Some(ActionPhaseWindow::open(now, seconds_total)),
            continue_ready: HashSet::new(),
            advancing: false,
            created_at: now,
            finished_at: None,
            failure_reason: None,
        }
    }

    #[tokio::test]
    async fn arm_invokes_on_expire_once_phase_expires() {
        let store: Arc<dyn GameStore> = Arc::new(InMemoryStore::new());
        let broadcaster = Arc::new(Broadcaster::new());
        let clock = Arc::new(FixedClock::new(chrono::Utc::now()));
        let mut cfg = GameConfig::default();
        cfg.phase_tick_secs = 1;

        let game = game_with_phase(1, clock.now());
        let game_id = game.id;
        store.create_game(game).await.unwrap();

        let timer = Arc::new(PhaseTimer::new(store, broadcaster, Arc::clone(&clock), cfg));
        let fired = Arc::new(AtomicU32::new(0));
        let fired_clone = Arc::clone(&fired);

        clock.advance(chrono::Duration::seconds(2));
        timer.arm(
            game_id,
            1,
            Arc::new(move || {
                let fired = Arc::clone(&fired_clone);
                Box::pin(async move {
                    fired.fetch_add(1, Ordering::SeqCst);
                })
            }),
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancel_prevents_on_expire_from_firing() {
        let store: Arc<dyn GameStore> = Arc::new(InMemoryStore::new());
        let broadcaster = Arc::new(Broadcaster::new());
        let clock = Arc::new(FixedClock::new(chrono::Utc::now()));
        let mut cfg = GameConfig::default();
        cfg.phase_tick_secs = 1;

        let game = game_with_phase(60, clock.now());
        let game_id = game.id;
        store.create_game(game).await.unwrap();

        let timer = Arc::new(PhaseTimer::new(store, broadcaster, clock, cfg));
        let fired = Arc::new(AtomicU32::new(0));
        let fired_clone = Arc::clone(&fired);

        timer.arm(
            game_id,
            1,
            Arc::new(move || {
                let fired = Arc::clone(&fired_clone);
                Box::pin(async move {
                    fired.fetch_add(1, Ordering::SeqCst);
                })
            }),
        );
        timer.cancel(game_id);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn quorum_trigger_fires_before_expiry() {
        let store: Arc<dyn GameStore> = Arc::new(InMemoryStore::new());
        let broadcaster = Arc::new(Broadcaster::new());
        let clock = Arc::new(FixedClock::new(chrono::Utc::now()));
        let mut cfg = GameConfig::default();
        cfg.phase_tick_secs = 1;

        let mut game = game_with_phase(600, clock.now());
        game.settings.require_all_players = false;
        let user_a = Uuid::new_v4();
        game.continue_ready.insert(user_a);
        let game_id = game.id;
        store.create_game(game).await.unwrap();
        store
            .upsert_member(crate::protocol::Member {
                game_id,
                user_id: user_a,
                character_id: None,
                role: crate::protocol::MemberRole::Player,
                joined_at: clock.now(),
                is_ready: true,
            })
            .await
            .unwrap();

        let timer = Arc::new(PhaseTimer::new(store, broadcaster, clock, cfg));
        let fired = Arc::new(AtomicU32::new(0));
        let fired_clone = Arc::clone(&fired);

        timer.arm(
            game_id,
            1,
            Arc::new(move || {
                let fired = Arc::clone(&fired_clone);
                Box::pin(async move {
                    fired.fetch_add(1, Ordering::SeqCst);
                })
            }),
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
