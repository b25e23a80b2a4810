//! `Store` (§4.1): atomic predicate-update primitives for games, members,
//! chapters, actions, and messages.
//!
//! Mirrors the teacher's `GameDatabase` shape (an `async_trait` persistence
//! seam plus an in-memory reference implementation keyed by per-collection
//! `RwLock<HashMap<..>>`s), generalized from room/player/relay records to the
//! five collections in SPEC_FULL.md §3. Lock ordering is fixed
//! (`rooms` → `games` → `members` → `chapters` → `actions` → `messages`) so
//! no call site can deadlock by acquiring two collection locks out of order;
//! in practice almost every operation here only ever needs one.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::protocol::{
    Action, ActionStatus, Chapter, Game, GameId, Member, Message, Room, RoomId, UserId,
};

/// A boxed predicate evaluated against the current `Game` before a CAS write
/// is allowed to proceed. Kept as a trait object (not a generic method
/// parameter) so `GameStore` stays object-safe.
pub type GamePredicate = Box<dyn Fn(&Game) -> bool + Send + Sync>;
/// The mutation applied to the `Game` once the predicate passes.
pub type GameMutation = Box<dyn FnOnce(&mut Game) + Send>;

/// Persistence seam the engine, coordinator, and lobby promoter depend on.
/// All transition-relevant writes go through [`GameStore::update_game_if`],
/// the single atomic compare-and-set primitive; everything else is either a
/// plain read or an additive/idempotent collection write
/// (`add_to_continue_ready`, `append_chapter`, ...).
#[async_trait]
pub trait GameStore: Send + Sync {
    async fn initialize(&self) -> Result<()>;

    async fn find_room(&self, id: RoomId) -> Result<Option<Room>>;
    async fn insert_room(&self, room: Room) -> Result<()>;

    /// CAS-links a room to its spawned game: succeeds only if the room has
    /// no `game_id` yet. Returns `false` (not an error) if already linked,
    /// callers use this to make `start_game_from_room` idempotent.
    async fn link_room_to_game(&self, room_id: RoomId, game_id: GameId) -> Result<bool>;

    async fn find_game(&self, id: GameId) -> Result<Option<Game>>;
    async fn create_game(&self, game: Game) -> Result<()>;

    /// Atomic compare-and-set on the game document: `predicate` is evaluated
    /// against the current record under a single write-lock acquisition; if
    /// it passes, `mutation` is applied in place. Returns whether the
    /// mutation was applied. This is the primitive `GameEngine::finalize`
    /// uses for the `advancing` single-flight lock (§4.5).
    async fn update_game_if(
        &self,
        id: GameId,
        predicate: GamePredicate,
        mutation: GameMutation,
    ) -> Result<bool>;

    async fn insert_members(&self, members: Vec<Member>) -> Result<()>;
    async fn upsert_member(&self, member: Member) -> Result<()>;
    async fn remove_member(&self, game_id: GameId, user_id: UserId) -> Result<Option<Member>>;
    async fn list_members(&self, game_id: GameId) -> Result<Vec<Member>>;
    async fn find_member(&self, game_id: GameId, user_id: UserId) -> Result<Option<Member>>;

    async fn add_to_continue_ready(&self, game_id: GameId, user_id: UserId) -> Result<()>;
    async fn pull_from_continue_ready(&self, game_id: GameId, user_id: UserId) -> Result<()>;

    /// Appends a chapter. Returns `false` (not an error) if
    /// `(game_id, chapter_number)` already exists, so retried/racing
    /// `advance` calls can treat it as "already done" per §4.5 step 5.
    async fn append_chapter(&self, game_id: GameId, chapter_number: u32, content: String)
        -> Result<bool>;
    async fn list_chapters(&self, game_id: GameId) -> Result<Vec<Chapter>>;

    /// Replaces any existing `Pending` action for
    /// `(game_id, user_id, chapter_number)` (demoting it to `Rejected`)
    /// and inserts `action` as the new pending entry.
    async fn replace_pending_action(&self, action: Action) -> Result<Action>;
    async fn list_pending_actions(&self, game_id: GameId, chapter_number: u32) -> Result<Vec<Action>>;
    async fn list_actions(&self, game_id: GameId, status: Option<ActionStatus>) -> Result<Vec<Action>>;
    /// Marks every `Pending` action for `chapter_number` as `Approved`.
    async fn archive_pending_actions(&self, game_id: GameId, chapter_number: u32) -> Result<()>;

    async fn append_message(&self, message: Message) -> Result<()>;
    /// Newest-first page of messages. `before` excludes messages at or after
    /// that timestamp; absent, returns the most recent `limit`.
    async fn list_messages(
        &self,
        game_id: GameId,
        before: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<Message>>;

    async fn health_check(&self) -> bool;
}

/// In-memory reference implementation. Single-process only: the CAS in
/// [`GameStore::update_game_if`] relies on a process-local `RwLock`, not a
/// distributed lock; a real deployment would back this with a document store
/// offering the same conditional-update primitive (see SPEC_FULL.md §4.1).
#[derive(Default)]
pub struct InMemoryStore {
    rooms: Arc<RwLock<HashMap<RoomId, Room>>>,
    games: Arc<RwLock<HashMap<GameId, Game>>>,
    members: Arc<RwLock<HashMap<GameId, Vec<Member>>>>,
    chapters: Arc<RwLock<HashMap<GameId, Vec<Chapter>>>>,
    actions: Arc<RwLock<HashMap<GameId, Vec<Action>>>>,
    messages: Arc<RwLock<HashMap<GameId, Vec<Message>>>>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GameStore for InMemoryStore {
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn find_room(&self, id: RoomId) -> Result<Option<Room>> {
        Ok(self.rooms.read().await.get(&id).cloned())
    }

    async fn insert_room(&self, room: Room) -> Result<()> {
        self.rooms.write().await.insert(room.id, room);
        Ok(())
    }

    async fn link_room_to_game(&self, room_id: RoomId, game_id: GameId) -> Result<bool> {
        let mut rooms = self.rooms.write().await;
        match rooms.get_mut(&room_id) {
            Some(room) if room.game_id.is_none() => {
                room.game_id = Some(game_id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn find_game(&self, id: GameId) -> Result<Option<Game>> {
        Ok(self.games.read().await.get(&id).cloned())
    }

    async fn create_game(&self, game: Game) -> Result<()> {
        self.games.write().await.insert(game.id, game);
        Ok(())
    }

    async fn update_game_if(
        &self,
        id: GameId,
        predicate: GamePredicate,
        mutation: GameMutation,
    ) -> Result<bool> {
        let mut games = self.games.write().await;
        match games.get_mut(&id) {
            Some(game) if predicate(game) => {
                mutation(game);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn insert_members(&self, members: Vec<Member>) -> Result<()> {
        if members.is_empty() {
            return Ok(());
        }
        let game_id = members[0].game_id;
        self.members.write().await.entry(game_id).or_default().extend(members);
        Ok(())
    }

    async fn upsert_member(&self, member: Member) -> Result<()> {
        let mut members = self.members.write().await;
        let entry = members.entry(member.game_id).or_default();
        if let Some(existing) = entry.iter_mut().find(|m| m.user_id == member.user_id) {
            *existing = member;
        } else {
            entry.push(member);
        }
        Ok(())
    }

    async fn remove_member(&self, game_id: GameId, user_id: UserId) -> Result<Option<Member>> {
        let mut members = self.members.write().await;
        let Some(entry) = members.get_mut(&game_id) else {
            return Ok(None);
        };
        let idx = entry.iter().position(|m| m.user_id == user_id);
        Ok(idx.map(|i| entry.remove(i)))
    }

    async fn list_members(&self, game_id: GameId) -> Result<Vec<Member>> {
        Ok(self.members.read().await.get(&game_id).cloned().unwrap_or_default())
    }

    async fn find_member(&self, game_id: GameId, user_id: UserId) -> Result<Option<Member>> {
        Ok(self
            .members
            .read()
            .await
            .get(&game_id)
            .and_then(|members| members.iter().find(|m| m.user_id == user_id).cloned()))
    }

    async fn add_to_continue_ready(&self, game_id: GameId, user_id: UserId) -> Result<()> {
        let mut games = self.games.write().await;
        if let Some(game) = games.get_mut(&game_id) {
            game.continue_ready.insert(user_id);
        }
        Ok(())
    }

    async fn pull_from_continue_ready(&self, game_id: GameId, user_id: UserId) -> Result<()> {
        let mut games = self.games.write().await;
        if let Some(game) = games.get_mut(&game_id) {
            game.continue_ready.remove(&user_id);
        }
        Ok(())
    }

    async fn append_chapter(
        &self,
        game_id: GameId,
        chapter_number: u32,
        content: String,
    ) -> Result<bool> {
        let mut chapters = self.chapters.write().await;
        let entry = chapters.entry(game_id).or_default();
        if entry.iter().any(|c| c.chapter_number == chapter_number) {
            return Ok(false);
        }
        entry.push(Chapter {
            game_id,
            chapter_number,
            content,
            created_at: Utc::now(),
        });
        Ok(true)
    }

    async fn list_chapters(&self, game_id: GameId) -> Result<Vec<Chapter>> {
        let mut out = self.chapters.read().await.get(&game_id).cloned().unwrap_or_default();
        out.sort_by_key(|c| c.chapter_number);
        Ok(out)
    }

    async fn replace_pending_action(&self, action: Action) -> Result<Action> {
        let mut actions = self.actions.write().await;
        let entry = actions.entry(action.game_id).or_default();
        for existing in entry.iter_mut() {
            if existing.user_id == action.user_id
                && existing.chapter_number == action.chapter_number
                && existing.status == ActionStatus::Pending
            {
                existing.status = ActionStatus::Rejected;
            }
        }
        entry.push(action.clone());
        Ok(action)
    }

    async fn list_pending_actions(
        &self,
        game_id: GameId,
        chapter_number: u32,
    ) -> Result<Vec<Action>> {
        let actions = self.actions.read().await;
        let mut out: Vec<Action> = actions
            .get(&game_id)
            .map(|list| {
                list.iter()
                    .filter(|a| a.chapter_number == chapter_number && a.status == ActionStatus::Pending)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        out.sort_by_key(|a| a.created_at);
        Ok(out)
    }

    async fn list_actions(
        &self,
        game_id: GameId,
        status: Option<ActionStatus>,
    ) -> Result<Vec<Action>> {
        let actions = self.actions.read().await;
        let mut out: Vec<Action> = actions
            .get(&game_id)
            .map(|list| {
                list.iter()
                    .filter(|a| status.is_none_or(|s| a.status == s))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        out.sort_by_key(|a| a.created_at);
        Ok(out)
    }

    async fn archive_pending_actions(&self, game_id: GameId, chapter_number: u32) -> Result<()> {
        let mut actions = self.actions.write().await;
        if let Some(list) = actions.get_mut(&game_id) {
            for action in list.iter_mut() {
                if action.chapter_number == chapter_number && action.status == ActionStatus::Pending {
                    action.status = ActionStatus::Approved;
                }
            }
        }
        Ok(())
    }

    async fn append_message(&self, message: Message) -> Result<()> {
        self.messages.write().await.entry(message.game_id).or_default().push(message);
        Ok(())
    }

    async fn list_messages(
        &self,
        game_id: GameId,
        before: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<Message>> {
        let messages = self.messages.read().await;
        let Some(list) = messages.get(&game_id) else {
            return Ok(vec![]);
        };
        let mut filtered: Vec<Message> = list
            .iter()
            .filter(|m| before.is_none_or(|cutoff| m.timestamp < cutoff))
            .cloned()
            .collect();
        filtered.sort_by_key(|m| std::cmp::Reverse(m.timestamp));
        filtered.truncate(limit);
        Ok(filtered)
    }

    async fn health_check(&self) -> bool {
        true
    }
}
