//! Core identifiers, closed sum types, and entity records for the
//! game-session orchestrator.
//!
//! The source this was distilled from models everything as duck-typed dicts;
//! here `GameState`, `ActionStatus`, and `MessageKind` are closed enums so the
//! compiler enforces the transition table instead of string comparisons, and
//! `Game`/`Member`/`Chapter`/`Action`/`Message` are the records the `Store`
//! persists.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

pub type GameId = Uuid;
pub type RoomId = Uuid;
pub type UserId = Uuid;
pub type CharacterId = Uuid;
pub type WorldId = Uuid;

/// Game lifecycle state. Legal transitions are enforced by
/// [`crate::engine::GameEngine`], never by callers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GameState {
    Initializing,
    ActionPhase,
    Closing,
    Finished,
    Failed,
}

impl GameState {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::ActionPhase => "action_phase",
            Self::Closing => "closing",
            Self::Finished => "finished",
            Self::Failed => "failed",
        }
    }

    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Failed)
    }
}

/// A member's role within a game. Exactly one `Admin` exists per game.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MemberRole {
    Player,
    Admin,
}

/// Status of a submitted player action.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Pending,
    Approved,
    Rejected,
}

/// Chat log entry kind.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Chat,
    System,
    Action,
}

/// Narrative generation mode, selected by the advance pipeline depending on
/// whether pending actions exist for the chapter being closed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GenerationKind {
    First,
    WithActions,
    Automatic,
}

/// The two states a `game:phase_changed` event can report.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Closing,
    ActionPhase,
}

/// Per-game tunables, copied from the originating room at `start_game_from_room`
/// time and mutable thereafter only by an admin's `update_settings`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GameSettings {
    pub allow_suggestions: bool,
    pub discussion_time_sec: u32,
    pub auto_continue: bool,
    pub continue_time_sec: u32,
    /// Defaults to `true`. When `false`, closure is decided by the quorum
    /// rule in [`crate::config::GameConfig::quorum_threshold`] instead of
    /// requiring every member.
    pub require_all_players: bool,
}

impl GameSettings {
    #[must_use]
    pub fn from_config(cfg: &crate::config::GameConfig) -> Self {
        Self {
            allow_suggestions: cfg.default_allow_suggestions,
            discussion_time_sec: cfg.default_discussion_time_sec,
            auto_continue: cfg.default_auto_continue,
            continue_time_sec: cfg.default_continue_time_sec,
            require_all_players: cfg.default_require_all_players,
        }
    }
}

/// A bounded window during which players submit actions and signal readiness.
/// Embedded on [`Game`] only while `state` is `ActionPhase` or `Closing`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActionPhaseWindow {
    pub started_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub seconds_total: u32,
}

impl ActionPhaseWindow {
    #[must_use]
    pub fn open(now: DateTime<Utc>, seconds_total: u32) -> Self {
        Self {
            started_at: now,
            ends_at: now + chrono::Duration::seconds(i64::from(seconds_total)),
            seconds_total,
        }
    }

    /// Seconds remaining against `now`, clamped at zero per the spec's
    /// timestamp transport rule.
    #[must_use]
    pub fn remaining_seconds(&self, now: DateTime<Utc>) -> u32 {
        let remaining = (self.ends_at - now).num_seconds();
        u32::try_from(remaining.max(0)).unwrap_or(u32::MAX)
    }

    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.ends_at
    }
}

/// The game-session orchestrator's root aggregate. Exclusively owns its
/// Members, Chapters, Actions, and Messages (see [`crate::database`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Game {
    pub id: GameId,
    pub room_id: RoomId,
    pub name: String,
    pub world_id: WorldId,
    pub max_chapters: u32,
    pub max_players: u32,
    pub settings: GameSettings,
    pub owner_id: UserId,
    pub admin_id: UserId,
    pub current_chapter: u32,
    pub state: GameState,
    pub action_phase: Option<ActionPhaseWindow>,
    pub continue_ready: HashSet<UserId>,
    pub advancing: bool,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
}

impl Game {
    #[must_use]
    pub fn is_admin(&self, user_id: UserId) -> bool {
        self.admin_id == user_id
    }
}

/// A lobby member snapshotted into `game_members` at `start_game_from_room`,
/// or inserted afterward by the WebSocket auto-repair path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Member {
    pub game_id: GameId,
    pub user_id: UserId,
    pub character_id: Option<CharacterId>,
    pub role: MemberRole,
    pub joined_at: DateTime<Utc>,
    pub is_ready: bool,
}

/// An appended, immutable chapter of the narrative. `(game_id, chapter_number)`
/// is unique and chapters are appended in strictly ascending order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chapter {
    pub game_id: GameId,
    pub chapter_number: u32,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// A player-submitted free-text action for the current chapter. At most one
/// `Pending` action may exist per `(game_id, user_id, chapter_number)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub id: Uuid,
    pub game_id: GameId,
    pub user_id: UserId,
    pub character_id: Option<CharacterId>,
    pub action_text: String,
    pub chapter_number: u32,
    pub status: ActionStatus,
    pub created_at: DateTime<Utc>,
}

/// An append-only chat log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub game_id: GameId,
    pub user_id: UserId,
    pub content: String,
    pub kind: MessageKind,
    pub timestamp: DateTime<Utc>,
}

/// The out-of-scope lobby this crate treats as an external collaborator: just
/// enough fields for [`crate::lobby::LobbyToGame`] to validate readiness and
/// link the room to its spawned game.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    pub name: String,
    pub world_id: WorldId,
    pub admin_id: UserId,
    pub member_ids: Vec<UserId>,
    pub ready_players: HashSet<UserId>,
    pub max_players: u32,
    pub settings: GameSettings,
    pub game_id: Option<GameId>,
}

impl Room {
    #[must_use]
    pub fn all_members_ready(&self) -> bool {
        !self.member_ids.is_empty()
            && self
                .member_ids
                .iter()
                .all(|id| self.ready_players.contains(id))
    }
}

/// Opaque world/character context handed to the narrative generator.
/// World and character authoring CRUD lives outside this crate; these are
/// snapshots passed through unmodified.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldRef {
    pub id: WorldId,
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CharacterRef {
    pub id: CharacterId,
    pub name: String,
    pub summary: String,
}
