//! Wire messages: player intents in, server events out.
//!
//! The original source passes duck-typed dicts over the wire; here
//! `ClientIntent` and `ServerEvent` are closed, tagged enums
//! (`#[serde(tag = "type", content = "data")]`) so the broadcaster and every
//! client share one schema. `ServerEvent` is the authoritative event set from
//! SPEC_FULL.md §6; `game:`/`room:` channel prefixes are applied by
//! [`crate::broadcast::Broadcaster`], not encoded in the variant names.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error_codes::ErrorCode;
use super::types::{ActionStatus, CharacterId, GameId, GameState, MessageKind, Phase, UserId};

/// Messages a connected client may send after subscribing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ClientIntent {
    /// Subscribe to a `game:{id}` or `room:{id}` channel. Must be sent before
    /// any other intent that targets that channel.
    Subscribe { channel: String },
    Unsubscribe { channel: String },
    ProposeAction {
        game_id: GameId,
        action_text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        character_id: Option<CharacterId>,
    },
    MarkContinue {
        game_id: GameId,
        ready: bool,
    },
    PostMessage {
        game_id: GameId,
        content: String,
        #[serde(default = "default_message_kind")]
        kind: MessageKind,
    },
    LeaveGame {
        game_id: GameId,
    },
    UpdateSettings {
        game_id: GameId,
        patch: serde_json::Value,
    },
    Ping,
}

const fn default_message_kind() -> MessageKind {
    MessageKind::Chat
}

/// Events published by the engine/coordinator. Delivered as a JSON object
/// `{type, data}`; see SPEC_FULL.md §6 for the authoritative list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ServerEvent {
    // -- game:{id} channel --
    #[serde(rename = "game:chapter_created")]
    ChapterCreated {
        chapter_number: u32,
        discussion_seconds: u32,
    },
    #[serde(rename = "game:action_phase_started")]
    ActionPhaseStarted {
        ends_at: DateTime<Utc>,
        seconds_total: u32,
        auto_continue: bool,
    },
    #[serde(rename = "game:phase_changed")]
    PhaseChanged {
        phase: Phase,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    #[serde(rename = "game:continue_update")]
    ContinueUpdate {
        ready_count: u32,
        total: u32,
        remaining_seconds: u32,
    },
    #[serde(rename = "game:new_message")]
    NewMessage {
        id: Uuid,
        user_id: UserId,
        content: String,
        #[serde(rename = "type")]
        kind: MessageKind,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "game:actions_updated")]
    ActionsUpdated { chapter_number: u32 },
    #[serde(rename = "game:state_changed")]
    StateChanged { state: GameState },
    #[serde(rename = "game:finished")]
    Finished { game_id: GameId },
    #[serde(rename = "game:failed")]
    Failed { error: String },

    // -- room:{id} channel --
    #[serde(rename = "room:started")]
    RoomStarted { game_id: GameId },
    #[serde(rename = "room_closed")]
    RoomClosed { room_id: Uuid },
    #[serde(rename = "room_deleted")]
    RoomDeleted { room_id: Uuid },

    // -- connection-local replies, never broadcast --
    #[serde(rename = "error")]
    Error {
        message: String,
        error_code: ErrorCode,
    },
    #[serde(rename = "pong")]
    Pong,
    #[serde(rename = "subscribed")]
    Subscribed { channel: String },
}

impl ServerEvent {
    /// `true` for the variants that make up the "closing burst" the spec
    /// tells consumers to treat as order-independent (§4.3).
    #[must_use]
    pub const fn is_burst_member(&self) -> bool {
        matches!(
            self,
            Self::ChapterCreated { .. }
                | Self::ActionPhaseStarted { .. }
                | Self::PhaseChanged { .. }
                | Self::ContinueUpdate { .. }
        )
    }
}

/// The `Action` view returned by `propose_action` and `list_actions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionView {
    pub id: Uuid,
    pub game_id: GameId,
    pub user_id: UserId,
    pub character_id: Option<CharacterId>,
    pub action_text: String,
    pub chapter_number: u32,
    pub status: ActionStatus,
    pub created_at: DateTime<Utc>,
}

impl From<super::types::Action> for ActionView {
    fn from(a: super::types::Action) -> Self {
        Self {
            id: a.id,
            game_id: a.game_id,
            user_id: a.user_id,
            character_id: a.character_id,
            action_text: a.action_text,
            chapter_number: a.chapter_number,
            status: a.status,
            created_at: a.created_at,
        }
    }
}
