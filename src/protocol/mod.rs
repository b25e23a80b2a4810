//! Protocol module: wire message types, entity records, error taxonomy, and
//! input validation for the game-session orchestrator.

pub mod error_codes;
pub mod messages;
pub mod types;
pub mod validation;

pub use error_codes::{CoreError, ErrorCode};

pub use types::{
    Action, ActionPhaseWindow, ActionStatus, CharacterId, Chapter, CharacterRef, Game, GameId,
    GameSettings, GameState, GenerationKind, Member, MemberRole, Message, MessageKind, Phase,
    Room, RoomId, UserId, WorldId, WorldRef,
};

pub use messages::{ActionView, ClientIntent, ServerEvent};

pub use validation::{
    validate_settings_patch, validate_text, SettingsPatch, SettingsPatchBody, MAX_TEXT_LENGTH,
};
