//! Input validation for settings patches and player-submitted text.
//!
//! Mirrors the bounds the original routers enforced ad hoc inline; here they
//! are centralized so `SessionCoordinator` and the HTTP layer share one set
//! of rules (see SPEC_FULL.md "Settings validation bounds").

use serde::Deserialize;

use crate::config::GameConfig;
use crate::protocol::error_codes::CoreError;

/// Maximum length, in bytes, accepted for free-text player actions and chat
/// messages. Longer payloads are rejected rather than silently truncated.
pub const MAX_TEXT_LENGTH: usize = 4000;

/// A partial update to [`crate::protocol::GameSettings`]; each field is
/// `Some` only when the caller wants to change it.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SettingsPatch {
    pub allow_suggestions: Option<bool>,
    pub discussion_time_sec: Option<u32>,
    pub auto_continue: Option<bool>,
    pub continue_time_sec: Option<u32>,
    pub require_all_players: Option<bool>,
}

/// The wire shape of an `update_settings` request: a [`SettingsPatch`] plus
/// the one field that lives on `Game` rather than `GameSettings`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SettingsPatchBody {
    #[serde(flatten)]
    pub patch: SettingsPatch,
    pub max_chapters: Option<u32>,
}

/// Validates a settings patch against the server's configured ceiling for
/// `max_chapters` and the `≥ 1` bounds on the two timers. Returns
/// `InvalidArgument` rather than clamping, per SPEC_FULL.md.
pub fn validate_settings_patch(
    patch: &SettingsPatch,
    max_chapters: Option<u32>,
    cfg: &GameConfig,
) -> Result<(), CoreError> {
    if let Some(max_chapters) = max_chapters {
        if max_chapters < 1 || max_chapters > cfg.max_chapters_ceiling {
            return Err(CoreError::InvalidArgument(format!(
                "max_chapters must be between 1 and {}, got {max_chapters}",
                cfg.max_chapters_ceiling
            )));
        }
    }
    if let Some(sec) = patch.discussion_time_sec {
        if sec < 1 {
            return Err(CoreError::InvalidArgument(
                "discussion_time_sec must be >= 1".into(),
            ));
        }
    }
    if let Some(sec) = patch.continue_time_sec {
        if sec < 1 {
            return Err(CoreError::InvalidArgument(
                "continue_time_sec must be >= 1".into(),
            ));
        }
    }
    Ok(())
}

/// Validates free-text submitted by a player (action text, chat content).
/// Non-empty after trimming, and within [`MAX_TEXT_LENGTH`].
pub fn validate_text(text: &str, field: &'static str) -> Result<String, CoreError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(CoreError::InvalidArgument(format!("{field} must not be empty")));
    }
    if trimmed.len() > MAX_TEXT_LENGTH {
        return Err(CoreError::InvalidArgument(format!(
            "{field} exceeds maximum length of {MAX_TEXT_LENGTH} bytes"
        )));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_max_chapters_above_ceiling() {
        let cfg = GameConfig::default();
        let patch = SettingsPatch::default();
        let err = validate_settings_patch(&patch, Some(21), &cfg).unwrap_err();
        assert!(matches!(err, CoreError::InvalidArgument(_)));
    }

    #[test]
    fn rejects_max_chapters_zero() {
        let cfg = GameConfig::default();
        let patch = SettingsPatch::default();
        assert!(validate_settings_patch(&patch, Some(0), &cfg).is_err());
    }

    #[test]
    fn accepts_max_chapters_at_ceiling() {
        let cfg = GameConfig::default();
        let patch = SettingsPatch::default();
        assert!(validate_settings_patch(&patch, Some(20), &cfg).is_ok());
    }

    #[test]
    fn rejects_zero_discussion_time() {
        let cfg = GameConfig::default();
        let patch = SettingsPatch {
            discussion_time_sec: Some(0),
            ..Default::default()
        };
        assert!(validate_settings_patch(&patch, None, &cfg).is_err());
    }

    #[test]
    fn rejects_empty_action_text() {
        assert!(validate_text("   ", "action_text").is_err());
    }

    #[test]
    fn trims_action_text() {
        let out = validate_text("  look around  ", "action_text").unwrap();
        assert_eq!(out, "look around");
    }

    #[test]
    fn rejects_overlong_text() {
        let text = "a".repeat(MAX_TEXT_LENGTH + 1);
        assert!(validate_text(&text, "action_text").is_err());
    }
}
