//! Default game-engine configuration: the server-wide defaults applied to a
//! new [`crate::database::GameSettings`] at `start_game_from_room` time, plus
//! the quorum rule used to evaluate closure triggers.

use super::defaults::{
    default_allow_suggestions, default_auto_continue, default_continue_time_sec,
    default_debounce_window_ms, default_discussion_time_sec, default_max_chapters,
    default_max_message_size, default_phase_tick_secs, default_quorum_denominator,
    default_quorum_numerator, default_require_all_players,
};
use serde::{Deserialize, Serialize};

/// Server-wide defaults and bounds for the game engine.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GameConfig {
    #[serde(default = "default_discussion_time_sec")]
    pub default_discussion_time_sec: u32,
    #[serde(default = "default_continue_time_sec")]
    pub default_continue_time_sec: u32,
    #[serde(default = "default_max_chapters")]
    pub default_max_chapters: u32,
    /// Hard ceiling enforced by `update_settings`; see `max_chapters ∈ [1,20]`.
    #[serde(default = "max_chapters_ceiling")]
    pub max_chapters_ceiling: u32,
    #[serde(default = "default_require_all_players")]
    pub default_require_all_players: bool,
    #[serde(default = "default_auto_continue")]
    pub default_auto_continue: bool,
    #[serde(default = "default_allow_suggestions")]
    pub default_allow_suggestions: bool,
    #[serde(default = "default_quorum_numerator")]
    pub quorum_numerator: u32,
    #[serde(default = "default_quorum_denominator")]
    pub quorum_denominator: u32,
    #[serde(default = "default_phase_tick_secs")]
    pub phase_tick_secs: u64,
    #[serde(default = "default_debounce_window_ms")]
    pub debounce_window_ms: u64,
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

const fn max_chapters_ceiling() -> u32 {
    20
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            default_discussion_time_sec: default_discussion_time_sec(),
            default_continue_time_sec: default_continue_time_sec(),
            default_max_chapters: default_max_chapters(),
            max_chapters_ceiling: max_chapters_ceiling(),
            default_require_all_players: default_require_all_players(),
            default_auto_continue: default_auto_continue(),
            default_allow_suggestions: default_allow_suggestions(),
            quorum_numerator: default_quorum_numerator(),
            quorum_denominator: default_quorum_denominator(),
            phase_tick_secs: default_phase_tick_secs(),
            debounce_window_ms: default_debounce_window_ms(),
            max_message_size: default_max_message_size(),
        }
    }
}

impl GameConfig {
    /// `max(1, ceil(quorum_numerator/quorum_denominator * total))`, pinned per
    /// the spec to remove the rounding ambiguity of an integer-truncating cast.
    #[must_use]
    pub fn quorum_threshold(&self, total: usize) -> usize {
        if total == 0 {
            return 1;
        }
        let num = u64::from(self.quorum_numerator) * total as u64;
        let den = u64::from(self.quorum_denominator);
        let threshold = num.div_ceil(den);
        threshold.max(1) as usize
    }
}
