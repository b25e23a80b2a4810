//! Default value functions for configuration fields.
//!
//! Organized by category, mirroring the structure of [`super::types::Config`].

use super::logging::LogFormat;

// =============================================================================
// Port & Root Config
// =============================================================================

pub const fn default_port() -> u16 {
    8732
}

// =============================================================================
// Game Engine Defaults
// =============================================================================

pub const fn default_discussion_time_sec() -> u32 {
    60
}

pub const fn default_continue_time_sec() -> u32 {
    60
}

pub const fn default_max_chapters() -> u32 {
    10
}

pub const fn default_require_all_players() -> bool {
    true
}

pub const fn default_auto_continue() -> bool {
    false
}

pub const fn default_allow_suggestions() -> bool {
    true
}

/// Ratio of ready members needed to close an action phase when
/// `require_all_players` is false. Numerator/denominator kept separate
/// (rather than an `f64`) so the rounding rule (`max(1, ceil(num*total/den))`)
/// stays exact for every `total`.
pub const fn default_quorum_numerator() -> u32 {
    3
}

pub const fn default_quorum_denominator() -> u32 {
    5
}

/// How often the `PhaseTimer` re-reads readiness and publishes a countdown tick.
pub const fn default_phase_tick_secs() -> u64 {
    3
}

/// Window after a phase opens during which a `finalize` call is debounced.
pub const fn default_debounce_window_ms() -> u64 {
    1000
}

pub const fn default_max_message_size() -> usize {
    65536
}

// =============================================================================
// Logging Defaults
// =============================================================================

pub fn default_log_dir() -> String {
    "logs".to_string()
}

pub fn default_log_filename() -> String {
    "server.log".to_string()
}

pub fn default_rotation() -> String {
    "daily".to_string()
}

pub const fn default_enable_file_logging() -> bool {
    false
}

pub const fn default_log_format() -> LogFormat {
    LogFormat::Json
}

pub fn default_cors_origins() -> String {
    "*".to_string()
}
