//! Configuration module for the game-session orchestrator.
//!
//! Supports layered configuration: JSON config file, environment variable
//! overrides, stdin input, and sensible compiled-in defaults.
//!
//! # Module Structure
//!
//! - [`types`]: Root `Config` struct.
//! - [`game`]: Game engine defaults and quorum rule (discussion time, max
//!   chapters, closure threshold).
//! - [`logging`]: Logging configuration.
//! - [`loader`]: Configuration loading functions.
//! - [`defaults`]: Default value functions.

pub mod defaults;
pub mod game;
pub mod loader;
pub mod logging;
pub mod types;

pub use game::GameConfig;
pub use loader::load;
pub use logging::{LogFormat, LogLevel, LoggingConfig};
pub use types::Config;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = Config::default();

        assert_eq!(config.port, 8732);
        assert_eq!(config.game.default_discussion_time_sec, 60);
        assert_eq!(config.game.default_continue_time_sec, 60);
        assert_eq!(config.game.default_max_chapters, 10);
        assert_eq!(config.game.max_chapters_ceiling, 20);
        assert!(config.game.default_require_all_players);
        assert_eq!(config.game.phase_tick_secs, 3);
        assert_eq!(config.game.debounce_window_ms, 1000);

        assert_eq!(config.logging.dir, "logs");
        assert_eq!(config.logging.filename, "server.log");
        assert_eq!(config.logging.rotation, "daily");
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let json = serde_json::to_string_pretty(&config).unwrap();
        let deserialized: Config = serde_json::from_str(&json).unwrap();

        assert_eq!(config.port, deserialized.port);
        assert_eq!(
            config.game.default_max_chapters,
            deserialized.game.default_max_chapters
        );
    }

    #[test]
    fn test_log_level_display() {
        assert_eq!(LogLevel::Trace.to_string(), "trace");
        assert_eq!(LogLevel::Debug.to_string(), "debug");
        assert_eq!(LogLevel::Info.to_string(), "info");
        assert_eq!(LogLevel::Warn.to_string(), "warn");
        assert_eq!(LogLevel::Error.to_string(), "error");
    }

    #[test]
    fn test_log_level_as_str() {
        assert_eq!(LogLevel::Trace.as_str(), "trace");
        assert_eq!(LogLevel::Error.as_str(), "error");
    }
}
