//! Root configuration types.

use super::defaults::{default_cors_origins, default_port};
use super::game::GameConfig;
use super::logging::LoggingConfig;
use serde::{Deserialize, Serialize};

/// Root configuration for the game-session orchestrator.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub game: GameConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default = "default_cors_origins")]
    pub cors_origins: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            game: GameConfig::default(),
            logging: LoggingConfig::default(),
            cors_origins: default_cors_origins(),
        }
    }
}
