#![cfg_attr(not(test), deny(clippy::panic))]

use clap::Parser;
use game_session_orchestrator::config;
use game_session_orchestrator::logging;
use game_session_orchestrator::server::{self, GameServer};
use std::net::SocketAddr;

/// Game Session Orchestrator -- in-memory collaborative-storytelling session server
#[derive(Parser, Debug)]
#[command(name = "game-session-orchestrator")]
#[command(about = "A game-session orchestrator: lobby promotion, action-phase timers, and chapter generation over HTTP + WebSocket")]
#[command(version)]
struct Cli {
    /// Validate configuration and exit without starting the server.
    /// Useful for CI/CD pipelines and pre-deployment checks.
    #[arg(long, short = 'c', conflicts_with = "print_config")]
    validate_config: bool,

    /// Print the loaded configuration to stdout (as JSON) and exit.
    /// Useful for debugging configuration loading from multiple sources.
    #[arg(long, conflicts_with = "validate_config")]
    print_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration: compiled defaults, then config.json, then env overrides.
    let cfg = config::load();

    if cli.print_config {
        let json = serde_json::to_string_pretty(&cfg)
            .map_err(|e| anyhow::anyhow!("failed to serialize config: {e}"))?;
        println!("{json}");
        return Ok(());
    }

    if cli.validate_config {
        match validate(&cfg) {
            Ok(()) => {
                println!("Configuration validation passed");
                println!();
                println!("Configuration summary:");
                println!("  Port: {}", cfg.port);
                println!("  Storage backend: in-memory");
                println!("  Default max chapters: {}", cfg.game.default_max_chapters);
                println!("  Max chapters ceiling: {}", cfg.game.max_chapters_ceiling);
                println!("  CORS origins: {}", cfg.cors_origins);
                return Ok(());
            }
            Err(e) => {
                eprintln!("Configuration validation failed:\n{e}");
                std::process::exit(1);
            }
        }
    }

    validate(&cfg)?;

    logging::init_with_config(&cfg.logging);

    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.port));
    tracing::info!(%addr, "starting game-session orchestrator");

    let server: std::sync::Arc<GameServer> = GameServer::new(cfg).await?;
    server::run_server(addr, server).await
}

/// Rejects configurations the server cannot run with. Kept deliberately
/// small: most fields are already clamped by [`config::GameConfig`]'s own
/// bounds, this only catches the handful a human could still misconfigure
/// via `config.json`/env overrides.
fn validate(cfg: &config::Config) -> anyhow::Result<()> {
    if cfg.port == 0 {
        anyhow::bail!("port must be nonzero");
    }
    if cfg.game.max_chapters_ceiling == 0 {
        anyhow::bail!("game.max_chapters_ceiling must be nonzero");
    }
    if cfg.game.default_max_chapters > cfg.game.max_chapters_ceiling {
        anyhow::bail!(
            "game.default_max_chapters ({}) exceeds game.max_chapters_ceiling ({})",
            cfg.game.default_max_chapters,
            cfg.game.max_chapters_ceiling
        );
    }
    if cfg.game.quorum_denominator == 0 {
        anyhow::bail!("game.quorum_denominator must be nonzero");
    }
    Ok(())
}
