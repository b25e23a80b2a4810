#![cfg_attr(not(test), deny(clippy::panic))]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::struct_excessive_bools,
    clippy::too_many_arguments,
    clippy::too_many_lines,
    clippy::similar_names
)]

//! # Game Session Orchestrator
//!
//! A collaborative-storytelling game-session server: a lobby of players is
//! promoted into a running game, which cycles through action phases and
//! generated narrative chapters until it closes. In-memory store, no
//! external database, run the binary and connect over HTTP + WebSocket.

/// Bearer-token request authentication (not a cryptographic guarantee).
pub mod auth;

/// Channel-keyed publish/subscribe fan-out for server events.
pub mod broadcast;

/// World/character lookup used when building narrative generation context.
pub mod catalog;

/// Injectable time source and id generator (real + deterministic test impls).
pub mod clock;

/// Layered configuration: JSON file, env overrides, compiled defaults.
pub mod config;

/// `SessionCoordinator`: the entry point for every player intent.
pub mod coordinator;

/// `Store`: atomic predicate-update persistence for games, members,
/// chapters, actions, and messages.
pub mod database;

/// `GameEngine`: the chapter-advancement pipeline and its single-flight lock.
pub mod engine;

/// `NarrativeGenerator` and its circuit-breaker-guarded fallback impl.
pub mod generator;

/// `LobbyToGame`: atomic promotion of a ready lobby into a running game.
pub mod lobby;

/// Structured logging configuration.
pub mod logging;

/// `PhaseTimer`: per-game scheduled task driving the action-phase countdown.
pub mod phase_timer;

/// Wire message protocol: entity records, client/server events, errors.
pub mod protocol;

/// Composition root: wires every component together and builds the router.
pub mod server;

/// WebSocket upgrade handling and the per-connection receive loop.
pub mod websocket;
