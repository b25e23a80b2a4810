//! `GameServer`: the composition root (§9). Wires `Store`, `Broadcaster`,
//! `NarrativeGenerator`, `WorldCatalog`, `Clock`/`IdGen`, `PhaseTimer`,
//! `GameEngine`, `SessionCoordinator`, and `LobbyToGame` together behind one
//! `Arc`, and builds the axum router translating HTTP onto
//! `SessionCoordinator`/`LobbyToGame` calls, mirroring the teacher's
//! `EnhancedGameServer` + `create_router`/`run_server` shape
//! (`websocket/routes.rs`), generalized from the signaling relay's operation
//! set to the table in SPEC_FULL.md §6.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth::BearerAuth;
use crate::broadcast::Broadcaster;
use crate::catalog::{InMemoryWorldCatalog, WorldCatalog};
use crate::clock::{IdGen, SystemClock, UuidGen};
use crate::config::Config;
use crate::coordinator::SessionCoordinator;
use crate::database::{GameStore, InMemoryStore};
use crate::engine::GameEngine;
use crate::generator::{FallbackGenerator, NarrativeGenerator};
use crate::lobby::LobbyToGame;
use crate::phase_timer::PhaseTimer;
use crate::protocol::{
    Action, ActionStatus, Chapter, CoreError, Game, GameId, Member, Message, MessageKind, RoomId,
    SettingsPatchBody,
};

/// Thin newtype so `CoreError` can implement `IntoResponse` without pulling
/// axum into the protocol module.
pub struct ApiError(CoreError);

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self.0, "internal error surfaced to client");
        } else {
            tracing::warn!(error = %self.0, code = ?self.0.code(), "request rejected");
        }
        let body = serde_json::json!({
            "error": self.0.to_string(),
            "error_code": self.0.code(),
        });
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

pub struct GameServer {
    store: Arc<dyn GameStore>,
    broadcaster: Arc<Broadcaster>,
    coordinator: Arc<SessionCoordinator<SystemClock>>,
    lobby: Arc<LobbyToGame<SystemClock>>,
    config: Config,
}

impl GameServer {
    /// Wires every collaborator with the production implementations
    /// (in-memory store, fallback narrative generator, system clock) and
    /// initializes the store.
    pub async fn new(config: Config) -> anyhow::Result<Arc<Self>> {
        let store: Arc<dyn GameStore> = Arc::new(InMemoryStore::new());
        store.initialize().await?;

        let broadcaster = Arc::new(Broadcaster::new());
        let generator: Arc<dyn NarrativeGenerator> = Arc::new(FallbackGenerator::new());
        let catalog: Arc<dyn WorldCatalog> = Arc::new(InMemoryWorldCatalog::new());
        let clock = Arc::new(SystemClock);
        let id_gen: Arc<dyn IdGen> = Arc::new(UuidGen);

        let phase_timer = Arc::new(PhaseTimer::new(
            Arc::clone(&store),
            Arc::clone(&broadcaster),
            Arc::clone(&clock),
            config.game.clone(),
        ));
        let engine = Arc::new(GameEngine::new(
            Arc::clone(&store),
            Arc::clone(&broadcaster),
            generator,
            catalog,
            Arc::clone(&phase_timer),
            Arc::clone(&clock),
            config.game.clone(),
        ));
        let coordinator = Arc::new(SessionCoordinator::new(
            Arc::clone(&store),
            Arc::clone(&broadcaster),
            Arc::clone(&engine),
            phase_timer,
            config.game.clone(),
            Arc::clone(&clock),
        ));
        let lobby = Arc::new(LobbyToGame::new(Arc::clone(&store), engine, clock, id_gen));

        Ok(Arc::new(Self {
            store,
            broadcaster,
            coordinator,
            lobby,
            config,
        }))
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn coordinator(&self) -> &Arc<SessionCoordinator<SystemClock>> {
        &self.coordinator
    }

    #[must_use]
    pub fn broadcaster(&self) -> &Arc<Broadcaster> {
        &self.broadcaster
    }

    #[must_use]
    pub fn lobby(&self) -> &Arc<LobbyToGame<SystemClock>> {
        &self.lobby
    }

    /// Direct store access. Room creation has no HTTP surface (lobby
    /// authoring is out of scope, per SPEC_FULL.md §1), an embedding
    /// application seeds rooms this way before calling `/v1/rooms/{id}/start`,
    /// and integration tests do the same.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn GameStore> {
        &self.store
    }

    /// Liveness probe: the in-memory store answers immediately, but the
    /// check stays a real call so a future persistent `Store` impl keeps the
    /// same health semantics.
    pub async fn health_check(&self) -> bool {
        self.store.health_check().await
    }
}

/// Builds the axum router. `State<Arc<GameServer>>` is shared by every
/// handler; CORS is configured from `cors_origins` the way the teacher's
/// `create_router` parsed its comma-separated origin list.
#[must_use]
pub fn create_router(server: Arc<GameServer>) -> Router {
    let cors = build_cors_layer(&server.config.cors_origins);

    Router::new()
        .route("/health", get(health_check))
        .route("/ws", get(crate::websocket::websocket_handler))
        .route("/v1/rooms/{room_id}/start", post(start_game_from_room))
        .route("/v1/games/{game_id}", get(get_game))
        .route("/v1/games/{game_id}/continue", post(mark_continue))
        .route("/v1/games/{game_id}/actions", post(propose_action))
        .route("/v1/games/{game_id}/actions", get(list_actions))
        .route("/v1/games/{game_id}/chapters", post(add_chapter))
        .route("/v1/games/{game_id}/chapters", get(list_chapters))
        .route("/v1/games/{game_id}/members", get(list_members))
        .route("/v1/games/{game_id}/messages", get(list_messages))
        .route("/v1/games/{game_id}/messages", post(post_message))
        .route("/v1/games/{game_id}/settings", patch(update_settings))
        .route("/v1/games/{game_id}/leave", post(leave_game))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(server)
}

fn build_cors_layer(cors_origins: &str) -> CorsLayer {
    if cors_origins == "*" {
        return CorsLayer::permissive();
    }

    let origins: Vec<_> = cors_origins
        .split(',')
        .filter_map(|s| s.trim().parse::<axum::http::HeaderValue>().ok())
        .collect();

    if origins.is_empty() {
        tracing::warn!("no valid CORS origins configured, falling back to permissive CORS");
        return CorsLayer::permissive();
    }

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Starts listening on `addr`. Mirrors the teacher's `run_server`: build the
/// router, bind, serve with `ConnectInfo` so handlers/middleware can see the
/// peer address.
pub async fn run_server(addr: SocketAddr, server: Arc<GameServer>) -> anyhow::Result<()> {
    let app = create_router(server);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "starting game-session orchestrator");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

async fn health_check(State(server): State<Arc<GameServer>>) -> impl IntoResponse {
    if server.health_check().await {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn start_game_from_room(
    State(server): State<Arc<GameServer>>,
    auth: BearerAuth,
    Path(room_id): Path<RoomId>,
) -> ApiResult<Json<GameId>> {
    let game_id = server
        .lobby
        .start_game_from_room(room_id, auth.user_id)
        .await?;
    Ok(Json(game_id))
}

async fn get_game(
    State(server): State<Arc<GameServer>>,
    Path(game_id): Path<GameId>,
) -> ApiResult<Json<Game>> {
    Ok(Json(server.coordinator.get_game(game_id).await?))
}

#[derive(Debug, Deserialize)]
struct ContinueBody {
    ready: bool,
}

async fn mark_continue(
    State(server): State<Arc<GameServer>>,
    auth: BearerAuth,
    Path(game_id): Path<GameId>,
    Json(body): Json<ContinueBody>,
) -> ApiResult<StatusCode> {
    server
        .coordinator
        .mark_continue(game_id, auth.user_id, body.ready)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct ProposeActionBody {
    action_text: String,
    character_id: Option<crate::protocol::CharacterId>,
}

async fn propose_action(
    State(server): State<Arc<GameServer>>,
    auth: BearerAuth,
    Path(game_id): Path<GameId>,
    Json(body): Json<ProposeActionBody>,
) -> ApiResult<Json<Action>> {
    let action = server
        .coordinator
        .propose_action(game_id, auth.user_id, &body.action_text, body.character_id)
        .await?;
    Ok(Json(action))
}

#[derive(Debug, Deserialize)]
struct ListActionsQuery {
    status: Option<ActionStatus>,
}

async fn list_actions(
    State(server): State<Arc<GameServer>>,
    Path(game_id): Path<GameId>,
    Query(query): Query<ListActionsQuery>,
) -> ApiResult<Json<Vec<Action>>> {
    Ok(Json(
        server.coordinator.list_actions(game_id, query.status).await?,
    ))
}

#[derive(Debug, Deserialize)]
struct AddChapterBody {
    content: String,
}

async fn add_chapter(
    State(server): State<Arc<GameServer>>,
    auth: BearerAuth,
    Path(game_id): Path<GameId>,
    Json(body): Json<AddChapterBody>,
) -> ApiResult<Json<Chapter>> {
    let chapter = server
        .coordinator
        .add_chapter(game_id, auth.user_id, &body.content)
        .await?;
    Ok(Json(chapter))
}

async fn list_chapters(
    State(server): State<Arc<GameServer>>,
    Path(game_id): Path<GameId>,
) -> ApiResult<Json<Vec<Chapter>>> {
    Ok(Json(server.coordinator.list_chapters(game_id).await?))
}

async fn list_members(
    State(server): State<Arc<GameServer>>,
    Path(game_id): Path<GameId>,
) -> ApiResult<Json<Vec<Member>>> {
    Ok(Json(server.coordinator.list_members(game_id).await?))
}

#[derive(Debug, Deserialize)]
struct ListMessagesQuery {
    before: Option<DateTime<Utc>>,
    #[serde(default = "default_message_limit")]
    limit: usize,
}

const fn default_message_limit() -> usize {
    50
}

async fn list_messages(
    State(server): State<Arc<GameServer>>,
    Path(game_id): Path<GameId>,
    Query(query): Query<ListMessagesQuery>,
) -> ApiResult<Json<Vec<Message>>> {
    Ok(Json(
        server
            .coordinator
            .list_messages(game_id, query.before, query.limit)
            .await?,
    ))
}

#[derive(Debug, Deserialize)]
struct PostMessageBody {
    content: String,
    #[serde(default = "default_message_kind")]
    kind: MessageKind,
}

const fn default_message_kind() -> MessageKind {
    MessageKind::Chat
}

async fn post_message(
    State(server): State<Arc<GameServer>>,
    auth: BearerAuth,
    Path(game_id): Path<GameId>,
    Json(body): Json<PostMessageBody>,
) -> ApiResult<Json<Message>> {
    let message = server
        .coordinator
        .post_message(game_id, auth.user_id, &body.content, body.kind)
        .await?;
    Ok(Json(message))
}

async fn update_settings(
    State(server): State<Arc<GameServer>>,
    auth: BearerAuth,
    Path(game_id): Path<GameId>,
    Json(body): Json<SettingsPatchBody>,
) -> ApiResult<StatusCode> {
    server
        .coordinator
        .update_settings(game_id, auth.user_id, body.patch, body.max_chapters)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn leave_game(
    State(server): State<Arc<GameServer>>,
    auth: BearerAuth,
    Path(game_id): Path<GameId>,
) -> ApiResult<StatusCode> {
    server.coordinator.leave_game(game_id, auth.user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    async fn build() -> Arc<GameServer> {
        GameServer::new(Config::default()).await.unwrap()
    }

    #[tokio::test]
    async fn health_check_reports_ok() {
        let server = build().await;
        let app = create_router(server);
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn get_game_returns_404_for_unknown_id() {
        let server = build().await;
        let app = create_router(server);
        let uri = format!("/v1/games/{}", uuid::Uuid::new_v4());
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn start_game_requires_bearer_token() {
        let server = build().await;
        let app = create_router(server);
        let uri = format!("/v1/rooms/{}/start", uuid::Uuid::new_v4());
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
