//! Exercises the HTTP surface across a full game lifecycle: room seeding (no
//! HTTP surface exists for that, so it goes through `GameServer::store()`
//! directly, mirroring how a lobby service would have already written the
//! room before a player hits `/v1/rooms/{id}/start`), then start, inspect,
//! act, continue, adjust settings, and leave entirely over HTTP.

mod support;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use game_session_orchestrator::config::Config;
use game_session_orchestrator::server::create_router;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

async fn send(
    app: &axum::Router,
    method: &str,
    uri: &str,
    auth: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = auth {
        builder = builder.header("Authorization", token);
    }
    let body = match body {
        Some(v) => {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&v).unwrap())
        }
        None => Body::empty(),
    };
    let request = builder.body(body).unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, json)
}

#[tokio::test]
async fn full_lifecycle_through_http() {
    let server = support::build_server(Config::default()).await;
    let admin = Uuid::new_v4();
    let player = Uuid::new_v4();
    let room_id = support::seed_ready_room(&server, admin, &[player]).await;
    let app = create_router(server);

    let (status, body) = send(
        &app,
        "POST",
        &format!("/v1/rooms/{room_id}/start"),
        Some(&support::bearer(admin)),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let game_id = body.as_str().unwrap();

    let (status, game) = send(&app, "GET", &format!("/v1/games/{game_id}"), None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(game["room_id"], json!(room_id));

    let (status, _) = send(
        &app,
        "POST",
        &format!("/v1/games/{game_id}/actions"),
        Some(&support::bearer(player)),
        Some(json!({ "action_text": "look around the room" })),
    )
    .await;
    assert!(
        status == StatusCode::OK || status == StatusCode::CONFLICT,
        "unexpected status {status}"
    );

    let (status, _) = send(
        &app,
        "POST",
        &format!("/v1/games/{game_id}/messages"),
        Some(&support::bearer(player)),
        Some(json!({ "content": "hello everyone" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, messages) = send(
        &app,
        "GET",
        &format!("/v1/games/{game_id}/messages"),
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(messages.as_array().unwrap().len(), 1);

    let (status, _) = send(
        &app,
        "PATCH",
        &format!("/v1/games/{game_id}/settings"),
        Some(&support::bearer(admin)),
        Some(json!({ "max_chapters": 5 })),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, game) = send(&app, "GET", &format!("/v1/games/{game_id}"), None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(game["max_chapters"], json!(5));

    let (status, _) = send(
        &app,
        "PATCH",
        &format!("/v1/games/{game_id}/settings"),
        Some(&support::bearer(player)),
        Some(json!({ "max_chapters": 3 })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(
        &app,
        "POST",
        &format!("/v1/games/{game_id}/leave"),
        Some(&support::bearer(player)),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, members) = send(
        &app,
        "GET",
        &format!("/v1/games/{game_id}/members"),
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(members.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn start_game_from_room_is_idempotent_over_http() {
    let server = support::build_server(Config::default()).await;
    let admin = Uuid::new_v4();
    let room_id = support::seed_ready_room(&server, admin, &[]).await;
    let app = create_router(server);

    let (status, first) = send(
        &app,
        "POST",
        &format!("/v1/rooms/{room_id}/start"),
        Some(&support::bearer(admin)),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, second) = send(
        &app,
        "POST",
        &format!("/v1/rooms/{room_id}/start"),
        Some(&support::bearer(admin)),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first, second);
}

#[tokio::test]
async fn start_game_from_room_rejects_non_admin() {
    let server = support::build_server(Config::default()).await;
    let admin = Uuid::new_v4();
    let other = Uuid::new_v4();
    let room_id = support::seed_ready_room(&server, admin, &[other]).await;
    let app = create_router(server);

    let (status, _) = send(
        &app,
        "POST",
        &format!("/v1/rooms/{room_id}/start"),
        Some(&support::bearer(other)),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn settings_patch_rejects_out_of_bounds_max_chapters() {
    let server = support::build_server(Config::default()).await;
    let admin = Uuid::new_v4();
    let room_id = support::seed_ready_room(&server, admin, &[]).await;
    let app = create_router(server);

    let (_, game_id_json) = send(
        &app,
        "POST",
        &format!("/v1/rooms/{room_id}/start"),
        Some(&support::bearer(admin)),
        None,
    )
    .await;
    let game_id = game_id_json.as_str().unwrap();

    let (status, _) = send(
        &app,
        "PATCH",
        &format!("/v1/games/{game_id}/settings"),
        Some(&support::bearer(admin)),
        Some(json!({ "max_chapters": 0 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
