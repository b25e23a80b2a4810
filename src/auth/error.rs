use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Errors raised while extracting a caller identity from the `Authorization`
/// header. Authentication proper (registration, password hashing, token
/// issuance) is out of scope (SPEC_FULL.md §1 Non-goals); this only covers
/// the transport-boundary lookup that every operation needs a caller for.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing bearer token")]
    MissingToken,
    #[error("malformed bearer token")]
    MalformedToken,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": self.to_string(),
            "error_code": "UNAUTHORIZED",
        });
        (StatusCode::UNAUTHORIZED, axum::Json(body)).into_response()
    }
}
