use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

/// A small error enum implementing `IntoResponse`, matching the shape of the teacher's
/// `axum_server::error::Error` (status mapping, `Json(json!({"error": ...}))` body). Only
/// request-handler errors surface to HTTP clients (spec.md §7's propagation policy); peer
/// RPC failures are absorbed and logged at their component boundary instead.
#[derive(Debug)]
pub enum Error {
    BadRequest(String),
    NotFound,
    Internal(String),
}

impl IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            Error::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Error::NotFound => (StatusCode::NOT_FOUND, "Not Found".to_string()),
            Error::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}
