//! HTTP Surface (C6): axum routes for publish, subscribe/unsubscribe, push-streams,
//! gossip, election and operator/debug endpoints. Built the way the teacher's
//! `http_api::axum_server` builds its router: a `with_state` shared `AppState`, a
//! `tower_http::trace::TraceLayer` for request logging, and a fallback handler.

mod error;
mod handlers;
mod state;

pub use error::Error;
pub use state::AppState;

use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/publish", post(handlers::publish))
        .route("/subscribe", post(handlers::subscribe))
        .route("/unsubscribe", post(handlers::unsubscribe))
        .route("/stream/:topic", get(handlers::stream))
        .route("/gossip", post(handlers::gossip))
        .route("/election", post(handlers::election))
        .route("/leader", post(handlers::leader_announcement))
        .route("/get_leader", get(handlers::get_leader))
        .route("/start_election", post(handlers::start_election))
        .route("/ping", get(handlers::ping))
        .route("/health", get(handlers::health))
        .route("/logs/:topic", get(handlers::logs))
        .route("/version", get(handlers::version))
        .fallback(handlers::not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
