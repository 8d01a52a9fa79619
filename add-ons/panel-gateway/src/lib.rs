//! panel-gateway: HTTP surface for interview sessions.
//!
//! Every mutating route passes the admission guard first; allowed and denied responses both
//! carry `X-RateLimit-*` headers (and `Retry-After` when denied).

pub mod error;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use state::AppState;

use axum::http::Method;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub fn build_app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
        .expose_headers(Any);

    Router::new()
        .route("/api/v1/health", get(routes::health))
        .route("/api/v1/interviews", post(routes::create_interview))
        .route("/api/v1/interviews/:id", get(routes::get_interview))
        .route("/api/v1/interviews/:id/turns", post(routes::post_turn))
        .route("/api/v1/interviews/:id/pause", post(routes::pause_interview))
        .route("/api/v1/interviews/:id/resume", post(routes::resume_interview))
        .route("/api/v1/interviews/:id/cancel", post(routes::cancel_turn))
        .route("/api/v1/interviews/:id/end", post(routes::end_interview))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
