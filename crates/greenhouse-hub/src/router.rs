//! Axum router construction for the hub.
//!
//! Assembles the banner, plant commands, operator controls and both
//! subscriber transports into a single [`Router`] with CORS and request
//! tracing.

use std::sync::Arc;

use axum::Router;
use axum::http::HeaderValue;
use axum::routing::{get, post};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::state::AppState;
use crate::{handlers, operator, sse, ws};

/// Build the complete Axum router for the hub.
///
/// The router includes:
/// - `GET /` -- service banner
/// - `GET /ws/plants` -- `WebSocket` subscriber (events out, commands in)
/// - `GET /api/sse/plants` -- event-stream subscriber
/// - `GET /api/plants/{id}` -- current plant state
/// - `POST /api/plants/{id}/water` -- water a plant
/// - `POST /api/plants/{id}/reload` -- re-read a plant from storage
/// - `/api/operator/*` -- scheduler controls
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.cors_origins);

    Router::new()
        .route("/", get(handlers::index))
        // Subscribers
        .route("/ws/plants", get(ws::ws_plants))
        .route("/api/sse/plants", get(sse::sse_plants))
        // Plant commands
        .route("/api/plants/{id}", get(handlers::get_plant))
        .route("/api/plants/{id}/water", post(handlers::water_plant))
        .route("/api/plants/{id}/reload", post(handlers::reload_plant))
        // Operator
        .route("/api/operator/status", get(operator::status))
        .route("/api/operator/pause", post(operator::pause))
        .route("/api/operator/resume", post(operator::resume))
        .route("/api/operator/speed", post(operator::set_speed))
        .route("/api/operator/stop", post(operator::stop))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// CORS for the configured origins; any origin when the list is empty.
fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() {
        return layer.allow_origin(Any);
    }
    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(origin, error = %e, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(parsed))
}
