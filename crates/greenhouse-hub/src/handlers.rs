//! REST handlers for the service banner and plant commands.

use std::str::FromStr;
use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use greenhouse_types::PlantId;
use tracing::info;

use crate::error::HubError;
use crate::state::AppState;

/// Service name reported by the banner.
pub const SERVICE_NAME: &str = "Virtual Greenhouse API";

fn parse_plant_id(raw: &str) -> Result<PlantId, HubError> {
    PlantId::from_str(raw).map_err(|e| HubError::InvalidId(format!("{raw}: {e}")))
}

/// Service banner.
///
/// # Route
///
/// `GET /`
pub async fn index(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "message": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "subscribers": state.hub.subscriber_count(),
    }))
}

/// Current state of one plant.
///
/// # Route
///
/// `GET /api/plants/{id}`
pub async fn get_plant(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, HubError> {
    let id = parse_plant_id(&id)?;
    let plant = state.store.get(id).await?;
    Ok(Json(plant))
}

/// Water a plant back to full.
///
/// # Route
///
/// `POST /api/plants/{id}/water`
///
/// Responds 200 with the new state, 404 for an unknown plant, 409 for a
/// dead one and 503 when the write could not be persisted.
pub async fn water_plant(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, HubError> {
    let id = parse_plant_id(&id)?;
    let plant = state.commands.water(id).await?;
    Ok(Json(plant))
}

/// Re-read a plant from storage after it was edited elsewhere.
///
/// # Route
///
/// `POST /api/plants/{id}/reload`
///
/// Responds 200 with the fresh state, or 404 if the record no longer
/// exists (the plant is then no longer tracked).
pub async fn reload_plant(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, HubError> {
    let id = parse_plant_id(&id)?;
    let plant = state
        .store
        .reload(id)
        .await?
        .ok_or_else(|| HubError::NotFound(format!("plant {id}")))?;
    info!(plant_id = %id, "Plant reloaded from storage");
    Ok(Json(plant))
}
