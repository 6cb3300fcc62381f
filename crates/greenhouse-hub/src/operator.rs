//! Operator REST API for runtime control of the decay scheduler.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET` | `/api/operator/status` | Current scheduler status |
//! | `POST` | `/api/operator/pause` | Pause ticking |
//! | `POST` | `/api/operator/resume` | Resume ticking |
//! | `POST` | `/api/operator/speed` | Set tick interval (ms) |
//! | `POST` | `/api/operator/stop` | Stop after the current tick |

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::response::IntoResponse;
use greenhouse_core::SchedulerControl;
use greenhouse_core::control::MIN_TICK_INTERVAL_MS;

use crate::error::HubError;
use crate::state::AppState;

/// Request body for `POST /api/operator/speed`.
#[derive(Debug, serde::Deserialize)]
pub struct SetSpeedRequest {
    /// New tick interval in milliseconds.
    pub tick_interval_ms: u64,
}

#[derive(Debug, serde::Serialize)]
struct OperatorResponse {
    ok: bool,
    message: String,
}

fn control(state: &AppState) -> Result<&Arc<SchedulerControl>, HubError> {
    state
        .control
        .as_ref()
        .ok_or_else(|| HubError::Internal("scheduler control not available".to_owned()))
}

/// Pause the decay scheduler after its current tick.
pub async fn pause(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, HubError> {
    control(&state)?.pause();
    Ok(Json(OperatorResponse {
        ok: true,
        message: "Decay paused".to_owned(),
    }))
}

/// Resume the decay scheduler.
pub async fn resume(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, HubError> {
    control(&state)?.resume();
    Ok(Json(OperatorResponse {
        ok: true,
        message: "Decay resumed".to_owned(),
    }))
}

/// Change the tick interval. Takes effect from the next sleep.
pub async fn set_speed(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SetSpeedRequest>,
) -> Result<impl IntoResponse, HubError> {
    let previous = control(&state)?
        .set_tick_interval_ms(body.tick_interval_ms)
        .ok_or_else(|| {
            HubError::InvalidRequest(format!(
                "tick_interval_ms must be at least {MIN_TICK_INTERVAL_MS}"
            ))
        })?;
    Ok(Json(serde_json::json!({
        "ok": true,
        "message": format!("Tick interval changed from {previous}ms to {}ms", body.tick_interval_ms),
        "previous_interval_ms": previous,
        "new_interval_ms": body.tick_interval_ms,
    })))
}

/// Current scheduler status with plant counts.
pub async fn status(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, HubError> {
    let control = control(&state)?;
    let alive = state.store.alive_snapshot().await.len();
    let total = state.store.len().await;
    Ok(Json(control.status(alive, total).await))
}

/// Stop the decay scheduler once the current tick completes. The hub keeps
/// serving.
pub async fn stop(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, HubError> {
    control(&state)?.request_stop();
    Ok(Json(OperatorResponse {
        ok: true,
        message: "Stop requested, decay will end after the current tick".to_owned(),
    }))
}
