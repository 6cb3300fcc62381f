//! `WebSocket` subscriber endpoint.
//!
//! Clients connect to `GET /ws/plants` and receive every transition event
//! as a text frame `{"event":<name>,"data":<payload>}`. The socket also
//! accepts commands:
//!
//! ```json
//! {"event":"water-plant","data":{"plantId":"<uuid>"}}
//! ```
//!
//! A successful watering is announced to every subscriber through the
//! normal `plant-watered` broadcast. A rejected command is answered on this
//! socket only, with a `command-error` frame.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use greenhouse_types::PlantId;
use serde::Deserialize;
use tracing::debug;

use crate::error::HubError;
use crate::hub::{Frame, TransportKind};
use crate::state::AppState;

/// A command sent by a `WebSocket` client.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientCommand {
    /// Refill a plant to full water.
    WaterPlant(WaterPlant),
}

/// Payload of the `water-plant` command.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaterPlant {
    /// The plant to water.
    pub plant_id: PlantId,
}

/// Upgrade an HTTP request to a `WebSocket` subscriber.
///
/// # Route
///
/// `GET /ws/plants`
pub async fn ws_plants(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_ws(socket, state))
}

/// Forward hub frames to the socket and execute inbound commands until
/// either side goes away.
async fn handle_ws(mut socket: WebSocket, state: Arc<AppState>) {
    let (registration, mut rx) = state.hub.register(TransportKind::WebSocket);
    debug!(session_id = %registration.session_id(), "WebSocket client connected");

    loop {
        tokio::select! {
            frame = rx.recv() => {
                let Some(frame) = frame else {
                    debug!("Hub closed, shutting down WebSocket");
                    return;
                };
                if socket.send(Message::Text(frame.to_ws_text().into())).await.is_err() {
                    debug!("WebSocket client disconnected (send failed)");
                    return;
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("WebSocket client disconnected");
                        return;
                    }
                    Some(Ok(Message::Text(text))) => {
                        if let Some(reply) = handle_command(&state, text.as_str()).await {
                            let msg = Message::Text(reply.to_ws_text().into());
                            if socket.send(msg).await.is_err() {
                                debug!("WebSocket client disconnected (reply failed)");
                                return;
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            debug!("WebSocket client disconnected (pong failed)");
                            return;
                        }
                    }
                    Some(Err(e)) => {
                        debug!("WebSocket error: {e}");
                        return;
                    }
                    _ => {}
                }
            }
        }
    }
}

/// Execute one inbound command. Returns the direct reply, if any.
pub async fn handle_command(state: &AppState, text: &str) -> Option<Frame> {
    let command: ClientCommand = match serde_json::from_str(text) {
        Ok(command) => command,
        Err(e) => {
            debug!(error = %e, "Ignoring unrecognised WebSocket message");
            return Some(Frame::command_error(None, &format!("unrecognised command: {e}")));
        }
    };

    match command {
        ClientCommand::WaterPlant(WaterPlant { plant_id }) => {
            match state.commands.water(plant_id).await {
                Ok(_) => None,
                Err(e) => {
                    let error = HubError::from(e);
                    debug!(plant_id = %plant_id, error = %error, "Watering rejected");
                    Some(Frame::command_error(Some(plant_id), &error.to_string()))
                }
            }
        }
    }
}
