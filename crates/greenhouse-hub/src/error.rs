//! Error types for the hub's HTTP surface.
//!
//! [`HubError`] maps every failure to a status code and a JSON body of the
//! form `{"error": <message>, "status": <code>}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use greenhouse_core::StoreError;

/// Errors that can occur in the hub API layer.
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    /// The requested plant is not tracked.
    #[error("not found: {0}")]
    NotFound(String),

    /// The command conflicts with the plant's state.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Persistence is unavailable; the command can be retried.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// A plant id could not be parsed from the request path.
    #[error("invalid id: {0}")]
    InvalidId(String),

    /// The request was well-formed but its values are not acceptable.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// An internal error occurred.
    #[error("internal error: {0}")]
    Internal(String),
}

impl HubError {
    /// The HTTP status this error maps to.
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::InvalidId(_) | Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StoreError> for HubError {
    fn from(err: StoreError) -> Self {
        let message = err.to_string();
        match err {
            StoreError::NotFound(_) => Self::NotFound(message),
            StoreError::AlreadyDead(_) => Self::Conflict(message),
            StoreError::Persistence { .. } => Self::Unavailable(message),
            StoreError::InvalidDecayRate { .. } => Self::InvalidRequest(message),
            StoreError::UnknownSpecies { .. } => Self::Internal(message),
        }
    }
}

impl IntoResponse for HubError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = serde_json::json!({
            "error": self.to_string(),
            "status": status.as_u16(),
        });
        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use greenhouse_core::PersistError;
    use greenhouse_types::PlantId;

    use super::*;

    #[test]
    fn store_errors_map_to_statuses() {
        let id = PlantId::new();
        assert_eq!(
            HubError::from(StoreError::NotFound(id)).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            HubError::from(StoreError::AlreadyDead(id)).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            HubError::from(StoreError::Persistence {
                id,
                source: PersistError::Backend(String::from("down")),
            })
            .status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
