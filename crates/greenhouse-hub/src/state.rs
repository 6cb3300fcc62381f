//! Shared application state for the hub server.
//!
//! [`AppState`] is wrapped in an [`Arc`] and handed to every Axum handler.
//! It bundles the subscriber registry, the command handler and read
//! access to the plant store.

use std::sync::Arc;
use std::time::Duration;

use greenhouse_core::{CommandHandler, PlantStore, SchedulerControl};

use crate::hub::FanoutHub;

/// Default interval between event-stream keep-alive comments.
const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(15);

/// Shared state accessible from all Axum handlers.
#[derive(Debug)]
pub struct AppState {
    /// Subscriber registry; also the event sink of the core.
    pub hub: Arc<FanoutHub>,
    /// Watering and other out-of-band commands.
    pub commands: Arc<CommandHandler>,
    /// Authoritative plant state.
    pub store: Arc<PlantStore>,
    /// Scheduler control, if a scheduler runs in this process.
    pub control: Option<Arc<SchedulerControl>>,
    /// Interval between event-stream keep-alive comments.
    pub keep_alive: Duration,
    /// Allowed CORS origins; empty allows any.
    pub cors_origins: Vec<String>,
}

impl AppState {
    /// Create state with default keep-alive, no scheduler control and
    /// permissive CORS.
    pub const fn new(
        hub: Arc<FanoutHub>,
        commands: Arc<CommandHandler>,
        store: Arc<PlantStore>,
    ) -> Self {
        Self {
            hub,
            commands,
            store,
            control: None,
            keep_alive: DEFAULT_KEEP_ALIVE,
            cors_origins: Vec::new(),
        }
    }

    /// Attach scheduler control for the operator endpoints.
    #[must_use]
    pub fn with_control(mut self, control: Arc<SchedulerControl>) -> Self {
        self.control = Some(control);
        self
    }

    /// Set the event-stream keep-alive interval.
    #[must_use]
    pub const fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Restrict CORS to the given origins.
    #[must_use]
    pub fn with_cors_origins(mut self, origins: Vec<String>) -> Self {
        self.cors_origins = origins;
        self
    }
}
