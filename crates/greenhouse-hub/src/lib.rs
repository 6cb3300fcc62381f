//! Fan-out hub for the Virtual Greenhouse.
//!
//! This crate provides an Axum server that exposes:
//!
//! - **`WebSocket` endpoint** (`/ws/plants`) streaming transition events and
//!   accepting `water-plant` commands
//! - **Event-stream endpoint** (`/api/sse/plants`) streaming the same events
//! - **REST endpoints** for watering and reloading plants
//! - **Operator endpoints** for pausing, resuming and stopping decay
//!
//! # Architecture
//!
//! [`FanoutHub`] is the core's event sink. Each broadcast serializes the
//! event once and pushes the shared frame into a bounded queue per
//! subscriber, so a stalled client never blocks the others. Both
//! transports render the same `data` bytes.
//!
//! [`FanoutHub`]: hub::FanoutHub

pub mod error;
pub mod handlers;
pub mod hub;
pub mod operator;
pub mod router;
pub mod server;
pub mod sse;
pub mod startup;
pub mod state;
pub mod ws;

// Re-export primary types for convenience.
pub use hub::{FanoutHub, Frame, Registration, TransportKind};
pub use router::build_router;
pub use server::{ServerConfig, ServerError, serve, start_server};
pub use state::AppState;
