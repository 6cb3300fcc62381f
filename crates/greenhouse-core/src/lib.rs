//! Decay simulation engine for the Virtual Greenhouse.
//!
//! This crate owns the authoritative plant state and everything that
//! mutates it. It knows nothing about HTTP, databases or brokers: those
//! meet it through traits.
//!
//! # Modules
//!
//! - [`store`] -- Per-plant atomic state with write-through persistence
//! - [`decay`] -- Decay arithmetic and the death edge
//! - [`scheduler`] -- Periodic tick loop over every living plant
//! - [`control`] -- Pause, resume, stop and interval of the tick loop
//! - [`commands`] -- Watering and other out-of-band mutations
//! - [`bridge`] -- Broker abstraction, reading codec and event relay
//! - [`sink`] -- Destination trait for transition events
//! - [`repository`] -- Persistence collaborator traits and in-memory backend
//! - [`config`] -- YAML configuration with environment overrides

pub mod bridge;
pub mod commands;
pub mod config;
pub mod control;
pub mod decay;
pub mod repository;
pub mod scheduler;
pub mod sink;
pub mod store;

pub use bridge::{BridgeError, InboundMessage, LoopbackTransport, MessageHandler, Transport};
pub use commands::CommandHandler;
pub use config::{ConfigError, GreenhouseConfig};
pub use control::{SchedulerControl, SchedulerStatus, StopReason};
pub use repository::{AuditLog, InMemoryRepository, PersistError, PlantRepository};
pub use scheduler::{DecayScheduler, SchedulerResult, SchedulerSettings, TickSummary};
pub use sink::{EventSink, RecordingSink};
pub use store::{Applied, PlantStore, StoreError, SyncReport};
