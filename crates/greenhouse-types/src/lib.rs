//! Shared type definitions for the Virtual Greenhouse core.
//!
//! Every crate in the workspace speaks in these types. Wire payloads flow
//! downstream to `TypeScript` via `ts-rs` for the dashboard client.
//!
//! # Modules
//!
//! - [`ids`] -- Type-safe UUID wrappers for all identifiers
//! - [`plant`] -- Plant and species records, water bounds
//! - [`events`] -- Sensor readings and fan-out transition events
//! - [`audit`] -- Audit log entries requested by the core

pub mod audit;
pub mod events;
pub mod ids;
pub mod plant;

// Re-export all public types at crate root for convenience.
pub use audit::{AuditEntry, LogLevel};
pub use events::{PlantDied, PlantEvent, PlantUpdate, PlantWatered, SensorReading};
pub use ids::{LogEntryId, PlantId, SessionId, SpeciesId, UserId};
pub use plant::{Catalog, MAX_WATER, MIN_WATER, Plant, Species, clamp_water};

#[cfg(test)]
mod tests {
    //! `TypeScript` binding generation.

    #[test]
    fn export_bindings() {
        // ts-rs writes the `.ts` files into `bindings/` relative to the
        // crate root when `export_all` is called.
        use ts_rs::TS;

        let _ = crate::ids::PlantId::export_all();
        let _ = crate::ids::SpeciesId::export_all();
        let _ = crate::plant::Plant::export_all();
        let _ = crate::plant::Species::export_all();
        let _ = crate::events::SensorReading::export_all();
        let _ = crate::events::PlantUpdate::export_all();
        let _ = crate::events::PlantDied::export_all();
        let _ = crate::events::PlantWatered::export_all();
        let _ = crate::audit::AuditEntry::export_all();
    }
}
