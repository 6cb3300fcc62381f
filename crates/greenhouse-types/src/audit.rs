//! Audit log entries requested by the core.
//!
//! The core only asks for entries to be written; storage and querying
//! belong to the persistence collaborator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::ids::{LogEntryId, PlantId};
use crate::plant::Plant;

/// Severity of an audit entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[ts(export, export_to = "bindings/")]
pub enum LogLevel {
    /// Routine activity (watering).
    Info,
    /// Noteworthy but non-fatal activity.
    Warning,
    /// A plant died.
    Critical,
}

impl LogLevel {
    /// Database representation of the level.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Critical => "CRITICAL",
        }
    }
}

/// A single audit log entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct AuditEntry {
    /// Entry identifier.
    pub id: LogEntryId,
    /// Human-readable message.
    pub message: String,
    /// Severity.
    pub level: LogLevel,
    /// Plant the entry refers to, if any.
    pub plant_id: Option<PlantId>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl AuditEntry {
    /// Entry recording a plant's death.
    pub fn death(plant: &Plant) -> Self {
        Self::new(format!("Plant \"{}\" died", plant.name), LogLevel::Critical, Some(plant.id))
    }

    /// Entry recording an explicit watering.
    pub fn watering(plant: &Plant) -> Self {
        Self::new(format!("Plant \"{}\" watered", plant.name), LogLevel::Info, Some(plant.id))
    }

    fn new(message: String, level: LogLevel, plant_id: Option<PlantId>) -> Self {
        Self {
            id: LogEntryId::new(),
            message,
            level,
            plant_id,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::SpeciesId;

    #[test]
    fn death_entry_is_critical() {
        let plant = Plant::new("My Tomato", SpeciesId::new());
        let entry = AuditEntry::death(&plant);
        assert_eq!(entry.level, LogLevel::Critical);
        assert_eq!(entry.message, "Plant \"My Tomato\" died");
        assert_eq!(entry.plant_id, Some(plant.id));
    }

    #[test]
    fn level_serializes_upper_case() {
        let json = serde_json::to_string(&LogLevel::Critical).unwrap_or_default();
        assert_eq!(json, "\"CRITICAL\"");
        assert_eq!(LogLevel::Info.as_str(), "INFO");
    }
}
