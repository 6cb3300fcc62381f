//! Wire payloads exchanged between the core, the broker and subscribers.
//!
//! - [`SensorReading`] travels over the transport bridge, one per plant per
//!   tick, on `greenhouse/sensors/{plantId}`.
//! - [`PlantEvent`] is the transition event fanned out to every real-time
//!   subscriber. Its [`name`](PlantEvent::name) and
//!   [`data`](PlantEvent::data) are identical for every transport kind.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::ids::PlantId;
use crate::plant::Plant;

/// Decay reading published by the scheduler after a plant's state update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct SensorReading {
    /// The plant this reading is about.
    pub plant_id: PlantId,
    /// Plant display name at the time of the reading.
    pub name: String,
    /// Water level after the tick was applied.
    #[serde(with = "rust_decimal::serde::float")]
    #[ts(type = "number")]
    pub current_water: Decimal,
    /// Whether the plant is dead after the tick.
    #[serde(default)]
    pub is_dead: bool,
    /// Set only on the tick where the plant crossed from alive to dead.
    #[serde(default)]
    pub died: bool,
    /// When the reading was taken (ISO-8601 on the wire).
    pub timestamp: DateTime<Utc>,
}

impl SensorReading {
    /// Build a reading from a plant's post-tick state.
    pub fn from_plant(plant: &Plant, died: bool) -> Self {
        Self {
            plant_id: plant.id,
            name: plant.name.clone(),
            current_water: plant.current_water,
            is_dead: plant.is_dead,
            died,
            timestamp: Utc::now(),
        }
    }
}

/// Payload of the `plant-update` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct PlantUpdate {
    /// Plant identifier.
    pub plant_id: PlantId,
    /// Water level after the update.
    #[serde(with = "rust_decimal::serde::float")]
    #[ts(type = "number")]
    pub water_level: Decimal,
    /// Whether the plant is dead.
    pub is_dead: bool,
    /// Plant display name.
    pub name: String,
}

/// Payload of the `plant-died` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct PlantDied {
    /// Plant identifier.
    pub plant_id: PlantId,
    /// Plant display name.
    pub name: String,
}

/// Payload of the `plant-watered` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct PlantWatered {
    /// Plant identifier.
    pub plant_id: PlantId,
    /// Water level after watering.
    #[serde(with = "rust_decimal::serde::float")]
    #[ts(type = "number")]
    pub water_level: Decimal,
}

/// A transition event delivered to every subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlantEvent {
    /// A decay tick changed the plant's water level.
    Updated(PlantUpdate),
    /// The plant crossed from alive to dead.
    Died(PlantDied),
    /// A watering command refilled the plant.
    Watered(PlantWatered),
}

impl PlantEvent {
    /// Wire name of the `Updated` event.
    pub const UPDATED: &'static str = "plant-update";
    /// Wire name of the `Died` event.
    pub const DIED: &'static str = "plant-died";
    /// Wire name of the `Watered` event.
    pub const WATERED: &'static str = "plant-watered";

    /// The event name used on every transport.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Updated(_) => Self::UPDATED,
            Self::Died(_) => Self::DIED,
            Self::Watered(_) => Self::WATERED,
        }
    }

    /// The plant the event is about.
    pub const fn plant_id(&self) -> PlantId {
        match self {
            Self::Updated(p) => p.plant_id,
            Self::Died(p) => p.plant_id,
            Self::Watered(p) => p.plant_id,
        }
    }

    /// Serialize the payload to its JSON text.
    ///
    /// # Errors
    ///
    /// Returns a [`serde_json::Error`] if serialization fails.
    pub fn data(&self) -> Result<String, serde_json::Error> {
        match self {
            Self::Updated(p) => serde_json::to_string(p),
            Self::Died(p) => serde_json::to_string(p),
            Self::Watered(p) => serde_json::to_string(p),
        }
    }

    /// Events derived from a decay reading: `plant-died` first when the
    /// reading carries the death edge, then `plant-update`.
    pub fn from_reading(reading: &SensorReading) -> Vec<Self> {
        let mut events = Vec::with_capacity(2);
        if reading.died {
            events.push(Self::Died(PlantDied {
                plant_id: reading.plant_id,
                name: reading.name.clone(),
            }));
        }
        events.push(Self::Updated(PlantUpdate {
            plant_id: reading.plant_id,
            water_level: reading.current_water,
            is_dead: reading.is_dead,
            name: reading.name.clone(),
        }));
        events
    }

    /// Event announcing a successful watering.
    pub const fn watered(plant: &Plant) -> Self {
        Self::Watered(PlantWatered {
            plant_id: plant.id,
            water_level: plant.current_water,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::SpeciesId;

    fn reading(died: bool) -> SensorReading {
        let plant = Plant {
            is_dead: died,
            current_water: Decimal::ZERO,
            ..Plant::new("Basil", SpeciesId::new())
        };
        SensorReading::from_plant(&plant, died)
    }

    #[test]
    fn death_edge_yields_died_then_update() {
        let events = PlantEvent::from_reading(&reading(true));
        let names: Vec<_> = events.iter().map(PlantEvent::name).collect();
        assert_eq!(names, vec!["plant-died", "plant-update"]);
    }

    #[test]
    fn ordinary_reading_yields_only_update() {
        let events = PlantEvent::from_reading(&reading(false));
        assert_eq!(events.len(), 1);
        assert_eq!(events.first().map(PlantEvent::name), Some("plant-update"));
    }

    #[test]
    fn update_payload_field_set() {
        let events = PlantEvent::from_reading(&reading(true));
        let data = events.last().and_then(|e| e.data().ok()).unwrap_or_default();
        let value: serde_json::Value = serde_json::from_str(&data).unwrap_or_default();
        let mut keys: Vec<_> = value
            .as_object()
            .map(|o| o.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        assert_eq!(keys, vec!["isDead", "name", "plantId", "waterLevel"]);
    }

    #[test]
    fn reading_timestamp_is_iso8601() {
        let json = serde_json::to_value(reading(false)).unwrap_or_default();
        let ts = json["timestamp"].as_str().unwrap_or_default();
        assert!(DateTime::parse_from_rfc3339(ts).is_ok());
    }

    #[test]
    fn reading_without_transition_flags_still_parses() {
        let raw = format!(
            r#"{{"plantId":"{}","name":"Old","currentWater":12.5,"timestamp":"2026-01-01T00:00:00Z"}}"#,
            crate::ids::PlantId::new()
        );
        let parsed: Result<SensorReading, _> = serde_json::from_str(&raw);
        assert!(parsed.is_ok_and(|r| !r.died && !r.is_dead));
    }
}
