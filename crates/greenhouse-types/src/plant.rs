//! Plant and species records.
//!
//! A [`Plant`] is the unit of decaying state tracked by the core. Its water
//! level drains by its [`Species`] decay rate once per tick until it reaches
//! zero, at which point the plant is dead and stays dead.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::ids::{PlantId, SpeciesId, UserId};

/// Water level of a freshly created or freshly watered plant.
pub const MAX_WATER: Decimal = Decimal::ONE_HUNDRED;

/// Lowest possible water level. A plant that reaches it is dead.
pub const MIN_WATER: Decimal = Decimal::ZERO;

/// Clamp a water level into `[MIN_WATER, MAX_WATER]`.
pub fn clamp_water(level: Decimal) -> Decimal {
    level.clamp(MIN_WATER, MAX_WATER)
}

/// A plant species. Every plant of a species loses the same amount of water
/// per tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct Species {
    /// Species identifier.
    pub id: SpeciesId,
    /// Display name (e.g. "Tomato").
    pub name: String,
    /// Water units consumed per tick. Never negative.
    #[serde(with = "rust_decimal::serde::float")]
    #[ts(type = "number")]
    pub decay_rate: Decimal,
}

/// Current state of a single plant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct Plant {
    /// Plant identifier.
    pub id: PlantId,
    /// Display name chosen by the owner.
    pub name: String,
    /// Owning account, if the record is bound to one.
    pub owner: Option<UserId>,
    /// Species reference (determines the decay rate).
    pub species_id: SpeciesId,
    /// Current water level in `[0, 100]`.
    #[serde(with = "rust_decimal::serde::float")]
    #[ts(type = "number")]
    pub current_water: Decimal,
    /// Whether the plant has died. Terminal with respect to decay.
    pub is_dead: bool,
}

impl Plant {
    /// Create a living plant with a full water level.
    pub fn new(name: impl Into<String>, species_id: SpeciesId) -> Self {
        Self {
            id: PlantId::new(),
            name: name.into(),
            owner: None,
            species_id,
            current_water: MAX_WATER,
            is_dead: false,
        }
    }

    /// Set the initial water level (clamped into range).
    #[must_use]
    pub fn with_water(mut self, level: Decimal) -> Self {
        self.current_water = clamp_water(level);
        self
    }

    /// Bind the plant to an owning account.
    #[must_use]
    pub const fn with_owner(mut self, owner: UserId) -> Self {
        self.owner = Some(owner);
        self
    }

    /// Whether the plant is still subject to decay.
    pub const fn is_alive(&self) -> bool {
        !self.is_dead
    }
}

/// Everything the core needs to start: all species and all plants.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalog {
    /// Registered species.
    pub species: Vec<Species>,
    /// Tracked plants, alive or dead.
    pub plants: Vec<Plant>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_plant_starts_full_and_alive() {
        let plant = Plant::new("Fern", SpeciesId::new());
        assert_eq!(plant.current_water, MAX_WATER);
        assert!(plant.is_alive());
        assert!(plant.owner.is_none());
    }

    #[test]
    fn with_water_clamps() {
        let species = SpeciesId::new();
        let over = Plant::new("A", species).with_water(Decimal::new(150, 0));
        let under = Plant::new("B", species).with_water(Decimal::new(-3, 0));
        assert_eq!(over.current_water, MAX_WATER);
        assert_eq!(under.current_water, MIN_WATER);
    }

    #[test]
    fn water_serializes_as_json_number() {
        let plant = Plant::new("Fern", SpeciesId::new()).with_water(Decimal::new(805, 1));
        let value = serde_json::to_value(&plant).unwrap_or_default();
        assert_eq!(value["currentWater"], serde_json::json!(80.5));
        assert_eq!(value["isDead"], serde_json::json!(false));
    }
}
