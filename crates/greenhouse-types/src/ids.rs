//! Type-safe identifier wrappers around [`Uuid`].
//!
//! Plants, species, audit entries and subscriber sessions each carry a
//! strongly-typed ID so they cannot be mixed up at compile time. All IDs
//! use UUID v7 (time-ordered) for efficient database indexing.

use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

/// Generates a newtype wrapper around [`Uuid`] with standard derives.
macro_rules! define_id {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
        #[ts(export, export_to = "bindings/")]
        pub struct $name(pub Uuid);

        impl $name {
            /// Create a new identifier using UUID v7 (time-ordered).
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            /// Return the inner [`Uuid`] value.
            pub const fn into_inner(self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl core::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

define_id! {
    /// Unique identifier for a plant.
    PlantId
}

define_id! {
    /// Unique identifier for a plant species.
    SpeciesId
}

define_id! {
    /// Unique identifier for the account that owns a plant.
    UserId
}

define_id! {
    /// Unique identifier for an audit log entry.
    LogEntryId
}

define_id! {
    /// Unique identifier for a connected real-time subscriber.
    SessionId
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_distinct_types() {
        let plant = PlantId::new();
        let species = SpeciesId::new();
        assert_ne!(plant.into_inner(), Uuid::nil());
        assert_ne!(species.into_inner(), Uuid::nil());
    }

    #[test]
    fn id_serializes_as_bare_uuid_string() {
        let id = PlantId::new();
        let json = serde_json::to_string(&id).unwrap_or_default();
        assert_eq!(json, format!("\"{id}\""));
    }

    #[test]
    fn id_parses_from_str() {
        let id = PlantId::new();
        let parsed: Result<PlantId, _> = id.to_string().parse();
        assert_eq!(parsed.ok(), Some(id));
        assert!("not-a-uuid".parse::<PlantId>().is_err());
    }
}
