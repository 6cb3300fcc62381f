//! Persistence collaborator interfaces.
//!
//! The core never owns durable storage. It reads the catalog and writes
//! each new water level through a [`PlantRepository`], and asks an
//! [`AuditLog`] to record deaths and waterings. Records are created,
//! renamed and deleted by an external CRUD layer; the core only updates the
//! water level and liveness of records that still exist. `greenhouse-db` provides the
//! `PostgreSQL` implementation; [`InMemoryRepository`] backs tests and the
//! database-less deployment.
//!
//! The traits return boxed futures so they can be used as trait objects
//! (`Arc<dyn PlantRepository>`).

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use futures::future::BoxFuture;
use greenhouse_types::{AuditEntry, Catalog, Plant, PlantId, Species};
use tokio::sync::Mutex;

/// Errors reported by a persistence collaborator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PersistError {
    /// The backend rejected or failed the operation.
    #[error("persistence backend error: {0}")]
    Backend(String),

    /// The operation did not finish within the allotted time.
    #[error("persistence timed out after {0:?}")]
    Timeout(Duration),

    /// The record was deleted by another collaborator.
    #[error("plant {0} no longer exists")]
    Missing(PlantId),
}

/// Read/write access to plant records.
pub trait PlantRepository: Send + Sync {
    /// Load every species and plant.
    fn load_catalog(&self) -> BoxFuture<'_, Result<Catalog, PersistError>>;

    /// Fetch a single plant by id. `Ok(None)` means the record is gone.
    fn fetch_plant(&self, id: PlantId) -> BoxFuture<'_, Result<Option<Plant>, PersistError>>;

    /// Update the water level and liveness of an existing plant.
    ///
    /// Name, owner and species are never written. Returns
    /// [`PersistError::Missing`] when the record is gone.
    fn save_plant<'a>(&'a self, plant: &'a Plant) -> BoxFuture<'a, Result<(), PersistError>>;
}

/// Sink for audit log entries.
pub trait AuditLog: Send + Sync {
    /// Record one entry.
    fn record<'a>(&'a self, entry: &'a AuditEntry) -> BoxFuture<'a, Result<(), PersistError>>;
}

#[derive(Debug, Default)]
struct MemoryTables {
    species: BTreeMap<greenhouse_types::SpeciesId, Species>,
    plants: BTreeMap<PlantId, Plant>,
    audit: Vec<AuditEntry>,
    failing: BTreeSet<PlantId>,
}

/// In-process repository and audit log.
///
/// Writes for plants listed via [`fail_saves_for`](Self::fail_saves_for)
/// fail with [`PersistError::Backend`], which lets tests exercise the
/// per-plant failure isolation of the scheduler.
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    tables: Mutex<MemoryTables>,
}

impl InMemoryRepository {
    /// Create an empty repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a repository pre-populated with a catalog.
    pub fn with_catalog(catalog: Catalog) -> Self {
        let tables = MemoryTables {
            species: catalog.species.into_iter().map(|s| (s.id, s)).collect(),
            plants: catalog.plants.into_iter().map(|p| (p.id, p)).collect(),
            ..MemoryTables::default()
        };
        Self {
            tables: Mutex::new(tables),
        }
    }

    /// Insert or replace a plant record (acts as the CRUD collaborator).
    pub async fn put_plant(&self, plant: Plant) {
        self.tables.lock().await.plants.insert(plant.id, plant);
    }

    /// Insert or replace a species record.
    pub async fn put_species(&self, species: Species) {
        self.tables.lock().await.species.insert(species.id, species);
    }

    /// Delete a plant record.
    pub async fn delete_plant(&self, id: PlantId) {
        self.tables.lock().await.plants.remove(&id);
    }

    /// Make every subsequent save for `id` fail.
    pub async fn fail_saves_for(&self, id: PlantId) {
        self.tables.lock().await.failing.insert(id);
    }

    /// Let saves for `id` succeed again.
    pub async fn heal(&self, id: PlantId) {
        self.tables.lock().await.failing.remove(&id);
    }

    /// The stored copy of a plant.
    pub async fn stored(&self, id: PlantId) -> Option<Plant> {
        self.tables.lock().await.plants.get(&id).cloned()
    }

    /// All audit entries recorded so far, oldest first.
    pub async fn audit_entries(&self) -> Vec<AuditEntry> {
        self.tables.lock().await.audit.clone()
    }
}

impl PlantRepository for InMemoryRepository {
    fn load_catalog(&self) -> BoxFuture<'_, Result<Catalog, PersistError>> {
        Box::pin(async move {
            let tables = self.tables.lock().await;
            Ok(Catalog {
                species: tables.species.values().cloned().collect(),
                plants: tables.plants.values().cloned().collect(),
            })
        })
    }

    fn fetch_plant(&self, id: PlantId) -> BoxFuture<'_, Result<Option<Plant>, PersistError>> {
        Box::pin(async move { Ok(self.tables.lock().await.plants.get(&id).cloned()) })
    }

    fn save_plant<'a>(&'a self, plant: &'a Plant) -> BoxFuture<'a, Result<(), PersistError>> {
        Box::pin(async move {
            let mut tables = self.tables.lock().await;
            if tables.failing.contains(&plant.id) {
                return Err(PersistError::Backend(format!(
                    "simulated write failure for plant {}",
                    plant.id
                )));
            }
            let stored = tables
                .plants
                .get_mut(&plant.id)
                .ok_or(PersistError::Missing(plant.id))?;
            stored.current_water = plant.current_water;
            stored.is_dead = plant.is_dead;
            Ok(())
        })
    }
}

impl AuditLog for InMemoryRepository {
    fn record<'a>(&'a self, entry: &'a AuditEntry) -> BoxFuture<'a, Result<(), PersistError>> {
        Box::pin(async move {
            self.tables.lock().await.audit.push(entry.clone());
            Ok(())
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use greenhouse_types::{LogLevel, SpeciesId, UserId};
    use rust_decimal::Decimal;

    use super::*;

    #[tokio::test]
    async fn save_then_load_catalog() {
        let repo = InMemoryRepository::new();
        let plant = Plant::new("Fern", SpeciesId::new());
        repo.put_plant(plant.clone()).await;
        let drier = plant.clone().with_water(Decimal::new(40, 0));
        repo.save_plant(&drier).await.unwrap();

        let catalog = repo.load_catalog().await.unwrap();
        assert_eq!(catalog.plants, vec![drier.clone()]);
        assert_eq!(repo.fetch_plant(plant.id).await.unwrap(), Some(drier));
    }

    #[tokio::test]
    async fn save_only_touches_water_and_liveness() {
        let repo = InMemoryRepository::new();
        let owner = UserId::new();
        let plant = Plant::new("Old Name", SpeciesId::new());
        repo.put_plant(Plant {
            name: String::from("New Name"),
            ..plant.clone().with_owner(owner)
        })
        .await;

        let mut dead = plant.clone().with_water(Decimal::ZERO);
        dead.is_dead = true;
        repo.save_plant(&dead).await.unwrap();

        let stored = repo.stored(plant.id).await.unwrap();
        assert_eq!(stored.name, "New Name");
        assert_eq!(stored.owner, Some(owner));
        assert!(stored.is_dead);
        assert_eq!(stored.current_water, Decimal::ZERO);
    }

    #[tokio::test]
    async fn saving_a_deleted_plant_never_recreates_it() {
        let repo = InMemoryRepository::new();
        let plant = Plant::new("Doomed", SpeciesId::new());
        repo.put_plant(plant.clone()).await;
        repo.delete_plant(plant.id).await;

        assert_eq!(
            repo.save_plant(&plant).await,
            Err(PersistError::Missing(plant.id))
        );
        assert!(repo.stored(plant.id).await.is_none());
    }

    #[tokio::test]
    async fn failing_saves_are_reported() {
        let repo = InMemoryRepository::new();
        let plant = Plant::new("Fern", SpeciesId::new());
        repo.put_plant(plant.clone()).await;
        repo.fail_saves_for(plant.id).await;
        assert!(matches!(
            repo.save_plant(&plant).await,
            Err(PersistError::Backend(_))
        ));
        repo.heal(plant.id).await;
        assert!(repo.save_plant(&plant).await.is_ok());
    }

    #[tokio::test]
    async fn audit_entries_are_kept_in_order() {
        let repo = InMemoryRepository::new();
        let plant = Plant::new("Fern", SpeciesId::new());
        repo.record(&AuditEntry::watering(&plant)).await.unwrap();
        repo.record(&AuditEntry::death(&plant)).await.unwrap();

        let levels: Vec<_> = repo.audit_entries().await.iter().map(|e| e.level).collect();
        assert_eq!(levels, vec![LogLevel::Info, LogLevel::Critical]);
    }
}
