//! Authoritative in-memory plant state with atomic per-plant updates.
//!
//! [`PlantStore`] maps plant ids to slots. Each slot owns an async mutex, so
//! two [`apply_delta`](PlantStore::apply_delta) calls for the same plant are
//! strictly serialized while calls for different plants proceed in parallel.
//! The plant map itself sits behind a read-write lock that is only held long
//! enough to look up a slot.
//!
//! Every committed state is persisted through the [`PlantRepository`] while
//! the slot is locked. If the write fails or exceeds the configured timeout
//! the in-memory state is left untouched, so the update is retried on the
//! next tick instead of diverging from storage. A write that finds the
//! record deleted drops the plant from the store.
//!
//! # Refill and decay
//!
//! A refill committed through [`apply_refill`](PlantStore::apply_refill)
//! exempts the plant from its next decay: the following
//! [`apply_decay`](PlantStore::apply_decay) clears the mark and leaves the
//! plant full. A watering that races a tick therefore always ends at full
//! water, whichever of the two takes the lock first.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use greenhouse_types::{Catalog, Plant, PlantId, Species, SpeciesId, clamp_water};
use rust_decimal::Decimal;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::repository::{PersistError, PlantRepository};

/// Errors returned by store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No plant with this id is tracked.
    #[error("plant not found: {0}")]
    NotFound(PlantId),

    /// The plant is dead and the requested change is not allowed.
    #[error("plant {0} is already dead")]
    AlreadyDead(PlantId),

    /// The plant references a species the store does not know.
    #[error("plant {plant} references unknown species {species}")]
    UnknownSpecies {
        /// The plant being updated.
        plant: PlantId,
        /// The missing species.
        species: SpeciesId,
    },

    /// A species was registered with a negative decay rate.
    #[error("species {species} has negative decay rate {rate}")]
    InvalidDecayRate {
        /// The rejected species.
        species: SpeciesId,
        /// The offending rate.
        rate: Decimal,
    },

    /// Writing the new state to the persistence collaborator failed.
    #[error("persistence failure for plant {id}: {source}")]
    Persistence {
        /// The plant whose write failed.
        id: PlantId,
        /// The underlying persistence error.
        #[source]
        source: PersistError,
    },
}

/// Result of a committed [`PlantStore::apply_delta`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Applied {
    /// State before the delta.
    pub previous: Plant,
    /// State after the delta (already persisted).
    pub current: Plant,
}

/// One tracked plant. `None` marks a slot removed while a caller waited on
/// its lock.
#[derive(Debug)]
struct Slot {
    state: Mutex<Option<Plant>>,
    alive: AtomicBool,
    /// Set by a refill, cleared by the next decay. Only touched while
    /// `state` is locked.
    refilled: AtomicBool,
}

impl Slot {
    fn new(plant: Plant) -> Self {
        let alive = AtomicBool::new(plant.is_alive());
        Self {
            state: Mutex::new(Some(plant)),
            alive,
            refilled: AtomicBool::new(false),
        }
    }
}

/// Counters from one [`PlantStore::sync`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Plants tracked for the first time.
    pub inserted: usize,
    /// Known plants whose name, owner or species changed.
    pub refreshed: usize,
    /// Tracked plants missing from the catalog.
    pub removed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeltaKind {
    Plain,
    Decay,
    Refill,
}

/// Authoritative mapping of plant id to current state.
pub struct PlantStore {
    plants: RwLock<HashMap<PlantId, Arc<Slot>>>,
    species: RwLock<HashMap<SpeciesId, Species>>,
    repository: Arc<dyn PlantRepository>,
    persist_timeout: Duration,
}

impl PlantStore {
    /// Create an empty store writing through `repository`.
    ///
    /// `persist_timeout` bounds how long a single write may hold a plant's
    /// critical section.
    pub fn new(repository: Arc<dyn PlantRepository>, persist_timeout: Duration) -> Self {
        Self {
            plants: RwLock::new(HashMap::new()),
            species: RwLock::new(HashMap::new()),
            repository,
            persist_timeout,
        }
    }

    /// Load a full catalog, replacing nothing that is already tracked.
    ///
    /// Species with a negative decay rate are skipped with a warning.
    /// Returns the number of plants inserted.
    pub async fn hydrate(&self, catalog: Catalog) -> usize {
        for species in catalog.species {
            let id = species.id;
            if let Err(e) = self.register_species(species).await {
                warn!(species_id = %id, error = %e, "Skipping invalid species");
            }
        }

        let mut plants = self.plants.write().await;
        let mut inserted = 0usize;
        for plant in catalog.plants {
            if !plants.contains_key(&plant.id) {
                plants.insert(plant.id, Arc::new(Slot::new(sanitize(plant))));
                inserted = inserted.saturating_add(1);
            }
        }
        inserted
    }

    /// Reconcile the store with a freshly loaded catalog.
    ///
    /// New plants are inserted and plants absent from the catalog are
    /// dropped. For known plants only name, owner and species are taken
    /// from the catalog: water and liveness stay owned by the store.
    pub async fn sync(&self, catalog: Catalog) -> SyncReport {
        for species in catalog.species {
            let id = species.id;
            if let Err(e) = self.register_species(species).await {
                warn!(species_id = %id, error = %e, "Skipping invalid species");
            }
        }

        let tracked: HashMap<PlantId, Arc<Slot>> = self.plants.read().await.clone();
        let listed: HashSet<PlantId> = catalog.plants.iter().map(|p| p.id).collect();
        let mut report = SyncReport::default();
        let mut fresh = Vec::new();

        for plant in catalog.plants {
            let Some(slot) = tracked.get(&plant.id) else {
                fresh.push(plant);
                continue;
            };
            let mut guard = slot.state.lock().await;
            if let Some(current) = guard.as_mut() {
                if current.name != plant.name
                    || current.owner != plant.owner
                    || current.species_id != plant.species_id
                {
                    current.name = plant.name;
                    current.owner = plant.owner;
                    current.species_id = plant.species_id;
                    report.refreshed = report.refreshed.saturating_add(1);
                }
            }
        }

        {
            let mut plants = self.plants.write().await;
            for plant in fresh {
                if !plants.contains_key(&plant.id) {
                    plants.insert(plant.id, Arc::new(Slot::new(sanitize(plant))));
                    report.inserted = report.inserted.saturating_add(1);
                }
            }
        }

        for id in tracked.keys().filter(|id| !listed.contains(id)) {
            if self.remove(*id).await.is_some() {
                report.removed = report.removed.saturating_add(1);
            }
        }
        report
    }

    /// Register or replace a species.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidDecayRate`] if the rate is negative.
    pub async fn register_species(&self, species: Species) -> Result<(), StoreError> {
        if species.decay_rate < Decimal::ZERO {
            return Err(StoreError::InvalidDecayRate {
                species: species.id,
                rate: species.decay_rate,
            });
        }
        self.species.write().await.insert(species.id, species);
        Ok(())
    }

    /// Current decay rate of every registered species.
    pub async fn decay_rates(&self) -> HashMap<SpeciesId, Decimal> {
        self.species
            .read()
            .await
            .values()
            .map(|s| (s.id, s.decay_rate))
            .collect()
    }

    /// Insert or overwrite a plant on behalf of an external collaborator.
    ///
    /// Used after the CRUD layer created, edited or reset a record; the
    /// record is assumed to be persisted already. Overwrites are serialized
    /// with in-flight deltas for the same plant. A reset may revive a dead
    /// plant.
    pub async fn upsert(&self, plant: Plant) {
        let plant = sanitize(plant);
        let existing = self.slot(plant.id).await;
        if let Some(slot) = existing {
            let mut guard = slot.state.lock().await;
            if guard.is_some() {
                slot.alive.store(plant.is_alive(), Ordering::Release);
                slot.refilled.store(false, Ordering::Release);
                *guard = Some(plant);
                return;
            }
        }
        self.plants
            .write()
            .await
            .insert(plant.id, Arc::new(Slot::new(plant)));
    }

    /// Stop tracking a plant. Returns its last state, if it was tracked.
    pub async fn remove(&self, id: PlantId) -> Option<Plant> {
        let slot = self.plants.write().await.remove(&id)?;
        let mut guard = slot.state.lock().await;
        slot.alive.store(false, Ordering::Release);
        guard.take()
    }

    /// Re-read one plant from the repository after an external edit.
    ///
    /// A record that no longer exists is removed from the store.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Persistence`] if the read fails or times out.
    pub async fn reload(&self, id: PlantId) -> Result<Option<Plant>, StoreError> {
        let fetched = tokio::time::timeout(self.persist_timeout, self.repository.fetch_plant(id))
            .await
            .map_err(|_elapsed| StoreError::Persistence {
                id,
                source: PersistError::Timeout(self.persist_timeout),
            })?
            .map_err(|source| StoreError::Persistence { id, source })?;

        if let Some(plant) = fetched {
            self.upsert(plant).await;
            self.get(id).await.map(Some)
        } else {
            self.remove(id).await;
            debug!(plant_id = %id, "Plant no longer exists, removed from store");
            Ok(None)
        }
    }

    /// Read the current state of a plant.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the plant is not tracked.
    pub async fn get(&self, id: PlantId) -> Result<Plant, StoreError> {
        let slot = self.slot(id).await.ok_or(StoreError::NotFound(id))?;
        let guard = slot.state.lock().await;
        guard.clone().ok_or(StoreError::NotFound(id))
    }

    /// Ids of every plant currently believed alive.
    ///
    /// Does not take any per-plant lock, so a slow write on one plant never
    /// delays the enumeration.
    pub async fn alive_snapshot(&self) -> Vec<PlantId> {
        self.plants
            .read()
            .await
            .iter()
            .filter(|(_, slot)| slot.alive.load(Ordering::Acquire))
            .map(|(id, _)| *id)
            .collect()
    }

    /// Number of tracked plants, alive or dead.
    pub async fn len(&self) -> usize {
        self.plants.read().await.len()
    }

    /// Whether no plants are tracked.
    pub async fn is_empty(&self) -> bool {
        self.plants.read().await.is_empty()
    }

    /// Atomically compute, persist and commit the next state of a plant.
    ///
    /// `delta` receives the current state and returns the next one, or an
    /// error to abort without any change. Water is clamped into range and
    /// the id is pinned before the write.
    ///
    /// # Errors
    ///
    /// - [`StoreError::NotFound`] if the plant is not tracked.
    /// - Any error returned by `delta`.
    /// - [`StoreError::Persistence`] if the write fails or times out.
    pub async fn apply_delta<F>(&self, id: PlantId, delta: F) -> Result<Applied, StoreError>
    where
        F: FnOnce(&Plant) -> Result<Plant, StoreError> + Send,
    {
        self.apply(id, DeltaKind::Plain, delta)
            .await?
            .ok_or(StoreError::NotFound(id))
    }

    /// [`apply_delta`](Self::apply_delta) for a refill. On commit the plant
    /// is exempted from its next decay.
    ///
    /// # Errors
    ///
    /// Same as [`apply_delta`](Self::apply_delta).
    pub async fn apply_refill<F>(&self, id: PlantId, delta: F) -> Result<Applied, StoreError>
    where
        F: FnOnce(&Plant) -> Result<Plant, StoreError> + Send,
    {
        self.apply(id, DeltaKind::Refill, delta)
            .await?
            .ok_or(StoreError::NotFound(id))
    }

    /// [`apply_delta`](Self::apply_delta) for a decay tick.
    ///
    /// Returns `Ok(None)` without calling `delta` when the plant was
    /// refilled since its last decay; the exemption is consumed.
    ///
    /// # Errors
    ///
    /// Same as [`apply_delta`](Self::apply_delta).
    pub async fn apply_decay<F>(&self, id: PlantId, delta: F) -> Result<Option<Applied>, StoreError>
    where
        F: FnOnce(&Plant) -> Result<Plant, StoreError> + Send,
    {
        self.apply(id, DeltaKind::Decay, delta).await
    }

    async fn apply<F>(
        &self,
        id: PlantId,
        kind: DeltaKind,
        delta: F,
    ) -> Result<Option<Applied>, StoreError>
    where
        F: FnOnce(&Plant) -> Result<Plant, StoreError> + Send,
    {
        let slot = self.slot(id).await.ok_or(StoreError::NotFound(id))?;
        let mut guard = slot.state.lock().await;
        let previous = guard.clone().ok_or(StoreError::NotFound(id))?;

        if kind == DeltaKind::Decay
            && previous.is_alive()
            && slot.refilled.swap(false, Ordering::AcqRel)
        {
            debug!(plant_id = %id, "Plant refilled since last decay, skipping");
            return Ok(None);
        }

        let mut next = delta(&previous)?;
        next.id = previous.id;
        next.current_water = clamp_water(next.current_water);

        match tokio::time::timeout(self.persist_timeout, self.repository.save_plant(&next)).await {
            Ok(Ok(())) => {}
            Ok(Err(PersistError::Missing(_))) => {
                slot.alive.store(false, Ordering::Release);
                *guard = None;
                drop(guard);
                self.forget(id, &slot).await;
                info!(plant_id = %id, "Plant record deleted, dropped from store");
                return Err(StoreError::NotFound(id));
            }
            Ok(Err(source)) => return Err(StoreError::Persistence { id, source }),
            Err(_elapsed) => {
                return Err(StoreError::Persistence {
                    id,
                    source: PersistError::Timeout(self.persist_timeout),
                });
            }
        }

        slot.alive.store(next.is_alive(), Ordering::Release);
        match kind {
            DeltaKind::Refill => slot.refilled.store(true, Ordering::Release),
            DeltaKind::Decay => slot.refilled.store(false, Ordering::Release),
            DeltaKind::Plain => {}
        }
        *guard = Some(next.clone());
        Ok(Some(Applied {
            previous,
            current: next,
        }))
    }

    async fn slot(&self, id: PlantId) -> Option<Arc<Slot>> {
        self.plants.read().await.get(&id).cloned()
    }

    /// Drop the map entry for `id` if it still points at `slot`.
    async fn forget(&self, id: PlantId, slot: &Arc<Slot>) {
        let mut plants = self.plants.write().await;
        if plants.get(&id).is_some_and(|current| Arc::ptr_eq(current, slot)) {
            plants.remove(&id);
        }
    }
}

impl std::fmt::Debug for PlantStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlantStore")
            .field("persist_timeout_ms", &self.persist_timeout.as_millis())
            .finish_non_exhaustive()
    }
}

/// Enforce the water bounds and pin a dry plant's water at zero once dead.
fn sanitize(mut plant: Plant) -> Plant {
    plant.current_water = clamp_water(plant.current_water);
    if plant.is_dead {
        plant.current_water = Decimal::ZERO;
    }
    plant
}
