//! Out-of-band commands that mutate plant state.

use std::sync::Arc;
use std::time::Duration;

use greenhouse_types::{AuditEntry, MAX_WATER, Plant, PlantEvent, PlantId};
use tracing::{info, warn};

use crate::repository::AuditLog;
use crate::sink::EventSink;
use crate::store::{PlantStore, StoreError};

/// Applies user commands through the same atomic delta as the scheduler.
pub struct CommandHandler {
    store: Arc<PlantStore>,
    audit: Arc<dyn AuditLog>,
    sink: Arc<dyn EventSink>,
    audit_timeout: Duration,
}

impl CommandHandler {
    /// Create a handler emitting to `sink` and auditing to `audit`.
    pub fn new(
        store: Arc<PlantStore>,
        audit: Arc<dyn AuditLog>,
        sink: Arc<dyn EventSink>,
        audit_timeout: Duration,
    ) -> Self {
        Self {
            store,
            audit,
            sink,
            audit_timeout,
        }
    }

    /// Refill a living plant to full water.
    ///
    /// On success a `plant-watered` event is emitted and an audit entry is
    /// requested. A dead plant is refused and nothing is emitted.
    ///
    /// # Errors
    ///
    /// - [`StoreError::NotFound`] if the plant is not tracked.
    /// - [`StoreError::AlreadyDead`] if the plant is dead.
    /// - [`StoreError::Persistence`] if the write failed.
    pub async fn water(&self, id: PlantId) -> Result<Plant, StoreError> {
        let applied = self
            .store
            .apply_refill(id, |plant| {
                if plant.is_dead {
                    return Err(StoreError::AlreadyDead(plant.id));
                }
                let mut next = plant.clone();
                next.current_water = MAX_WATER;
                Ok(next)
            })
            .await?;

        let plant = applied.current;
        info!(plant_id = %id, name = plant.name, "Plant watered");
        self.sink.emit(&PlantEvent::watered(&plant));

        let entry = AuditEntry::watering(&plant);
        match tokio::time::timeout(self.audit_timeout, self.audit.record(&entry)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(plant_id = %id, error = %e, "Failed to record watering"),
            Err(_elapsed) => warn!(plant_id = %id, "Recording watering timed out"),
        }
        Ok(plant)
    }
}

impl std::fmt::Debug for CommandHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandHandler")
            .field("audit_timeout_ms", &self.audit_timeout.as_millis())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use greenhouse_types::{Catalog, LogLevel, Species, SpeciesId};
    use rust_decimal::Decimal;

    use super::*;
    use crate::bridge::LoopbackTransport;
    use crate::control::SchedulerControl;
    use crate::repository::{InMemoryRepository, PlantRepository};
    use crate::scheduler::{DecayScheduler, SchedulerSettings};
    use crate::sink::RecordingSink;

    const TIMEOUT: Duration = Duration::from_millis(500);

    struct Fixture {
        handler: Arc<CommandHandler>,
        store: Arc<PlantStore>,
        repo: Arc<InMemoryRepository>,
        sink: Arc<RecordingSink>,
    }

    async fn fixture(plants: Vec<Plant>, species: Species) -> Fixture {
        let catalog = Catalog {
            species: vec![species],
            plants,
        };
        let repo = Arc::new(InMemoryRepository::with_catalog(catalog.clone()));
        let store = Arc::new(PlantStore::new(
            Arc::clone(&repo) as Arc<dyn PlantRepository>,
            TIMEOUT,
        ));
        store.hydrate(catalog).await;
        let sink = Arc::new(RecordingSink::new());
        let handler = Arc::new(CommandHandler::new(
            Arc::clone(&store),
            Arc::clone(&repo) as Arc<dyn AuditLog>,
            Arc::clone(&sink) as Arc<dyn EventSink>,
            TIMEOUT,
        ));
        Fixture {
            handler,
            store,
            repo,
            sink,
        }
    }

    fn tomato(rate: i64) -> Species {
        Species {
            id: SpeciesId::new(),
            name: String::from("Tomato"),
            decay_rate: Decimal::new(rate, 0),
        }
    }

    #[tokio::test]
    async fn watering_refills_and_announces() {
        let sp = tomato(2);
        let plant = Plant::new("My Tomato", sp.id).with_water(Decimal::new(35, 0));
        let f = fixture(vec![plant.clone()], sp).await;

        let watered = f.handler.water(plant.id).await.unwrap();
        assert_eq!(watered.current_water, MAX_WATER);
        assert_eq!(f.store.get(plant.id).await.unwrap().current_water, MAX_WATER);
        assert_eq!(f.sink.names(), vec!["plant-watered"]);

        let audit = f.repo.audit_entries().await;
        assert_eq!(audit.len(), 1);
        assert_eq!(audit.first().map(|e| e.level), Some(LogLevel::Info));
    }

    #[tokio::test]
    async fn watering_unknown_plant_is_not_found() {
        let f = fixture(vec![], tomato(2)).await;
        let result = f.handler.water(PlantId::new()).await;
        assert!(matches!(result, Err(StoreError::NotFound(_))));
        assert!(f.sink.events().is_empty());
    }

    #[tokio::test]
    async fn watering_dead_plant_is_refused_without_side_effects() {
        let sp = tomato(2);
        let mut plant = Plant::new("Wilted", sp.id).with_water(Decimal::ZERO);
        plant.is_dead = true;
        let f = fixture(vec![plant.clone()], sp).await;

        let result = f.handler.water(plant.id).await;
        assert!(matches!(result, Err(StoreError::AlreadyDead(id)) if id == plant.id));

        let state = f.store.get(plant.id).await.unwrap();
        assert!(state.is_dead);
        assert_eq!(state.current_water, Decimal::ZERO);
        assert!(f.sink.events().is_empty());
        assert!(f.repo.audit_entries().await.is_empty());
    }

    #[tokio::test]
    async fn watering_a_deleted_record_is_not_found() {
        let sp = tomato(2);
        let plant = Plant::new("Gone", sp.id).with_water(Decimal::new(10, 0));
        let f = fixture(vec![plant.clone()], sp).await;
        f.repo.delete_plant(plant.id).await;

        let result = f.handler.water(plant.id).await;
        assert!(matches!(result, Err(StoreError::NotFound(_))));
        assert!(f.sink.events().is_empty());
        assert!(f.repo.stored(plant.id).await.is_none());
        assert!(f.store.is_empty().await);
    }

    #[tokio::test]
    async fn failed_write_emits_nothing() {
        let sp = tomato(2);
        let plant = Plant::new("Fern", sp.id).with_water(Decimal::new(10, 0));
        let f = fixture(vec![plant.clone()], sp).await;
        f.repo.fail_saves_for(plant.id).await;

        let result = f.handler.water(plant.id).await;
        assert!(matches!(result, Err(StoreError::Persistence { .. })));
        assert!(f.sink.events().is_empty());
        assert_eq!(
            f.store.get(plant.id).await.unwrap().current_water,
            Decimal::new(10, 0)
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn watering_racing_a_tick_always_ends_full() {
        for _ in 0..50 {
            let sp = tomato(10);
            let plant = Plant::new("Racer", sp.id).with_water(Decimal::new(30, 0));
            let f = fixture(vec![plant.clone()], sp).await;
            let scheduler = DecayScheduler::new(
                Arc::clone(&f.store),
                Arc::clone(&f.repo) as Arc<dyn PlantRepository>,
                Arc::clone(&f.repo) as Arc<dyn AuditLog>,
                Arc::new(LoopbackTransport::new()),
                Arc::new(SchedulerControl::new(0, 0)),
                SchedulerSettings::default(),
            );

            let handler = Arc::clone(&f.handler);
            let water = tokio::spawn(async move { handler.water(plant.id).await });
            let summary = scheduler.tick(1).await;
            water.await.unwrap().unwrap();

            let state = f.store.get(plant.id).await.unwrap();
            assert_eq!(state.current_water, MAX_WATER, "tick summary: {summary:?}");
            assert!(!state.is_dead);
        }
    }
}
