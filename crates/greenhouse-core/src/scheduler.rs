//! Periodic decay of every living plant.
//!
//! [`DecayScheduler::run`] drives the tick loop under a shared
//! [`SchedulerControl`]:
//!
//! - **Pause/resume**: the loop halts between ticks while paused
//! - **Variable interval**: the sleep between ticks is read each round
//! - **Bounded runs**: stop after `max_ticks` when configured
//! - **Graceful stop**: a stop request is observed between ticks, so the
//!   in-flight tick always completes
//!
//! Within a tick every plant is decayed concurrently through the store's
//! atomic delta. A failure for one plant is logged and counted and never
//! aborts the others.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use greenhouse_types::{AuditEntry, Plant, PlantId, SensorReading, SpeciesId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::bridge::{Transport, encode_reading, sensor_channel};
use crate::control::{SchedulerControl, StopReason};
use crate::decay::{decay_step, died};
use crate::repository::{AuditLog, PlantRepository};
use crate::store::{PlantStore, StoreError};

/// Tuning knobs of the scheduler that do not change at runtime.
#[derive(Debug, Clone, Copy)]
pub struct SchedulerSettings {
    /// Upper bound for audit writes and catalog discovery.
    pub io_timeout: Duration,
    /// Load the repository catalog before each tick to pick up plants
    /// created, edited or deleted elsewhere.
    pub sync_each_tick: bool,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            io_timeout: Duration::from_secs(5),
            sync_each_tick: false,
        }
    }
}

/// Counters for one completed tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickSummary {
    /// Tick number, starting at 1.
    pub tick: u64,
    /// Plants whose new state was committed.
    pub decayed: usize,
    /// Plants that died during this tick.
    pub died: usize,
    /// Plants left alone (refilled since last tick, already dead, removed).
    pub skipped: usize,
    /// Plants whose update failed and will be retried next tick.
    pub failed: usize,
}

/// Result of a scheduler run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerResult {
    /// Why the loop ended.
    pub end_reason: StopReason,
    /// The last tick summary, if any tick ran.
    pub final_summary: Option<TickSummary>,
    /// Total number of ticks executed.
    pub total_ticks: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Decayed { died: bool },
    Skipped,
    Failed,
}

/// Ages every living plant once per tick and publishes the readings.
pub struct DecayScheduler {
    store: Arc<PlantStore>,
    repository: Arc<dyn PlantRepository>,
    audit: Arc<dyn AuditLog>,
    transport: Arc<dyn Transport>,
    control: Arc<SchedulerControl>,
    settings: SchedulerSettings,
}

impl DecayScheduler {
    /// Assemble a scheduler from its collaborators.
    pub fn new(
        store: Arc<PlantStore>,
        repository: Arc<dyn PlantRepository>,
        audit: Arc<dyn AuditLog>,
        transport: Arc<dyn Transport>,
        control: Arc<SchedulerControl>,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            store,
            repository,
            audit,
            transport,
            control,
            settings,
        }
    }

    /// The shared control state.
    pub const fn control(&self) -> &Arc<SchedulerControl> {
        &self.control
    }

    /// Run the tick loop until stopped or the tick bound is reached.
    pub async fn run(&self) -> SchedulerResult {
        let mut last_summary: Option<TickSummary> = None;
        let mut total_ticks: u64 = 0;

        info!(
            tick_interval_ms = self.control.tick_interval_ms(),
            max_ticks = self.control.max_ticks(),
            sync_each_tick = self.settings.sync_each_tick,
            "Decay scheduler starting"
        );

        loop {
            if self.control.is_paused() {
                info!("Decay scheduler paused, waiting for resume");
                self.control.wait_if_paused().await;
                info!("Decay scheduler resumed");
            }

            if self.control.is_stop_requested() {
                return self
                    .finish(StopReason::StopRequested, last_summary, total_ticks)
                    .await;
            }

            let summary = self.tick(total_ticks.saturating_add(1)).await;
            total_ticks = summary.tick;
            self.control.record_tick(total_ticks);

            if self.control.tick_limit_reached(total_ticks) {
                return self
                    .finish(StopReason::MaxTicksReached, Some(summary), total_ticks)
                    .await;
            }
            last_summary = Some(summary);

            self.control.sleep_until_next_tick().await;
        }
    }

    /// Execute one tick over every plant currently alive.
    pub async fn tick(&self, tick: u64) -> TickSummary {
        if self.settings.sync_each_tick {
            self.discover().await;
        }

        let rates = self.store.decay_rates().await;
        let alive = self.store.alive_snapshot().await;
        let outcomes =
            futures::future::join_all(alive.iter().map(|id| self.decay_one(*id, &rates))).await;

        let mut summary = TickSummary {
            tick,
            ..TickSummary::default()
        };
        for outcome in outcomes {
            match outcome {
                Outcome::Decayed { died } => {
                    summary.decayed = summary.decayed.saturating_add(1);
                    if died {
                        summary.died = summary.died.saturating_add(1);
                    }
                }
                Outcome::Skipped => summary.skipped = summary.skipped.saturating_add(1),
                Outcome::Failed => summary.failed = summary.failed.saturating_add(1),
            }
        }

        debug!(
            tick,
            decayed = summary.decayed,
            died = summary.died,
            skipped = summary.skipped,
            failed = summary.failed,
            "Tick complete"
        );
        summary
    }

    async fn decay_one(&self, id: PlantId, rates: &HashMap<SpeciesId, Decimal>) -> Outcome {
        let result = self
            .store
            .apply_decay(id, |plant| {
                let rate =
                    rates
                        .get(&plant.species_id)
                        .copied()
                        .ok_or(StoreError::UnknownSpecies {
                            plant: plant.id,
                            species: plant.species_id,
                        })?;
                decay_step(plant, rate)
            })
            .await;

        match result {
            Ok(Some(applied)) => {
                let death = died(&applied.previous, &applied.current);
                if death {
                    info!(plant_id = %id, name = applied.current.name, "Plant died");
                    self.record_death(&applied.current).await;
                }
                self.publish(&applied.current, death);
                Outcome::Decayed { died: death }
            }
            Ok(None) => Outcome::Skipped,
            Err(e @ (StoreError::AlreadyDead(_) | StoreError::NotFound(_))) => {
                debug!(plant_id = %id, reason = %e, "Skipping plant");
                Outcome::Skipped
            }
            Err(e) => {
                warn!(plant_id = %id, error = %e, "Decay failed, retrying next tick");
                Outcome::Failed
            }
        }
    }

    async fn record_death(&self, plant: &Plant) {
        let entry = AuditEntry::death(plant);
        match tokio::time::timeout(self.settings.io_timeout, self.audit.record(&entry)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(plant_id = %plant.id, error = %e, "Failed to record death"),
            Err(_elapsed) => warn!(plant_id = %plant.id, "Recording death timed out"),
        }
    }

    fn publish(&self, plant: &Plant, died: bool) {
        let reading = SensorReading::from_plant(plant, died);
        let payload = match encode_reading(&reading) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(plant_id = %plant.id, error = %e, "Failed to encode reading");
                return;
            }
        };
        if let Err(e) = self.transport.publish(&sensor_channel(plant.id), payload) {
            debug!(plant_id = %plant.id, error = %e, "Reading dropped");
        }
    }

    async fn discover(&self) {
        match tokio::time::timeout(self.settings.io_timeout, self.repository.load_catalog()).await {
            Ok(Ok(catalog)) => {
                let report = self.store.sync(catalog).await;
                if report.inserted > 0 || report.removed > 0 {
                    info!(
                        inserted = report.inserted,
                        removed = report.removed,
                        "Plant catalog changed"
                    );
                }
                if report.refreshed > 0 {
                    debug!(refreshed = report.refreshed, "Plant records refreshed");
                }
            }
            Ok(Err(e)) => warn!(error = %e, "Plant discovery failed"),
            Err(_elapsed) => warn!("Plant discovery timed out"),
        }
    }

    async fn finish(
        &self,
        reason: StopReason,
        final_summary: Option<TickSummary>,
        total_ticks: u64,
    ) -> SchedulerResult {
        self.control.set_end_reason(reason).await;
        info!(?reason, total_ticks, "Decay scheduler stopped");
        SchedulerResult {
            end_reason: reason,
            final_summary,
            total_ticks,
        }
    }
}

impl std::fmt::Debug for DecayScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecayScheduler")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}
