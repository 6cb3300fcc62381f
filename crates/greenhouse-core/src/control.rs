//! Runtime control of the decay scheduler.
//!
//! [`SchedulerControl`] is shared between the scheduler task and the
//! operator endpoints of the hub. All hot-path fields are atomics so the
//! tick loop never waits on a lock to read them.
//!
//! A stop request is only observed between ticks: the tick in flight always
//! runs to completion, so no plant is left half-updated.
//!
//! Wake-ups use [`Notify::notify_waiters`], which leaves no stored permit,
//! and every waiter re-checks state after waking. A pause and resume that
//! happen mid-tick therefore never shorten the following sleep.

use std::pin::pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

/// Smallest tick interval accepted at runtime.
pub const MIN_TICK_INTERVAL_MS: u64 = 100;

/// Why the scheduler loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The configured `max_ticks` bound was reached.
    MaxTicksReached,
    /// An operator or the process shutdown requested a stop.
    StopRequested,
}

/// Shared scheduler control state.
#[derive(Debug)]
pub struct SchedulerControl {
    paused: AtomicBool,
    stop_requested: AtomicBool,
    /// Wakes the scheduler out of its inter-tick sleep or a pause.
    wake: Notify,
    tick_interval_ms: AtomicU64,
    current_tick: AtomicU64,
    /// Maximum number of ticks (0 = unlimited).
    max_ticks: u64,
    started_at: DateTime<Utc>,
    end_reason: Mutex<Option<StopReason>>,
}

impl SchedulerControl {
    /// Create control state for a scheduler ticking every
    /// `tick_interval_ms` milliseconds, bounded by `max_ticks` (0 means
    /// unbounded).
    pub fn new(tick_interval_ms: u64, max_ticks: u64) -> Self {
        Self {
            paused: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
            wake: Notify::new(),
            tick_interval_ms: AtomicU64::new(tick_interval_ms),
            current_tick: AtomicU64::new(0),
            max_ticks,
            started_at: Utc::now(),
            end_reason: Mutex::new(None),
        }
    }

    /// Whether ticking is paused.
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    /// Pause ticking after the current tick.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::Release);
    }

    /// Resume ticking.
    pub fn resume(&self) {
        self.paused.store(false, Ordering::Release);
        self.wake.notify_waiters();
    }

    /// Wait until ticking is resumed or a stop is requested.
    pub async fn wait_if_paused(&self) {
        loop {
            let mut notified = pin!(self.wake.notified());
            notified.as_mut().enable();
            if !self.is_paused() || self.is_stop_requested() {
                return;
            }
            notified.await;
        }
    }

    /// Sleep for the current tick interval, returning early on a stop
    /// request. An interval change during the sleep applies at once,
    /// measured from the start of the sleep.
    pub async fn sleep_until_next_tick(&self) {
        let started = Instant::now();
        loop {
            let mut notified = pin!(self.wake.notified());
            notified.as_mut().enable();
            if self.is_stop_requested() {
                return;
            }
            let interval = Duration::from_millis(self.tick_interval_ms());
            let Some(deadline) = started.checked_add(interval) else {
                return;
            };
            if interval.is_zero() {
                return;
            }
            tokio::select! {
                () = tokio::time::sleep_until(deadline) => return,
                () = notified => {}
            }
        }
    }

    /// Request a graceful stop. The in-flight tick completes first.
    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::Release);
        self.wake.notify_waiters();
    }

    /// Whether a stop has been requested.
    pub fn is_stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::Acquire)
    }

    /// Current tick interval in milliseconds.
    pub fn tick_interval_ms(&self) -> u64 {
        self.tick_interval_ms.load(Ordering::Acquire)
    }

    /// Change the tick interval.
    ///
    /// Returns the previous interval, or `None` if `ms` is below
    /// [`MIN_TICK_INTERVAL_MS`].
    pub fn set_tick_interval_ms(&self, ms: u64) -> Option<u64> {
        if ms < MIN_TICK_INTERVAL_MS {
            return None;
        }
        let previous = self.tick_interval_ms.swap(ms, Ordering::AcqRel);
        self.wake.notify_waiters();
        Some(previous)
    }

    /// Number of the last completed tick.
    pub fn current_tick(&self) -> u64 {
        self.current_tick.load(Ordering::Acquire)
    }

    pub(crate) fn record_tick(&self, tick: u64) {
        self.current_tick.store(tick, Ordering::Release);
    }

    /// Configured tick bound (0 = unlimited).
    pub const fn max_ticks(&self) -> u64 {
        self.max_ticks
    }

    /// Whether `tick` reached the configured bound.
    pub const fn tick_limit_reached(&self, tick: u64) -> bool {
        self.max_ticks > 0 && tick >= self.max_ticks
    }

    /// Record why the loop ended.
    pub async fn set_end_reason(&self, reason: StopReason) {
        *self.end_reason.lock().await = Some(reason);
    }

    /// Why the loop ended, if it has.
    pub async fn end_reason(&self) -> Option<StopReason> {
        *self.end_reason.lock().await
    }

    /// Snapshot of the control state for the operator API.
    pub async fn status(&self, plants_alive: usize, plants_total: usize) -> SchedulerStatus {
        let elapsed = Utc::now().signed_duration_since(self.started_at).num_seconds();
        SchedulerStatus {
            tick: self.current_tick(),
            paused: self.is_paused(),
            stop_requested: self.is_stop_requested(),
            tick_interval_ms: self.tick_interval_ms(),
            max_ticks: self.max_ticks,
            elapsed_seconds: u64::try_from(elapsed.max(0)).unwrap_or(u64::MAX),
            plants_alive,
            plants_total,
            end_reason: self.end_reason().await,
            started_at: self.started_at.to_rfc3339(),
        }
    }
}

/// JSON status of the scheduler for the operator API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerStatus {
    /// Last completed tick.
    pub tick: u64,
    /// Whether ticking is paused.
    pub paused: bool,
    /// Whether a stop has been requested.
    pub stop_requested: bool,
    /// Current tick interval in milliseconds.
    pub tick_interval_ms: u64,
    /// Configured tick bound (0 = unlimited).
    pub max_ticks: u64,
    /// Seconds since the scheduler was created.
    pub elapsed_seconds: u64,
    /// Plants currently alive.
    pub plants_alive: usize,
    /// Plants tracked, alive or dead.
    pub plants_total: usize,
    /// Why the loop ended, if it has.
    pub end_reason: Option<StopReason>,
    /// ISO 8601 start time.
    pub started_at: String,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn starts_running() {
        let control = SchedulerControl::new(2000, 0);
        assert!(!control.is_paused());
        assert!(!control.is_stop_requested());
        assert_eq!(control.current_tick(), 0);
    }

    #[test]
    fn pause_and_resume() {
        let control = SchedulerControl::new(2000, 0);
        control.pause();
        assert!(control.is_paused());
        control.resume();
        assert!(!control.is_paused());
    }

    #[test]
    fn interval_below_minimum_is_rejected() {
        let control = SchedulerControl::new(2000, 0);
        assert_eq!(control.set_tick_interval_ms(50), None);
        assert_eq!(control.set_tick_interval_ms(500), Some(2000));
        assert_eq!(control.tick_interval_ms(), 500);
    }

    #[test]
    fn zero_max_ticks_is_unbounded() {
        let control = SchedulerControl::new(2000, 0);
        assert!(!control.tick_limit_reached(u64::MAX));
        let bounded = SchedulerControl::new(2000, 3);
        assert!(!bounded.tick_limit_reached(2));
        assert!(bounded.tick_limit_reached(3));
    }

    #[tokio::test]
    async fn stop_cuts_sleep_short() {
        let control = Arc::new(SchedulerControl::new(60_000, 0));
        let sleeper = Arc::clone(&control);
        let handle = tokio::spawn(async move { sleeper.sleep_until_next_tick().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        control.request_stop();
        let finished = tokio::time::timeout(Duration::from_secs(1), handle).await;
        assert!(finished.is_ok());
    }

    #[tokio::test]
    async fn stop_releases_a_paused_waiter() {
        let control = Arc::new(SchedulerControl::new(1000, 0));
        control.pause();
        let waiter = Arc::clone(&control);
        let handle = tokio::spawn(async move { waiter.wait_if_paused().await });
        control.request_stop();
        let finished = tokio::time::timeout(Duration::from_secs(1), handle).await;
        assert!(finished.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn resume_mid_tick_does_not_shorten_the_next_sleep() {
        let control = SchedulerControl::new(200, 0);
        control.pause();
        control.resume();

        let started = Instant::now();
        control.sleep_until_next_tick().await;
        assert!(started.elapsed() >= Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn resume_during_sleep_keeps_sleeping() {
        let control = Arc::new(SchedulerControl::new(200, 0));
        let sleeper = Arc::clone(&control);
        let started = Instant::now();
        let handle = tokio::spawn(async move { sleeper.sleep_until_next_tick().await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        control.pause();
        control.resume();
        handle.await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn speed_change_applies_to_a_running_sleep() {
        let control = Arc::new(SchedulerControl::new(60_000, 0));
        let sleeper = Arc::clone(&control);
        let started = Instant::now();
        let handle = tokio::spawn(async move { sleeper.sleep_until_next_tick().await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(control.set_tick_interval_ms(100), Some(60_000));
        handle.await.unwrap();
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(100));
        assert!(elapsed < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn status_reports_counts() {
        let control = SchedulerControl::new(2000, 10);
        control.record_tick(4);
        control.set_end_reason(StopReason::StopRequested).await;
        let status = control.status(2, 3).await;
        assert_eq!(status.tick, 4);
        assert_eq!(status.plants_alive, 2);
        assert_eq!(status.plants_total, 3);
        assert_eq!(status.end_reason, Some(StopReason::StopRequested));
    }
}
