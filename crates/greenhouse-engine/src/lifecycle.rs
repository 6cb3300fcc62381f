//! Process lifetime around the decay scheduler.
//!
//! The scheduler can end on its own (operator stop or `max_ticks`) while
//! the hub keeps serving watering commands, reads and subscribers. Only the
//! shutdown signal ends the process.

use std::future::Future;

use greenhouse_core::{SchedulerControl, SchedulerResult};
use tokio::task::JoinHandle;
use tracing::info;

use crate::error::EngineError;

/// Wait for the scheduler and for `shutdown`.
///
/// If the scheduler ends first, its result is logged and the call keeps
/// waiting for `shutdown`. If `shutdown` comes first, a stop is requested
/// and the in-flight tick is awaited.
pub async fn run_until_shutdown<F>(
    mut scheduler: JoinHandle<SchedulerResult>,
    control: &SchedulerControl,
    shutdown: F,
) -> Result<SchedulerResult, EngineError>
where
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);

    let joined = tokio::select! {
        joined = &mut scheduler => {
            let result = joined.map_err(task_error)?;
            log_scheduler_end(&result);
            info!("Hub keeps serving until shutdown");
            shutdown.await;
            info!("Shutdown requested");
            return Ok(result);
        }
        () = &mut shutdown => {
            info!("Shutdown requested");
            control.request_stop();
            scheduler.await
        }
    };
    let result = joined.map_err(task_error)?;
    log_scheduler_end(&result);
    Ok(result)
}

/// Resolves on Ctrl-C. If the handler cannot be installed the process runs
/// until killed.
pub async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

fn task_error(e: tokio::task::JoinError) -> EngineError {
    EngineError::Task {
        message: format!("scheduler task failed: {e}"),
    }
}

/// Log how and when the scheduler stopped.
fn log_scheduler_end(result: &SchedulerResult) {
    match &result.final_summary {
        Some(summary) => info!(
            end_reason = ?result.end_reason,
            total_ticks = result.total_ticks,
            last_tick = summary.tick,
            last_decayed = summary.decayed,
            last_failed = summary.failed,
            "Decay scheduler stopped"
        ),
        None => info!(
            end_reason = ?result.end_reason,
            total_ticks = result.total_ticks,
            "Decay scheduler stopped before the first tick"
        ),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use greenhouse_core::StopReason;
    use tokio::sync::oneshot;

    use super::*;

    fn finished(reason: StopReason, total_ticks: u64) -> SchedulerResult {
        SchedulerResult {
            end_reason: reason,
            final_summary: None,
            total_ticks,
        }
    }

    #[tokio::test]
    async fn finished_scheduler_waits_for_shutdown() {
        let control = SchedulerControl::new(0, 3);
        let scheduler = tokio::spawn(async { finished(StopReason::MaxTicksReached, 3) });
        let (tx, rx) = oneshot::channel::<()>();

        let run = run_until_shutdown(scheduler, &control, async move {
            let _ = rx.await;
        });
        tokio::pin!(run);

        let early = tokio::time::timeout(Duration::from_millis(50), &mut run).await;
        assert!(early.is_err(), "returned before the shutdown signal");

        tx.send(()).unwrap();
        let result = run.await.unwrap();
        assert_eq!(result.end_reason, StopReason::MaxTicksReached);
        assert!(!control.is_stop_requested());
    }

    #[tokio::test]
    async fn shutdown_stops_a_running_scheduler() {
        let control = Arc::new(SchedulerControl::new(0, 0));
        let observed = Arc::clone(&control);
        let scheduler = tokio::spawn(async move {
            while !observed.is_stop_requested() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            finished(StopReason::StopRequested, 7)
        });

        let result = tokio::time::timeout(
            Duration::from_secs(2),
            run_until_shutdown(scheduler, &control, async {}),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(result.end_reason, StopReason::StopRequested);
        assert_eq!(result.total_ticks, 7);
    }
}
