//! Destination for transition events.
//!
//! The fan-out hub implements [`EventSink`]; the core only knows the trait.
//! [`RecordingSink`] keeps every event in memory for tests and diagnostics.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use greenhouse_types::PlantEvent;

/// Receiver of transition events.
///
/// `emit` must not block: implementations queue or drop rather than wait
/// on slow consumers.
pub trait EventSink: Send + Sync {
    /// Deliver one event to every interested party.
    fn emit(&self, event: &PlantEvent);
}

/// A sink that records every event it receives, in order.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<PlantEvent>>,
}

impl RecordingSink {
    /// Create an empty recording sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// All events received so far.
    pub fn events(&self) -> Vec<PlantEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Names of all events received so far.
    pub fn names(&self) -> Vec<&'static str> {
        self.events().iter().map(PlantEvent::name).collect()
    }

    /// Poll until at least `count` events arrived or `within` elapsed.
    /// Returns whether the count was reached.
    pub async fn wait_for(&self, count: usize, within: Duration) -> bool {
        let poll = async {
            while self.events().len() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        };
        tokio::time::timeout(within, poll).await.is_ok()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: &PlantEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
    }
}
