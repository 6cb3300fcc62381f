//! Transport bridge between the decay scheduler and the fan-out layer.
//!
//! The scheduler publishes one [`SensorReading`] per plant per tick on
//! `greenhouse/sensors/{plantId}`. A relay task subscribes to
//! `greenhouse/sensors/#` and turns each reading into transition events for
//! an [`EventSink`]. Because the two sides only meet on the broker, the
//! scheduler can run in a different process from the hub.
//!
//! # Channel Convention
//!
//! Channels are `/`-separated levels. Subscription patterns use `+` for
//! exactly one level and a trailing `#` for any number of levels (including
//! none). Broker implementations translate these to their own syntax.
//!
//! # Delivery
//!
//! Publishing is fire-and-forget and at-most-once: a message published
//! while the broker is unreachable is dropped. Messages from one publisher
//! on one channel arrive in order; there is no ordering across channels.

use std::sync::Arc;

use greenhouse_types::{PlantEvent, PlantId, SensorReading};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::sink::EventSink;

/// Channel prefix for decay readings.
pub const SENSOR_CHANNEL_PREFIX: &str = "greenhouse/sensors";

/// Pattern matching every decay reading channel.
pub const SENSOR_PATTERN: &str = "greenhouse/sensors/#";

/// Default buffer of the in-process loopback transport.
const LOOPBACK_CAPACITY: usize = 1024;

/// Errors raised by the transport bridge.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// The broker is unreachable or the outbound queue is full; the
    /// message was dropped.
    #[error("transport unavailable: {0}")]
    TransportUnavailable(String),

    /// An inbound message could not be decoded.
    #[error("malformed message on {channel}: {reason}")]
    MalformedMessage {
        /// Channel the message arrived on.
        channel: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The initial broker connection could not be configured.
    #[error("transport connect error: {0}")]
    Connect(String),
}

/// A message received from the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Concrete channel the message was published on.
    pub channel: String,
    /// Raw payload bytes.
    pub payload: Vec<u8>,
}

/// Callback invoked once per received message, on the subscription's task.
pub type MessageHandler = Arc<dyn Fn(InboundMessage) + Send + Sync>;

/// Publish/subscribe access to a message broker.
pub trait Transport: Send + Sync {
    /// Publish a payload on a channel without waiting for delivery.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::TransportUnavailable`] when the message was
    /// dropped. Callers log and carry on; this is never fatal.
    fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<(), BridgeError>;

    /// Subscribe to a channel pattern.
    ///
    /// `handler` runs on a dedicated task, once per message, in arrival
    /// order. Aborting the returned handle ends the subscription.
    fn subscribe(&self, pattern: &str, handler: MessageHandler) -> JoinHandle<()>;

    /// Whether the broker connection is currently up.
    fn is_connected(&self) -> bool;
}

/// Channel carrying readings for one plant.
pub fn sensor_channel(plant_id: PlantId) -> String {
    format!("{SENSOR_CHANNEL_PREFIX}/{plant_id}")
}

/// Whether `channel` matches the subscription `pattern`.
pub fn channel_matches(pattern: &str, channel: &str) -> bool {
    let mut pattern_levels = pattern.split('/');
    let mut channel_levels = channel.split('/');
    loop {
        match (pattern_levels.next(), channel_levels.next()) {
            (Some("#"), _) => return pattern_levels.next().is_none(),
            (Some("+"), Some(_)) => {}
            (Some(p), Some(c)) if p == c => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// Serialize a reading for publication.
///
/// # Errors
///
/// Returns [`BridgeError::MalformedMessage`] if serialization fails.
pub fn encode_reading(reading: &SensorReading) -> Result<Vec<u8>, BridgeError> {
    serde_json::to_vec(reading).map_err(|e| BridgeError::MalformedMessage {
        channel: sensor_channel(reading.plant_id),
        reason: e.to_string(),
    })
}

/// Decode a reading received on `channel`.
///
/// The plant id in the channel must match the one in the payload.
///
/// # Errors
///
/// Returns [`BridgeError::MalformedMessage`] if the payload is not a valid
/// reading or belongs to a different channel.
pub fn decode_reading(message: &InboundMessage) -> Result<SensorReading, BridgeError> {
    let reading: SensorReading =
        serde_json::from_slice(&message.payload).map_err(|e| BridgeError::MalformedMessage {
            channel: message.channel.clone(),
            reason: e.to_string(),
        })?;
    if message.channel != sensor_channel(reading.plant_id) {
        return Err(BridgeError::MalformedMessage {
            channel: message.channel.clone(),
            reason: format!("payload is for plant {}", reading.plant_id),
        });
    }
    Ok(reading)
}

/// Subscribe to all decay readings and forward their events to `sink`.
///
/// A reading carrying the death edge yields `plant-died` followed by
/// `plant-update`; any other reading yields `plant-update` only. Malformed
/// messages are logged and dropped.
pub fn spawn_relay(transport: &dyn Transport, sink: Arc<dyn EventSink>) -> JoinHandle<()> {
    let handler: MessageHandler = Arc::new(move |message: InboundMessage| {
        match decode_reading(&message) {
            Ok(reading) => {
                for event in PlantEvent::from_reading(&reading) {
                    sink.emit(&event);
                }
                if reading.died {
                    debug!(plant_id = %reading.plant_id, name = reading.name, "Relayed plant death");
                }
            }
            Err(e) => warn!(error = %e, "Dropping malformed sensor message"),
        }
    });
    transport.subscribe(SENSOR_PATTERN, handler)
}

/// In-process transport backed by a [`broadcast`] channel.
///
/// Used when the scheduler and the hub share a process, and in tests.
#[derive(Debug, Clone)]
pub struct LoopbackTransport {
    tx: broadcast::Sender<InboundMessage>,
}

impl LoopbackTransport {
    /// Create a loopback transport with the default buffer.
    pub fn new() -> Self {
        Self::with_capacity(LOOPBACK_CAPACITY)
    }

    /// Create a loopback transport buffering up to `capacity` messages per
    /// subscriber.
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for LoopbackTransport {
    fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<(), BridgeError> {
        // send only fails when nobody is subscribed, which is not an error.
        let _ = self.tx.send(InboundMessage {
            channel: channel.to_owned(),
            payload,
        });
        Ok(())
    }

    fn subscribe(&self, pattern: &str, handler: MessageHandler) -> JoinHandle<()> {
        // Subscribe before spawning so nothing published after this call
        // returns is missed.
        let mut rx = self.tx.subscribe();
        let pattern = pattern.to_owned();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(message) => {
                        if channel_matches(&pattern, &message.channel) {
                            handler(message);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(pattern, skipped, "Loopback subscriber lagged, messages dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
        })
    }

    fn is_connected(&self) -> bool {
        true
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use greenhouse_types::{Plant, SpeciesId};
    use rust_decimal::Decimal;

    use super::*;
    use crate::sink::RecordingSink;

    const WAIT: Duration = Duration::from_secs(2);

    fn message_for(reading: &SensorReading) -> InboundMessage {
        InboundMessage {
            channel: sensor_channel(reading.plant_id),
            payload: encode_reading(reading).unwrap(),
        }
    }

    #[test]
    fn patterns_match_levels() {
        assert!(channel_matches("greenhouse/sensors/#", "greenhouse/sensors/abc"));
        assert!(channel_matches("greenhouse/sensors/#", "greenhouse/sensors"));
        assert!(channel_matches("greenhouse/+/abc", "greenhouse/sensors/abc"));
        assert!(channel_matches("greenhouse/sensors/abc", "greenhouse/sensors/abc"));
        assert!(!channel_matches("greenhouse/sensors/+", "greenhouse/sensors/a/b"));
        assert!(!channel_matches("greenhouse/sensors/#", "greenhouse/commands/abc"));
        assert!(!channel_matches("greenhouse/sensors", "greenhouse/sensors/abc"));
    }

    #[test]
    fn hash_must_be_last_level() {
        assert!(!channel_matches("greenhouse/#/abc", "greenhouse/x/abc"));
    }

    #[test]
    fn decode_rejects_garbage() {
        let message = InboundMessage {
            channel: sensor_channel(PlantId::new()),
            payload: b"{not json".to_vec(),
        };
        assert!(matches!(
            decode_reading(&message),
            Err(BridgeError::MalformedMessage { .. })
        ));
    }

    #[test]
    fn decode_rejects_channel_mismatch() {
        let plant = Plant::new("Fern", SpeciesId::new());
        let mut message = message_for(&SensorReading::from_plant(&plant, false));
        message.channel = sensor_channel(PlantId::new());
        assert!(decode_reading(&message).is_err());
    }

    #[tokio::test]
    async fn relay_turns_death_reading_into_two_events() {
        let transport = LoopbackTransport::new();
        let sink = Arc::new(RecordingSink::new());
        let relay = spawn_relay(&transport, Arc::clone(&sink) as Arc<dyn EventSink>);

        let mut plant = Plant::new("Fern", SpeciesId::new()).with_water(Decimal::ZERO);
        plant.is_dead = true;
        let message = message_for(&SensorReading::from_plant(&plant, true));
        transport.publish(&message.channel, message.payload).unwrap();

        assert!(sink.wait_for(2, WAIT).await);
        assert_eq!(sink.names(), vec!["plant-died", "plant-update"]);
        relay.abort();
    }

    #[tokio::test]
    async fn relay_survives_malformed_messages() {
        let transport = LoopbackTransport::new();
        let sink = Arc::new(RecordingSink::new());
        let relay = spawn_relay(&transport, Arc::clone(&sink) as Arc<dyn EventSink>);

        transport
            .publish(&sensor_channel(PlantId::new()), b"garbage".to_vec())
            .unwrap();
        let plant = Plant::new("Fern", SpeciesId::new());
        let message = message_for(&SensorReading::from_plant(&plant, false));
        transport.publish(&message.channel, message.payload).unwrap();

        assert!(sink.wait_for(1, WAIT).await);
        assert_eq!(sink.names(), vec!["plant-update"]);
        assert!(!relay.is_finished());
        relay.abort();
    }

    #[tokio::test]
    async fn relay_ignores_other_channels() {
        let transport = LoopbackTransport::new();
        let sink = Arc::new(RecordingSink::new());
        let relay = spawn_relay(&transport, Arc::clone(&sink) as Arc<dyn EventSink>);

        let plant = Plant::new("Fern", SpeciesId::new());
        let reading = SensorReading::from_plant(&plant, false);
        transport
            .publish("greenhouse/commands/x", encode_reading(&reading).unwrap())
            .unwrap();
        let message = message_for(&reading);
        transport.publish(&message.channel, message.payload).unwrap();

        assert!(sink.wait_for(1, WAIT).await);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(sink.events().len(), 1);
        relay.abort();
    }

    #[test]
    fn publishing_without_subscribers_is_fine() {
        let transport = LoopbackTransport::new();
        assert!(transport.publish("greenhouse/sensors/x", Vec::new()).is_ok());
        assert!(transport.is_connected());
    }
}
