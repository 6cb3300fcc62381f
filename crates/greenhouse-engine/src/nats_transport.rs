//! NATS implementation of the transport bridge.
//!
//! Channels use `/`-separated levels with `+` and `#` wildcards. NATS
//! subjects use `.` with `*` and `>`, so every channel and pattern is
//! mapped on the way in and out:
//!
//! - **Channel:** `greenhouse/sensors/{plantId}` <-> `greenhouse.sensors.{plantId}`
//! - **Pattern:** `greenhouse/sensors/#` -> `greenhouse.sensors.>`
//!
//! # Connection lifecycle
//!
//! A supervisor task performs the initial connect, retrying with
//! exponential backoff plus jitter until the broker answers. After that the
//! client reconnects on its own using the same delay policy. A subscription
//! the broker refuses is retried with that policy too. Publishes go
//! through a bounded queue drained by one writer task so
//! [`Transport::publish`] never waits. While disconnected, or when the
//! queue is full, messages are dropped and the caller gets
//! [`BridgeError::TransportUnavailable`].

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_nats::connection::State;
use futures::StreamExt as _;
use greenhouse_core::bridge::{BridgeError, InboundMessage, MessageHandler, Transport};
use greenhouse_core::config::BridgeConfig;
use rand::Rng;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Highest exponent applied to the base delay.
const MAX_BACKOFF_EXPONENT: usize = 16;

/// Reconnect and queue settings for [`NatsTransport`].
#[derive(Debug, Clone)]
pub struct NatsSettings {
    /// Broker URL.
    pub url: String,
    /// First retry delay.
    pub reconnect_base: Duration,
    /// Upper bound on any retry delay before jitter.
    pub reconnect_max: Duration,
    /// Capacity of the outbound queue.
    pub outbound_capacity: usize,
}

impl From<&BridgeConfig> for NatsSettings {
    fn from(config: &BridgeConfig) -> Self {
        Self {
            url: config.nats_url.clone(),
            reconnect_base: Duration::from_millis(config.reconnect_base_ms),
            reconnect_max: Duration::from_millis(config.reconnect_max_ms),
            outbound_capacity: config.outbound_capacity,
        }
    }
}

#[derive(Debug)]
struct Outbound {
    subject: String,
    payload: Vec<u8>,
}

/// [`Transport`] backed by a NATS broker.
pub struct NatsTransport {
    outbound: mpsc::Sender<Outbound>,
    client: watch::Receiver<Option<async_nats::Client>>,
    shutdown: Arc<AtomicBool>,
    backoff: Backoff,
}

/// Delay policy shared by connect and subscribe retries.
#[derive(Debug, Clone, Copy)]
struct Backoff {
    base: Duration,
    max: Duration,
}

impl Backoff {
    fn delay(self, attempt: usize) -> Duration {
        jittered(backoff_delay(attempt, self.base, self.max), &mut rand::rng())
    }
}

impl NatsTransport {
    /// Start the connection supervisor and the writer task.
    ///
    /// Returns immediately; the transport reports disconnected until the
    /// first connect succeeds. Must be called from within a Tokio runtime.
    pub fn start(settings: NatsSettings) -> Self {
        let (client_tx, client_rx) = watch::channel(None);
        let (outbound_tx, outbound_rx) = mpsc::channel(settings.outbound_capacity.max(1));
        let shutdown = Arc::new(AtomicBool::new(false));
        let backoff = Backoff {
            base: settings.reconnect_base,
            max: settings.reconnect_max,
        };

        tokio::spawn(supervise(settings, client_tx, Arc::clone(&shutdown)));
        tokio::spawn(write_loop(outbound_rx, client_rx.clone()));

        Self {
            outbound: outbound_tx,
            client: client_rx,
            shutdown,
            backoff,
        }
    }

    /// Stop retrying the initial connect and refused subscriptions.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    fn current_client(&self) -> Option<async_nats::Client> {
        self.client.borrow().clone()
    }
}

impl std::fmt::Debug for NatsTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NatsTransport")
            .field("connected", &self.is_connected())
            .field("queued", &self.outbound.max_capacity().saturating_sub(self.outbound.capacity()))
            .finish()
    }
}

impl Transport for NatsTransport {
    fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<(), BridgeError> {
        if !self.is_connected() {
            return Err(BridgeError::TransportUnavailable(String::from(
                "not connected to broker",
            )));
        }
        let message = Outbound {
            subject: channel_to_subject(channel),
            payload,
        };
        self.outbound.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                warn!(channel, "Outbound queue full, dropping message");
                BridgeError::TransportUnavailable(String::from("outbound queue full"))
            }
            mpsc::error::TrySendError::Closed(_) => {
                BridgeError::TransportUnavailable(String::from("writer task stopped"))
            }
        })
    }

    fn subscribe(&self, pattern: &str, handler: MessageHandler) -> JoinHandle<()> {
        let mut client_rx = self.client.clone();
        let subject = channel_to_subject(pattern);
        let backoff = self.backoff;
        let shutdown = Arc::clone(&self.shutdown);
        tokio::spawn(async move {
            let client = loop {
                let current = client_rx.borrow_and_update().clone();
                if let Some(client) = current {
                    break client;
                }
                if client_rx.changed().await.is_err() {
                    return;
                }
            };

            let subscribed = retry_with_backoff(&subject, backoff, &shutdown, || {
                client.subscribe(subject.clone())
            })
            .await;
            let Some(mut subscriber) = subscribed else {
                return;
            };
            info!(subject, "Subscribed to broker subject");

            while let Some(message) = subscriber.next().await {
                handler(InboundMessage {
                    channel: subject_to_channel(message.subject.as_str()),
                    payload: message.payload.to_vec(),
                });
            }
            debug!(subject, "Broker subscription ended");
        })
    }

    fn is_connected(&self) -> bool {
        self.current_client()
            .is_some_and(|client| matches!(client.connection_state(), State::Connected))
    }
}

/// Connect with backoff, then hand the client to the other tasks.
async fn supervise(
    settings: NatsSettings,
    client_tx: watch::Sender<Option<async_nats::Client>>,
    shutdown: Arc<AtomicBool>,
) {
    let backoff = Backoff {
        base: settings.reconnect_base,
        max: settings.reconnect_max,
    };
    let connected = retry_with_backoff(&settings.url, backoff, &shutdown, || {
        async_nats::ConnectOptions::new()
            .reconnect_delay_callback(move |n| backoff.delay(n))
            .event_callback(|event| async move {
                match event {
                    async_nats::Event::Connected => info!("Broker connection restored"),
                    async_nats::Event::Disconnected => warn!("Broker connection lost"),
                    other => debug!(event = %other, "Broker event"),
                }
            })
            .connect(settings.url.as_str())
    })
    .await;

    if let Some(client) = connected {
        info!(url = settings.url, "Connected to NATS");
        let _ = client_tx.send(Some(client));
    }
}

/// Run `op` until it succeeds, sleeping with backoff and jitter between
/// attempts. Returns `None` once `shutdown` is set.
async fn retry_with_backoff<T, E, F, Fut>(
    peer: &str,
    backoff: Backoff,
    shutdown: &AtomicBool,
    mut op: F,
) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let mut attempt: usize = 0;
    loop {
        if shutdown.load(Ordering::SeqCst) {
            return None;
        }
        match op().await {
            Ok(value) => return Some(value),
            Err(e) => {
                let delay = backoff.delay(attempt);
                warn!(
                    peer,
                    attempt,
                    retry_in_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %e,
                    "Broker operation failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt = attempt.saturating_add(1);
            }
        }
    }
}

/// Drain the outbound queue in order.
async fn write_loop(
    mut outbound: mpsc::Receiver<Outbound>,
    client_rx: watch::Receiver<Option<async_nats::Client>>,
) {
    while let Some(message) = outbound.recv().await {
        let client = client_rx.borrow().clone();
        let Some(client) = client else {
            debug!(subject = message.subject, "Dropping message, broker not connected");
            continue;
        };
        if let Err(e) = client
            .publish(message.subject.clone(), message.payload.into())
            .await
        {
            debug!(subject = message.subject, error = %e, "Publish failed, message dropped");
        }
    }
}

/// Exponential delay `base * 2^attempt`, capped at `max`.
pub fn backoff_delay(attempt: usize, base: Duration, max: Duration) -> Duration {
    let exponent = u32::try_from(attempt.min(MAX_BACKOFF_EXPONENT)).unwrap_or(u32::MAX);
    base.saturating_mul(2u32.saturating_pow(exponent)).min(max)
}

/// Add up to a quarter of `delay` as random jitter.
pub fn jittered(delay: Duration, rng: &mut impl Rng) -> Duration {
    let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
    let spread = millis.checked_div(4).unwrap_or(0);
    delay.saturating_add(Duration::from_millis(rng.random_range(0..=spread)))
}

/// Map a `/`-separated channel or pattern onto a NATS subject.
pub fn channel_to_subject(channel: &str) -> String {
    channel
        .split('/')
        .map(|level| match level {
            "+" => "*",
            "#" => ">",
            other => other,
        })
        .collect::<Vec<_>>()
        .join(".")
}

/// Map a concrete NATS subject back onto a channel.
pub fn subject_to_channel(subject: &str) -> String {
    subject.replace('.', "/")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use rand::SeedableRng;
    use rand::rngs::SmallRng;

    use super::*;

    const BASE: Duration = Duration::from_millis(250);
    const MAX: Duration = Duration::from_secs(30);

    #[test]
    fn channels_map_to_subjects() {
        assert_eq!(
            channel_to_subject("greenhouse/sensors/abc-123"),
            "greenhouse.sensors.abc-123"
        );
        assert_eq!(channel_to_subject("greenhouse/sensors/#"), "greenhouse.sensors.>");
        assert_eq!(channel_to_subject("greenhouse/+/abc"), "greenhouse.*.abc");
    }

    #[test]
    fn subjects_map_back_to_channels() {
        let channel = "greenhouse/sensors/abc-123";
        assert_eq!(subject_to_channel(&channel_to_subject(channel)), channel);
    }

    #[test]
    fn backoff_doubles_from_base() {
        assert_eq!(backoff_delay(0, BASE, MAX), Duration::from_millis(250));
        assert_eq!(backoff_delay(1, BASE, MAX), Duration::from_millis(500));
        assert_eq!(backoff_delay(3, BASE, MAX), Duration::from_secs(2));
    }

    #[test]
    fn backoff_is_capped() {
        assert_eq!(backoff_delay(10, BASE, MAX), MAX);
        assert_eq!(backoff_delay(usize::MAX, BASE, MAX), MAX);
    }

    #[test]
    fn jitter_stays_within_a_quarter() {
        let mut rng = SmallRng::seed_from_u64(7);
        for _ in 0..100 {
            let delay = jittered(Duration::from_secs(4), &mut rng);
            assert!(delay >= Duration::from_secs(4));
            assert!(delay <= Duration::from_secs(5));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn refused_operation_is_retried_with_backoff() {
        let backoff = Backoff { base: BASE, max: MAX };
        let shutdown = AtomicBool::new(false);
        let mut calls = 0u32;
        let started = tokio::time::Instant::now();

        let result = retry_with_backoff("greenhouse.sensors.>", backoff, &shutdown, || {
            calls = calls.saturating_add(1);
            let outcome = if calls < 3 { Err("permissions violation") } else { Ok(calls) };
            async move { outcome }
        })
        .await;

        assert_eq!(result, Some(3));
        // Two failures: at least base + 2 * base before the third attempt.
        assert!(started.elapsed() >= Duration::from_millis(750));
    }

    #[tokio::test]
    async fn retry_gives_up_on_shutdown() {
        let backoff = Backoff { base: BASE, max: MAX };
        let shutdown = AtomicBool::new(true);
        let result: Option<()> =
            retry_with_backoff("nats://127.0.0.1:1", backoff, &shutdown, || async {
                Err::<(), _>("unreachable broker")
            })
            .await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn publish_before_connect_is_unavailable() {
        let transport = NatsTransport::start(NatsSettings {
            // Port 1 is never a broker; the supervisor keeps retrying.
            url: String::from("nats://127.0.0.1:1"),
            reconnect_base: BASE,
            reconnect_max: MAX,
            outbound_capacity: 4,
        });
        assert!(!transport.is_connected());
        assert!(matches!(
            transport.publish("greenhouse/sensors/x", b"{}".to_vec()),
            Err(BridgeError::TransportUnavailable(_))
        ));
        transport.shutdown();
    }

    #[tokio::test]
    #[ignore = "requires live NATS server"]
    async fn round_trip_through_broker() {
        use std::sync::Mutex;

        let transport = NatsTransport::start(NatsSettings {
            url: String::from("nats://localhost:4222"),
            reconnect_base: BASE,
            reconnect_max: MAX,
            outbound_capacity: 16,
        });
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        let handler: MessageHandler = Arc::new(move |message: InboundMessage| {
            if let Ok(mut guard) = sink.lock() {
                guard.push(message.channel);
            }
        });
        let subscription = transport.subscribe("greenhouse/sensors/#", handler);

        let connected = tokio::time::timeout(Duration::from_secs(5), async {
            while !transport.is_connected() {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await;
        assert!(connected.is_ok());
        // Give the subscription time to register with the server.
        tokio::time::sleep(Duration::from_millis(200)).await;

        transport
            .publish("greenhouse/sensors/abc", b"{}".to_vec())
            .ok();
        tokio::time::sleep(Duration::from_millis(500)).await;

        let channels = received.lock().map(|g| g.clone()).unwrap_or_default();
        assert_eq!(channels, vec![String::from("greenhouse/sensors/abc")]);
        subscription.abort();
    }
}
