//! Subscriber registry and event fan-out.
//!
//! Every real-time client, `WebSocket` or event-stream, registers with the
//! [`FanoutHub`] and receives a bounded queue of [`Frame`]s. A transition
//! event is serialized once per broadcast and the same `Arc<Frame>` is
//! handed to every subscriber, so both transports carry byte-identical
//! `data`.
//!
//! Delivery never waits on a subscriber. A full queue drops the frame for
//! that subscriber only; a closed queue removes the subscriber.
//!
//! [`FanoutHub::close`] drops every queue so open streams end and the server
//! can finish its graceful shutdown.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};

use greenhouse_core::EventSink;
use greenhouse_types::{PlantEvent, PlantId, SessionId};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Event name of the direct reply to a rejected client command.
pub const COMMAND_ERROR_EVENT: &str = "command-error";

/// The transport a subscriber is connected through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Bidirectional `WebSocket`.
    WebSocket,
    /// Server-sent event stream.
    EventStream,
}

/// A serialized event, shared by every subscriber of one broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Event name (`plant-update`, `plant-died`, ...).
    pub event: &'static str,
    /// JSON payload text.
    pub data: String,
}

impl Frame {
    /// Serialize a transition event.
    ///
    /// # Errors
    ///
    /// Returns a [`serde_json::Error`] if the payload cannot be serialized.
    pub fn from_event(event: &PlantEvent) -> Result<Self, serde_json::Error> {
        Ok(Self {
            event: event.name(),
            data: event.data()?,
        })
    }

    /// Direct reply to a client whose command was rejected.
    pub fn command_error(plant_id: Option<PlantId>, error: &str) -> Self {
        let data = serde_json::json!({
            "plantId": plant_id,
            "error": error,
        });
        Self {
            event: COMMAND_ERROR_EVENT,
            data: data.to_string(),
        }
    }

    /// `WebSocket` text rendering: `{"event":<name>,"data":<data>}`.
    pub fn to_ws_text(&self) -> String {
        format!(r#"{{"event":"{}","data":{}}}"#, self.event, self.data)
    }

    /// Event-stream rendering: `event: <name>\ndata: <data>\n\n`.
    pub fn to_sse(&self) -> String {
        format!("event: {}\ndata: {}\n\n", self.event, self.data)
    }
}

#[derive(Debug)]
struct Subscriber {
    kind: TransportKind,
    tx: mpsc::Sender<Arc<Frame>>,
}

/// Registry of live subscribers.
#[derive(Debug)]
pub struct FanoutHub {
    subscribers: RwLock<HashMap<SessionId, Subscriber>>,
    buffer: usize,
    dropped: AtomicU64,
    closed: AtomicBool,
}

impl FanoutHub {
    /// Create a hub whose subscribers each buffer up to `buffer` frames.
    pub fn new(buffer: usize) -> Arc<Self> {
        Arc::new(Self {
            subscribers: RwLock::new(HashMap::new()),
            buffer: buffer.max(1),
            dropped: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        })
    }

    /// Register a subscriber.
    ///
    /// Dropping the returned [`Registration`] unregisters it. After
    /// [`close`](Self::close) the receiver is already closed.
    pub fn register(
        self: &Arc<Self>,
        kind: TransportKind,
    ) -> (Registration, mpsc::Receiver<Arc<Frame>>) {
        let (tx, rx) = mpsc::channel(self.buffer);
        let session_id = SessionId::new();
        {
            let mut subscribers = self.subscribers.write().unwrap_or_else(PoisonError::into_inner);
            // Checked under the lock so a concurrent close cannot miss it.
            if !self.closed.load(Ordering::Acquire) {
                subscribers.insert(session_id, Subscriber { kind, tx });
                debug!(session_id = %session_id, ?kind, "Subscriber registered");
            }
        }
        (
            Registration {
                session_id,
                hub: Arc::downgrade(self),
            },
            rx,
        )
    }

    /// Remove a subscriber. Returns whether it was registered; calling it
    /// again is harmless.
    pub fn unregister(&self, session_id: SessionId) -> bool {
        let removed = self
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&session_id)
            .is_some();
        if removed {
            debug!(session_id = %session_id, "Subscriber unregistered");
        }
        removed
    }

    /// Deliver an event to every subscriber. Returns how many queued it.
    pub fn broadcast(&self, event: &PlantEvent) -> usize {
        let frame = match Frame::from_event(event) {
            Ok(frame) => Arc::new(frame),
            Err(e) => {
                warn!(event = event.name(), error = %e, "Failed to serialize event");
                return 0;
            }
        };
        self.broadcast_frame(&frame)
    }

    /// Deliver a pre-built frame to every subscriber.
    pub fn broadcast_frame(&self, frame: &Arc<Frame>) -> usize {
        let mut delivered = 0usize;
        let mut closed = Vec::new();
        {
            let subscribers = self.subscribers.read().unwrap_or_else(PoisonError::into_inner);
            for (session_id, subscriber) in subscribers.iter() {
                match subscriber.tx.try_send(Arc::clone(frame)) {
                    Ok(()) => delivered = delivered.saturating_add(1),
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                        debug!(
                            session_id = %session_id,
                            kind = ?subscriber.kind,
                            event = frame.event,
                            "Subscriber queue full, frame dropped"
                        );
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => closed.push(*session_id),
                }
            }
        }
        for session_id in closed {
            self.unregister(session_id);
        }
        delivered
    }

    /// Drop every subscriber queue and refuse new ones.
    ///
    /// Receivers yield the frames already queued and then end. Returns how
    /// many subscribers were disconnected.
    pub fn close(&self) -> usize {
        let mut subscribers = self.subscribers.write().unwrap_or_else(PoisonError::into_inner);
        self.closed.store(true, Ordering::Release);
        let count = subscribers.len();
        subscribers.clear();
        drop(subscribers);
        debug!(count, "Hub closed");
        count
    }

    /// Whether [`close`](Self::close) was called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Number of registered subscribers of one transport kind.
    pub fn count_by_kind(&self, kind: TransportKind) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|s| s.kind == kind)
            .count()
    }

    /// Frames dropped because a subscriber's queue was full.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl EventSink for FanoutHub {
    fn emit(&self, event: &PlantEvent) {
        self.broadcast(event);
    }
}

/// Handle for one registered subscriber.
#[derive(Debug)]
pub struct Registration {
    session_id: SessionId,
    hub: Weak<FanoutHub>,
}

impl Registration {
    /// The subscriber's session id.
    pub const fn session_id(&self) -> SessionId {
        self.session_id
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.unregister(self.session_id);
        }
    }
}
