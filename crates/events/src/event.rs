//! Core event model: the closed event-type enumeration, the event
//! envelope, and process-local id generation.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Ordered string-keyed payload map.
///
/// Payloads are duck-typed: values may be scalars, nested maps, or lists.
/// Key order is preserved end to end (serde_json's `preserve_order`).
pub type Payload = serde_json::Map<String, Value>;

// ── Event types ─────────────────────────────────────────────────────

/// The closed set of event types the relay knows how to route.
///
/// [`EventType::All`] is a subscription-side wildcard: endpoints and
/// handlers may register for it, but no published event ever carries it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    /// A participant joined the queue.
    #[serde(rename = "queue_join")]
    QueueJoin,

    /// A participant left the queue before being served.
    #[serde(rename = "queue_leave")]
    QueueLeave,

    /// Service of a participant started.
    #[serde(rename = "service_start")]
    ServiceStart,

    /// Service of a participant completed.
    #[serde(rename = "service_complete")]
    ServiceComplete,

    /// A participant exited the journey entirely.
    #[serde(rename = "exit")]
    Exit,

    /// A threshold breach or anomaly raised an alert.
    #[serde(rename = "alert.triggered")]
    AlertTriggered,

    /// Periodic health snapshot emitted by the relay itself.
    #[serde(rename = "system.health")]
    SystemHealth,

    /// Synthetic diagnostic event produced by endpoint probes.
    #[serde(rename = "test")]
    Test,

    /// Wildcard marker. Subscription-only, never a published type.
    #[serde(rename = "*")]
    All,
}

impl EventType {
    /// Wire name of this type, as it appears in envelopes and config.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::QueueJoin => "queue_join",
            EventType::QueueLeave => "queue_leave",
            EventType::ServiceStart => "service_start",
            EventType::ServiceComplete => "service_complete",
            EventType::Exit => "exit",
            EventType::AlertTriggered => "alert.triggered",
            EventType::SystemHealth => "system.health",
            EventType::Test => "test",
            EventType::All => "*",
        }
    }

    /// Whether this is the subscription-side wildcard.
    pub fn is_wildcard(&self) -> bool {
        matches!(self, EventType::All)
    }

    /// Map a journey stage name to its event type.
    ///
    /// Only the five participant-journey stages are valid here; alert,
    /// system, and diagnostic types cannot be produced through the stage
    /// API. Returns `None` for anything outside the closed set.
    pub fn from_stage(stage: &str) -> Option<EventType> {
        match stage {
            "queue_join" => Some(EventType::QueueJoin),
            "queue_leave" => Some(EventType::QueueLeave),
            "service_start" => Some(EventType::ServiceStart),
            "service_complete" => Some(EventType::ServiceComplete),
            "exit" => Some(EventType::Exit),
            _ => None,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = UnknownEventType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queue_join" => Ok(EventType::QueueJoin),
            "queue_leave" => Ok(EventType::QueueLeave),
            "service_start" => Ok(EventType::ServiceStart),
            "service_complete" => Ok(EventType::ServiceComplete),
            "exit" => Ok(EventType::Exit),
            "alert.triggered" => Ok(EventType::AlertTriggered),
            "system.health" => Ok(EventType::SystemHealth),
            "test" => Ok(EventType::Test),
            // Both spellings accepted in config for the wildcard.
            "*" | "all" => Ok(EventType::All),
            other => Err(UnknownEventType(other.to_string())),
        }
    }
}

/// Error for event-type names outside the closed enumeration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown event type: {0}")]
pub struct UnknownEventType(pub String);

// ── Event envelope ──────────────────────────────────────────────────

/// An immutable record of something that happened.
///
/// The serialized form of this struct is exactly the delivery envelope
/// receivers see: `{id, event, timestamp, payload, correlation_id?,
/// metadata?}` with an RFC3339 timestamp. Workers only ever read events;
/// shared ownership (`Arc`) keeps one copy alive across the fan-out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Unique id, `evt-<unix_ms>-<seq>`.
    pub id: String,

    /// What happened.
    #[serde(rename = "event")]
    pub event_type: EventType,

    /// Creation time, UTC.
    pub timestamp: DateTime<Utc>,

    /// Domain data. Ordered, arbitrarily nested.
    pub payload: Payload,

    /// Optional trace string linking related events (e.g. a participant
    /// token).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,

    /// Optional auxiliary context, transmitted but secondary to the
    /// payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Payload>,
}

impl Event {
    /// Build an event stamped with the current UTC time.
    pub fn new(id: String, event_type: EventType, payload: Payload) -> Self {
        Self {
            id,
            event_type,
            timestamp: Utc::now(),
            payload,
            correlation_id: None,
            metadata: None,
        }
    }

    /// Attach a correlation id.
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Attach auxiliary metadata.
    pub fn with_metadata(mut self, metadata: Payload) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

// ── Id generation ───────────────────────────────────────────────────

/// Produces unique, monotonically distinguishable event ids.
///
/// Ids combine the wall-clock millisecond at generation time with a
/// process-local sequence counter, so concurrent publishes within the
/// same millisecond still get distinct ids.
#[derive(Debug)]
pub struct EventIdGenerator {
    seq: AtomicU64,
}

impl EventIdGenerator {
    pub fn new() -> Self {
        Self { seq: AtomicU64::new(1) }
    }

    /// Next id, e.g. `evt-1756003200123-42`.
    pub fn next_id(&self) -> String {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        format!("evt-{}-{}", Utc::now().timestamp_millis(), seq)
    }
}

impl Default for EventIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}
