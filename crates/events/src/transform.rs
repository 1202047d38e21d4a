//! Per-endpoint payload shaping applied just before serialization.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::event::{Event, Payload};

/// How an endpoint wants its envelopes reshaped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransformMode {
    /// The entire envelope, unchanged.
    #[default]
    Full,
    /// Only `event`, `timestamp`, and `payload`.
    Minimal,
    /// Full envelope, but nested payload maps collapsed into
    /// single-level keys joined with `_` (`{a:{b:1}}` becomes `{a_b:1}`).
    Flatten,
}

/// Produce the JSON value an endpoint should receive for `event`.
pub fn transform(event: &Event, mode: TransformMode) -> serde_json::Result<Value> {
    match mode {
        TransformMode::Full => serde_json::to_value(event),
        TransformMode::Minimal => Ok(json!({
            "event": event.event_type,
            "timestamp": event.timestamp,
            "payload": event.payload,
        })),
        TransformMode::Flatten => {
            let mut envelope = serde_json::to_value(event)?;
            if let Some(obj) = envelope.as_object_mut() {
                obj.insert("payload".to_string(), Value::Object(flatten_payload(&event.payload)));
            }
            Ok(envelope)
        }
    }
}

/// Collapse nested maps into `_`-joined keys. Only maps are recursed
/// into; lists and scalars are carried as-is.
fn flatten_payload(payload: &Payload) -> Payload {
    let mut out = Payload::new();
    for (key, value) in payload {
        flatten_into(key, value, &mut out);
    }
    out
}

fn flatten_into(prefix: &str, value: &Value, out: &mut Payload) {
    match value {
        Value::Object(nested) => {
            for (key, inner) in nested {
                flatten_into(&format!("{prefix}_{key}"), inner, out);
            }
        }
        other => {
            out.insert(prefix.to_string(), other.clone());
        }
    }
}
