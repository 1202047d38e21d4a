//! Pure event model for the stellwerk relay: the closed event-type
//! enumeration, the delivery envelope, the filter mini-language, and
//! payload transforms.
//!
//! This crate does no I/O and holds no shared state other than the id
//! sequence counter; everything here is directly testable without a
//! runtime.

pub mod event;
pub mod filter;
pub mod transform;

pub use event::{Event, EventIdGenerator, EventType, Payload, UnknownEventType};
pub use filter::{payload_matches, FilterExpr};
pub use transform::{transform, TransformMode};
