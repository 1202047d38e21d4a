//! Webhook relay: event intake, endpoint fan-out, and signed HTTP
//! delivery with retries.
//!
//! A [`Relay`] accepts published events, runs in-process handlers,
//! matches the event against the registered endpoints (subscriptions
//! and filter expressions), and hands the matching pairs to a worker
//! pool that signs, POSTs, retries with exponential backoff, and
//! records every attempt. Shutdown drains the queue up to a deadline
//! and reports what was delivered, what failed, and what had to be
//! dropped.

pub mod config;
pub mod delivery;
pub mod dispatcher;
pub mod endpoint;
pub mod error;
pub mod health;
pub mod history;
pub mod registry;
pub mod signer;
pub mod transport;

pub use config::{EndpointEntry, RelayConfig, RelaySection};
pub use dispatcher::{DeliveryMode, DrainReport, EventHandler, Relay, RelayOptions};
pub use endpoint::Endpoint;
pub use error::RelayError;
pub use health::{HealthState, HealthStatus};
pub use history::{DeliveryAttempt, DeliveryLog, DeliveryStatus, EndpointStats, RelayTotals};
pub use registry::EndpointRegistry;
pub use transport::{HttpTransport, WebhookRequest, WebhookResponse, WebhookTransport};
