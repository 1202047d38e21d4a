//! TOML configuration for the relay worker.
//!
//! The `[relay]` section tunes the pool; `[[endpoints]]` entries are
//! parsed one at a time so a single malformed entry is skipped with a
//! warning instead of failing startup.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use stellwerk_events::{EventType, TransformMode};

use crate::delivery::DEFAULT_WORKER_COUNT;
use crate::dispatcher::{DeliveryMode, RelayOptions};
use crate::endpoint::{
    Endpoint, DEFAULT_MAX_RETRIES, DEFAULT_RETRY_BASE_DELAY, DEFAULT_TIMEOUT,
};
use crate::error::RelayError;
use crate::history::DEFAULT_HISTORY_CAPACITY;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default)]
    pub relay: RelaySection,
    /// Kept as raw TOML so entries can be validated individually.
    #[serde(default)]
    pub endpoints: Vec<toml::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelaySection {
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
    #[serde(default)]
    pub mode: DeliveryMode,
}

impl Default for RelaySection {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            history_capacity: default_history_capacity(),
            mode: DeliveryMode::default(),
        }
    }
}

fn default_worker_count() -> usize {
    DEFAULT_WORKER_COUNT
}

fn default_history_capacity() -> usize {
    DEFAULT_HISTORY_CAPACITY
}

fn default_enabled() -> bool {
    true
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT.as_millis() as u64
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_retry_base_delay_ms() -> u64 {
    DEFAULT_RETRY_BASE_DELAY.as_millis() as u64
}

/// One `[[endpoints]]` entry as written by the operator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointEntry {
    pub id: String,
    pub url: String,
    #[serde(default)]
    pub secret: Option<String>,
    /// Event type names; empty subscribes to everything.
    #[serde(default)]
    pub events: Vec<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default)]
    pub filter: Option<String>,
    #[serde(default)]
    pub transform: TransformMode,
}

impl EndpointEntry {
    pub fn into_endpoint(self) -> Result<Endpoint, RelayError> {
        let mut subscribed = Vec::with_capacity(self.events.len());
        for name in &self.events {
            let event_type = name
                .parse::<EventType>()
                .map_err(|err| RelayError::Config(format!("endpoint {}: {err}", self.id)))?;
            subscribed.push(event_type);
        }

        let mut endpoint = Endpoint::new(self.id, self.url)
            .with_subscribed_types(subscribed)
            .with_enabled(self.enabled)
            .with_timeout(Duration::from_millis(self.timeout_ms))
            .with_max_retries(self.max_retries)
            .with_retry_base_delay(Duration::from_millis(self.retry_base_delay_ms))
            .with_transform(self.transform);
        if let Some(secret) = self.secret {
            endpoint = endpoint.with_secret(secret);
        }
        for (name, value) in self.headers {
            endpoint = endpoint.with_header(name, value);
        }
        if let Some(filter) = self.filter {
            endpoint = endpoint.with_filter(filter);
        }

        endpoint.validate()?;
        Ok(endpoint)
    }
}

impl RelayConfig {
    pub fn from_toml(text: &str) -> Result<Self, RelayError> {
        Ok(toml::from_str(text)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, RelayError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    /// Environment values win over the file.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(value) = std::env::var("STELLWERK_RELAY_WORKERS") {
            match value.parse() {
                Ok(parsed) => self.relay.worker_count = parsed,
                Err(_) => warn!(%value, "ignoring unparseable STELLWERK_RELAY_WORKERS"),
            }
        }
        if let Ok(value) = std::env::var("STELLWERK_RELAY_HISTORY_CAPACITY") {
            match value.parse() {
                Ok(parsed) => self.relay.history_capacity = parsed,
                Err(_) => warn!(%value, "ignoring unparseable STELLWERK_RELAY_HISTORY_CAPACITY"),
            }
        }
        if let Ok(value) = std::env::var("STELLWERK_RELAY_MODE") {
            match value.as_str() {
                "background" => self.relay.mode = DeliveryMode::Background,
                "immediate" => self.relay.mode = DeliveryMode::Immediate,
                _ => warn!(%value, "ignoring unknown STELLWERK_RELAY_MODE"),
            }
        }
    }

    pub fn validate(&self) -> Result<(), RelayError> {
        if self.relay.worker_count == 0 {
            return Err(RelayError::Config(
                "relay.worker_count must be at least 1".to_string(),
            ));
        }
        if self.relay.history_capacity < 2 {
            return Err(RelayError::Config(
                "relay.history_capacity must be at least 2".to_string(),
            ));
        }
        Ok(())
    }

    /// Parse `[[endpoints]]` leniently: malformed or invalid entries
    /// are logged and dropped.
    pub fn parse_endpoints(&self) -> Vec<Endpoint> {
        let mut endpoints = Vec::with_capacity(self.endpoints.len());
        for (index, raw) in self.endpoints.iter().enumerate() {
            let entry: EndpointEntry = match raw.clone().try_into() {
                Ok(entry) => entry,
                Err(err) => {
                    warn!(index, error = %err, "skipping malformed endpoint entry");
                    continue;
                }
            };
            let id = entry.id.clone();
            match entry.into_endpoint() {
                Ok(endpoint) => endpoints.push(endpoint),
                Err(err) => {
                    warn!(index, endpoint = %id, error = %err, "skipping invalid endpoint entry")
                }
            }
        }
        endpoints
    }

    pub fn relay_options(&self) -> RelayOptions {
        RelayOptions {
            worker_count: self.relay.worker_count,
            history_capacity: self.relay.history_capacity,
            mode: self.relay.mode,
        }
    }
}
