//! Registered subscriber configuration.

use std::collections::HashMap;
use std::time::Duration;

use stellwerk_events::{EventType, TransformMode};

use crate::error::RelayError;

/// Delivery policy defaults applied when an endpoint doesn't override
/// them.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

/// A registered external HTTP receiver.
///
/// Immutable once registered; updates go through re-registration, which
/// replaces the whole record. Workers hold `Arc<Endpoint>` snapshots, so
/// an in-flight delivery always sees the policy it was enqueued with.
#[derive(Debug, Clone, PartialEq)]
pub struct Endpoint {
    /// Operator-assigned unique id.
    pub id: String,
    /// Destination URL, http or https.
    pub url: String,
    /// Optional HMAC signing key.
    pub secret: Option<String>,
    /// Subscribed event types. Empty means every type, including ones
    /// added to the enumeration later.
    pub subscribed_types: Vec<EventType>,
    pub enabled: bool,
    /// Static headers attached to every request.
    pub headers: HashMap<String, String>,
    /// Per-attempt HTTP timeout.
    pub timeout: Duration,
    /// Total attempt budget (first try included).
    pub max_retries: u32,
    /// Base delay for exponential backoff.
    pub retry_base_delay: Duration,
    /// Optional `field=value` / `field!=value` payload predicate.
    pub filter_expression: Option<String>,
    /// Payload shaping applied before sending.
    pub transform: TransformMode,
}

impl Endpoint {
    /// New endpoint with default policy: enabled, subscribed to all
    /// types, no secret, no filter, full envelopes.
    pub fn new(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            secret: None,
            subscribed_types: Vec::new(),
            enabled: true,
            headers: HashMap::new(),
            timeout: DEFAULT_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_base_delay: DEFAULT_RETRY_BASE_DELAY,
            filter_expression: None,
            transform: TransformMode::Full,
        }
    }

    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(secret.into());
        self
    }

    pub fn with_subscribed_types(mut self, types: Vec<EventType>) -> Self {
        self.subscribed_types = types;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay;
        self
    }

    pub fn with_filter(mut self, expression: impl Into<String>) -> Self {
        self.filter_expression = Some(expression.into());
        self
    }

    pub fn with_transform(mut self, mode: TransformMode) -> Self {
        self.transform = mode;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Registration-time validation. Anything rejected here is never
    /// queued.
    pub fn validate(&self) -> Result<(), RelayError> {
        if self.id.trim().is_empty() {
            return Err(RelayError::InvalidEndpoint("empty endpoint id".into()));
        }
        let parsed = url::Url::parse(&self.url)
            .map_err(|e| RelayError::InvalidEndpoint(format!("bad url '{}': {e}", self.url)))?;
        match parsed.scheme() {
            "http" | "https" => {}
            other => {
                return Err(RelayError::InvalidEndpoint(format!(
                    "unsupported url scheme '{other}' for endpoint '{}'",
                    self.id
                )));
            }
        }
        if self.max_retries == 0 {
            return Err(RelayError::InvalidEndpoint(format!(
                "endpoint '{}' needs max_retries >= 1",
                self.id
            )));
        }
        Ok(())
    }

    /// Subscription check. The wildcard and the empty set both accept
    /// every published type.
    pub fn accepts(&self, event_type: EventType) -> bool {
        self.subscribed_types.is_empty()
            || self.subscribed_types.contains(&EventType::All)
            || self.subscribed_types.contains(&event_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_wide_open() {
        let ep = Endpoint::new("e1", "https://receiver.example/hook");
        assert!(ep.enabled);
        assert!(ep.accepts(EventType::QueueJoin));
        assert!(ep.accepts(EventType::AlertTriggered));
        assert_eq!(ep.max_retries, DEFAULT_MAX_RETRIES);
        assert!(ep.validate().is_ok());
    }

    #[test]
    fn rejects_non_http_schemes() {
        let err = Endpoint::new("e1", "ftp://receiver.example/hook")
            .validate()
            .unwrap_err();
        match err {
            RelayError::InvalidEndpoint(msg) => assert!(msg.contains("ftp")),
            other => panic!("expected InvalidEndpoint, got: {other:?}"),
        }

        assert!(Endpoint::new("e1", "not a url").validate().is_err());
        assert!(Endpoint::new("e1", "http://receiver.example").validate().is_ok());
    }

    #[test]
    fn rejects_empty_id_and_zero_attempts() {
        assert!(Endpoint::new("  ", "https://r.example").validate().is_err());
        assert!(Endpoint::new("e1", "https://r.example")
            .with_max_retries(0)
            .validate()
            .is_err());
    }

    #[test]
    fn subscription_matching() {
        let exit_only = Endpoint::new("e1", "https://r.example")
            .with_subscribed_types(vec![EventType::Exit]);
        assert!(exit_only.accepts(EventType::Exit));
        assert!(!exit_only.accepts(EventType::QueueJoin));

        let wildcard = Endpoint::new("e2", "https://r.example")
            .with_subscribed_types(vec![EventType::All]);
        assert!(wildcard.accepts(EventType::QueueJoin));
        assert!(wildcard.accepts(EventType::Test));
    }
}
