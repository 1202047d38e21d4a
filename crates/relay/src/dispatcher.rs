//! The relay facade: event intake, in-process handlers, fan-out, and
//! the shutdown lifecycle.
//!
//! A [`Relay`] is an explicitly constructed object, injected where it
//! is needed. It owns the endpoint registry, the delivery log, and the
//! worker pool; callers publish events and the relay routes them to
//! every matching endpoint.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use stellwerk_events::{
    payload_matches, Event, EventIdGenerator, EventType, Payload, UnknownEventType,
};

use crate::delivery::{
    deliver_inline, execute_attempt, DeliveryJob, DeliveryPool, DEFAULT_WORKER_COUNT,
};
use crate::endpoint::Endpoint;
use crate::error::RelayError;
use crate::health::{HealthState, HealthStatus};
use crate::history::{
    DeliveryAttempt, DeliveryLog, DeliveryStatus, EndpointStats, DEFAULT_HISTORY_CAPACITY,
};
use crate::registry::EndpointRegistry;
use crate::transport::{HttpTransport, WebhookTransport};

// ── Options ─────────────────────────────────────────────────────────

/// How matched pairs reach the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    /// Enqueue to the worker pool; `publish` returns immediately.
    #[default]
    Background,
    /// Deliver on the publishing task, retries included. For tests and
    /// single-shot tooling.
    Immediate,
}

#[derive(Debug, Clone)]
pub struct RelayOptions {
    pub worker_count: usize,
    pub history_capacity: usize,
    pub mode: DeliveryMode,
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self {
            worker_count: DEFAULT_WORKER_COUNT,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            mode: DeliveryMode::Background,
        }
    }
}

/// In-process subscriber. Runs on the publishing task and must return
/// quickly; errors are logged and never propagate.
pub type EventHandler = Arc<dyn Fn(&Event) -> anyhow::Result<()> + Send + Sync>;

/// What happened to queued work during [`Relay::shutdown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    pub delivered: u64,
    pub failed: u64,
    pub dropped: u64,
}

// ── Relay ───────────────────────────────────────────────────────────

pub struct Relay {
    registry: EndpointRegistry,
    log: DeliveryLog,
    pool: DeliveryPool,
    transport: Arc<dyn WebhookTransport>,
    ids: EventIdGenerator,
    handlers: RwLock<HashMap<EventType, Vec<EventHandler>>>,
    mode: DeliveryMode,
    accepting: AtomicBool,
}

impl Relay {
    /// Build a relay over the production HTTP transport. Must run
    /// inside a tokio runtime, since the worker pool spawns there.
    pub fn new(options: RelayOptions) -> Result<Self, RelayError> {
        Ok(Self::with_transport(options, Arc::new(HttpTransport::new()?)))
    }

    /// Build a relay over a caller-supplied transport.
    pub fn with_transport(options: RelayOptions, transport: Arc<dyn WebhookTransport>) -> Self {
        let log = DeliveryLog::new(options.history_capacity);
        let pool = DeliveryPool::new(options.worker_count, log.clone(), transport.clone());
        Self {
            registry: EndpointRegistry::new(),
            log,
            pool,
            transport,
            ids: EventIdGenerator::new(),
            handlers: RwLock::new(HashMap::new()),
            mode: options.mode,
            accepting: AtomicBool::new(true),
        }
    }

    // ── Handlers ────────────────────────────────────────────────

    /// Register an in-process handler. Use [`EventType::All`] to
    /// observe every published event.
    pub async fn on_event<F>(&self, event_type: EventType, handler: F)
    where
        F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let mut handlers = self.handlers.write().await;
        handlers.entry(event_type).or_default().push(Arc::new(handler));
    }

    // ── Publishing ──────────────────────────────────────────────

    pub async fn publish(&self, event_type: EventType, payload: Payload) -> Event {
        self.publish_with(event_type, payload, None, None).await
    }

    /// Build and publish one event. Always returns the constructed
    /// event; whether any delivery later succeeds is a separate
    /// concern surfaced through stats and history.
    pub async fn publish_with(
        &self,
        event_type: EventType,
        payload: Payload,
        correlation_id: Option<String>,
        metadata: Option<Payload>,
    ) -> Event {
        let mut event = Event::new(self.ids.next_id(), event_type, payload);
        if let Some(correlation_id) = correlation_id {
            event = event.with_correlation_id(correlation_id);
        }
        if let Some(metadata) = metadata {
            event = event.with_metadata(metadata);
        }

        if event_type.is_wildcard() {
            warn!(event = %event.id, "wildcard is subscription-only, event not routed");
            return event;
        }
        if !self.accepting.load(Ordering::SeqCst) {
            warn!(event = %event.id, kind = %event.event_type, "publish after shutdown, event not routed");
            return event;
        }

        self.log.record_event_published().await;
        self.run_handlers(&event).await;
        self.route(event.clone()).await;
        event
    }

    /// Map a workflow stage name onto its event type and publish.
    /// Unknown stages publish nothing.
    pub async fn publish_tap_event(
        &self,
        stage: &str,
        token_id: &str,
        session_id: Option<&str>,
        extra: Option<Payload>,
    ) -> Result<Event, UnknownEventType> {
        let Some(event_type) = EventType::from_stage(stage) else {
            error!(stage, "unknown workflow stage, event not published");
            return Err(UnknownEventType(stage.to_string()));
        };

        let mut payload = Payload::new();
        payload.insert("token_id".to_string(), Value::String(token_id.to_string()));
        if let Some(session_id) = session_id {
            payload.insert("session_id".to_string(), Value::String(session_id.to_string()));
        }
        if let Some(extra) = extra {
            for (key, value) in extra {
                payload.insert(key, value);
            }
        }

        Ok(self.publish(event_type, payload).await)
    }

    /// Publish an `alert.triggered` event.
    pub async fn publish_alert(
        &self,
        alert_type: &str,
        severity: &str,
        message: &str,
        details: Option<Payload>,
    ) -> Event {
        let mut payload = Payload::new();
        payload.insert("alert_type".to_string(), Value::String(alert_type.to_string()));
        payload.insert("severity".to_string(), Value::String(severity.to_string()));
        payload.insert("message".to_string(), Value::String(message.to_string()));
        if let Some(details) = details {
            payload.insert("details".to_string(), Value::Object(details));
        }
        self.publish(EventType::AlertTriggered, payload).await
    }

    async fn run_handlers(&self, event: &Event) {
        // Snapshot outside the lock so a handler can never hold it.
        let to_run: Vec<EventHandler> = {
            let handlers = self.handlers.read().await;
            handlers
                .get(&event.event_type)
                .into_iter()
                .flatten()
                .chain(handlers.get(&EventType::All).into_iter().flatten())
                .cloned()
                .collect()
        };
        for handler in to_run {
            if let Err(err) = handler(event) {
                warn!(
                    event = %event.id,
                    kind = %event.event_type,
                    error = %err,
                    "event handler failed"
                );
            }
        }
    }

    /// Fan the event out over a point-in-time snapshot of enabled
    /// endpoints.
    async fn route(&self, event: Event) {
        let snapshot = self.registry.snapshot_enabled().await;
        let event = Arc::new(event);
        let mut matched = 0usize;

        for endpoint in snapshot {
            if !endpoint.accepts(event.event_type) {
                continue;
            }
            if let Some(expression) = &endpoint.filter_expression {
                if !payload_matches(&event.payload, expression) {
                    debug!(endpoint = %endpoint.id, event = %event.id, "filtered out");
                    continue;
                }
            }
            matched += 1;
            match self.mode {
                DeliveryMode::Background => {
                    if self.pool.enqueue(endpoint.clone(), event.clone()).is_ok() {
                        self.log.record_enqueued(endpoint.id.as_str()).await;
                    }
                }
                DeliveryMode::Immediate => {
                    self.log.record_enqueued(endpoint.id.as_str()).await;
                    deliver_inline(
                        &self.log,
                        self.transport.as_ref(),
                        endpoint.clone(),
                        event.clone(),
                    )
                    .await;
                }
            }
        }

        debug!(event = %event.id, kind = %event.event_type, matched, "event routed");
    }

    // ── Registry passthrough ────────────────────────────────────

    pub async fn register_endpoint(&self, endpoint: Endpoint) -> Result<(), RelayError> {
        self.registry.register(endpoint).await
    }

    pub async fn unregister_endpoint(&self, id: &str) -> bool {
        self.registry.unregister(id).await
    }

    pub async fn set_endpoint_enabled(&self, id: &str, enabled: bool) -> bool {
        self.registry.set_enabled(id, enabled).await
    }

    pub async fn endpoint(&self, id: &str) -> Option<Arc<Endpoint>> {
        self.registry.get(id).await
    }

    pub async fn list_endpoints(&self) -> Vec<Arc<Endpoint>> {
        self.registry.list().await
    }

    // ── Observability ───────────────────────────────────────────

    pub async fn stats(&self, endpoint_id: &str) -> Option<EndpointStats> {
        self.log.stats(endpoint_id).await
    }

    pub async fn all_stats(&self) -> HashMap<String, EndpointStats> {
        self.log.all_stats().await
    }

    pub async fn recent_deliveries(
        &self,
        endpoint_id: Option<&str>,
        limit: usize,
    ) -> Vec<DeliveryAttempt> {
        self.log.recent(endpoint_id, limit).await
    }

    pub fn queue_depth(&self) -> u64 {
        self.pool.queue_depth()
    }

    pub async fn health(&self) -> HealthStatus {
        let (total_webhooks, enabled_webhooks) = self.registry.counts().await;
        let totals = self.log.totals().await;
        let unhealthy_endpoints = self.log.unhealthy_endpoints().await;
        let status = if unhealthy_endpoints.is_empty() {
            HealthState::Healthy
        } else {
            HealthState::Degraded
        };
        HealthStatus {
            status,
            total_webhooks,
            enabled_webhooks,
            total_events: totals.events_published,
            total_delivered: totals.delivered,
            total_failed: totals.failed,
            overall_success_rate: HealthStatus::success_rate(totals.delivered, totals.failed),
            unhealthy_endpoints,
            queue_depth: self.pool.queue_depth(),
        }
    }

    /// Operator probe: one synchronous `test` event to one endpoint,
    /// skipping subscriptions and filters. The attempt is returned to
    /// the caller and kept out of history and stats.
    pub async fn test_webhook(&self, endpoint_id: &str) -> Result<DeliveryAttempt, RelayError> {
        let endpoint = self
            .registry
            .get(endpoint_id)
            .await
            .ok_or_else(|| RelayError::UnknownEndpoint(endpoint_id.to_string()))?;

        let mut payload = Payload::new();
        payload.insert(
            "message".to_string(),
            Value::String("relay test delivery".to_string()),
        );
        let event = Arc::new(Event::new(self.ids.next_id(), EventType::Test, payload));

        let job = DeliveryJob {
            endpoint: endpoint.clone(),
            event: event.clone(),
            attempt_number: 1,
        };
        let outcome = execute_attempt(self.transport.as_ref(), &job).await;

        let status = if outcome.success {
            DeliveryStatus::Delivered
        } else {
            DeliveryStatus::Failed
        };
        let mut attempt =
            DeliveryAttempt::new(endpoint.id.as_str(), event.id.as_str(), 1, status)
                .with_duration_ms(outcome.duration_ms);
        if let Some(code) = outcome.response_code {
            attempt = attempt.with_response_code(code);
        }
        if let Some(error) = outcome.error {
            attempt = attempt.with_error(error);
        }
        Ok(attempt)
    }

    // ── Lifecycle ───────────────────────────────────────────────

    /// Stop intake, drain queued work up to `drain_deadline`, then
    /// convert whatever remains into dropped records. Returns what
    /// happened to the queue during the drain window.
    pub async fn shutdown(&self, drain_deadline: Duration) -> DrainReport {
        self.accepting.store(false, Ordering::SeqCst);
        info!(
            drain_deadline_ms = drain_deadline.as_millis() as u64,
            queue_depth = self.pool.queue_depth(),
            "relay shutting down"
        );

        let before = self.log.totals().await;
        let drained = self.pool.drain(drain_deadline).await;
        self.pool.stop().await;
        let after = self.log.totals().await;

        let report = DrainReport {
            delivered: after.delivered - before.delivered,
            failed: after.failed - before.failed,
            dropped: after.dropped - before.dropped,
        };
        info!(
            delivered = report.delivered,
            failed = report.failed,
            dropped = report.dropped,
            drained,
            "relay shutdown complete"
        );
        report
    }
}
