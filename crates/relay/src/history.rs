//! Delivery history ring and per-endpoint statistics.
//!
//! Every executed attempt lands in a bounded ring buffer; aggregate
//! counters are rolled up per endpoint and globally. All writes come
//! from the worker completing the attempt, under one short-lived lock.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;

// ── Constants ───────────────────────────────────────────────────────

/// Default attempt-history capacity before the oldest half is dropped.
pub const DEFAULT_HISTORY_CAPACITY: usize = 1000;

// ── Attempt records ─────────────────────────────────────────────────

/// State of one delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    /// Queued, not yet executed.
    Pending,
    /// Terminal success.
    Delivered,
    /// Terminal failure, retry budget exhausted.
    Failed,
    /// Failed attempt with retries remaining.
    Retrying,
    /// Discarded at shutdown without execution.
    Dropped,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Failed => "failed",
            DeliveryStatus::Retrying => "retrying",
            DeliveryStatus::Dropped => "dropped",
        }
    }

    /// Terminal states are never followed by another attempt for the
    /// same (endpoint, event) pair.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeliveryStatus::Delivered | DeliveryStatus::Failed | DeliveryStatus::Dropped
        )
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One HTTP send try for an (endpoint, event) pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeliveryAttempt {
    pub endpoint_id: String,
    pub event_id: String,
    /// Per-pair counter, starting at 1, gap-free.
    pub attempt_number: u32,
    pub status: DeliveryStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    pub timestamp: DateTime<Utc>,
}

impl DeliveryAttempt {
    pub fn new(
        endpoint_id: impl Into<String>,
        event_id: impl Into<String>,
        attempt_number: u32,
        status: DeliveryStatus,
    ) -> Self {
        Self {
            endpoint_id: endpoint_id.into(),
            event_id: event_id.into(),
            attempt_number,
            status,
            response_code: None,
            error: None,
            duration_ms: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_response_code(mut self, code: u16) -> Self {
        self.response_code = Some(code);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }
}

// ── Aggregates ──────────────────────────────────────────────────────

/// Lifetime aggregate for a single endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EndpointStats {
    /// Pairs enqueued toward this endpoint.
    pub total_events: u64,
    pub delivered: u64,
    pub failed: u64,
    pub retried: u64,
    /// Running mean latency over delivered attempts.
    pub avg_latency_ms: f64,
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl EndpointStats {
    /// Failure rate past 10% of successes marks the endpoint unhealthy.
    pub fn is_unhealthy(&self) -> bool {
        self.failed as f64 > self.delivered as f64 * 0.1
    }
}

/// Relay-wide counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RelayTotals {
    /// Events accepted by publish.
    pub events_published: u64,
    /// Terminal delivered pairs.
    pub delivered: u64,
    /// Terminal failed pairs.
    pub failed: u64,
    /// Pairs dropped at shutdown.
    pub dropped: u64,
}

// ── DeliveryLog ─────────────────────────────────────────────────────

#[derive(Debug)]
struct Inner {
    ring: VecDeque<DeliveryAttempt>,
    stats: HashMap<String, EndpointStats>,
    totals: RelayTotals,
}

/// Thread-safe delivery history and stats store.
#[derive(Debug, Clone)]
pub struct DeliveryLog {
    inner: Arc<Mutex<Inner>>,
    capacity: usize,
}

impl DeliveryLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                ring: VecDeque::with_capacity(capacity.min(1024)),
                stats: HashMap::new(),
                totals: RelayTotals::default(),
            })),
            capacity: capacity.max(2),
        }
    }

    /// Count an event accepted by publish.
    pub async fn record_event_published(&self) {
        self.inner.lock().await.totals.events_published += 1;
    }

    /// Count a pair enqueued toward an endpoint.
    pub async fn record_enqueued(&self, endpoint_id: &str) {
        let mut inner = self.inner.lock().await;
        inner.stats.entry(endpoint_id.to_string()).or_default().total_events += 1;
    }

    /// Append an executed attempt and roll up its aggregates.
    pub async fn record_attempt(&self, attempt: DeliveryAttempt) {
        let mut inner = self.inner.lock().await;

        match attempt.status {
            DeliveryStatus::Delivered => {
                let stats = inner.stats.entry(attempt.endpoint_id.clone()).or_default();
                stats.delivered += 1;
                if let Some(ms) = attempt.duration_ms {
                    // Incremental mean over delivered attempts.
                    let n = stats.delivered as f64;
                    stats.avg_latency_ms += (ms as f64 - stats.avg_latency_ms) / n;
                }
                stats.last_success = Some(attempt.timestamp);
                inner.totals.delivered += 1;
            }
            DeliveryStatus::Failed => {
                let stats = inner.stats.entry(attempt.endpoint_id.clone()).or_default();
                stats.failed += 1;
                stats.last_failure = Some(attempt.timestamp);
                stats.last_error = attempt.error.clone();
                inner.totals.failed += 1;
            }
            DeliveryStatus::Retrying => {
                inner.stats.entry(attempt.endpoint_id.clone()).or_default().retried += 1;
            }
            DeliveryStatus::Dropped => {
                inner.totals.dropped += 1;
            }
            DeliveryStatus::Pending => {}
        }

        inner.ring.push_back(attempt);
        if inner.ring.len() > self.capacity {
            // Trim the oldest half rather than one-at-a-time eviction.
            let half = inner.ring.len() / 2;
            inner.ring.drain(..half);
        }
    }

    /// Most recent attempts, newest first, optionally for one endpoint.
    pub async fn recent(&self, endpoint_id: Option<&str>, limit: usize) -> Vec<DeliveryAttempt> {
        let inner = self.inner.lock().await;
        inner
            .ring
            .iter()
            .rev()
            .filter(|a| endpoint_id.map_or(true, |id| a.endpoint_id == id))
            .take(limit)
            .cloned()
            .collect()
    }

    pub async fn stats(&self, endpoint_id: &str) -> Option<EndpointStats> {
        self.inner.lock().await.stats.get(endpoint_id).cloned()
    }

    pub async fn all_stats(&self) -> HashMap<String, EndpointStats> {
        self.inner.lock().await.stats.clone()
    }

    /// Ids of endpoints past the failure threshold, sorted.
    pub async fn unhealthy_endpoints(&self) -> Vec<String> {
        let inner = self.inner.lock().await;
        let mut ids: Vec<String> = inner
            .stats
            .iter()
            .filter(|(_, s)| s.is_unhealthy())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub async fn totals(&self) -> RelayTotals {
        self.inner.lock().await.totals
    }
}

impl Default for DeliveryLog {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}
