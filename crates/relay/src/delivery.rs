//! Delivery worker pool and retry state machine.
//!
//! Jobs are partitioned across worker lanes by endpoint id, so
//! deliveries to one endpoint stay in publish order while a slow or
//! unreachable endpoint only ever occupies its own lane. A failed
//! attempt with budget left schedules a timer task that re-enqueues the
//! next attempt after the backoff delay; workers never sleep between
//! attempts.

use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use stellwerk_events::{transform, Event};

use crate::endpoint::Endpoint;
use crate::error::RelayError;
use crate::history::{DeliveryAttempt, DeliveryLog, DeliveryStatus};
use crate::signer;
use crate::transport::{describe_send_error, WebhookRequest, WebhookTransport};

// ── Constants ───────────────────────────────────────────────────────

pub const DEFAULT_WORKER_COUNT: usize = 4;

/// Post-stop settle window for timer tasks converting to drop records.
const STOP_SETTLE_WINDOW: Duration = Duration::from_secs(5);

// ── Jobs ────────────────────────────────────────────────────────────

/// One (endpoint, event) pair heading for an attempt.
#[derive(Debug, Clone)]
pub(crate) struct DeliveryJob {
    pub endpoint: Arc<Endpoint>,
    pub event: Arc<Event>,
    /// The attempt about to be made, 1-based.
    pub attempt_number: u32,
}

/// Result of executing one attempt, before the retry decision.
#[derive(Debug)]
pub(crate) struct AttemptOutcome {
    pub success: bool,
    pub response_code: Option<u16>,
    pub error: Option<String>,
    pub duration_ms: u64,
}

// ── Pending gauge ───────────────────────────────────────────────────

/// Live count of pairs that are queued, in flight, or waiting on a
/// retry timer. Feeds queue depth and the drain wait.
#[derive(Debug, Default)]
struct PendingGauge {
    count: AtomicU64,
}

impl PendingGauge {
    fn add(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }

    fn done(&self) {
        self.count.fetch_sub(1, Ordering::SeqCst);
    }

    fn depth(&self) -> u64 {
        self.count.load(Ordering::SeqCst)
    }

    /// Wait until the gauge reaches zero or `deadline` passes.
    async fn wait_empty(&self, deadline: Duration) -> bool {
        let deadline_at = tokio::time::Instant::now() + deadline;
        loop {
            if self.depth() == 0 {
                return true;
            }
            let now = tokio::time::Instant::now();
            if now >= deadline_at {
                return false;
            }
            let chunk = (deadline_at - now).min(Duration::from_millis(25));
            tokio::time::sleep(chunk).await;
        }
    }
}

// ── Worker pool ─────────────────────────────────────────────────────

struct WorkerContext {
    log: DeliveryLog,
    transport: Arc<dyn WebhookTransport>,
    pending: PendingGauge,
    stopped: AtomicBool,
    /// One lane per worker; jobs are routed by endpoint-id hash.
    lanes: Vec<mpsc::UnboundedSender<DeliveryJob>>,
    shutdown_rx: watch::Receiver<bool>,
}

/// Fixed pool of delivery workers over endpoint-partitioned lanes.
pub struct DeliveryPool {
    ctx: Arc<WorkerContext>,
    shutdown_tx: watch::Sender<bool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl DeliveryPool {
    pub fn new(worker_count: usize, log: DeliveryLog, transport: Arc<dyn WebhookTransport>) -> Self {
        let worker_count = worker_count.max(1);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut lanes = Vec::with_capacity(worker_count);
        let mut receivers = Vec::with_capacity(worker_count);
        for _ in 0..worker_count {
            let (tx, rx) = mpsc::unbounded_channel();
            lanes.push(tx);
            receivers.push(rx);
        }

        let ctx = Arc::new(WorkerContext {
            log,
            transport,
            pending: PendingGauge::default(),
            stopped: AtomicBool::new(false),
            lanes,
            shutdown_rx,
        });

        let workers = receivers
            .into_iter()
            .enumerate()
            .map(|(index, rx)| {
                let ctx = ctx.clone();
                let shutdown_rx = ctx.shutdown_rx.clone();
                tokio::spawn(worker_loop(index, rx, shutdown_rx, ctx))
            })
            .collect();

        Self {
            ctx,
            shutdown_tx,
            workers: Mutex::new(workers),
        }
    }

    /// Route a first attempt into its endpoint's lane. Non-blocking.
    pub(crate) fn enqueue(&self, endpoint: Arc<Endpoint>, event: Arc<Event>) -> Result<(), RelayError> {
        if self.ctx.stopped.load(Ordering::SeqCst) {
            return Err(RelayError::ShuttingDown);
        }
        let lane = lane_index(&endpoint.id, self.ctx.lanes.len());
        let job = DeliveryJob {
            endpoint,
            event,
            attempt_number: 1,
        };
        self.ctx.pending.add();
        if self.ctx.lanes[lane].send(job).is_err() {
            self.ctx.pending.done();
            return Err(RelayError::ShuttingDown);
        }
        Ok(())
    }

    pub fn queue_depth(&self) -> u64 {
        self.ctx.pending.depth()
    }

    /// Wait for pending work to finish, up to `deadline`. True if the
    /// queue emptied in time.
    pub(crate) async fn drain(&self, deadline: Duration) -> bool {
        self.ctx.pending.wait_empty(deadline).await
    }

    /// Stop the pool. Queued and timer-held jobs become `dropped`
    /// records; in-flight sends finish naturally. Returns once every
    /// pending pair has reached a terminal record.
    pub(crate) async fn stop(&self) {
        self.ctx.stopped.store(true, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(true);

        let mut workers = self.workers.lock().await;
        for handle in workers.drain(..) {
            let _ = handle.await;
        }

        if !self.ctx.pending.wait_empty(STOP_SETTLE_WINDOW).await {
            warn!(
                remaining = self.ctx.pending.depth(),
                "pending gauge did not settle after stop"
            );
        }
    }
}

fn lane_index(endpoint_id: &str, lanes: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    endpoint_id.hash(&mut hasher);
    (hasher.finish() % lanes as u64) as usize
}

// ── Worker loop ─────────────────────────────────────────────────────

async fn worker_loop(
    index: usize,
    mut rx: mpsc::UnboundedReceiver<DeliveryJob>,
    mut shutdown_rx: watch::Receiver<bool>,
    ctx: Arc<WorkerContext>,
) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.changed() => {
                // Refuse further sends, then turn whatever is buffered
                // into drop records. Late timer sends fail and record
                // their own drops.
                rx.close();
                while let Some(job) = rx.recv().await {
                    drop_job(&ctx, job).await;
                }
                break;
            }
            maybe = rx.recv() => match maybe {
                Some(job) => process(&ctx, job).await,
                None => break,
            },
        }
    }
    debug!(worker = index, "delivery worker stopped");
}

/// Execute one attempt and apply the retry decision.
async fn process(ctx: &Arc<WorkerContext>, job: DeliveryJob) {
    let outcome = execute_attempt(ctx.transport.as_ref(), &job).await;

    if outcome.success {
        let mut record = DeliveryAttempt::new(
            job.endpoint.id.as_str(),
            job.event.id.as_str(),
            job.attempt_number,
            DeliveryStatus::Delivered,
        )
        .with_duration_ms(outcome.duration_ms);
        if let Some(code) = outcome.response_code {
            record = record.with_response_code(code);
        }
        ctx.log.record_attempt(record).await;
        ctx.pending.done();
        info!(
            endpoint = %job.endpoint.id,
            event = %job.event.id,
            attempt = job.attempt_number,
            duration_ms = outcome.duration_ms,
            "delivered"
        );
        return;
    }

    let error = outcome.error.unwrap_or_else(|| "delivery failed".to_string());

    if job.attempt_number < job.endpoint.max_retries {
        let delay = backoff_delay(job.endpoint.retry_base_delay, job.attempt_number);
        let mut record = DeliveryAttempt::new(
            job.endpoint.id.as_str(),
            job.event.id.as_str(),
            job.attempt_number,
            DeliveryStatus::Retrying,
        )
        .with_error(error.as_str())
        .with_duration_ms(outcome.duration_ms);
        if let Some(code) = outcome.response_code {
            record = record.with_response_code(code);
        }
        ctx.log.record_attempt(record).await;
        warn!(
            endpoint = %job.endpoint.id,
            event = %job.event.id,
            attempt = job.attempt_number,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "attempt failed, retry scheduled"
        );
        let next = DeliveryJob {
            attempt_number: job.attempt_number + 1,
            ..job
        };
        tokio::spawn(schedule_retry(ctx.clone(), next, delay));
        return;
    }

    let mut record = DeliveryAttempt::new(
        job.endpoint.id.as_str(),
        job.event.id.as_str(),
        job.attempt_number,
        DeliveryStatus::Failed,
    )
    .with_error(error.as_str())
    .with_duration_ms(outcome.duration_ms);
    if let Some(code) = outcome.response_code {
        record = record.with_response_code(code);
    }
    ctx.log.record_attempt(record).await;
    ctx.pending.done();
    warn!(
        endpoint = %job.endpoint.id,
        event = %job.event.id,
        attempts = job.attempt_number,
        error = %error,
        "delivery failed, retries exhausted"
    );
}

/// Sleep out the backoff, then hand the next attempt back to the
/// endpoint's lane. Runs as its own task so lanes keep moving.
async fn schedule_retry(ctx: Arc<WorkerContext>, job: DeliveryJob, delay: Duration) {
    // Receiver cloned before the stopped check: either the check sees
    // the stop, or the clone predates it and changed() fires.
    let mut shutdown_rx = ctx.shutdown_rx.clone();
    if !ctx.stopped.load(Ordering::SeqCst) {
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown_rx.changed() => {}
        }
    }

    if ctx.stopped.load(Ordering::SeqCst) {
        drop_job(&ctx, job).await;
        return;
    }

    let lane = lane_index(&job.endpoint.id, ctx.lanes.len());
    if let Err(send_err) = ctx.lanes[lane].send(job) {
        drop_job(&ctx, send_err.0).await;
    }
}

async fn drop_job(ctx: &WorkerContext, job: DeliveryJob) {
    ctx.log
        .record_attempt(DeliveryAttempt::new(
            job.endpoint.id.as_str(),
            job.event.id.as_str(),
            job.attempt_number,
            DeliveryStatus::Dropped,
        ))
        .await;
    ctx.pending.done();
    debug!(
        endpoint = %job.endpoint.id,
        event = %job.event.id,
        "queued delivery dropped during shutdown"
    );
}

// ── Attempt execution ───────────────────────────────────────────────

/// Build the request and run a single POST, classifying the outcome.
pub(crate) async fn execute_attempt(
    transport: &dyn WebhookTransport,
    job: &DeliveryJob,
) -> AttemptOutcome {
    let started = Instant::now();

    let request = match build_request(&job.endpoint, &job.event) {
        Ok(request) => request,
        Err(e) => {
            return AttemptOutcome {
                success: false,
                response_code: None,
                error: Some(format!("could not build request: {e}")),
                duration_ms: 0,
            };
        }
    };

    match transport.send(request).await {
        Ok(response) => {
            let duration_ms = started.elapsed().as_millis() as u64;
            if response.is_success() {
                AttemptOutcome {
                    success: true,
                    response_code: Some(response.status),
                    error: None,
                    duration_ms,
                }
            } else {
                AttemptOutcome {
                    success: false,
                    response_code: Some(response.status),
                    error: Some(format!("receiver returned {}", response.status)),
                    duration_ms,
                }
            }
        }
        Err(e) => AttemptOutcome {
            success: false,
            response_code: None,
            error: Some(describe_send_error(&e, job.endpoint.timeout)),
            duration_ms: started.elapsed().as_millis() as u64,
        },
    }
}

/// Transform, serialize, and sign one outbound request.
pub(crate) fn build_request(endpoint: &Endpoint, event: &Event) -> Result<WebhookRequest, RelayError> {
    let envelope = transform(event, endpoint.transform)?;
    let body = serde_json::to_vec(&envelope)?;
    let send_timestamp = Utc::now().timestamp_millis().to_string();

    let mut headers: Vec<(String, String)> = Vec::with_capacity(endpoint.headers.len() + 5);
    headers.push(("Content-Type".to_string(), "application/json".to_string()));
    headers.push(("X-Event-Type".to_string(), event.event_type.to_string()));
    headers.push(("X-Event-ID".to_string(), event.id.clone()));
    headers.push(("X-Webhook-Timestamp".to_string(), send_timestamp.clone()));
    for (name, value) in &endpoint.headers {
        headers.push((name.clone(), value.clone()));
    }
    if let Some(secret) = &endpoint.secret {
        headers.push((
            "X-Webhook-Signature".to_string(),
            signer::signature_header(secret, &send_timestamp, &body),
        ));
    }

    Ok(WebhookRequest {
        url: endpoint.url.clone(),
        body,
        headers,
        timeout: endpoint.timeout,
    })
}

/// Delay before attempt k+1 after the k-th failure:
/// `retry_base_delay * 2^(k-1)`.
pub(crate) fn backoff_delay(base: Duration, failed_attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(failed_attempt.saturating_sub(1));
    base.saturating_mul(factor)
}

/// Run one pair through the full state machine on the caller, backoff
/// sleeps included. Used by the immediate delivery mode.
pub(crate) async fn deliver_inline(
    log: &DeliveryLog,
    transport: &dyn WebhookTransport,
    endpoint: Arc<Endpoint>,
    event: Arc<Event>,
) {
    let mut attempt_number = 1;
    loop {
        let job = DeliveryJob {
            endpoint: endpoint.clone(),
            event: event.clone(),
            attempt_number,
        };
        let outcome = execute_attempt(transport, &job).await;

        if outcome.success {
            let mut record = DeliveryAttempt::new(
                endpoint.id.as_str(),
                event.id.as_str(),
                attempt_number,
                DeliveryStatus::Delivered,
            )
            .with_duration_ms(outcome.duration_ms);
            if let Some(code) = outcome.response_code {
                record = record.with_response_code(code);
            }
            log.record_attempt(record).await;
            return;
        }

        let error = outcome.error.unwrap_or_else(|| "delivery failed".to_string());
        if attempt_number < endpoint.max_retries {
            let mut record = DeliveryAttempt::new(
                endpoint.id.as_str(),
                event.id.as_str(),
                attempt_number,
                DeliveryStatus::Retrying,
            )
            .with_error(error.as_str())
            .with_duration_ms(outcome.duration_ms);
            if let Some(code) = outcome.response_code {
                record = record.with_response_code(code);
            }
            log.record_attempt(record).await;
            tokio::time::sleep(backoff_delay(endpoint.retry_base_delay, attempt_number)).await;
            attempt_number += 1;
        } else {
            let mut record = DeliveryAttempt::new(
                endpoint.id.as_str(),
                event.id.as_str(),
                attempt_number,
                DeliveryStatus::Failed,
            )
            .with_error(error.as_str())
            .with_duration_ms(outcome.duration_ms);
            if let Some(code) = outcome.response_code {
                record = record.with_response_code(code);
            }
            log.record_attempt(record).await;
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::RelayTotals;
    use crate::transport::WebhookResponse;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex as StdMutex;
    use stellwerk_events::{EventType, Payload};

    /// Scripted transport: first `fail_first` calls return 500, the
    /// rest 200. Records call instants and event ids.
    struct MockTransport {
        calls: AtomicUsize,
        fail_first: usize,
        delay: Option<Duration>,
        seen: StdMutex<Vec<(Instant, String)>>,
    }

    impl MockTransport {
        fn ok() -> Self {
            Self::failing(0)
        }

        fn failing(fail_first: usize) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail_first,
                delay: None,
                seen: StdMutex::new(Vec::new()),
            }
        }

        fn slow(delay: Duration) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail_first: 0,
                delay: Some(delay),
                seen: StdMutex::new(Vec::new()),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn seen_event_ids(&self) -> Vec<String> {
            self.seen.lock().unwrap().iter().map(|(_, id)| id.clone()).collect()
        }

        fn call_instants(&self) -> Vec<Instant> {
            self.seen.lock().unwrap().iter().map(|(at, _)| *at).collect()
        }
    }

    #[async_trait]
    impl WebhookTransport for MockTransport {
        async fn send(&self, request: WebhookRequest) -> Result<WebhookResponse, RelayError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            let event_id = request
                .headers
                .iter()
                .find(|(name, _)| name == "X-Event-ID")
                .map(|(_, value)| value.clone())
                .unwrap_or_default();
            self.seen.lock().unwrap().push((Instant::now(), event_id));
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let status = if call < self.fail_first { 500 } else { 200 };
            Ok(WebhookResponse { status })
        }
    }

    fn test_event(id: &str) -> Arc<Event> {
        let mut payload = Payload::new();
        payload.insert("token".into(), serde_json::json!("tok-1"));
        Arc::new(Event::new(id.to_string(), EventType::QueueJoin, payload))
    }

    fn test_endpoint(id: &str) -> Arc<Endpoint> {
        Arc::new(
            Endpoint::new(id, "https://receiver.example/hook")
                .with_retry_base_delay(Duration::from_millis(30)),
        )
    }

    async fn wait_for_totals(log: &DeliveryLog, check: impl Fn(&RelayTotals) -> bool) {
        for _ in 0..200 {
            if check(&log.totals().await) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached within 2s");
    }

    #[test]
    fn backoff_doubles_from_the_base() {
        let base = Duration::from_millis(100);
        assert_eq!(backoff_delay(base, 1), Duration::from_millis(100));
        assert_eq!(backoff_delay(base, 2), Duration::from_millis(200));
        assert_eq!(backoff_delay(base, 3), Duration::from_millis(400));
        assert_eq!(backoff_delay(base, 4), Duration::from_millis(800));
        // Saturates instead of overflowing.
        assert!(backoff_delay(base, 64) > Duration::from_secs(3600));
    }

    #[test]
    fn lane_routing_is_stable_and_in_bounds() {
        let a = lane_index("endpoint-a", 4);
        assert_eq!(a, lane_index("endpoint-a", 4));
        assert!(a < 4);
        assert!(lane_index("endpoint-b", 1) == 0);
    }

    #[test]
    fn request_carries_delivery_headers_and_signature() {
        let endpoint = Endpoint::new("e1", "https://receiver.example/hook")
            .with_secret("s3cr3t")
            .with_header("X-Static", "fixed");
        let event = test_event("evt-77-1");

        let request = build_request(&endpoint, &event).unwrap();
        let header = |name: &str| {
            request
                .headers
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, v)| v.clone())
        };

        assert_eq!(header("Content-Type").unwrap(), "application/json");
        assert_eq!(header("X-Event-Type").unwrap(), "queue_join");
        assert_eq!(header("X-Event-ID").unwrap(), "evt-77-1");
        assert_eq!(header("X-Static").unwrap(), "fixed");

        let timestamp = header("X-Webhook-Timestamp").unwrap();
        let signature = header("X-Webhook-Signature").unwrap();
        assert_eq!(
            signature,
            format!("sha256={}", signer::sign("s3cr3t", &timestamp, &request.body))
        );
    }

    #[test]
    fn request_without_secret_has_no_signature() {
        let endpoint = Endpoint::new("e1", "https://receiver.example/hook");
        let request = build_request(&endpoint, &test_event("evt-1-1")).unwrap();
        assert!(!request.headers.iter().any(|(n, _)| n == "X-Webhook-Signature"));
    }

    #[tokio::test]
    async fn pool_delivers_and_settles_the_gauge() {
        let log = DeliveryLog::new(100);
        let transport = Arc::new(MockTransport::ok());
        let pool = DeliveryPool::new(2, log.clone(), transport.clone());

        pool.enqueue(test_endpoint("e1"), test_event("evt-1")).unwrap();
        wait_for_totals(&log, |t| t.delivered == 1).await;

        assert_eq!(pool.queue_depth(), 0);
        assert_eq!(transport.call_count(), 1);
        let recent = log.recent(Some("e1"), 10).await;
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].status, DeliveryStatus::Delivered);
        assert_eq!(recent[0].attempt_number, 1);
    }

    #[tokio::test]
    async fn failures_retry_with_growing_gaps_and_gap_free_numbering() {
        let log = DeliveryLog::new(100);
        let transport = Arc::new(MockTransport::failing(2));
        let pool = DeliveryPool::new(1, log.clone(), transport.clone());

        pool.enqueue(test_endpoint("e1"), test_event("evt-1")).unwrap();
        wait_for_totals(&log, |t| t.delivered == 1).await;

        assert_eq!(transport.call_count(), 3);

        // Oldest-first: attempt numbers 1..3 with no gaps, one terminal.
        let mut attempts = log.recent(Some("e1"), 10).await;
        attempts.reverse();
        let numbers: Vec<u32> = attempts.iter().map(|a| a.attempt_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert_eq!(attempts[0].status, DeliveryStatus::Retrying);
        assert_eq!(attempts[1].status, DeliveryStatus::Retrying);
        assert_eq!(attempts[2].status, DeliveryStatus::Delivered);

        let stats = log.stats("e1").await.unwrap();
        assert_eq!(stats.retried, 2);
        assert_eq!(stats.delivered, 1);
        assert_eq!(stats.failed, 0);

        // Base 30ms: gap one >= 30ms, gap two >= 60ms.
        let instants = transport.call_instants();
        assert!(instants[1] - instants[0] >= Duration::from_millis(30));
        assert!(instants[2] - instants[1] >= Duration::from_millis(60));
    }

    #[tokio::test]
    async fn exhausted_retries_end_in_terminal_failed() {
        let log = DeliveryLog::new(100);
        let transport = Arc::new(MockTransport::failing(usize::MAX));
        let pool = DeliveryPool::new(1, log.clone(), transport.clone());

        let endpoint = Arc::new(
            Endpoint::new("e1", "https://receiver.example/hook")
                .with_max_retries(3)
                .with_retry_base_delay(Duration::from_millis(10)),
        );
        pool.enqueue(endpoint, test_event("evt-1")).unwrap();
        wait_for_totals(&log, |t| t.failed == 1).await;

        assert_eq!(transport.call_count(), 3);
        let stats = log.stats("e1").await.unwrap();
        assert_eq!(stats.retried, 2);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.delivered, 0);
        assert!(stats.last_error.as_deref().unwrap_or_default().contains("500"));
        assert_eq!(pool.queue_depth(), 0);
    }

    #[tokio::test]
    async fn same_endpoint_keeps_publish_order() {
        let log = DeliveryLog::new(100);
        let transport = Arc::new(MockTransport::ok());
        let pool = DeliveryPool::new(4, log.clone(), transport.clone());

        let endpoint = test_endpoint("e1");
        for i in 1..=5 {
            pool.enqueue(endpoint.clone(), test_event(&format!("evt-{i}"))).unwrap();
        }
        wait_for_totals(&log, |t| t.delivered == 5).await;

        assert_eq!(
            transport.seen_event_ids(),
            vec!["evt-1", "evt-2", "evt-3", "evt-4", "evt-5"]
        );
    }

    #[tokio::test]
    async fn stop_converts_queued_work_to_drops() {
        let log = DeliveryLog::new(100);
        let transport = Arc::new(MockTransport::slow(Duration::from_millis(200)));
        let pool = DeliveryPool::new(1, log.clone(), transport.clone());

        let endpoint = test_endpoint("e1");
        for i in 1..=5 {
            pool.enqueue(endpoint.clone(), test_event(&format!("evt-{i}"))).unwrap();
        }

        // Let the worker pick up the first job.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!pool.drain(Duration::ZERO).await);
        pool.stop().await;

        let totals = log.totals().await;
        // The in-flight send finished naturally; the rest were dropped.
        assert_eq!(totals.delivered, 1);
        assert_eq!(totals.dropped, 4);
        assert_eq!(pool.queue_depth(), 0);

        // Nothing gets in afterwards.
        let refused = pool.enqueue(endpoint, test_event("evt-6"));
        assert!(matches!(refused, Err(RelayError::ShuttingDown)));
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test]
    async fn inline_delivery_walks_the_same_state_machine() {
        let log = DeliveryLog::new(100);
        let transport = MockTransport::failing(1);
        let endpoint = Arc::new(
            Endpoint::new("e1", "https://receiver.example/hook")
                .with_retry_base_delay(Duration::from_millis(10)),
        );

        deliver_inline(&log, &transport, endpoint, test_event("evt-1")).await;

        let stats = log.stats("e1").await.unwrap();
        assert_eq!(stats.retried, 1);
        assert_eq!(stats.delivered, 1);
        assert_eq!(transport.call_count(), 2);
    }
}
