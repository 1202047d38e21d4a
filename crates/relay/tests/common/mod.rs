//! Shared harness for relay integration tests: wiremock responders
//! that capture, count, fail, or stall, plus signature recomputation
//! the way a real receiver would do it.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use wiremock::{Request, Respond, ResponseTemplate};

use stellwerk_events::Payload;
use stellwerk_relay::{DeliveryMode, EndpointStats, Relay, RelayOptions};

pub const SECRET: &str = "whsec_relay_integration_secret";

pub fn background_relay(worker_count: usize) -> Relay {
    Relay::new(RelayOptions {
        worker_count,
        history_capacity: 256,
        mode: DeliveryMode::Background,
    })
    .expect("relay construction")
}

pub fn payload_with(key: &str, value: &str) -> Payload {
    let mut payload = Payload::new();
    payload.insert(key.to_string(), serde_json::Value::String(value.to_string()));
    payload
}

// ── Captured requests ───────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub body: Vec<u8>,
    pub headers: HashMap<String, String>,
    pub received_at: DateTime<Utc>,
}

impl CapturedRequest {
    pub fn body_json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).expect("captured body is JSON")
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        let wanted = name.to_lowercase();
        self.headers
            .iter()
            .find(|(key, _)| key.to_lowercase() == wanted)
            .map(|(_, value)| value.as_str())
    }
}

/// Captures every request and answers with a fixed status.
#[derive(Clone)]
pub struct CaptureResponder {
    requests: Arc<Mutex<Vec<CapturedRequest>>>,
    response_code: u16,
}

impl CaptureResponder {
    pub fn new() -> Self {
        Self::with_status(200)
    }

    pub fn with_status(status: u16) -> Self {
        Self {
            requests: Arc::new(Mutex::new(Vec::new())),
            response_code: status,
        }
    }

    pub fn requests(&self) -> Vec<CapturedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl Default for CaptureResponder {
    fn default() -> Self {
        Self::new()
    }
}

impl Respond for CaptureResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let captured = CapturedRequest {
            body: request.body.clone(),
            headers: request
                .headers
                .iter()
                .map(|(key, value)| {
                    (key.to_string(), value.to_str().unwrap_or("").to_string())
                })
                .collect(),
            received_at: Utc::now(),
        };
        self.requests.lock().unwrap().push(captured);
        ResponseTemplate::new(self.response_code)
    }
}

/// Counts requests without keeping them.
#[derive(Clone)]
pub struct CountingResponder {
    count: Arc<AtomicU32>,
    response_code: u16,
}

impl CountingResponder {
    pub fn new() -> Self {
        Self {
            count: Arc::new(AtomicU32::new(0)),
            response_code: 200,
        }
    }

    pub fn count(&self) -> u32 {
        self.count.load(Ordering::SeqCst)
    }
}

impl Default for CountingResponder {
    fn default() -> Self {
        Self::new()
    }
}

impl Respond for CountingResponder {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        self.count.fetch_add(1, Ordering::SeqCst);
        ResponseTemplate::new(self.response_code)
    }
}

/// Returns 500 for the first `failures` requests, then 200.
#[derive(Clone)]
pub struct FlakyResponder {
    seen: Arc<AtomicU32>,
    failures: u32,
}

impl FlakyResponder {
    pub fn fail_times(failures: u32) -> Self {
        Self {
            seen: Arc::new(AtomicU32::new(0)),
            failures,
        }
    }

    pub fn request_count(&self) -> u32 {
        self.seen.load(Ordering::SeqCst)
    }
}

impl Respond for FlakyResponder {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let seen = self.seen.fetch_add(1, Ordering::SeqCst);
        if seen < self.failures {
            ResponseTemplate::new(500)
        } else {
            ResponseTemplate::new(200)
        }
    }
}

/// Answers 200 after a fixed delay.
#[derive(Clone)]
pub struct SlowResponder {
    count: Arc<AtomicU32>,
    delay: Duration,
}

impl SlowResponder {
    pub fn new(delay: Duration) -> Self {
        Self {
            count: Arc::new(AtomicU32::new(0)),
            delay,
        }
    }

    pub fn count(&self) -> u32 {
        self.count.load(Ordering::SeqCst)
    }
}

impl Respond for SlowResponder {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        self.count.fetch_add(1, Ordering::SeqCst);
        ResponseTemplate::new(200).set_delay(self.delay)
    }
}

// ── Verification helpers ────────────────────────────────────────────

/// Recompute the signature over `timestamp.body`, receiver-side.
pub fn expected_signature(secret: &str, timestamp: &str, body: &[u8]) -> String {
    let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(secret.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

/// Poll a sync condition for up to four seconds.
pub async fn wait_for(what: &str, condition: impl Fn() -> bool) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

/// Poll endpoint stats until `check` passes.
pub async fn wait_for_stats(
    relay: &Relay,
    endpoint_id: &str,
    check: impl Fn(&EndpointStats) -> bool,
) {
    for _ in 0..400 {
        if let Some(stats) = relay.stats(endpoint_id).await {
            if check(&stats) {
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for stats of {endpoint_id}");
}
