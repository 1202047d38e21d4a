//! Aggregated health snapshot for the observability surface.

use std::fmt;

use serde::Serialize;

/// Overall relay condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    /// At least one endpoint crossed the failure threshold.
    Degraded,
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthState::Healthy => f.write_str("healthy"),
            HealthState::Degraded => f.write_str("degraded"),
        }
    }
}

/// Point-in-time health report.
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub status: HealthState,
    pub total_webhooks: usize,
    pub enabled_webhooks: usize,
    pub total_events: u64,
    pub total_delivered: u64,
    pub total_failed: u64,
    /// Delivered over terminal outcomes; 1.0 before any terminal outcome.
    pub overall_success_rate: f64,
    pub unhealthy_endpoints: Vec<String>,
    /// Pairs currently queued, in flight, or waiting on a retry timer.
    pub queue_depth: u64,
}

impl HealthStatus {
    /// Success rate over terminal outcomes.
    pub fn success_rate(delivered: u64, failed: u64) -> f64 {
        let terminal = delivered + failed;
        if terminal == 0 {
            1.0
        } else {
            delivered as f64 / terminal as f64
        }
    }
}
