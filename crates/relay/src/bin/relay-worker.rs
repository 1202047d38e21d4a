//! relay-worker — long-running webhook relay process.
//!
//! Loads the endpoint roster from TOML, registers it, then serves
//! published events until SIGINT/SIGTERM, draining the delivery queue
//! on the way out.
//!
//! Publishes events:
//! - `system.health` — periodic relay health snapshot

use std::time::Duration;

use clap::Parser;
use serde_json::Value;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{info, warn};

use stellwerk_events::{EventType, Payload};
use stellwerk_relay::{Relay, RelayConfig};

// ── CLI ─────────────────────────────────────────────────────────────

/// Stellwerk webhook relay worker.
#[derive(Parser, Debug)]
#[command(name = "relay-worker", version, about)]
struct Cli {
    /// Path to relay.toml config file.
    #[arg(long, env = "STELLWERK_CONFIG", default_value = "config/relay.toml")]
    config: String,

    /// Health event interval in seconds.
    #[arg(long, env = "RELAY_HEALTH_INTERVAL", default_value_t = 30)]
    health_interval: u64,

    /// Queue drain deadline on shutdown, in seconds.
    #[arg(long, env = "RELAY_DRAIN_TIMEOUT", default_value_t = 10)]
    drain_timeout: u64,

    /// Send one test delivery to this endpoint id, then exit.
    #[arg(long)]
    probe: Option<String>,
}

// ── main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = match RelayConfig::from_file(&cli.config) {
        Ok(cfg) => {
            info!(path = %cli.config, "loaded relay config");
            cfg
        }
        Err(e) => {
            warn!(
                error = %e,
                path = %cli.config,
                "failed to load config, using defaults"
            );
            RelayConfig::default()
        }
    };
    config.apply_env_overrides();
    config.validate()?;

    let relay = Relay::new(config.relay_options())?;

    let mut registered = 0usize;
    for endpoint in config.parse_endpoints() {
        let id = endpoint.id.clone();
        match relay.register_endpoint(endpoint).await {
            Ok(()) => registered += 1,
            Err(e) => warn!(endpoint = %id, error = %e, "skipping endpoint"),
        }
    }
    info!(registered, "endpoint roster loaded");

    if let Some(endpoint_id) = cli.probe {
        return probe(&relay, &endpoint_id).await;
    }

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut heartbeat = tokio::time::interval(Duration::from_secs(cli.health_interval.max(1)));

    info!("relay-worker started");
    loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                let health = relay.health().await;
                info!(
                    status = %health.status,
                    queue_depth = health.queue_depth,
                    delivered = health.total_delivered,
                    failed = health.total_failed,
                    "relay health"
                );
                relay.publish(EventType::SystemHealth, health_payload(&health)).await;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("received ctrl-c");
                break;
            }
            _ = sigterm.recv() => {
                info!("received sigterm");
                break;
            }
        }
    }

    let report = relay.shutdown(Duration::from_secs(cli.drain_timeout)).await;
    info!(
        delivered = report.delivered,
        failed = report.failed,
        dropped = report.dropped,
        "relay-worker exited cleanly"
    );

    Ok(())
}

/// One synchronous test delivery, reported on the exit code.
async fn probe(relay: &Relay, endpoint_id: &str) -> anyhow::Result<()> {
    let attempt = relay.test_webhook(endpoint_id).await?;
    match attempt.response_code {
        Some(code) => info!(
            endpoint = endpoint_id,
            status = %attempt.status,
            response_code = code,
            duration_ms = attempt.duration_ms.unwrap_or_default(),
            "probe finished"
        ),
        None => info!(
            endpoint = endpoint_id,
            status = %attempt.status,
            error = attempt.error.as_deref().unwrap_or("unknown"),
            "probe finished"
        ),
    }
    if attempt.status != stellwerk_relay::DeliveryStatus::Delivered {
        anyhow::bail!("probe delivery to {endpoint_id} failed");
    }
    Ok(())
}

fn health_payload(health: &stellwerk_relay::HealthStatus) -> Payload {
    match serde_json::to_value(health) {
        Ok(Value::Object(map)) => map,
        _ => Payload::new(),
    }
}
