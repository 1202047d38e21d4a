//! Endpoint registry: the shared set of subscriber configurations.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{info, warn};

use stellwerk_events::FilterExpr;

use crate::endpoint::Endpoint;
use crate::error::RelayError;

/// Read-mostly store of registered endpoints.
///
/// Fan-out takes a point-in-time snapshot under the read lock, so an
/// endpoint registered mid-dispatch either fully participates in an
/// event or not at all. The lock is never held across an HTTP call.
#[derive(Debug, Default)]
pub struct EndpointRegistry {
    endpoints: RwLock<HashMap<String, Arc<Endpoint>>>,
}

impl EndpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and upsert. Replaces any prior endpoint with the same id.
    pub async fn register(&self, endpoint: Endpoint) -> Result<(), RelayError> {
        endpoint.validate()?;

        // Malformed filters are legal (they fail open at evaluation),
        // but the operator should hear about the typo exactly once.
        if let Some(expr) = &endpoint.filter_expression {
            if FilterExpr::parse(expr).is_none() {
                warn!(
                    endpoint = %endpoint.id,
                    filter = %expr,
                    "filter expression does not parse; it will match every event"
                );
            }
        }

        let id = endpoint.id.clone();
        let replaced = self
            .endpoints
            .write()
            .await
            .insert(id.clone(), Arc::new(endpoint))
            .is_some();
        info!(endpoint = %id, replaced, "endpoint registered");
        Ok(())
    }

    /// Remove an endpoint. Returns whether it existed.
    pub async fn unregister(&self, id: &str) -> bool {
        let removed = self.endpoints.write().await.remove(id).is_some();
        if removed {
            info!(endpoint = %id, "endpoint unregistered");
        }
        removed
    }

    /// Flip the enable flag. Returns whether the endpoint existed.
    pub async fn set_enabled(&self, id: &str, enabled: bool) -> bool {
        let mut endpoints = self.endpoints.write().await;
        match endpoints.get(id) {
            Some(existing) => {
                let mut updated = (**existing).clone();
                updated.enabled = enabled;
                endpoints.insert(id.to_string(), Arc::new(updated));
                info!(endpoint = %id, enabled, "endpoint toggled");
                true
            }
            None => false,
        }
    }

    pub async fn get(&self, id: &str) -> Option<Arc<Endpoint>> {
        self.endpoints.read().await.get(id).cloned()
    }

    /// Every registered endpoint, enabled or not.
    pub async fn list(&self) -> Vec<Arc<Endpoint>> {
        self.endpoints.read().await.values().cloned().collect()
    }

    /// Consistent fan-out snapshot of the enabled endpoints.
    pub async fn snapshot_enabled(&self) -> Vec<Arc<Endpoint>> {
        self.endpoints
            .read()
            .await
            .values()
            .filter(|ep| ep.enabled)
            .cloned()
            .collect()
    }

    /// (total, enabled) counts for the health snapshot.
    pub async fn counts(&self) -> (usize, usize) {
        let endpoints = self.endpoints.read().await;
        let enabled = endpoints.values().filter(|ep| ep.enabled).count();
        (endpoints.len(), enabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn register_is_an_upsert() {
        let registry = EndpointRegistry::new();
        registry
            .register(Endpoint::new("e1", "https://a.example"))
            .await
            .unwrap();
        registry
            .register(Endpoint::new("e1", "https://b.example").with_timeout(Duration::from_secs(3)))
            .await
            .unwrap();

        let (total, enabled) = registry.counts().await;
        assert_eq!(total, 1);
        assert_eq!(enabled, 1);
        assert_eq!(registry.get("e1").await.unwrap().url, "https://b.example");
    }

    #[tokio::test]
    async fn invalid_endpoint_is_never_stored() {
        let registry = EndpointRegistry::new();
        assert!(registry
            .register(Endpoint::new("bad", "gopher://old.example"))
            .await
            .is_err());
        assert!(registry.get("bad").await.is_none());
    }

    #[tokio::test]
    async fn unregister_reports_existence() {
        let registry = EndpointRegistry::new();
        registry
            .register(Endpoint::new("e1", "https://a.example"))
            .await
            .unwrap();
        assert!(registry.unregister("e1").await);
        assert!(!registry.unregister("e1").await);
    }

    #[tokio::test]
    async fn disabled_endpoints_leave_the_snapshot() {
        let registry = EndpointRegistry::new();
        registry
            .register(Endpoint::new("e1", "https://a.example"))
            .await
            .unwrap();
        registry
            .register(Endpoint::new("e2", "https://b.example"))
            .await
            .unwrap();

        assert!(registry.set_enabled("e1", false).await);
        assert!(!registry.set_enabled("ghost", false).await);

        let snapshot = registry.snapshot_enabled().await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id, "e2");

        let (total, enabled) = registry.counts().await;
        assert_eq!((total, enabled), (2, 1));
    }

    #[tokio::test]
    async fn snapshot_is_point_in_time() {
        let registry = EndpointRegistry::new();
        registry
            .register(Endpoint::new("e1", "https://a.example"))
            .await
            .unwrap();

        let snapshot = registry.snapshot_enabled().await;
        registry
            .register(Endpoint::new("e2", "https://b.example"))
            .await
            .unwrap();

        assert_eq!(snapshot.len(), 1);
        assert_eq!(registry.snapshot_enabled().await.len(), 2);
    }
}
