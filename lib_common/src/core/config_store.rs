//! # In-Memory Config Store
//!
//! Default sink for accepted updates. Each update replaces the whole routing
//! snapshot atomically and publishes it on a `watch` channel, so observers
//! always see a complete generation and never a half-applied one. Updates
//! that would leave the table inconsistent are rejected and the previous
//! snapshot stays live.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::core::dispatcher::ConfigSink;
use crate::error::SinkError;
use crate::protocol::message::{ClusterDescriptor, RouteDescriptor};

/// One complete, immutable routing configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigSnapshot {
    /// 0 before the first update, then incremented on every accepted update.
    pub generation: u64,
    pub routes: Vec<RouteDescriptor>,
    pub cluster: ClusterDescriptor,
}

pub struct InMemoryConfigStore {
    tx: watch::Sender<Arc<ConfigSnapshot>>,
}

impl Default for InMemoryConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryConfigStore {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Arc::new(ConfigSnapshot::default()));
        Self { tx }
    }

    /// The snapshot currently in force.
    pub fn current(&self) -> Arc<ConfigSnapshot> {
        self.tx.borrow().clone()
    }

    /// A receiver that is notified on every accepted update.
    pub fn subscribe(&self) -> watch::Receiver<Arc<ConfigSnapshot>> {
        self.tx.subscribe()
    }
}

fn validate(routes: &[RouteDescriptor], cluster: &ClusterDescriptor) -> Result<(), SinkError> {
    let mut seen = HashSet::with_capacity(routes.len());
    for route in routes {
        if route.route_id.is_empty() {
            return Err(SinkError::Rejected("route without routeId".to_string()));
        }
        if !seen.insert(route.route_id.as_str()) {
            return Err(SinkError::Rejected(format!(
                "duplicate routeId '{}'",
                route.route_id
            )));
        }
        if let (Some(route_cluster), Some(cluster_id)) = (&route.cluster_id, &cluster.cluster_id) {
            if route_cluster != cluster_id {
                return Err(SinkError::Rejected(format!(
                    "route '{}' targets cluster '{}' but update carries cluster '{}'",
                    route.route_id, route_cluster, cluster_id
                )));
            }
        }
    }
    Ok(())
}

#[async_trait]
impl ConfigSink for InMemoryConfigStore {
    async fn update(
        &self,
        routes: Vec<RouteDescriptor>,
        cluster: ClusterDescriptor,
        cancel: &CancellationToken,
    ) -> Result<(), SinkError> {
        if cancel.is_cancelled() {
            return Err(SinkError::Cancelled);
        }
        validate(&routes, &cluster)?;

        self.tx.send_modify(|current| {
            let generation = current.generation + 1;
            *current = Arc::new(ConfigSnapshot {
                generation,
                routes,
                cluster,
            });
        });
        Ok(())
    }
}
