use std::sync::Arc;
use tracing::info;

use crate::cluster::{ClusterMembership, LocusService, LOCUS_SERVICE, MEMBERSHIP_SERVICE};
use crate::error::NexaError;
use crate::server::ServiceRegistry;

/// Exposes the node's core services under their well-known names.
pub struct ServiceRegistrar<'a> {
    registry: &'a ServiceRegistry,
}

impl<'a> ServiceRegistrar<'a> {
    pub fn new(registry: &'a ServiceRegistry) -> Self {
        Self { registry }
    }

    /// Runs once per process, after the join decision has been carried out.
    pub async fn register_node_services(
        &self,
        membership: ClusterMembership,
        locus: LocusService,
    ) -> Result<(), NexaError> {
        self.registry
            .register(MEMBERSHIP_SERVICE, Arc::new(membership))
            .await?;
        self.registry.register(LOCUS_SERVICE, Arc::new(locus)).await?;
        info!(services = ?self.registry.names().await, "Node services registered");
        Ok(())
    }
}
