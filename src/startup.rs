//! Node Startup
//!
//! Runs the bootstrap sequence in its fixed order:
//! 1. resolve the bind address and pick the join mode (no side effects yet)
//! 2. start the RPC runtime on the bind address
//! 3. carry out the join mode
//! 4. register the node services
//!
//! Afterwards the node serves until the shutdown token is cancelled.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::cluster::{ClusterMembership, DiscoveryAgent, LocusService, MulticastDiscovery};
use crate::config::NodeConfig;
use crate::coordinator::{DiscoveryTask, JoinCoordinator, JoinMode};
use crate::error::NexaError;
use crate::registrar::ServiceRegistrar;
use crate::resolver::{AddressResolver, BindSource, InterfaceTable, SystemInterfaces};
use crate::server::{RpcClient, RpcServer, ServiceRegistry};
use crate::types::{BindAddress, PeerAddress};

/// What startup will do, decided from configuration alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupPlan {
    pub bind: BindAddress,
    pub mode: JoinMode,
}

pub struct NodeBootstrap<T = SystemInterfaces> {
    config: NodeConfig,
    resolver: AddressResolver<T>,
    discovery: Option<Arc<dyn DiscoveryAgent>>,
}

impl NodeBootstrap<SystemInterfaces> {
    pub fn new(config: NodeConfig) -> Self {
        Self {
            config,
            resolver: AddressResolver::new(),
            discovery: None,
        }
    }
}

impl<T: InterfaceTable> NodeBootstrap<T> {
    pub fn with_resolver<U: InterfaceTable>(
        self,
        resolver: AddressResolver<U>,
    ) -> NodeBootstrap<U> {
        NodeBootstrap {
            config: self.config,
            resolver,
            discovery: self.discovery,
        }
    }

    /// Replaces the multicast discovery agent built from configuration.
    pub fn with_discovery(mut self, agent: Arc<dyn DiscoveryAgent>) -> Self {
        self.discovery = Some(agent);
        self
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Validates configuration, resolves the bind address and selects the
    /// join mode. Every configuration error surfaces here.
    pub fn plan(&self) -> Result<StartupPlan, NexaError> {
        self.config.validate()?;
        let source = BindSource::from_options(
            self.config.bind_address.as_deref(),
            self.config.bind_interface.as_deref(),
        )?;
        let bind = self.resolver.resolve(&source)?;
        let mode = JoinMode::select(
            self.config.join_address.as_deref(),
            self.config.discover_multicast_address.as_deref(),
        )?;
        Ok(StartupPlan { bind, mode })
    }

    pub async fn start(self) -> Result<RunningNode, NexaError> {
        let plan = self.plan()?;
        tokio::fs::create_dir_all(&self.config.work_dir).await?;

        let registry = ServiceRegistry::new();
        let server = RpcServer::new(registry.clone());
        let listening = server.start(plan.bind).await?;

        let node_id = Uuid::new_v4().to_string();
        let local = PeerAddress::new(advertise_addr(listening), Some(node_id.clone()));
        info!(node = %local, "Node runtime started");

        let membership = ClusterMembership::new(local.clone(), RpcClient::default());
        let locus = LocusService::new(node_id, membership.clone());

        let discovery = self.discovery.unwrap_or_else(|| {
            let agent = MulticastDiscovery::from_config(&self.config.discovery);
            Arc::new(agent) as Arc<dyn DiscoveryAgent>
        });
        let coordinator = JoinCoordinator::new(Arc::new(membership.clone()), discovery)
            .with_join_timeout(self.config.join.timeout());
        let mut outcome = coordinator.execute(plan.mode, &local).await;

        if let (Some(task), Some(limit)) =
            (outcome.discovery.as_mut(), self.config.discovery.startup_wait())
        {
            match task.wait(limit).await {
                Some(peer) => info!(%peer, "Joined discovered peer before registering services"),
                None => info!("No peer discovered within {:?}, continuing startup", limit),
            }
        }

        ServiceRegistrar::new(&registry)
            .register_node_services(membership.clone(), locus)
            .await?;

        Ok(RunningNode {
            bind: plan.bind,
            local,
            mode: outcome.mode,
            discovery: outcome.discovery,
            membership,
            registry,
            server,
        })
    }
}

/// A node that finished startup and is serving.
pub struct RunningNode {
    bind: BindAddress,
    local: PeerAddress,
    mode: JoinMode,
    discovery: Option<DiscoveryTask>,
    membership: ClusterMembership,
    registry: ServiceRegistry,
    server: RpcServer,
}

impl RunningNode {
    pub fn bind(&self) -> BindAddress {
        self.bind
    }

    /// Address other nodes reach this one at
    pub fn local(&self) -> &PeerAddress {
        &self.local
    }

    pub fn mode(&self) -> &JoinMode {
        &self.mode
    }

    pub fn membership(&self) -> &ClusterMembership {
        &self.membership
    }

    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    pub fn discovery_mut(&mut self) -> Option<&mut DiscoveryTask> {
        self.discovery.as_mut()
    }

    /// Serves until `shutdown` is cancelled, then stops the RPC runtime.
    /// Background discovery is left to end with the process.
    pub async fn run_until(self, shutdown: CancellationToken) -> Result<(), NexaError> {
        info!(node = %self.local, "Node serving");
        shutdown.cancelled().await;
        info!("Shutdown requested");
        self.server.stop().await
    }
}

/// The address to advertise for a listener. A wildcard listener is
/// advertised under the address of the default route, or loopback.
fn advertise_addr(listening: SocketAddr) -> SocketAddr {
    if !listening.ip().is_unspecified() {
        return listening;
    }
    let ip = default_route_ip().unwrap_or_else(|| {
        warn!("Cannot determine a routable address, advertising loopback");
        IpAddr::V4(Ipv4Addr::LOCALHOST)
    });
    SocketAddr::new(ip, listening.port())
}

fn default_route_ip() -> Option<IpAddr> {
    // connect() on a UDP socket only selects a route, nothing is sent
    let route = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).ok()?;
    route.connect((Ipv4Addr::new(192, 0, 2, 1), 9)).ok()?;
    let ip = route.local_addr().ok()?.ip();
    (!ip.is_unspecified()).then_some(ip)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advertise_keeps_explicit_address() {
        let addr: SocketAddr = "10.0.0.5:7000".parse().unwrap();
        assert_eq!(advertise_addr(addr), addr);
    }

    #[test]
    fn test_advertise_replaces_wildcard() {
        let addr = advertise_addr("0.0.0.0:7000".parse().unwrap());
        assert!(!addr.ip().is_unspecified());
        assert_eq!(addr.port(), 7000);
    }

    #[test]
    fn test_plan_requires_bind_source() {
        let bootstrap = NodeBootstrap::new(NodeConfig::default());
        assert!(matches!(bootstrap.plan(), Err(NexaError::MissingAddressConfig)));
    }
}
