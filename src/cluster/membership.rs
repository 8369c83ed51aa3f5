//! Cluster Membership
//!
//! Keeps this node's view of the cluster. Joining a peer asks it to introduce
//! us; once it answers, the peer and its view are folded into ours.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::NexaError;
use crate::server::{RemoteService, RpcClient};
use crate::types::PeerAddress;

use super::MEMBERSHIP_SERVICE;

/// Accepts join requests on behalf of the node.
///
/// Implementations must tolerate concurrent `join` calls: the explicit join
/// on the startup path and the discovery join may overlap.
#[async_trait]
pub trait Membership: Send + Sync {
    async fn join(&self, peer: &PeerAddress) -> Result<(), NexaError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Member {
    pub addr: PeerAddress,
    pub seen_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct Introduction {
    from: PeerAddress,
}

#[derive(Clone)]
pub struct ClusterMembership {
    local: PeerAddress,
    members: Arc<DashMap<SocketAddr, Member>>,
    client: RpcClient,
}

impl ClusterMembership {
    pub fn new(local: PeerAddress, client: RpcClient) -> Self {
        Self {
            local,
            members: Arc::new(DashMap::new()),
            client,
        }
    }

    pub fn local(&self) -> &PeerAddress {
        &self.local
    }

    /// Known peers, excluding this node, ordered by address
    pub fn peers(&self) -> Vec<PeerAddress> {
        let mut peers: Vec<_> = self
            .members
            .iter()
            .map(|m| m.value().addr.clone())
            .collect();
        peers.sort_by_key(|p| p.socket_addr());
        peers
    }

    /// The full view: this node first, then its peers
    pub fn view(&self) -> Vec<PeerAddress> {
        let mut view = vec![self.local.clone()];
        view.extend(self.peers());
        view
    }

    /// Records a peer; returns whether it was new.
    fn record(&self, peer: PeerAddress) -> bool {
        if peer.socket_addr() == self.local.socket_addr() {
            return false;
        }
        let addr = peer.socket_addr();
        let member = Member {
            addr: peer,
            seen_at: Utc::now(),
        };
        self.members.insert(addr, member).is_none()
    }

    fn merge(&self, view: Vec<PeerAddress>) -> usize {
        view.into_iter()
            .filter(|peer| self.record(peer.clone()))
            .count()
    }
}

#[async_trait]
impl Membership for ClusterMembership {
    async fn join(&self, peer: &PeerAddress) -> Result<(), NexaError> {
        if peer.socket_addr() == self.local.socket_addr() {
            debug!(%peer, "Ignoring join with ourselves");
            return Ok(());
        }

        let reply = self
            .client
            .call(
                peer,
                MEMBERSHIP_SERVICE,
                "introduce",
                json!({ "from": self.local }),
            )
            .await
            .map_err(|e| NexaError::cluster(format!("join via {} failed: {}", peer, e)))?;

        // Only a peer that answered becomes a member
        let view: Vec<PeerAddress> = serde_json::from_value(reply)?;
        self.record(peer.clone());
        let added = self.merge(view);
        info!(%peer, added, members = self.members.len() + 1, "Joined cluster");
        Ok(())
    }
}

#[async_trait]
impl RemoteService for ClusterMembership {
    async fn invoke(&self, method: &str, params: Value) -> Result<Value, NexaError> {
        match method {
            "introduce" => {
                let intro: Introduction = serde_json::from_value(params)?;
                if self.record(intro.from.clone()) {
                    info!(peer = %intro.from, "Peer joined through us");
                }
                Ok(serde_json::to_value(self.view())?)
            }
            "members" => Ok(serde_json::to_value(self.view())?),
            other => Err(NexaError::protocol(format!(
                "membership has no method {}",
                other
            ))),
        }
    }
}
