use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use super::membership::ClusterMembership;
use crate::error::NexaError;
use crate::server::RemoteService;

/// Resource-sharing entry point of the node. Only identity and peer listing
/// are served here; the resource semantics live elsewhere.
#[derive(Clone)]
pub struct LocusService {
    node_id: String,
    membership: ClusterMembership,
    started_at: DateTime<Utc>,
}

impl LocusService {
    pub fn new(node_id: impl Into<String>, membership: ClusterMembership) -> Self {
        Self {
            node_id: node_id.into(),
            membership,
            started_at: Utc::now(),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }
}

#[async_trait]
impl RemoteService for LocusService {
    async fn invoke(&self, method: &str, _params: Value) -> Result<Value, NexaError> {
        match method {
            "self" => Ok(json!({
                "node_id": self.node_id,
                "address": self.membership.local(),
                "started_at": self.started_at,
            })),
            "peers" => Ok(serde_json::to_value(self.membership.peers())?),
            other => Err(NexaError::protocol(format!("locus has no method {}", other))),
        }
    }
}
