use futures::{SinkExt, StreamExt};
use serde_json::Value;
use std::time::Duration;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::debug;

use super::protocol::{RpcRequest, RpcResponse};
use crate::error::NexaError;
use crate::types::PeerAddress;

/// One-shot calls against another node's RPC runtime.
#[derive(Debug, Clone)]
pub struct RpcClient {
    timeout: Duration,
}

impl Default for RpcClient {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

impl RpcClient {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub async fn call(
        &self,
        peer: &PeerAddress,
        service: &str,
        method: &str,
        params: Value,
    ) -> Result<Value, NexaError> {
        let request = RpcRequest::new(service, method, params);
        tokio::time::timeout(self.timeout, Self::exchange(peer, request))
            .await
            .map_err(|_| {
                NexaError::protocol(format!(
                    "{}.{} on {} timed out after {:?}",
                    service, method, peer, self.timeout
                ))
            })?
    }

    async fn exchange(peer: &PeerAddress, request: RpcRequest) -> Result<Value, NexaError> {
        let (mut ws, _) = connect_async(peer.ws_url()).await?;
        debug!(%peer, service = %request.service, method = %request.method, "Sending RPC request");

        let id = request.id;
        ws.send(Message::Text(serde_json::to_string(&request)?.into())).await?;

        while let Some(msg) = ws.next().await {
            match msg? {
                Message::Text(text) => {
                    let response: RpcResponse = serde_json::from_str(text.as_str())?;
                    if response.id != id {
                        continue;
                    }
                    let _ = ws.close(None).await;
                    return response.into_result();
                }
                Message::Close(_) => break,
                _ => {}
            }
        }

        Err(NexaError::protocol(format!("{} closed the connection without a response", peer)))
    }
}
