//! RPC Runtime
//!
//! A WebSocket endpoint on the node's bind address. Every text frame is an
//! `RpcRequest` dispatched through the `ServiceRegistry`; every request gets
//! exactly one `RpcResponse` back on the same connection.

mod client;
mod protocol;
mod registry;

pub use client::RpcClient;
pub use protocol::{RpcRequest, RpcResponse};
pub use registry::{RemoteService, ServiceHandle, ServiceRegistry};

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_tungstenite::{tungstenite::protocol::Message, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::NexaError;
use crate::types::BindAddress;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Stopped,
    Running,
}

#[derive(Clone)]
pub struct RpcServer {
    registry: ServiceRegistry,
    state: Arc<RwLock<ServerState>>,
    bound_addr: Arc<RwLock<Option<SocketAddr>>>,
    shutdown: Arc<RwLock<CancellationToken>>,
    server_handle: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl RpcServer {
    pub fn new(registry: ServiceRegistry) -> Self {
        Self {
            registry,
            state: Arc::new(RwLock::new(ServerState::Stopped)),
            bound_addr: Arc::new(RwLock::new(None)),
            shutdown: Arc::new(RwLock::new(CancellationToken::new())),
            server_handle: Arc::new(Mutex::new(None)),
        }
    }

    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    pub async fn get_state(&self) -> ServerState {
        *self.state.read().await
    }

    pub async fn get_bound_addr(&self) -> Option<SocketAddr> {
        *self.bound_addr.read().await
    }

    /// Binds the listener and starts accepting connections. Returns the
    /// address actually bound, which differs from `bind` when its port is 0.
    pub async fn start(&self, bind: BindAddress) -> Result<SocketAddr, NexaError> {
        let mut state = self.state.write().await;
        if *state != ServerState::Stopped {
            return Err(NexaError::Server("RPC runtime is already running".to_string()));
        }

        let listener = TcpListener::bind(bind.socket_addr())
            .await
            .map_err(|e| NexaError::Server(format!("cannot listen on {}: {}", bind, e)))?;
        let local_addr = listener.local_addr()?;
        *self.bound_addr.write().await = Some(local_addr);

        let shutdown = CancellationToken::new();
        *self.shutdown.write().await = shutdown.clone();

        let server = self.clone();
        let handle = tokio::spawn(async move {
            info!("RPC runtime listening on {}", local_addr);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        debug!("RPC runtime shutting down");
                        break;
                    }
                    accepted = listener.accept() => match accepted {
                        Ok((socket, addr)) => {
                            let server = server.clone();
                            let shutdown = shutdown.clone();
                            tokio::spawn(async move {
                                if let Err(e) =
                                    server.handle_connection(socket, addr, shutdown).await
                                {
                                    warn!("Connection error for {}: {}", addr, e);
                                }
                            });
                        }
                        Err(e) => error!("Failed to accept connection: {}", e),
                    }
                }
            }
        });

        *self.server_handle.lock().await = Some(handle);
        *state = ServerState::Running;
        Ok(local_addr)
    }

    pub async fn stop(&self) -> Result<(), NexaError> {
        let mut state = self.state.write().await;
        if *state != ServerState::Running {
            return Err(NexaError::Server("RPC runtime is not running".to_string()));
        }

        self.shutdown.read().await.cancel();
        if let Some(handle) = self.server_handle.lock().await.take() {
            if let Err(e) = handle.await {
                error!("RPC runtime task failed during shutdown: {}", e);
            }
        }

        *self.bound_addr.write().await = None;
        *state = ServerState::Stopped;
        Ok(())
    }

    async fn handle_connection(
        &self,
        socket: TcpStream,
        addr: SocketAddr,
        shutdown: CancellationToken,
    ) -> Result<(), NexaError> {
        socket.set_nodelay(true)?;
        let ws_stream = tokio_tungstenite::accept_async(socket).await?;
        let (write, read) = ws_stream.split();
        debug!("RPC connection from {}", addr);
        self.process_connection(read, write, addr, shutdown).await
    }

    async fn process_connection(
        &self,
        mut read: SplitStream<WebSocketStream<TcpStream>>,
        mut write: SplitSink<WebSocketStream<TcpStream>, Message>,
        addr: SocketAddr,
        shutdown: CancellationToken,
    ) -> Result<(), NexaError> {
        loop {
            let msg = tokio::select! {
                _ = shutdown.cancelled() => break,
                msg = read.next() => match msg {
                    Some(msg) => msg?,
                    None => break,
                },
            };

            match msg {
                Message::Text(text) => {
                    let response = self.handle_request(text.as_str()).await;
                    let frame = serde_json::to_string(&response)?;
                    write.send(Message::Text(frame.into())).await?;
                }
                Message::Ping(data) => write.send(Message::Pong(data)).await?,
                Message::Close(_) => break,
                _ => {}
            }
        }
        debug!("RPC connection from {} closed", addr);
        Ok(())
    }

    async fn handle_request(&self, text: &str) -> RpcResponse {
        let request: RpcRequest = match serde_json::from_str(text) {
            Ok(request) => request,
            Err(e) => return RpcResponse::err(Uuid::nil(), format!("invalid request: {}", e)),
        };

        match self
            .registry
            .dispatch(&request.service, &request.method, request.params)
            .await
        {
            Ok(result) => RpcResponse::ok(request.id, result),
            Err(e) => {
                debug!(
                    service = %request.service,
                    method = %request.method,
                    "RPC call failed: {}",
                    e
                );
                RpcResponse::err(request.id, e.to_string())
            }
        }
    }
}
