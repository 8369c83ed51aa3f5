//! Multicast Discovery
//!
//! Every node announces its advertised address on a UDP multicast group and
//! listens for the announcements of others. The first foreign announcement is
//! reported once; announcing continues so that nodes started later still find
//! this one.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::os::fd::AsRawFd;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::oneshot;
use tokio::time;
use tracing::{debug, error, info, warn};

use crate::config::DiscoveryConfig;
use crate::error::NexaError;
use crate::types::{MulticastAddress, PeerAddress};

const MAX_ANNOUNCEMENT: usize = 1024;

/// Finds another node of the cluster without knowing its address.
pub trait DiscoveryAgent: Send + Sync {
    /// Starts discovering immediately in the background. The receiver yields
    /// the first peer found; it never yields more than one.
    fn start(&self, local: PeerAddress, group: MulticastAddress)
        -> oneshot::Receiver<PeerAddress>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Announcement {
    node: PeerAddress,
}

#[derive(Debug, Clone)]
pub struct MulticastDiscovery {
    announce_interval: Duration,
    ttl: u32,
}

impl MulticastDiscovery {
    pub fn new(announce_interval: Duration, ttl: u32) -> Self {
        Self {
            announce_interval,
            ttl,
        }
    }

    pub fn from_config(config: &DiscoveryConfig) -> Self {
        Self::new(config.announce_interval(), config.ttl)
    }
}

impl DiscoveryAgent for MulticastDiscovery {
    fn start(
        &self,
        local: PeerAddress,
        group: MulticastAddress,
    ) -> oneshot::Receiver<PeerAddress> {
        let (found_tx, found_rx) = oneshot::channel();
        let agent = self.clone();
        tokio::spawn(async move {
            if let Err(e) = agent.run(local, group, found_tx).await {
                error!(%group, "Discovery stopped: {}", e);
            }
        });
        found_rx
    }
}

impl MulticastDiscovery {
    async fn run(
        &self,
        local: PeerAddress,
        group: MulticastAddress,
        found_tx: oneshot::Sender<PeerAddress>,
    ) -> Result<(), NexaError> {
        let socket = bind_group(&group, self.ttl)?;
        info!(%group, node = %local, "Discovering cluster over multicast");
        self.announce_and_listen(socket, group.socket_addr(), local, found_tx)
            .await
    }

    /// Announces `local` to `target` on every tick and reports the first
    /// foreign announcement received on `socket`. Never returns on success.
    async fn announce_and_listen(
        &self,
        socket: UdpSocket,
        target: SocketAddr,
        local: PeerAddress,
        found_tx: oneshot::Sender<PeerAddress>,
    ) -> Result<(), NexaError> {
        let payload = serde_json::to_vec(&Announcement {
            node: local.clone(),
        })?;
        let mut found_tx = Some(found_tx);
        let mut ticker = time::interval(self.announce_interval);
        let mut buf = vec![0u8; MAX_ANNOUNCEMENT];

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = socket.send_to(&payload, target).await {
                        warn!(%target, "Failed to announce: {}", e);
                    }
                }
                received = socket.recv_from(&mut buf) => {
                    let (len, from) = received?;
                    let Some(peer) = foreign_announcement(&local, &buf[..len]) else {
                        continue;
                    };
                    match found_tx.take() {
                        Some(tx) => {
                            info!(%peer, %from, "Discovered peer");
                            let _ = tx.send(peer);
                        }
                        None => debug!(%peer, "Heard peer after discovery completed"),
                    }
                }
            }
        }
    }
}

/// Decodes an announcement, dropping garbage and our own echoes.
fn foreign_announcement(local: &PeerAddress, datagram: &[u8]) -> Option<PeerAddress> {
    let announcement: Announcement = match serde_json::from_slice(datagram) {
        Ok(a) => a,
        Err(e) => {
            debug!("Ignoring malformed announcement: {}", e);
            return None;
        }
    };
    let node = announcement.node;
    if node.socket_addr() == local.socket_addr() {
        return None;
    }
    if node.node_id().is_some() && node.node_id() == local.node_id() {
        return None;
    }
    Some(node)
}

/// Binds the group port with `SO_REUSEADDR` so several nodes on one host can
/// share the group, then joins it. `ttl` only applies to IPv4 groups; IPv6
/// groups keep the system's default hop limit.
fn bind_group(group: &MulticastAddress, ttl: u32) -> Result<UdpSocket, NexaError> {
    use nix::sys::socket::{
        bind, setsockopt, socket, sockopt, AddressFamily, SockFlag, SockType, SockaddrIn,
        SockaddrIn6,
    };

    let sys_err =
        |e: nix::errno::Errno| NexaError::Io(format!("multicast socket: {}", e.desc()));

    let family = match group.group() {
        IpAddr::V4(_) => AddressFamily::Inet,
        IpAddr::V6(_) => AddressFamily::Inet6,
    };
    let fd = socket(family, SockType::Datagram, SockFlag::empty(), None).map_err(sys_err)?;
    setsockopt(&fd, sockopt::ReuseAddr, &true).map_err(sys_err)?;
    match group.group() {
        IpAddr::V4(_) => bind(
            fd.as_raw_fd(),
            &SockaddrIn::from(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, group.port())),
        ),
        IpAddr::V6(_) => bind(
            fd.as_raw_fd(),
            &SockaddrIn6::from(SocketAddrV6::new(Ipv6Addr::UNSPECIFIED, group.port(), 0, 0)),
        ),
    }
    .map_err(sys_err)?;

    let socket = std::net::UdpSocket::from(fd);
    socket.set_nonblocking(true)?;
    match group.group() {
        IpAddr::V4(addr) => {
            socket.join_multicast_v4(&addr, &Ipv4Addr::UNSPECIFIED)?;
            socket.set_multicast_ttl_v4(ttl)?;
            socket.set_multicast_loop_v4(true)?;
        }
        IpAddr::V6(addr) => {
            socket.join_multicast_v6(&addr, 0)?;
            socket.set_multicast_loop_v6(true)?;
            debug!(%addr, ttl, "Hop limit left at system default for IPv6 group");
        }
    }
    Ok(UdpSocket::from_std(socket)?)
}
