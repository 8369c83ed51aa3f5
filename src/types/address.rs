//! Address Types
//!
//! The three kinds of addresses a node deals with at startup:
//! - where it listens (`BindAddress`)
//! - whom it joins (`PeerAddress`)
//! - where it looks for other nodes (`MulticastAddress`)

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, ToSocketAddrs};
use std::str::FromStr;

use crate::error::NexaError;

/// Where this node listens. Port `0` leaves the choice to the listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BindAddress {
    ip: IpAddr,
    port: u16,
}

impl BindAddress {
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Self { ip, port }
    }

    pub fn ip(&self) -> IpAddr {
        self.ip
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_wildcard(&self) -> bool {
        self.ip.is_unspecified()
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }
}

impl fmt::Display for BindAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.socket_addr())
    }
}

impl From<SocketAddr> for BindAddress {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip(), addr.port())
    }
}

/// Address of another node, used only as a join target.
///
/// Accepts `host:port` as well as the advertised form
/// `nexa://host:port[/node-id]`. Host names are resolved once, here.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PeerAddress {
    addr: SocketAddr,
    node_id: Option<String>,
}

impl PeerAddress {
    pub const SCHEME: &'static str = "nexa://";

    pub fn new(addr: SocketAddr, node_id: Option<String>) -> Self {
        Self { addr, node_id }
    }

    pub fn parse(input: &str) -> Result<Self, NexaError> {
        Self::parse_parts(input).map_err(|reason| NexaError::JoinAddressParse {
            input: input.to_string(),
            reason,
        })
    }

    fn parse_parts(input: &str) -> Result<Self, String> {
        let input = input.trim();
        let (host_port, node_id) = match input.strip_prefix(Self::SCHEME) {
            Some(rest) => match rest.split_once('/') {
                Some((host_port, id)) if !id.is_empty() => (host_port, Some(id.to_string())),
                Some((host_port, _)) => (host_port, None),
                None => (rest, None),
            },
            None if input.contains("://") => {
                return Err(format!("unsupported scheme, expected {}", Self::SCHEME));
            }
            None => (input, None),
        };

        let addr = resolve_host_port(host_port)?;
        if addr.ip().is_unspecified() {
            return Err("a peer cannot be reached at the wildcard address".to_string());
        }
        if addr.port() == 0 {
            return Err("a peer address needs a port".to_string());
        }
        Ok(Self { addr, node_id })
    }

    pub fn socket_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn node_id(&self) -> Option<&str> {
        self.node_id.as_deref()
    }

    /// Endpoint of the peer's RPC runtime.
    pub fn ws_url(&self) -> String {
        format!("ws://{}", self.addr)
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.node_id {
            Some(id) => write!(f, "{}{}/{}", Self::SCHEME, self.addr, id),
            None => write!(f, "{}{}", Self::SCHEME, self.addr),
        }
    }
}

impl FromStr for PeerAddress {
    type Err = NexaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for PeerAddress {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse_parts(&value)
    }
}

impl From<PeerAddress> for String {
    fn from(peer: PeerAddress) -> Self {
        peer.to_string()
    }
}

/// UDP multicast group used for discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MulticastAddress(SocketAddr);

impl MulticastAddress {
    pub fn parse(input: &str) -> Result<Self, NexaError> {
        let parse_err = |reason: String| NexaError::MulticastAddressParse {
            input: input.to_string(),
            reason,
        };

        let addr = resolve_host_port(input.trim()).map_err(parse_err)?;
        if !addr.ip().is_multicast() {
            return Err(parse_err(format!("{} is not a multicast group", addr.ip())));
        }
        if addr.port() == 0 {
            return Err(parse_err("a multicast group needs a port".to_string()));
        }
        Ok(Self(addr))
    }

    pub fn socket_addr(&self) -> SocketAddr {
        self.0
    }

    pub fn group(&self) -> IpAddr {
        self.0.ip()
    }

    pub fn port(&self) -> u16 {
        self.0.port()
    }
}

impl fmt::Display for MulticastAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MulticastAddress {
    type Err = NexaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Parses a TCP listen address. A missing host (`:7000`) means every interface.
pub(crate) fn parse_listen_addr(input: &str) -> Result<SocketAddr, String> {
    let input = input.trim();
    if let Some(port) = input.strip_prefix(':') {
        let port = port
            .parse::<u16>()
            .map_err(|e| format!("invalid port {:?}: {}", port, e))?;
        return Ok(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port));
    }
    resolve_host_port(input)
}

fn resolve_host_port(input: &str) -> Result<SocketAddr, String> {
    if input.is_empty() {
        return Err("empty address".to_string());
    }
    if let Ok(addr) = input.parse::<SocketAddr>() {
        return Ok(addr);
    }
    if !input.contains(':') {
        return Err("missing port".to_string());
    }
    input
        .to_socket_addrs()
        .map_err(|e| e.to_string())?
        .next()
        .ok_or_else(|| format!("{} resolves to no address", input))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_peer_address_forms() {
        let bare = PeerAddress::parse("10.0.0.9:7000").unwrap();
        let url = PeerAddress::parse("nexa://10.0.0.9:7000/node-a").unwrap();

        assert_eq!(bare.socket_addr(), url.socket_addr());
        assert_eq!(bare.node_id(), None);
        assert_eq!(url.node_id(), Some("node-a"));
        assert_eq!(url.to_string(), "nexa://10.0.0.9:7000/node-a");
        assert_eq!(PeerAddress::parse(&url.to_string()).unwrap(), url);
    }

    #[test]
    fn test_peer_address_rejects_garbage() {
        let garbage = [
            "",
            "10.0.0.9",
            "http://10.0.0.9:7000",
            "0.0.0.0:7000",
            "10.0.0.9:0",
        ];
        for input in garbage {
            match PeerAddress::parse(input) {
                Err(NexaError::JoinAddressParse { input: got, .. }) => assert_eq!(got, input),
                other => panic!("expected JoinAddressParse for {:?}, got {:?}", input, other),
            }
        }
    }

    #[test]
    fn test_peer_address_json() {
        let peer = PeerAddress::parse("nexa://127.0.0.1:7100/abc").unwrap();
        let json = serde_json::to_string(&peer).unwrap();
        assert_eq!(json, "\"nexa://127.0.0.1:7100/abc\"");
        let back: PeerAddress = serde_json::from_str(&json).unwrap();
        assert_eq!(back, peer);
        assert!(serde_json::from_str::<PeerAddress>("\"not an address\"").is_err());
    }

    #[test]
    fn test_multicast_address() {
        let group = MulticastAddress::parse("239.0.0.1:9999").unwrap();
        assert_eq!(group.group(), IpAddr::V4(Ipv4Addr::new(239, 0, 0, 1)));
        assert_eq!(group.port(), 9999);

        assert!(matches!(
            MulticastAddress::parse("10.0.0.1:9999"),
            Err(NexaError::MulticastAddressParse { .. })
        ));
        assert!(matches!(
            MulticastAddress::parse("239.0.0.1"),
            Err(NexaError::MulticastAddressParse { .. })
        ));
    }

    #[test]
    fn test_listen_addr_keeps_explicit_ip() {
        let addr = parse_listen_addr("10.0.0.5:7000").unwrap();
        assert_eq!(addr, "10.0.0.5:7000".parse().unwrap());
        assert!(parse_listen_addr(":notaport").is_err());
    }

    proptest! {
        #[test]
        fn omitted_ip_binds_wildcard(port in any::<u16>()) {
            let addr = parse_listen_addr(&format!(":{}", port)).unwrap();
            prop_assert!(addr.ip().is_unspecified());
            prop_assert_eq!(addr.port(), port);
        }
    }
}
