//! Bind Address Resolution
//!
//! Works out where the node listens, either from an explicit address or from
//! the first IPv4 address of a named network interface.

use std::net::IpAddr;
use tracing::{debug, info};

use crate::error::NexaError;
use crate::types::address::{parse_listen_addr, BindAddress};

/// The configured source of the bind address. Exactly one must be present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindSource {
    Address(String),
    Interface(String),
}

impl BindSource {
    pub fn from_options(
        address: Option<&str>,
        interface: Option<&str>,
    ) -> Result<Self, NexaError> {
        match (address, interface) {
            (Some(addr), None) => Ok(BindSource::Address(addr.to_string())),
            (None, Some(name)) => Ok(BindSource::Interface(name.to_string())),
            (Some(_), Some(_)) => Err(NexaError::ConflictingAddressConfig),
            (None, None) => Err(NexaError::MissingAddressConfig),
        }
    }
}

/// Source of per-interface IP addresses, in platform order.
pub trait InterfaceTable {
    /// Fails with `InterfaceLookup` when the interface does not exist and with
    /// `AddressEnumeration` when its addresses cannot be listed.
    fn interface_addrs(&self, name: &str) -> Result<Vec<IpAddr>, NexaError>;
}

/// The host's interfaces, queried through `getifaddrs(3)`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemInterfaces;

impl InterfaceTable for SystemInterfaces {
    fn interface_addrs(&self, name: &str) -> Result<Vec<IpAddr>, NexaError> {
        use nix::ifaddrs::getifaddrs;
        use nix::net::if_::if_nametoindex;
        use std::net::{SocketAddrV4, SocketAddrV6};

        if_nametoindex(name).map_err(|e| NexaError::InterfaceLookup {
            name: name.to_string(),
            reason: e.desc().to_string(),
        })?;

        let addrs = getifaddrs().map_err(|e| NexaError::AddressEnumeration {
            name: name.to_string(),
            reason: e.desc().to_string(),
        })?;

        Ok(addrs
            .filter(|ifa| ifa.interface_name == name)
            .filter_map(|ifa| {
                let storage = ifa.address?;
                if let Some(sin) = storage.as_sockaddr_in() {
                    return Some(IpAddr::V4(*SocketAddrV4::from(*sin).ip()));
                }
                storage
                    .as_sockaddr_in6()
                    .map(|sin6| IpAddr::V6(*SocketAddrV6::from(*sin6).ip()))
            })
            .collect())
    }
}

/// Turns a `BindSource` into a `BindAddress`.
pub struct AddressResolver<T = SystemInterfaces> {
    interfaces: T,
}

impl AddressResolver<SystemInterfaces> {
    pub fn new() -> Self {
        Self {
            interfaces: SystemInterfaces,
        }
    }
}

impl Default for AddressResolver<SystemInterfaces> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: InterfaceTable> AddressResolver<T> {
    pub fn with_interfaces(interfaces: T) -> Self {
        Self { interfaces }
    }

    pub fn resolve(&self, source: &BindSource) -> Result<BindAddress, NexaError> {
        let bind = match source {
            BindSource::Address(input) => Self::resolve_explicit(input)?,
            BindSource::Interface(name) => self.resolve_interface(name)?,
        };
        info!(%bind, "Resolved bind address");
        Ok(bind)
    }

    fn resolve_explicit(input: &str) -> Result<BindAddress, NexaError> {
        let addr = parse_listen_addr(input).map_err(|reason| NexaError::AddressParse {
            input: input.to_string(),
            reason,
        })?;
        Ok(BindAddress::from(addr))
    }

    fn resolve_interface(&self, name: &str) -> Result<BindAddress, NexaError> {
        let addrs = self.interfaces.interface_addrs(name)?;
        if addrs.is_empty() {
            return Err(NexaError::AddressEnumeration {
                name: name.to_string(),
                reason: "no addresses associated with this interface".to_string(),
            });
        }
        debug!(interface = name, ?addrs, "Enumerated interface addresses");

        addrs
            .iter()
            .find_map(|ip| ipv4_of(*ip))
            .map(|ip| BindAddress::new(IpAddr::V4(ip), 0))
            .ok_or_else(|| NexaError::NoIpv4(name.to_string()))
    }
}

/// IPv4 form of an address, if it has one.
fn ipv4_of(ip: IpAddr) -> Option<std::net::Ipv4Addr> {
    match ip {
        IpAddr::V4(v4) => Some(v4),
        IpAddr::V6(v6) => v6.to_ipv4_mapped(),
    }
}
