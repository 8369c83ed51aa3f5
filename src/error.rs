use std::io;
use thiserror::Error;

/// Errors raised while bootstrapping a node.
///
/// Every variant up to `ServiceRegistration` is fatal to startup and ends the
/// process from `main`; the rest are ambient failures of the runtime pieces.
#[derive(Debug, Error, Clone)]
pub enum NexaError {
    #[error("either a bind address or a bind interface is required to start a node")]
    MissingAddressConfig,

    #[error("a bind address and a bind interface cannot both be set")]
    ConflictingAddressConfig,

    #[error("bind address {input:?} does not parse ({reason})")]
    AddressParse { input: String, reason: String },

    #[error("interface {name} not found ({reason})")]
    InterfaceLookup { name: String, reason: String },

    #[error("addresses of interface {name} cannot be retrieved ({reason})")]
    AddressEnumeration { name: String, reason: String },

    #[error("interface {0} has no IPv4 addresses")]
    NoIpv4(String),

    #[error("join address {input:?} does not parse ({reason})")]
    JoinAddressParse { input: String, reason: String },

    #[error("udp multicast address {input:?} for discovery does not parse ({reason})")]
    MulticastAddressParse { input: String, reason: String },

    #[error("service {name} cannot be registered ({reason})")]
    ServiceRegistration { name: String, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Server error: {0}")]
    Server(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Cluster error: {0}")]
    Cluster(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("JSON error: {0}")]
    Json(String),

    #[error("YAML error: {0}")]
    Yaml(String),
}

pub type Result<T> = std::result::Result<T, NexaError>;

impl NexaError {
    pub fn protocol(msg: impl Into<String>) -> Self {
        NexaError::Protocol(msg.into())
    }

    pub fn cluster(msg: impl Into<String>) -> Self {
        NexaError::Cluster(msg.into())
    }

    pub fn registration(name: &str, reason: impl Into<String>) -> Self {
        NexaError::ServiceRegistration {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<io::Error> for NexaError {
    fn from(e: io::Error) -> Self {
        NexaError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for NexaError {
    fn from(e: serde_json::Error) -> Self {
        NexaError::Json(e.to_string())
    }
}

impl From<serde_yaml::Error> for NexaError {
    fn from(e: serde_yaml::Error) -> Self {
        NexaError::Yaml(e.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for NexaError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        NexaError::protocol(e.to_string())
    }
}

impl From<ctrlc::Error> for NexaError {
    fn from(e: ctrlc::Error) -> Self {
        NexaError::Server(format!("cannot install signal handler: {}", e))
    }
}
