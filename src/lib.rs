pub mod cli;
pub mod cluster;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod logging;
pub mod registrar;
pub mod resolver;
pub mod server;
pub mod startup;
pub mod types;

// Re-export common types
pub use config::NodeConfig;
pub use coordinator::{JoinCoordinator, JoinMode};
pub use error::NexaError;
pub use resolver::{AddressResolver, BindSource};
pub use startup::{NodeBootstrap, RunningNode};
pub use types::{BindAddress, MulticastAddress, PeerAddress};
