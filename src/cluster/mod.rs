//! Cluster Collaborators
//!
//! The services a node brings to the cluster:
//! - Membership view and join handling
//! - Multicast peer discovery
//! - The resource locus entry point

pub mod discovery;
pub mod locus;
pub mod membership;

pub use discovery::{DiscoveryAgent, MulticastDiscovery};
pub use locus::LocusService;
pub use membership::{ClusterMembership, Member, Membership};

/// Well-known name of the membership service
pub const MEMBERSHIP_SERVICE: &str = "membership";
/// Well-known name of the locus service
pub const LOCUS_SERVICE: &str = "locus";
