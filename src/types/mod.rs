pub mod address;

pub use address::{BindAddress, MulticastAddress, PeerAddress};
