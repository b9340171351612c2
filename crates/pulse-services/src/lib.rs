//! pulse-services: shared peer state.

pub mod peer;

pub use peer::{PeerAddress, PeerRegistry};
