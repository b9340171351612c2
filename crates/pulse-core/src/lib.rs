//! pulse-core: wire format and configuration shared by every Pulse crate.

pub mod config;
pub mod wire;

pub use config::PulseConfig;
pub use wire::{Beacon, WireError};
