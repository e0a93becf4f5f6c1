//! NomadBLDC host link
//!
//! Talks to a NomadBLDC motor controller over a byte stream: builds command
//! frames, pumps inbound frames through the response correlator, and exposes
//! blocking reads of device info and telemetry.

pub mod config;
pub mod connection;
pub mod correlator;
pub mod device;
pub mod error;
pub mod transport;

pub use config::{LinkConfig, TransportTarget};
pub use device::DeviceClient;
pub use error::DeviceError;
pub use nomad_protocol as protocol;
