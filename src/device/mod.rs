//! Host-side interface to a NomadBLDC motor controller
//!
//! Presentation layers talk to the device only through [`DeviceClient`].

mod client;

pub use client::DeviceClient;
