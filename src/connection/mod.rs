//! Device link management
//!
//! This module handles:
//! - Pumping inbound bytes through the frame decoder into the correlator
//! - Serialising outbound frames onto the transport
//! - Reporting when the transport goes away

mod link;

pub use link::{DeviceLink, LinkEvent, LinkEventReceiver};
