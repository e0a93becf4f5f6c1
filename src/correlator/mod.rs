//! Response correlation for the device link
//!
//! This module handles:
//! - Tracking the one outstanding request per response kind
//! - Routing decoded inbound frames to waiters, the log observer, or the bin
//! - Holding the latest telemetry snapshot

mod pending;
mod router;

pub use pending::PendingResponse;
pub use router::{FrameDisposition, LogObserver, Reply, ResponseCorrelator};
