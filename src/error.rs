//! Errors returned to callers of the device client

use std::time::Duration;

use nomad_protocol::{CodecError, RequestKind};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DeviceError {
    /// A request of this kind is still waiting for its response
    #[error("Request already in flight: {0:?}")]
    RequestAlreadyInFlight(RequestKind),

    /// The device did not answer before the deadline
    #[error("Request timed out: {kind:?} after {timeout:?}")]
    RequestTimedOut { kind: RequestKind, timeout: Duration },

    /// The link task has stopped; nothing can be sent
    #[error("Device link closed")]
    LinkClosed,

    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl DeviceError {
    /// True when the presentation layer should offer a reconnect
    pub fn is_unresponsive(&self) -> bool {
        matches!(self, DeviceError::RequestTimedOut { .. } | DeviceError::LinkClosed)
    }
}

pub type Result<T> = std::result::Result<T, DeviceError>;
