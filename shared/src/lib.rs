//! NomadBLDC Host Protocol
//!
//! This crate provides the wire types, command builders and telemetry
//! decoders shared by everything on the host side of a NomadBLDC motor
//! controller link. It performs no I/O.

pub mod codec;
pub mod command;
pub mod state_machine;
pub mod telemetry;

pub use codec::{CodecError, Frame, FrameDecoder, FrameEncoder};
pub use command::{Command, CommandId, TorqueSetpoint};
pub use state_machine::{RequestEvent, RequestKind, RequestState, RequestStateMachine, TransitionResult};
pub use telemetry::{DeviceInfo, DeviceStats, LogEvent};

/// Bytes preceding the payload in every frame: `[command_id][payload_length]`
pub const FRAME_HEADER_LEN: usize = 2;

/// Largest payload the one-byte length header can describe
pub const MAX_PAYLOAD_LEN: usize = u8::MAX as usize;

/// Default deadlines for host-side requests
pub mod timing {
    /// How long a blocking read waits for the device to answer
    pub const REQUEST_TIMEOUT_MS: u64 = 5000;

    /// Interval between telemetry polls in the monitor
    pub const STATS_POLL_INTERVAL_MS: u64 = 1000;
}
