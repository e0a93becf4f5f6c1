//! Command identifiers and frame builders
//!
//! Every builder takes already-typed arguments and returns a ready-to-send
//! [`Frame`]. Setpoint values are passed through as-is; range checking is
//! left to the caller and the device.

use std::fmt;

use bytes::{BufMut, BytesMut};

use crate::codec::{CodecError, Frame};

/// Opcodes understood by the motor controller.
///
/// The discriminants are part of the wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CommandId {
    // Info/status
    DeviceInfoRead = 1,
    DeviceStatsRead = 2,
    DeviceConfigRead = 3,

    // Measurement and calibration
    MeasureResistance = 4,
    MeasureInductance = 5,
    MeasurePhaseOrder = 6,
    CalibrateMotor = 7,
    ZeroPosition = 8,

    // Control modes
    EnableCurrentControl = 9,
    EnableVoltageControl = 10,
    EnableTorqueControl = 11,
    EnableSpeedControl = 12,
    EnableIdleMode = 13,

    // Device lifecycle
    DeviceRestart = 14,
    DeviceAbort = 15,

    // Setpoints
    SendVoltageSetpoint = 16,
    SendTorqueSetpoint = 17,

    /// Asynchronous log line from the device
    LoggingOutput = 100,
}

impl CommandId {
    /// The opcode as it appears on the wire
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for CommandId {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        use CommandId::*;

        let id = match value {
            1 => DeviceInfoRead,
            2 => DeviceStatsRead,
            3 => DeviceConfigRead,
            4 => MeasureResistance,
            5 => MeasureInductance,
            6 => MeasurePhaseOrder,
            7 => CalibrateMotor,
            8 => ZeroPosition,
            9 => EnableCurrentControl,
            10 => EnableVoltageControl,
            11 => EnableTorqueControl,
            12 => EnableSpeedControl,
            13 => EnableIdleMode,
            14 => DeviceRestart,
            15 => DeviceAbort,
            16 => SendVoltageSetpoint,
            17 => SendTorqueSetpoint,
            100 => LoggingOutput,
            other => return Err(CodecError::UnknownCommandId(other)),
        };
        Ok(id)
    }
}

impl From<CommandId> for u8 {
    fn from(id: CommandId) -> Self {
        id.as_u8()
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self, self.as_u8())
    }
}

/// Gains and targets for the device's impedance (torque) controller
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TorqueSetpoint {
    /// Position gain
    pub k_p: f32,
    /// Damping gain
    pub k_d: f32,
    /// Output position target
    pub position: f32,
    /// Output velocity target
    pub velocity: f32,
    /// Feed-forward torque
    pub feedforward_torque: f32,
}

/// Payload length of a torque setpoint frame (five `f32` fields)
pub const TORQUE_SETPOINT_LEN: usize = 20;

/// Payload length of a voltage setpoint frame (two `f32` fields)
pub const VOLTAGE_SETPOINT_LEN: usize = 8;

/// A command the host can send, with its arguments
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    DeviceInfoRead,
    DeviceStatsRead,
    DeviceConfigRead,
    MeasureResistance,
    MeasureInductance,
    MeasurePhaseOrder,
    CalibrateMotor,
    ZeroPosition,
    EnableCurrentControl,
    EnableVoltageControl,
    EnableTorqueControl,
    EnableSpeedControl,
    EnableIdleMode,
    DeviceRestart,
    DeviceAbort,
    VoltageSetpoint { v_d: f32, v_q: f32 },
    TorqueSetpoint(TorqueSetpoint),
}

impl Command {
    /// Opcode this command is sent under
    pub fn id(&self) -> CommandId {
        match self {
            Command::DeviceInfoRead => CommandId::DeviceInfoRead,
            Command::DeviceStatsRead => CommandId::DeviceStatsRead,
            Command::DeviceConfigRead => CommandId::DeviceConfigRead,
            Command::MeasureResistance => CommandId::MeasureResistance,
            Command::MeasureInductance => CommandId::MeasureInductance,
            Command::MeasurePhaseOrder => CommandId::MeasurePhaseOrder,
            Command::CalibrateMotor => CommandId::CalibrateMotor,
            Command::ZeroPosition => CommandId::ZeroPosition,
            Command::EnableCurrentControl => CommandId::EnableCurrentControl,
            Command::EnableVoltageControl => CommandId::EnableVoltageControl,
            Command::EnableTorqueControl => CommandId::EnableTorqueControl,
            Command::EnableSpeedControl => CommandId::EnableSpeedControl,
            Command::EnableIdleMode => CommandId::EnableIdleMode,
            Command::DeviceRestart => CommandId::DeviceRestart,
            Command::DeviceAbort => CommandId::DeviceAbort,
            Command::VoltageSetpoint { .. } => CommandId::SendVoltageSetpoint,
            Command::TorqueSetpoint(_) => CommandId::SendTorqueSetpoint,
        }
    }

    /// Build the frame for this command
    pub fn to_frame(&self) -> Frame {
        match self {
            Command::VoltageSetpoint { v_d, v_q } => voltage_setpoint(*v_d, *v_q),
            Command::TorqueSetpoint(sp) => torque_setpoint(sp),
            other => zero_payload(other.id()),
        }
    }
}

/// Frame for any command that carries no arguments
pub fn zero_payload(id: CommandId) -> Frame {
    Frame::empty(id)
}

/// Frame carrying a `(v_d, v_q)` voltage setpoint
pub fn voltage_setpoint(v_d: f32, v_q: f32) -> Frame {
    let mut payload = BytesMut::with_capacity(VOLTAGE_SETPOINT_LEN);
    payload.put_f32_le(v_d);
    payload.put_f32_le(v_q);
    Frame::from_parts(CommandId::SendVoltageSetpoint, payload.freeze())
}

/// Frame carrying all five torque controller fields
pub fn torque_setpoint(sp: &TorqueSetpoint) -> Frame {
    let mut payload = BytesMut::with_capacity(TORQUE_SETPOINT_LEN);
    payload.put_f32_le(sp.k_p);
    payload.put_f32_le(sp.k_d);
    payload.put_f32_le(sp.position);
    payload.put_f32_le(sp.velocity);
    payload.put_f32_le(sp.feedforward_torque);
    Frame::from_parts(CommandId::SendTorqueSetpoint, payload.freeze())
}
