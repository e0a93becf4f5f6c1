//! Device client - builds commands, sends them and waits for answers

use crate::config::LinkConfig;
use crate::connection::{DeviceLink, LinkEventReceiver};
use crate::correlator::{Reply, ResponseCorrelator};
use crate::error::Result;
use crate::transport::TransportStream;
use nomad_protocol::command::zero_payload;
use nomad_protocol::{Command, DeviceInfo, DeviceStats, TorqueSetpoint};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Sends commands to the motor controller and reads its telemetry
pub struct DeviceClient {
    link: DeviceLink,
    correlator: Arc<ResponseCorrelator>,
    request_timeout: Duration,
}

impl DeviceClient {
    /// Create a client on top of an already running link
    pub fn new(link: DeviceLink, correlator: Arc<ResponseCorrelator>, request_timeout: Duration) -> Self {
        Self {
            link,
            correlator,
            request_timeout,
        }
    }

    /// Start a link on `stream` and wrap it in a client
    pub fn connect<S: TransportStream>(
        stream: S,
        transport: &'static str,
        config: &LinkConfig,
    ) -> (Self, LinkEventReceiver) {
        let correlator = Arc::new(ResponseCorrelator::new());
        let (link, events) = DeviceLink::spawn(stream, transport, correlator.clone(), config);
        (Self::new(link, correlator, config.request_timeout), events)
    }

    /// Deadline used by the convenience reads
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Transmit a command without waiting for any answer
    pub async fn send(&self, command: Command) -> Result<()> {
        info!("Sending {}", command.id());
        self.link.send(command.to_frame()).await
    }

    /// Read firmware version and hardware id. Blocking.
    pub async fn read_device_info(&self, timeout: Duration) -> Result<DeviceInfo> {
        let device_info = self.request::<DeviceInfo>(timeout).await?;
        info!("Device info: {}", device_info);
        Ok(device_info)
    }

    /// Read a fresh telemetry snapshot. Blocking.
    pub async fn get_device_stats(&self, timeout: Duration) -> Result<DeviceStats> {
        self.request::<DeviceStats>(timeout).await
    }

    async fn request<T: Reply>(&self, timeout: Duration) -> Result<T> {
        // Open the slot first so a fast reply has somewhere to land
        let pending = self.correlator.issue_request::<T>()?;

        if let Err(e) = self.link.send(zero_payload(T::KIND.command_id())).await {
            self.correlator.cancel(pending);
            return Err(e);
        }

        self.correlator.await_response(pending, timeout).await
    }

    /// Forward device log lines to `observer`
    ///
    /// The observer runs on the receive path and must not block.
    pub fn register_log_observer<F>(&self, observer: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.correlator.register_log_observer(observer);
    }

    /// Last stats snapshot returned by `get_device_stats`
    pub fn latest_stats(&self) -> Option<DeviceStats> {
        self.correlator.latest_stats()
    }

    pub fn is_connected(&self) -> bool {
        !self.link.is_closed()
    }

    // Fire-and-forget device commands

    pub async fn read_device_config(&self) -> Result<()> {
        self.send(Command::DeviceConfigRead).await
    }

    pub async fn measure_motor_resistance(&self) -> Result<()> {
        self.send(Command::MeasureResistance).await
    }

    pub async fn measure_motor_inductance(&self) -> Result<()> {
        self.send(Command::MeasureInductance).await
    }

    pub async fn measure_phase_order(&self) -> Result<()> {
        self.send(Command::MeasurePhaseOrder).await
    }

    pub async fn calibrate_motor(&self) -> Result<()> {
        self.send(Command::CalibrateMotor).await
    }

    pub async fn zero_position(&self) -> Result<()> {
        self.send(Command::ZeroPosition).await
    }

    pub async fn start_current_control(&self) -> Result<()> {
        self.send(Command::EnableCurrentControl).await
    }

    pub async fn start_voltage_control(&self) -> Result<()> {
        self.send(Command::EnableVoltageControl).await
    }

    pub async fn start_torque_control(&self) -> Result<()> {
        self.send(Command::EnableTorqueControl).await
    }

    pub async fn start_speed_control(&self) -> Result<()> {
        self.send(Command::EnableSpeedControl).await
    }

    pub async fn enter_idle_mode(&self) -> Result<()> {
        self.send(Command::EnableIdleMode).await
    }

    pub async fn restart_device(&self) -> Result<()> {
        self.send(Command::DeviceRestart).await
    }

    pub async fn abort(&self) -> Result<()> {
        self.send(Command::DeviceAbort).await
    }

    pub async fn set_voltage_setpoint(&self, v_d: f32, v_q: f32) -> Result<()> {
        self.send(Command::VoltageSetpoint { v_d, v_q }).await
    }

    pub async fn set_torque_setpoint(&self, setpoint: TorqueSetpoint) -> Result<()> {
        self.send(Command::TorqueSetpoint(setpoint)).await
    }
}
