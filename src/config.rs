//! Link configuration

use anyhow::{Context, Result};
use nomad_protocol::timing;
use std::time::Duration;

/// How to reach the motor controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportTarget {
    /// Serial port connection (e.g., "/dev/ttyACM0" or "COM3")
    Serial { port: String, baud: u32 },
    /// TCP connection to a serial bridge (e.g., "127.0.0.1:4000")
    Tcp { address: String },
}

impl Default for TransportTarget {
    fn default() -> Self {
        Self::Serial {
            port: "/dev/ttyACM0".into(),
            baud: 115_200,
        }
    }
}

impl TransportTarget {
    /// Parse `tcp:HOST:PORT` or a serial port path
    pub fn parse(target: &str, baud: u32) -> Self {
        match target.strip_prefix("tcp:") {
            Some(address) => Self::Tcp {
                address: address.to_string(),
            },
            None => Self::Serial {
                port: target.to_string(),
                baud,
            },
        }
    }
}

/// Configuration for the device link
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Transport type and parameters
    pub transport: TransportTarget,
    /// Deadline for blocking reads
    pub request_timeout: Duration,
    /// Stats polling interval used by the monitor
    pub stats_poll_interval: Duration,
    /// Size of a single transport read
    pub read_buffer_size: usize,
    /// Frames that may queue for transmission before `send` waits
    pub outbound_queue_depth: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            transport: TransportTarget::default(),
            request_timeout: Duration::from_millis(timing::REQUEST_TIMEOUT_MS),
            stats_poll_interval: Duration::from_millis(timing::STATS_POLL_INTERVAL_MS),
            read_buffer_size: 4096,
            outbound_queue_depth: 64,
        }
    }
}

impl LinkConfig {
    /// Defaults overlaid with `NOMAD_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        let baud = match lookup("NOMAD_BAUD") {
            Some(raw) => raw
                .parse::<u32>()
                .with_context(|| format!("invalid NOMAD_BAUD: {raw:?}"))?,
            None => match &config.transport {
                TransportTarget::Serial { baud, .. } => *baud,
                TransportTarget::Tcp { .. } => 115_200,
            },
        };

        match lookup("NOMAD_PORT") {
            Some(port) => config.transport = TransportTarget::parse(&port, baud),
            None => {
                if let TransportTarget::Serial { baud: b, .. } = &mut config.transport {
                    *b = baud;
                }
            }
        }

        if let Some(raw) = lookup("NOMAD_TIMEOUT_MS") {
            let ms = raw
                .parse::<u64>()
                .with_context(|| format!("invalid NOMAD_TIMEOUT_MS: {raw:?}"))?;
            config.request_timeout = Duration::from_millis(ms);
        }

        if let Some(raw) = lookup("NOMAD_POLL_MS") {
            let ms = raw
                .parse::<u64>()
                .with_context(|| format!("invalid NOMAD_POLL_MS: {raw:?}"))?;
            config.stats_poll_interval = Duration::from_millis(ms);
        }

        Ok(config)
    }
}
