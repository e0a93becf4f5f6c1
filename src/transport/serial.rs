//! Serial transport for USB/UART links

use crate::transport::traits::{TransportConnector, TransportStream};
use anyhow::{Context as _, Result};
use async_trait::async_trait;
use tokio_serial::{SerialPortBuilderExt, SerialStream};

#[async_trait]
impl TransportStream for SerialStream {
    async fn shutdown(&mut self) -> Result<()> {
        tokio::io::AsyncWriteExt::shutdown(self).await?;
        Ok(())
    }
}

/// Opens a serial port at a fixed baud rate
pub struct SerialConnector {
    port: String,
    baud: u32,
}

impl SerialConnector {
    pub fn new(port: impl Into<String>, baud: u32) -> Self {
        Self {
            port: port.into(),
            baud,
        }
    }

    pub fn port(&self) -> &str {
        &self.port
    }
}

#[async_trait]
impl TransportConnector for SerialConnector {
    type Stream = SerialStream;

    async fn connect(&self) -> Result<Self::Stream> {
        tokio_serial::new(&self.port, self.baud)
            .open_native_async()
            .with_context(|| format!("failed to open {} at {} baud", self.port, self.baud))
    }

    fn name(&self) -> &'static str {
        "Serial"
    }
}
