//! Byte links the host can reach a motor controller over

use anyhow::Result;
use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream};

/// Open byte pipe to the controller. The link task splits it into read and
/// write halves and reunites them for `shutdown`.
#[async_trait]
pub trait TransportStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {
    /// Flush pending output and release the port or socket
    async fn shutdown(&mut self) -> Result<()>;
}

/// Opens a [`TransportStream`] from configured parameters (port and baud,
/// bridge address, ...)
#[async_trait]
pub trait TransportConnector: Send + Sync {
    type Stream: TransportStream;

    /// Fails if the device or bridge cannot be opened
    async fn connect(&self) -> Result<Self::Stream>;

    /// Short label used in link logs, e.g. "Serial"
    fn name(&self) -> &'static str;
}

/// In-process pipe, used to run the host against a simulated device
#[async_trait]
impl TransportStream for DuplexStream {
    async fn shutdown(&mut self) -> Result<()> {
        tokio::io::AsyncWriteExt::shutdown(self).await?;
        Ok(())
    }
}
