//! Receive/transmit pump between a transport stream and the correlator

use crate::config::LinkConfig;
use crate::correlator::ResponseCorrelator;
use crate::error::{DeviceError, Result};
use crate::transport::TransportStream;
use nomad_protocol::{Frame, FrameDecoder, FrameEncoder};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Events emitted by the link task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// Transport failed or closed; the link task has exited
    Disconnected { reason: String },
}

pub type LinkEventReceiver = mpsc::Receiver<LinkEvent>;

/// Sending half of a running link. Cheap to clone.
#[derive(Debug, Clone)]
pub struct DeviceLink {
    transport: &'static str,
    outbound_tx: mpsc::Sender<Frame>,
}

impl DeviceLink {
    /// Start the link task on `stream`
    ///
    /// Every inbound frame is handed to `correlator` in arrival order. The
    /// task runs until the transport fails or every `DeviceLink` clone is
    /// dropped.
    pub fn spawn<S: TransportStream>(
        stream: S,
        transport: &'static str,
        correlator: Arc<ResponseCorrelator>,
        config: &LinkConfig,
    ) -> (Self, LinkEventReceiver) {
        let (outbound_tx, outbound_rx) = mpsc::channel::<Frame>(config.outbound_queue_depth.max(1));
        let (event_tx, event_rx) = mpsc::channel::<LinkEvent>(4);
        let read_buffer_size = config.read_buffer_size.max(64);

        info!("Device link up via {}", transport);

        tokio::spawn(async move {
            link_loop(stream, correlator, outbound_rx, event_tx, read_buffer_size).await;
        });

        (
            Self {
                transport,
                outbound_tx,
            },
            event_rx,
        )
    }

    /// Queue a frame for transmission
    pub async fn send(&self, frame: Frame) -> Result<()> {
        self.outbound_tx
            .send(frame)
            .await
            .map_err(|_| DeviceError::LinkClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.outbound_tx.is_closed()
    }

    /// Name of the underlying transport
    pub fn transport(&self) -> &'static str {
        self.transport
    }
}

async fn link_loop<S: TransportStream>(
    stream: S,
    correlator: Arc<ResponseCorrelator>,
    mut outbound_rx: mpsc::Receiver<Frame>,
    event_tx: mpsc::Sender<LinkEvent>,
    read_buffer_size: usize,
) {
    let (mut reader, mut writer) = tokio::io::split(stream);
    let mut decoder = FrameDecoder::new();
    let mut encoder = FrameEncoder::new();
    let mut read_buf = vec![0u8; read_buffer_size];

    let reason = loop {
        tokio::select! {
            outbound = outbound_rx.recv() => {
                let Some(frame) = outbound else {
                    break "link handle dropped".to_string();
                };

                debug!("Sending {} ({} byte payload)", frame.command_id(), frame.payload().len());
                encoder.encode(&frame);
                // Coalesce whatever else is already queued
                while let Ok(frame) = outbound_rx.try_recv() {
                    debug!("Sending {} ({} byte payload)", frame.command_id(), frame.payload().len());
                    encoder.encode(&frame);
                }

                let bytes = encoder.take();
                if let Err(e) = writer.write_all(&bytes).await {
                    break format!("write error: {}", e);
                }
                if let Err(e) = writer.flush().await {
                    break format!("flush error: {}", e);
                }
            }

            result = reader.read(&mut read_buf) => {
                match result {
                    Ok(0) => break "device closed the connection".to_string(),
                    Ok(n) => {
                        decoder.extend(&read_buf[..n]);
                        dispatch_frames(&mut decoder, &correlator);
                    }
                    Err(e) => break format!("read error: {}", e),
                }
            }
        }
    };

    warn!("Device link down: {}", reason);
    drop(outbound_rx);

    // Wake anyone still waiting on a response
    correlator.close();

    let mut stream = reader.unsplit(writer);
    if let Err(e) = TransportStream::shutdown(&mut stream).await {
        debug!("Transport shutdown failed: {}", e);
    }

    let _ = event_tx.send(LinkEvent::Disconnected { reason }).await;
}

/// Hand every complete frame in the decoder to the correlator
fn dispatch_frames(decoder: &mut FrameDecoder, correlator: &ResponseCorrelator) {
    loop {
        match decoder.decode_next() {
            Ok(Some(frame)) => {
                let disposition = correlator.on_frame_received(&frame);
                debug!("Received {}: {:?}", frame.command_id(), disposition);
            }
            Ok(None) => break,
            // Only the offending frame is lost
            Err(e) => warn!("Dropping inbound frame: {}", e),
        }
    }
}
