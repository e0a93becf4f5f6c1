use anyhow::{Context, Result};
use nomad_host::connection::{LinkEvent, LinkEventReceiver};
use nomad_host::transport::{SerialConnector, TcpConnector, TransportConnector};
use nomad_host::{DeviceClient, DeviceError, LinkConfig, TransportTarget};
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let config = LinkConfig::from_env().context("invalid link configuration")?;
    info!("NomadBLDC monitor starting: {:?}", config.transport);

    let (client, mut events) = connect(&config).await?;

    client.register_log_observer(|line| info!(target: "device", "{}", line.trim_end()));

    match client.read_device_info(config.request_timeout).await {
        Ok(device_info) => info!("Connected to {}", device_info),
        Err(e) => warn!("Device info unavailable: {}", e),
    }

    monitor(&client, &mut events, &config).await;

    // Let the link flush anything still queued before exiting
    drop(client);
    let _ = tokio::time::timeout(Duration::from_secs(1), events.recv()).await;
    Ok(())
}

async fn connect(config: &LinkConfig) -> Result<(DeviceClient, LinkEventReceiver)> {
    match &config.transport {
        TransportTarget::Serial { port, baud } => {
            let connector = SerialConnector::new(port.clone(), *baud);
            let stream = connector.connect().await?;
            Ok(DeviceClient::connect(stream, connector.name(), config))
        }
        TransportTarget::Tcp { address } => {
            let connector = TcpConnector::new(address.clone());
            let stream = connector.connect().await?;
            Ok(DeviceClient::connect(stream, connector.name(), config))
        }
    }
}

/// Poll telemetry until the link drops or Ctrl-C
async fn monitor(client: &DeviceClient, events: &mut LinkEventReceiver, config: &LinkConfig) {
    let mut ticker = tokio::time::interval(config.stats_poll_interval);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match client.get_device_stats(config.request_timeout).await {
                    Ok(stats) => info!(
                        "fault={} mode={} uptime={}s vbus={:.2}V driver={:.1}C fet={:.1}C motor={:.1}C",
                        stats.fault,
                        stats.control_status,
                        stats.uptime,
                        stats.voltage_bus,
                        stats.driver_temp,
                        stats.fet_temp,
                        stats.motor_temp,
                    ),
                    Err(e) if e.is_unresponsive() => {
                        warn!("Device not responding ({}); check the connection", e);
                    }
                    Err(DeviceError::RequestAlreadyInFlight(_)) => {}
                    Err(e) => error!("Stats read failed: {}", e),
                }
            }

            Some(LinkEvent::Disconnected { reason }) = events.recv() => {
                error!("Link lost: {}", reason);
                break;
            }

            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, putting device in idle mode");
                if let Err(e) = client.enter_idle_mode().await {
                    warn!("Failed to send idle mode: {}", e);
                }
                break;
            }
        }
    }
}
