//! Camera command channel over a plain serial port.

use super::CommandChannel;
use crate::config::ChannelConfig;
use crate::error::{AppResult, CameraError};
use tokio::task::spawn_blocking;
use tokio_serial::SerialPortBuilderExt;

/// Open the configured serial port (8N1, no flow control).
pub async fn open_serial(config: &ChannelConfig) -> AppResult<CommandChannel> {
    let path = config.serial_port.clone();
    let baud_rate = config.baud_rate;

    tracing::info!(port = %path, baud_rate, "Opening camera serial port");

    let stream = spawn_blocking(move || {
        tokio_serial::new(&path, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| {
                CameraError::Configuration(format!("Failed to open serial port {path}: {e}"))
            })
    })
    .await
    .map_err(|e| CameraError::Configuration(format!("Serial open task failed: {e}")))??;

    Ok(CommandChannel::from_stream(stream)
        .with_timeout(config.timeout())
        .with_line_terminator(config.line_terminator.clone())
        .with_echo(config.echo))
}
