//! Command channel to the camera's serial command interface.
//!
//! Every call to [`CommandChannel::send`] performs exactly one request/response
//! cycle: the command line is written, the echoed line is consumed (when the
//! transport echoes), and one reply line is read and decoded. The channel
//! borrows `&mut self` for the whole exchange, so commands can never be
//! interleaved or pipelined.
//!
//! Transports:
//! - the vendor command shell as a child process ([`shell`]),
//! - a serial port (feature `serial`),
//! - any in-memory `AsyncRead + AsyncWrite` stream, e.g. `tokio::io::duplex`
//!   paired with [`crate::mock::SimulatedCamera`].

pub mod command;
#[cfg(feature = "serial")]
pub mod serial;
pub mod shell;

pub use command::{parse_reply, Command, Opcode, Reply};

use crate::error::ChannelError;
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::Child;
use tokio::time::timeout;

/// Any type usable as a bidirectional command transport.
pub trait LinkIO: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> LinkIO for T {}

type DynReader = Box<dyn AsyncRead + Unpin + Send>;
type DynWriter = Box<dyn AsyncWrite + Unpin + Send>;

/// Capability the controller needs from the camera link.
#[async_trait]
pub trait CameraLink: Send {
    /// Perform one request/response exchange.
    ///
    /// Returns the decoded payload when `expects_reply` is set, `None` for
    /// plain set-commands.
    async fn send(
        &mut self,
        command: &Command,
        expects_reply: bool,
    ) -> Result<Option<String>, ChannelError>;

    /// Query a device-computed limit such as `#a` or `#A`.
    async fn query_limit(&mut self, opcode: Opcode) -> Result<u32, ChannelError> {
        let command = Command::new(opcode);
        let reply = self.send(&command, true).await?.unwrap_or_default();
        parse_limit(&reply).ok_or_else(|| ChannelError::Malformed {
            command: command.to_string(),
            reply,
        })
    }

    /// End the session, e.g. by sending the shell's quit command.
    async fn disconnect(&mut self, _quit_command: &str) {}
}

fn parse_limit(reply: &str) -> Option<u32> {
    let value: f64 = reply.trim().parse().ok()?;
    if value.is_finite() && value >= 0.0 && value <= f64::from(u32::MAX) {
        Some(value.floor() as u32)
    } else {
        None
    }
}

/// Line-oriented command channel.
pub struct CommandChannel {
    reader: BufReader<DynReader>,
    writer: DynWriter,
    timeout: Duration,
    line_terminator: String,
    echo: bool,
    poisoned: bool,
    child: Option<Child>,
}

impl CommandChannel {
    /// Default per-line read timeout.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

    /// Build a channel from separate read and write halves.
    pub fn new(reader: DynReader, writer: DynWriter) -> Self {
        Self {
            reader: BufReader::new(reader),
            writer,
            timeout: Self::DEFAULT_TIMEOUT,
            line_terminator: "\n".to_string(),
            echo: true,
            poisoned: false,
            child: None,
        }
    }

    /// Build a channel over a single bidirectional stream.
    pub fn from_stream<S: LinkIO + 'static>(stream: S) -> Self {
        let (read, write) = tokio::io::split(stream);
        Self::new(Box::new(read), Box::new(write))
    }

    /// Per-line read timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Line ending appended to every command.
    pub fn with_line_terminator(mut self, terminator: impl Into<String>) -> Self {
        self.line_terminator = terminator.into();
        self
    }

    /// Whether the transport echoes every command line before replying.
    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    pub(crate) fn with_child(mut self, child: Child) -> Self {
        self.child = Some(child);
        self
    }

    /// True once a transport failure made the channel unusable.
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Discard `lines` banner lines printed by the transport on startup.
    pub async fn skip_preamble(&mut self, lines: usize) -> Result<(), ChannelError> {
        for n in 0..lines {
            let line = self.read_line("<preamble>").await?;
            tracing::trace!(line = n, text = %line.trim_end(), "Skipped shell preamble");
        }
        Ok(())
    }

    /// Send a raw line without waiting for a reply and terminate the shell.
    pub async fn close(&mut self, quit_command: &str) {
        if !self.poisoned {
            let line = format!("{quit_command}{}", self.line_terminator);
            if let Err(e) = self.writer.write_all(line.as_bytes()).await {
                tracing::debug!(error = %e, "Failed to send quit command");
            }
            let _ = self.writer.flush().await;
        }
        self.poisoned = true;
        if let Some(mut child) = self.child.take() {
            let waited = timeout(self.timeout, child.wait()).await;
            match waited {
                Ok(Ok(status)) => tracing::debug!(%status, "Command shell exited"),
                _ => {
                    tracing::warn!("Command shell did not exit, killing it");
                    let _ = child.kill().await;
                }
            }
        }
    }

    async fn exchange(
        &mut self,
        text: &str,
        expects_reply: bool,
    ) -> Result<Option<String>, ChannelError> {
        tracing::trace!(command = %text, "Sending camera command");
        let line = format!("{text}{}", self.line_terminator);
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.flush().await?;

        if self.echo {
            let echo = self.read_line(text).await?;
            if echo.trim() != text {
                self.poisoned = true;
                return Err(ChannelError::Malformed {
                    command: text.to_string(),
                    reply: echo,
                });
            }
        }

        let raw = self.read_line(text).await?;
        tracing::trace!(command = %text, reply = ?raw, "Camera reply");

        match parse_reply(&raw) {
            Reply::Nak => Err(ChannelError::Rejected {
                command: text.to_string(),
            }),
            Reply::Ack if expects_reply => Err(ChannelError::Malformed {
                command: text.to_string(),
                reply: raw,
            }),
            Reply::Ack => Ok(None),
            Reply::Value(value) if expects_reply => Ok(Some(value)),
            Reply::Value(value) => {
                tracing::debug!(command = %text, reply = %value, "Ignoring payload on set-command");
                Ok(None)
            }
        }
    }

    async fn read_line(&mut self, command: &str) -> Result<String, ChannelError> {
        let mut buf = Vec::new();
        match timeout(self.timeout, self.reader.read_until(b'\n', &mut buf)).await {
            Err(_) => Err(ChannelError::Timeout {
                command: command.to_string(),
                timeout: self.timeout,
            }),
            Ok(Err(e)) => Err(ChannelError::Io(e)),
            Ok(Ok(0)) => Err(ChannelError::Closed),
            Ok(Ok(_)) => Ok(String::from_utf8_lossy(&buf).into_owned()),
        }
    }
}

#[async_trait]
impl CameraLink for CommandChannel {
    async fn send(
        &mut self,
        command: &Command,
        expects_reply: bool,
    ) -> Result<Option<String>, ChannelError> {
        if self.poisoned {
            return Err(ChannelError::Closed);
        }
        let text = command.to_string();
        let result = self.exchange(&text, expects_reply).await;
        if let Err(err) = &result {
            if !err.is_recoverable() {
                self.poisoned = true;
                tracing::warn!(command = %text, error = %err, "Command channel failed");
            }
        }
        result
    }

    async fn disconnect(&mut self, quit_command: &str) {
        self.close(quit_command).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncBufReadExt, AsyncWriteExt, BufReader as TokioBufReader};

    /// Reads one command from the device side and answers with `reply`.
    async fn answer(device: &mut TokioBufReader<tokio::io::DuplexStream>, reply: &str) -> String {
        let mut line = String::new();
        device.read_line(&mut line).await.unwrap();
        let echo = line.clone();
        device.get_mut().write_all(echo.as_bytes()).await.unwrap();
        device
            .get_mut()
            .write_all(format!("{reply}\r\n").as_bytes())
            .await
            .unwrap();
        line.trim_end().to_string()
    }

    #[tokio::test]
    async fn set_command_round_trip() {
        let (host, device) = duplex(256);
        let mut channel = CommandChannel::from_stream(host);
        let mut device = TokioBufReader::new(device);

        let command = Command::set(Opcode::Gain, 2);
        let (result, seen) = tokio::join!(
            channel.send(&command, false),
            answer(&mut device, ">\u{06}")
        );
        assert_eq!(result.unwrap(), None);
        assert_eq!(seen, "#G(2)");
    }

    #[tokio::test]
    async fn query_returns_stripped_payload() {
        let (host, device) = duplex(256);
        let mut channel = CommandChannel::from_stream(host);
        let mut device = TokioBufReader::new(device);

        let (limit, _) = tokio::join!(
            channel.query_limit(Opcode::MaxExposure),
            answer(&mut device, ">33331\u{06}")
        );
        assert_eq!(limit.unwrap(), 33331);
    }

    #[tokio::test]
    async fn rejection_token_is_reported_and_channel_stays_usable() {
        let (host, device) = duplex(256);
        let mut channel = CommandChannel::from_stream(host);
        let mut device = TokioBufReader::new(device);

        let command = Command::set(Opcode::Gain, 7);
        let (result, _) = tokio::join!(
            channel.send(&command, false),
            answer(&mut device, ">\u{15}")
        );
        assert!(matches!(result, Err(ChannelError::Rejected { .. })));
        assert!(!channel.is_poisoned());
    }

    #[tokio::test]
    async fn silent_device_times_out_and_poisons_channel() {
        let (host, _device) = duplex(256);
        let mut channel =
            CommandChannel::from_stream(host).with_timeout(Duration::from_millis(20));

        let result = channel.send(&Command::new(Opcode::MaxFrameRate), true).await;
        assert!(matches!(result, Err(ChannelError::Timeout { .. })));
        assert!(channel.is_poisoned());

        let again = channel.send(&Command::new(Opcode::MaxFrameRate), true).await;
        assert!(matches!(again, Err(ChannelError::Closed)));
    }

    #[tokio::test]
    async fn closed_transport_reports_closed() {
        let (host, device) = duplex(256);
        drop(device);
        let mut channel = CommandChannel::from_stream(host);
        let result = channel.send(&Command::set(Opcode::FpnCorrection, 1), false).await;
        assert!(result.is_err());
        assert!(channel.is_poisoned());
    }

    #[tokio::test]
    async fn preamble_lines_are_skipped() {
        let (host, mut device) = duplex(256);
        device
            .write_all(b"clshell\r\nversion 5.7\r\nboard 0\r\nport 0\r\nready\r\n")
            .await
            .unwrap();
        let mut channel = CommandChannel::from_stream(host).with_echo(false);
        channel.skip_preamble(5).await.unwrap();

        let mut device = TokioBufReader::new(device);
        let (result, _) = tokio::join!(
            channel.query_limit(Opcode::MaxFrameRate),
            async {
                let mut line = String::new();
                device.read_line(&mut line).await.unwrap();
                device.get_mut().write_all(b">507\x06\r\n").await.unwrap();
            }
        );
        assert_eq!(result.unwrap(), 507);
    }

    #[test]
    fn limits_parse_integers_and_floats() {
        assert_eq!(parse_limit("507"), Some(507));
        assert_eq!(parse_limit(" 33331.8 "), Some(33331));
        assert_eq!(parse_limit("-1"), None);
        assert_eq!(parse_limit("abc"), None);
    }
}
