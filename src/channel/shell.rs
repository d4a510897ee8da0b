//! Vendor command shell as a child process.
//!
//! The frame grabber runtime ships a Camera Link shell that forwards stdin
//! lines to the camera's serial port and prints echo and reply lines on
//! stdout. It prints a short banner before it accepts commands.

use super::CommandChannel;
use crate::config::ChannelConfig;
use crate::error::{AppResult, CameraError};
use std::process::Stdio;
use tokio::process::Command;

/// Spawn the command shell and return a channel ready for the first command.
pub async fn spawn_shell(config: &ChannelConfig) -> AppResult<CommandChannel> {
    tracing::info!(
        program = %config.program.display(),
        args = ?config.args,
        "Starting camera command shell"
    );

    let mut child = Command::new(&config.program)
        .args(&config.args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| {
            CameraError::Configuration(format!(
                "Failed to start command shell {}: {e}",
                config.program.display()
            ))
        })?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| CameraError::Configuration("Command shell has no stdin".into()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| CameraError::Configuration("Command shell has no stdout".into()))?;

    let mut channel = CommandChannel::new(Box::new(stdout), Box::new(stdin))
        .with_timeout(config.timeout())
        .with_line_terminator(config.line_terminator.clone())
        .with_echo(config.echo)
        .with_child(child);

    channel.skip_preamble(config.preamble_lines).await?;
    tracing::debug!(lines = config.preamble_lines, "Command shell ready");
    Ok(channel)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::channel::{CameraLink, Command, Opcode};
    use std::path::PathBuf;

    /// `sh` stands in for the vendor shell: it prints a banner and then
    /// answers every line with an echo and an acknowledge.
    fn fake_shell() -> ChannelConfig {
        let script = r###"
echo banner-1; echo banner-2
while read line; do
  [ "$line" = "##quit" ] && exit 0
  echo "$line"
  printf '>\006\r\n'
done
"###;
        ChannelConfig {
            program: PathBuf::from("sh"),
            args: vec!["-c".to_string(), script.to_string()],
            preamble_lines: 2,
            ..ChannelConfig::default()
        }
    }

    #[tokio::test]
    async fn talks_to_a_spawned_shell() {
        let mut channel = spawn_shell(&fake_shell()).await.unwrap();
        let reply = channel
            .send(&Command::set(Opcode::BlackLevel, 100), false)
            .await
            .unwrap();
        assert_eq!(reply, None);
        channel.close("##quit").await;
        assert!(channel.is_poisoned());
    }

    #[tokio::test]
    async fn missing_program_is_a_configuration_error() {
        let config = ChannelConfig {
            program: PathBuf::from("/nonexistent/clshell"),
            ..ChannelConfig::default()
        };
        assert!(matches!(
            spawn_shell(&config).await,
            Err(CameraError::Configuration(_))
        ));
    }
}
