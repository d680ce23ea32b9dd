//! Remote command execution over an established SSH connection

use async_trait::async_trait;
use russh::{client, ChannelMsg, Disconnect};
use tracing::{debug, info, warn};

use super::client::ClientHandler;
use super::error::SshError;

/// Captured output of one remote command
#[derive(Debug, Clone, Default)]
pub struct CommandResult {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// Session seam for the orchestrator. [`RemoteSession`] is the real
/// implementation; orchestration tests substitute a scripted one.
#[async_trait]
pub trait RemoteExec: Send {
    async fn execute(&mut self, command: &str) -> Result<CommandResult, SshError>;

    /// Release the underlying connection. The orchestrator calls this
    /// exactly once per run, on success and error paths alike.
    async fn close(&mut self) -> Result<(), SshError>;
}

/// An authenticated SSH session. Owns the connection handle exclusively;
/// the orchestrator disconnects it through [`RemoteExec::close`].
pub struct RemoteSession {
    handle: client::Handle<ClientHandler>,
    address: String,
}

impl RemoteSession {
    pub(crate) fn new(handle: client::Handle<ClientHandler>, address: String) -> Self {
        Self { handle, address }
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

#[async_trait]
impl RemoteExec for RemoteSession {
    /// Run `command` on a fresh session channel and capture both output
    /// streams to completion. The exit status is logged but not inspected;
    /// callers judge success by the output they receive.
    async fn execute(&mut self, command: &str) -> Result<CommandResult, SshError> {
        info!("Running remote command: {}", command);

        let mut channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| SshError::CommandFailed(format!("channel open: {}", e)))?;

        channel
            .exec(true, command)
            .await
            .map_err(|e| SshError::CommandFailed(format!("exec request: {}", e)))?;

        let mut result = CommandResult::default();
        let mut exit_status = None;

        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { data } => {
                    result.stdout.extend_from_slice(&data);
                }
                ChannelMsg::ExtendedData { data, ext } => {
                    if ext == 1 {
                        result.stderr.extend_from_slice(&data);
                    }
                }
                ChannelMsg::ExitStatus { exit_status: code } => {
                    exit_status = Some(code);
                }
                ChannelMsg::ExitSignal { signal_name, .. } => {
                    warn!("Remote command killed by signal {:?}", signal_name);
                }
                ChannelMsg::Eof => {}
                ChannelMsg::Close => break,
                _ => {}
            }
        }

        debug!(
            "Remote command finished: {} stdout bytes, {} stderr bytes, exit status {:?}",
            result.stdout.len(),
            result.stderr.len(),
            exit_status
        );

        Ok(result)
    }

    /// Disconnect from the server
    async fn close(&mut self) -> Result<(), SshError> {
        debug!("Disconnecting from {}", self.address);
        self.handle
            .disconnect(Disconnect::ByApplication, "done", "en")
            .await?;
        Ok(())
    }
}
