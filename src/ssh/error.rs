//! SSH error types

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SshError {
    #[error("Failed to read key file {path}: {source}")]
    KeyRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse key file {path}: {reason}")]
    KeyParse { path: PathBuf, reason: String },

    #[error("SSH agent not available: {0}")]
    AgentUnavailable(String),

    #[error("No agent identity matches {path}")]
    NoMatchingAgentKey { path: PathBuf },

    #[error("Failed to read passphrase: {0}")]
    PassphraseRead(std::io::Error),

    #[error("Could not decrypt {path} with the given passphrase")]
    PassphraseDecrypt { path: PathBuf },

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Host key rejected: {0}")]
    HostKeyRejected(String),

    #[error("Remote command failed: {0}")]
    CommandFailed(String),

    #[error("SSH protocol error: {0}")]
    Protocol(String),
}

impl From<russh::Error> for SshError {
    fn from(err: russh::Error) -> Self {
        SshError::Protocol(err.to_string())
    }
}
