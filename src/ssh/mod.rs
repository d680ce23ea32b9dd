//! SSH connectivity: credential resolution, connection, remote execution
//!
//! Built on russh. The pieces line up with how a run uses them:
//! [`CredentialResolver`] turns a key path into a [`ResolvedAuth`],
//! [`SshClient`] dials and authenticates, and the resulting
//! [`RemoteSession`] executes commands until it is closed.

mod agent;
mod auth;
mod client;
mod config;
mod error;
pub mod known_hosts;
mod session;

pub use auth::{CredentialResolver, PassphrasePrompt, ResolvedAuth, TerminalPrompt};
pub use client::{ClientHandler, SshClient};
pub use config::{HostKeyPolicy, SshConfig};
pub use error::SshError;
pub use known_hosts::{HostKeyVerification, KnownHosts};
pub use session::{CommandResult, RemoteExec, RemoteSession};
