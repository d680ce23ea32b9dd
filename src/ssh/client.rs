//! SSH client connection using russh

use std::net::ToSocketAddrs;
use std::sync::Arc;
use std::time::Duration;

use russh::client;
use russh::keys::key::PrivateKeyWithHashAlg;
use russh::keys::PublicKey;
use tracing::{debug, info, warn};

use super::auth::ResolvedAuth;
use super::config::{HostKeyPolicy, SshConfig};
use super::error::SshError;
use super::known_hosts::{HostKeyVerification, KnownHosts};
use super::session::RemoteSession;

/// SSH client: owns the connection settings, produces a [`RemoteSession`]
pub struct SshClient {
    config: SshConfig,
}

impl SshClient {
    pub fn new(config: SshConfig) -> Self {
        Self { config }
    }

    /// Connect, verify the host key per policy and authenticate with the
    /// resolved credentials. Blocks until the handshake completes; there is
    /// no dial timeout, matching the interactive ssh it replaces.
    pub async fn connect(self, auth: ResolvedAuth) -> Result<RemoteSession, SshError> {
        let address = self.config.address();

        info!("Connecting to {}", address);

        let socket_addr = address
            .to_socket_addrs()
            .map_err(|e| SshError::ConnectionFailed(format!("Failed to resolve {}: {}", address, e)))?
            .next()
            .ok_or_else(|| {
                SshError::ConnectionFailed(format!("No address found for {}", address))
            })?;

        let ssh_config = client::Config {
            inactivity_timeout: None,
            keepalive_interval: Some(Duration::from_secs(30)),
            keepalive_max: 3,
            ..Default::default()
        };

        let handler = ClientHandler::new(
            self.config.host.clone(),
            self.config.port,
            self.config.host_key_policy,
        );

        let mut handle = client::connect(Arc::new(ssh_config), socket_addr, handler)
            .await
            .map_err(|e| match e {
                SshError::HostKeyRejected(_) => e,
                other => SshError::ConnectionFailed(format!("{}: {}", address, other)),
            })?;

        debug!("SSH handshake completed");
        debug!("Authenticating with {}", auth.describe());

        let authenticated = match auth {
            ResolvedAuth::Key(key) => {
                let key_with_hash = PrivateKeyWithHashAlg::new(key, None);
                handle
                    .authenticate_publickey(&self.config.user, key_with_hash)
                    .await
                    .map_err(|e| SshError::AuthenticationFailed(e.to_string()))?
            }
            ResolvedAuth::Agent {
                mut agent,
                identity,
            } => handle
                .authenticate_publickey_with(&self.config.user, identity, None, &mut agent)
                .await
                .map_err(|e| SshError::AuthenticationFailed(e.to_string()))?,
        };

        if !authenticated.success() {
            return Err(SshError::AuthenticationFailed(format!(
                "Server rejected public key authentication for {}@{}",
                self.config.user, self.config.host
            )));
        }

        info!("Authenticated as {}", self.config.user);

        Ok(RemoteSession::new(handle, address))
    }
}

/// Client handler for russh callbacks. Only the host key check matters here.
pub struct ClientHandler {
    host: String,
    port: u16,
    policy: HostKeyPolicy,
    known_hosts: KnownHosts,
}

impl ClientHandler {
    pub fn new(host: String, port: u16, policy: HostKeyPolicy) -> Self {
        Self::with_known_hosts(host, port, policy, KnownHosts::open_default())
    }

    pub fn with_known_hosts(
        host: String,
        port: u16,
        policy: HostKeyPolicy,
        known_hosts: KnownHosts,
    ) -> Self {
        Self {
            host,
            port,
            policy,
            known_hosts,
        }
    }
}

impl client::Handler for ClientHandler {
    type Error = SshError;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        if self.policy == HostKeyPolicy::InsecureAcceptAny {
            warn!(
                "Accepting host key for {}:{} WITHOUT verification (fingerprint: {})",
                self.host,
                self.port,
                KnownHosts::fingerprint(server_public_key)
            );
            return Ok(true);
        }

        match self
            .known_hosts
            .verify(&self.host, self.port, server_public_key)
        {
            HostKeyVerification::Verified => {
                debug!("Host key verified for {}:{}", self.host, self.port);
                Ok(true)
            }
            HostKeyVerification::Unknown { fingerprint } => {
                warn!(
                    "Unknown host key for {}:{} (fingerprint: {})",
                    self.host, self.port, fingerprint
                );
                Err(SshError::HostKeyRejected(format!(
                    "unknown host {}:{} (fingerprint: {}). Add the host to ~/.ssh/known_hosts, \
                     for example with ssh-keyscan, or pass --insecure-accept-host-key",
                    self.host, self.port, fingerprint
                )))
            }
            HostKeyVerification::Changed {
                expected_fingerprint,
                actual_fingerprint,
            } => {
                warn!(
                    "HOST KEY CHANGED for {}:{}! Expected {}, got {}",
                    self.host, self.port, expected_fingerprint, actual_fingerprint
                );
                Err(SshError::HostKeyRejected(format!(
                    "host key for {}:{} has changed (expected {}, got {}). \
                     This could indicate a man-in-the-middle attack. If the change is \
                     legitimate, remove the old entry from ~/.ssh/known_hosts",
                    self.host, self.port, expected_fingerprint, actual_fingerprint
                )))
            }
        }
    }
}
