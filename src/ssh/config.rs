//! SSH connection configuration

use serde::{Deserialize, Serialize};

/// SSH connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshConfig {
    /// Remote host address
    pub host: String,

    /// SSH port (default: 22)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Username for authentication (default: root)
    #[serde(default = "default_user")]
    pub user: String,

    /// How to treat the server's host key during the handshake
    #[serde(default)]
    pub host_key_policy: HostKeyPolicy,
}

impl SshConfig {
    /// `host:port` form used for dialing and error messages
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Host key handling during the SSH handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostKeyPolicy {
    /// Check the presented key against ~/.ssh/known_hosts.
    /// Unknown and changed keys are rejected.
    #[default]
    Verify,

    /// Accept whatever key the server presents. Vulnerable to
    /// man-in-the-middle attacks; requires an explicit opt-in flag.
    InsecureAcceptAny,
}

fn default_port() -> u16 {
    22
}

fn default_user() -> String {
    "root".to_string()
}
