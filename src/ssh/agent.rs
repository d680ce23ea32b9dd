//! SSH agent probing
//!
//! Connects to the system agent over the socket captured from
//! `SSH_AUTH_SOCK` and looks for an identity matching a local public key.
//! The caller keeps the connection alive through authentication; dropping
//! it releases the socket. Every failure here is a soft failure: the
//! credential chain falls through to the passphrase prompt.

use std::path::Path;

use russh::keys::agent::client::{AgentClient, AgentStream};
use russh::keys::PublicKey;
use tracing::debug;

use super::error::SshError;

/// Type-erased agent connection, usable as a russh `Signer`
pub type AgentConnection = AgentClient<Box<dyn AgentStream + Send + Unpin + 'static>>;

/// Connect to the agent listening on `socket`
#[cfg(unix)]
pub async fn connect(socket: &Path) -> Result<AgentConnection, SshError> {
    let agent = AgentClient::connect_uds(socket).await.map_err(|e| {
        SshError::AgentUnavailable(format!(
            "Failed to connect to SSH agent at {}: {}",
            socket.display(),
            e
        ))
    })?;
    debug!("Connected to SSH agent at {}", socket.display());
    Ok(agent.dynamic())
}

#[cfg(not(unix))]
pub async fn connect(_socket: &Path) -> Result<AgentConnection, SshError> {
    Err(SshError::AgentUnavailable(
        "SSH agent lookup is only supported on Unix".to_string(),
    ))
}

/// Find the agent identity whose key matches the public key stored at
/// `public_key_path` (the `.pub` companion of the private key).
pub async fn find_identity(
    agent: &mut AgentConnection,
    public_key_path: &Path,
) -> Result<PublicKey, SshError> {
    let wanted = read_public_key(public_key_path)?;

    let identities = agent
        .request_identities()
        .await
        .map_err(|e| SshError::AgentUnavailable(format!("Failed to list agent keys: {}", e)))?;

    if identities.is_empty() {
        debug!("SSH agent holds no identities");
        return Err(SshError::NoMatchingAgentKey {
            path: public_key_path.to_path_buf(),
        });
    }

    debug!("SSH agent reports {} identities", identities.len());

    identities
        .into_iter()
        .find(|identity| identity.key_data() == wanted.key_data())
        .ok_or_else(|| SshError::NoMatchingAgentKey {
            path: public_key_path.to_path_buf(),
        })
}

/// Read and parse an OpenSSH public key file
fn read_public_key(path: &Path) -> Result<PublicKey, SshError> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        debug!("Could not read public key {}: {}", path.display(), e);
        SshError::NoMatchingAgentKey {
            path: path.to_path_buf(),
        }
    })?;

    PublicKey::from_openssh(contents.trim()).map_err(|e| {
        debug!("Could not parse public key {}: {}", path.display(), e);
        SshError::NoMatchingAgentKey {
            path: path.to_path_buf(),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const PUBLIC_KEY: &str =
        "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIDOZ9ruidLzi6zaSQNaqYQlsv3hvxARG3ddOEoTTk+2u test@example";

    #[test]
    fn test_read_public_key() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("id_ed25519.pub");
        std::fs::write(&path, format!("{}\n", PUBLIC_KEY)).unwrap();

        let key = read_public_key(&path).unwrap();
        assert_eq!(key.algorithm().as_str(), "ssh-ed25519");
        assert_eq!(key.comment(), "test@example");
    }

    #[test]
    fn test_read_public_key_rejects_garbage() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("id_ed25519.pub");
        std::fs::write(&path, "definitely not a key\n").unwrap();

        assert!(matches!(
            read_public_key(&path),
            Err(SshError::NoMatchingAgentKey { .. })
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_connect_to_missing_socket() {
        let dir = tempdir().unwrap();
        let socket = dir.path().join("no-agent.sock");

        match connect(&socket).await {
            Err(SshError::AgentUnavailable(msg)) => {
                assert!(msg.contains("no-agent.sock"));
            }
            Ok(_) => panic!("connected to a socket that does not exist"),
            Err(e) => panic!("unexpected error: {:?}", e),
        }
    }
}
