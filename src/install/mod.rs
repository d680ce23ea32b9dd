//! k3s installation over SSH
//!
//! One run walks a fixed sequence:
//!
//! 1. Resolve SSH credentials for the configured private key
//! 2. Connect and authenticate
//! 3. Run the k3s installer on the host (unless skipped)
//! 4. Read `/etc/rancher/k3s/k3s.yaml`
//! 5. Point the server URL at the public address
//! 6. Merge with the existing local kubeconfig (opt-in)
//! 7. Write the result, mode 0600
//!
//! Each phase failure aborts the run with a phase-specific error; nothing
//! is retried and remote side effects are not rolled back. The SSH session
//! is closed on both the success and the failure path.

use std::path::PathBuf;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::kubeconfig::{
    merge_with_existing, rewrite_loopback, write_kubeconfig, Flattener, KubeconfigError,
    KubectlFlattener,
};
use crate::ssh::{
    CredentialResolver, HostKeyPolicy, RemoteExec, SshClient, SshConfig, SshError,
};

/// Installer script endpoint, piped into `sh` on the target host
const INSTALL_SCRIPT_URL: &str = "https://get.k3s.io";

/// Where k3s leaves the admin kubeconfig on the host
const K3S_KUBECONFIG_PATH: &str = "/etc/rancher/k3s/k3s.yaml";

/// k3s version installed when none is requested
pub const DEFAULT_K3S_VERSION: &str = "v1.33.4+k3s1";

/// Configuration for one installation run
#[derive(Debug, Clone)]
pub struct InstallConfig {
    /// Public address of the target host; also becomes the TLS SAN and
    /// the server address in the saved kubeconfig
    pub host: String,
    /// SSH port
    pub port: u16,
    /// SSH username
    pub user: String,
    /// Path to the SSH private key
    pub ssh_key: PathBuf,
    /// Where to write the kubeconfig locally
    pub local_path: PathBuf,
    /// Merge into an existing kubeconfig at `local_path` instead of
    /// replacing it
    pub merge: bool,
    /// Skip the installer and only fetch the kubeconfig
    pub skip_install: bool,
    /// k3s version passed to the installer
    pub k3s_version: String,
    /// Extra arguments appended to the k3s server invocation
    pub k3s_extra_args: String,
    /// Host key handling for the connection
    pub host_key_policy: HostKeyPolicy,
}

/// Errors from an installation run, tagged by phase
#[derive(Debug, Error)]
pub enum InstallError {
    #[error("could not resolve SSH credentials: {0}")]
    Auth(SshError),

    #[error("could not connect to {address}: {source}")]
    Connect { address: String, source: SshError },

    #[error("k3s installer failed: {0}")]
    Install(SshError),

    #[error("could not read the remote kubeconfig: {0}")]
    Retrieve(SshError),

    #[error("remote kubeconfig at {0} was empty")]
    EmptyKubeconfig(String),

    #[error("merge with the existing kubeconfig failed: {0}")]
    Merge(KubeconfigError),

    #[error("could not save the kubeconfig: {0}")]
    Persist(KubeconfigError),
}

/// Drives one installation run
pub struct Installer {
    config: InstallConfig,
    resolver: CredentialResolver,
    flattener: Box<dyn Flattener>,
}

impl Installer {
    pub fn new(config: InstallConfig) -> Self {
        Self::with_collaborators(
            config,
            CredentialResolver::from_env(),
            Box::new(KubectlFlattener::new()),
        )
    }

    /// Inject the credential resolver and merge tool (for testing)
    pub fn with_collaborators(
        mut config: InstallConfig,
        resolver: CredentialResolver,
        flattener: Box<dyn Flattener>,
    ) -> Self {
        // The merge step exports local_path to another process via
        // KUBECONFIG; a relative path would drift with the working directory
        match std::path::absolute(&config.local_path) {
            Ok(path) => config.local_path = path,
            Err(e) => warn!(
                "Could not resolve {} to an absolute path: {}",
                config.local_path.display(),
                e
            ),
        }
        Self {
            config,
            resolver,
            flattener,
        }
    }

    /// Run the full sequence against the configured host
    pub async fn run(&self) -> Result<(), InstallError> {
        info!(
            "Target: ssh -i {} -p {} {}@{}",
            self.config.ssh_key.display(),
            self.config.port,
            self.config.user,
            self.config.host
        );

        let auth = self
            .resolver
            .resolve(&self.config.ssh_key)
            .await
            .map_err(InstallError::Auth)?;

        let ssh_config = SshConfig {
            host: self.config.host.clone(),
            port: self.config.port,
            user: self.config.user.clone(),
            host_key_policy: self.config.host_key_policy,
        };
        let address = ssh_config.address();

        let mut session = SshClient::new(ssh_config)
            .connect(auth)
            .await
            .map_err(|source| InstallError::Connect { address, source })?;

        self.provision_and_close(&mut session).await
    }

    /// Provision over the session, then close it exactly once, on the
    /// success and the failure path alike. A close failure never masks
    /// the provisioning outcome.
    async fn provision_and_close(
        &self,
        session: &mut dyn RemoteExec,
    ) -> Result<(), InstallError> {
        let outcome = self.provision(session).await;

        if let Err(e) = session.close().await {
            match &outcome {
                Ok(()) => warn!("Disconnect after provisioning failed: {}", e),
                Err(_) => debug!("Disconnect after failed provisioning also failed: {}", e),
            }
        }

        outcome
    }

    /// Everything that happens over the established session, plus the
    /// local post-processing of the retrieved kubeconfig.
    async fn provision(&self, session: &mut dyn RemoteExec) -> Result<(), InstallError> {
        if self.config.skip_install {
            info!("Skipping k3s installation, fetching the kubeconfig only");
        } else {
            let command = self.install_command();
            let result = session
                .execute(&command)
                .await
                .map_err(InstallError::Install)?;
            debug!(
                "k3s installer finished ({} stdout bytes, {} stderr bytes)",
                result.stdout.len(),
                result.stderr.len()
            );
            info!("k3s {} installed on {}", self.config.k3s_version, self.config.host);
        }

        let result = session
            .execute(&format!("sudo cat {}", K3S_KUBECONFIG_PATH))
            .await
            .map_err(InstallError::Retrieve)?;

        if result.stdout.is_empty() {
            warn!(
                "Reading {} produced no output: {}",
                K3S_KUBECONFIG_PATH,
                String::from_utf8_lossy(&result.stderr).trim()
            );
            return Err(InstallError::EmptyKubeconfig(
                K3S_KUBECONFIG_PATH.to_string(),
            ));
        }

        let kubeconfig = rewrite_loopback(&result.stdout, &self.config.host);

        let assembled = if self.config.merge && self.config.local_path.exists() {
            info!(
                "Merging with the existing kubeconfig at {}",
                self.config.local_path.display()
            );
            merge_with_existing(&self.config.local_path, &kubeconfig, self.flattener.as_ref())
                .await
                .map_err(InstallError::Merge)?
        } else {
            if self.config.merge {
                info!(
                    "No existing kubeconfig at {}, writing a fresh one",
                    self.config.local_path.display()
                );
            }
            kubeconfig
        };

        write_kubeconfig(&self.config.local_path, &assembled).map_err(InstallError::Persist)?;

        info!("Saved kubeconfig to {}", self.config.local_path.display());
        Ok(())
    }

    /// Fetch the installer script and pipe it into sh, with the server
    /// exec line and a pinned version passed through the environment.
    fn install_command(&self) -> String {
        let exec = format!(
            "server --tls-san {} {}",
            self.config.host, self.config.k3s_extra_args
        );
        format!(
            "curl -sLS {} | INSTALL_K3S_EXEC='{}' INSTALL_K3S_VERSION='{}' sh -",
            INSTALL_SCRIPT_URL,
            exec.trim(),
            self.config.k3s_version
        )
    }
}
