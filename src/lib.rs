//! kubelift - bootstrap k3s over SSH
//!
//! Installs k3s on a remote host over SSH, fetches the generated
//! kubeconfig, points it at the host's public address and saves it
//! locally, optionally merged into an existing kubeconfig.

pub mod install;
pub mod kubeconfig;
pub mod ssh;

pub use install::{InstallConfig, InstallError, Installer, DEFAULT_K3S_VERSION};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize logging
pub fn init_logging() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();
}
