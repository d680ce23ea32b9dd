//! kubelift - bootstrap k3s over SSH

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use kubelift::ssh::HostKeyPolicy;
use kubelift::{InstallConfig, Installer, DEFAULT_K3S_VERSION};

/// kubelift - install k3s on a remote host and bring home its kubeconfig
#[derive(Parser, Debug)]
#[command(name = "kubelift", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Install k3s over SSH and save the kubeconfig locally
    ///
    /// Authenticates with the given private key, falling back to the SSH
    /// agent and then to an interactive passphrase prompt. After the
    /// installer finishes, fetches /etc/rancher/k3s/k3s.yaml, points it at
    /// the host's public address and writes it to --local-path (mode 0600).
    Install(InstallArgs),
}

/// Install mode arguments
#[derive(Parser, Debug)]
struct InstallArgs {
    /// Public address of the target host
    #[arg(long)]
    host: String,

    /// SSH username
    #[arg(long, default_value = "root")]
    user: String,

    /// SSH port
    #[arg(long, default_value_t = 22)]
    ssh_port: u16,

    /// Path to the SSH private key
    #[arg(long, default_value = "~/.ssh/id_rsa")]
    ssh_key: PathBuf,

    /// Where to write the kubeconfig
    #[arg(long, default_value = "kubeconfig")]
    local_path: PathBuf,

    /// Merge into an existing kubeconfig at --local-path instead of
    /// replacing it (requires kubectl)
    #[arg(long)]
    merge: bool,

    /// Skip the installer and only fetch the kubeconfig
    #[arg(long)]
    skip_install: bool,

    /// k3s version to install
    #[arg(long, default_value = DEFAULT_K3S_VERSION)]
    k3s_version: String,

    /// Extra arguments for the k3s server, e.g. "--disable traefik"
    #[arg(long, default_value = "")]
    k3s_extra_args: String,

    /// Accept the server's host key without checking ~/.ssh/known_hosts
    #[arg(long)]
    insecure_accept_host_key: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    kubelift::init_logging();

    let cli = Cli::parse();

    match cli.command {
        Commands::Install(args) => run_install(args).await,
    }
}

/// Run the installer against the configured host
async fn run_install(args: InstallArgs) -> anyhow::Result<()> {
    let host_key_policy = if args.insecure_accept_host_key {
        HostKeyPolicy::InsecureAcceptAny
    } else {
        HostKeyPolicy::Verify
    };

    let config = InstallConfig {
        host: args.host,
        port: args.ssh_port,
        user: args.user,
        ssh_key: args.ssh_key,
        local_path: args.local_path,
        merge: args.merge,
        skip_install: args.skip_install,
        k3s_version: args.k3s_version,
        k3s_extra_args: args.k3s_extra_args,
        host_key_policy,
    };

    let installer = Installer::new(config);
    installer.run().await?;
    Ok(())
}
