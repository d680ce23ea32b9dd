//! Kubeconfig post-processing: loopback rewrite, merge, persistence

use std::path::PathBuf;
use std::process::ExitStatus;

use thiserror::Error;

mod merge;
mod persist;
mod transform;

pub use merge::{merge_with_existing, Flattener, KubectlFlattener};
pub use persist::write_kubeconfig;
pub use transform::rewrite_loopback;

#[derive(Error, Debug)]
pub enum KubeconfigError {
    #[error("Failed to stage kubeconfig for merge: {0}")]
    TempFile(std::io::Error),

    #[error("Kubeconfig path cannot appear in KUBECONFIG: {0}")]
    InvalidSourcePath(String),

    #[error("Failed to launch {command}: {source}")]
    MergeToolSpawn {
        command: String,
        source: std::io::Error,
    },

    #[error("{command} failed ({status}): {stderr}")]
    MergeTool {
        command: String,
        status: ExitStatus,
        stderr: String,
    },

    #[error("Failed to write kubeconfig to {path}: {source}")]
    Persist {
        path: PathBuf,
        source: std::io::Error,
    },
}
