//! Merging a retrieved kubeconfig into an existing one
//!
//! The flattening itself is delegated to kubectl: the retrieved document
//! is staged in a private temp file, `KUBECONFIG` is pointed at the
//! existing config followed by the staged one, and
//! `kubectl config view --merge --flatten` produces the combined result
//! on stdout. The temp file is removed whether or not the tool succeeds.

use std::io::Write;
use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use super::KubeconfigError;

/// External merge collaborator
#[async_trait]
pub trait Flattener: Send + Sync {
    /// Merge the kubeconfigs at `sources` (earlier entries win on
    /// conflicting names) into one flattened document.
    async fn flatten(&self, sources: &[&Path]) -> Result<Vec<u8>, KubeconfigError>;
}

/// Runs `kubectl config view --merge --flatten` with `KUBECONFIG`
/// pointing at the source files.
pub struct KubectlFlattener {
    command: String,
}

impl KubectlFlattener {
    pub fn new() -> Self {
        Self::with_command("kubectl")
    }

    /// Use a different executable (for testing)
    pub fn with_command(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

impl Default for KubectlFlattener {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Flattener for KubectlFlattener {
    async fn flatten(&self, sources: &[&Path]) -> Result<Vec<u8>, KubeconfigError> {
        let kubeconfig = std::env::join_paths(sources.iter().copied())
            .map_err(|e| KubeconfigError::InvalidSourcePath(e.to_string()))?;

        debug!(
            "Merging kubeconfigs: {} config view --merge --flatten (KUBECONFIG={:?})",
            self.command, kubeconfig
        );

        let output = Command::new(&self.command)
            .args(["config", "view", "--merge", "--flatten"])
            .env("KUBECONFIG", &kubeconfig)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| KubeconfigError::MergeToolSpawn {
                command: self.command.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(KubeconfigError::MergeTool {
                command: self.command.clone(),
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(output.stdout)
    }
}

/// Merge `doc` into the kubeconfig at `existing`.
///
/// `existing` is listed first so names already present locally win over
/// the incoming document. The staged temp file is created with owner-only
/// permissions and removed on every path; only the best-effort removal
/// after a successful merge may be skipped, with a warning.
pub async fn merge_with_existing(
    existing: &Path,
    doc: &[u8],
    flattener: &dyn Flattener,
) -> Result<Vec<u8>, KubeconfigError> {
    let mut staged = tempfile::Builder::new()
        .prefix("kubelift-")
        .tempfile()
        .map_err(KubeconfigError::TempFile)?;
    staged.write_all(doc).map_err(KubeconfigError::TempFile)?;
    staged.flush().map_err(KubeconfigError::TempFile)?;

    // Close the handle before the tool reads the file; the returned
    // path still deletes the file on drop, covering the error exits.
    let staged_path = staged.into_temp_path();
    let staged_ref: &Path = &staged_path;

    let merged = flattener.flatten(&[existing, staged_ref]).await?;

    if let Err(e) = staged_path.close() {
        warn!("Could not remove staged kubeconfig: {}", e);
    }

    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use tempfile::tempdir;

    /// Records each invocation and the staged file's content at call time
    struct RecordingFlattener {
        calls: Mutex<Vec<(Vec<PathBuf>, Vec<u8>)>>,
        output: Result<Vec<u8>, ()>,
    }

    impl RecordingFlattener {
        fn succeeding(output: &[u8]) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                output: Ok(output.to_vec()),
            }
        }

        fn failing() -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                output: Err(()),
            }
        }

        fn staged_path(&self) -> PathBuf {
            self.calls.lock().unwrap()[0].0[1].clone()
        }
    }

    #[async_trait]
    impl Flattener for RecordingFlattener {
        async fn flatten(&self, sources: &[&Path]) -> Result<Vec<u8>, KubeconfigError> {
            let staged_content = std::fs::read(sources[1]).unwrap();
            self.calls.lock().unwrap().push((
                sources.iter().map(|p| p.to_path_buf()).collect(),
                staged_content,
            ));
            match &self.output {
                Ok(bytes) => Ok(bytes.clone()),
                Err(()) => Err(KubeconfigError::InvalidSourcePath("scripted failure".into())),
            }
        }
    }

    #[tokio::test]
    async fn test_existing_config_is_listed_first() {
        let dir = tempdir().unwrap();
        let existing = dir.path().join("config");
        std::fs::write(&existing, "old").unwrap();

        let flattener = RecordingFlattener::succeeding(b"merged");
        let merged = merge_with_existing(&existing, b"incoming", &flattener)
            .await
            .unwrap();

        assert_eq!(merged, b"merged");
        let calls = flattener.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0[0], existing);
        assert_eq!(calls[0].1, b"incoming");
    }

    #[tokio::test]
    async fn test_staged_file_removed_after_success() {
        let dir = tempdir().unwrap();
        let existing = dir.path().join("config");
        std::fs::write(&existing, "old").unwrap();

        let flattener = RecordingFlattener::succeeding(b"merged");
        merge_with_existing(&existing, b"incoming", &flattener)
            .await
            .unwrap();

        assert!(!flattener.staged_path().exists());
    }

    #[tokio::test]
    async fn test_staged_file_removed_after_failure() {
        let dir = tempdir().unwrap();
        let existing = dir.path().join("config");
        std::fs::write(&existing, "old").unwrap();

        let flattener = RecordingFlattener::failing();
        let result = merge_with_existing(&existing, b"incoming", &flattener).await;

        assert!(result.is_err());
        assert!(!flattener.staged_path().exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_staged_file_is_private() {
        use std::os::unix::fs::PermissionsExt;

        struct ModeCheck;

        #[async_trait]
        impl Flattener for ModeCheck {
            async fn flatten(&self, sources: &[&Path]) -> Result<Vec<u8>, KubeconfigError> {
                let mode = std::fs::metadata(sources[1]).unwrap().permissions().mode();
                assert_eq!(mode & 0o777, 0o600);
                Ok(Vec::new())
            }
        }

        let dir = tempdir().unwrap();
        let existing = dir.path().join("config");
        std::fs::write(&existing, "old").unwrap();

        merge_with_existing(&existing, b"incoming", &ModeCheck)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_merge_is_deterministic() {
        let dir = tempdir().unwrap();
        let existing = dir.path().join("config");
        std::fs::write(&existing, "old").unwrap();

        let flattener = RecordingFlattener::succeeding(b"stable output");
        let first = merge_with_existing(&existing, b"incoming", &flattener)
            .await
            .unwrap();
        let second = merge_with_existing(&existing, b"incoming", &flattener)
            .await
            .unwrap();

        assert_eq!(first, second);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_kubectl_flattener_captures_stdout() {
        // echo prints its arguments, standing in for a merge tool
        let flattener = KubectlFlattener::with_command("echo");
        let out = flattener
            .flatten(&[Path::new("/tmp/a"), Path::new("/tmp/b")])
            .await
            .unwrap();
        assert_eq!(out, b"config view --merge --flatten\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_kubectl_flattener_passes_sources_via_env() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let script = dir.path().join("fake-kubectl");
        std::fs::write(&script, "#!/bin/sh\nprintf '%s' \"$KUBECONFIG\"\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let flattener = KubectlFlattener::with_command(script.to_str().unwrap());
        let out = flattener
            .flatten(&[Path::new("/tmp/a"), Path::new("/tmp/b")])
            .await
            .unwrap();

        assert_eq!(out, b"/tmp/a:/tmp/b");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_kubectl_flattener_reports_tool_failure() {
        let flattener = KubectlFlattener::with_command("false");
        let err = flattener
            .flatten(&[Path::new("/tmp/a")])
            .await
            .unwrap_err();

        match err {
            KubeconfigError::MergeTool { command, .. } => assert_eq!(command, "false"),
            other => panic!("expected MergeTool, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_kubectl_flattener_reports_missing_tool() {
        let flattener = KubectlFlattener::with_command("kubelift-no-such-tool");
        let err = flattener
            .flatten(&[Path::new("/tmp/a")])
            .await
            .unwrap_err();

        assert!(matches!(err, KubeconfigError::MergeToolSpawn { .. }));
    }
}
