//! Writing the final kubeconfig to disk

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use tracing::debug;

use super::KubeconfigError;

/// Write `contents` to `path`, replacing whatever was there.
///
/// The file is created with mode 0600 and, if it already existed with
/// looser permissions, tightened to 0600 after the write. The write is
/// whole-file: no appending, no partial updates.
pub fn write_kubeconfig(path: &Path, contents: &[u8]) -> Result<(), KubeconfigError> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let persist_err = |source: std::io::Error| KubeconfigError::Persist {
        path: path.to_path_buf(),
        source,
    };

    let mut file = options.open(path).map_err(persist_err)?;
    file.write_all(contents).map_err(persist_err)?;
    file.sync_all().map_err(persist_err)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .map_err(persist_err)?;
    }

    debug!("Wrote {} bytes to {}", contents.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[cfg(unix)]
    fn mode_of(path: &Path) -> u32 {
        use std::os::unix::fs::PermissionsExt;
        std::fs::metadata(path).unwrap().permissions().mode() & 0o777
    }

    #[test]
    fn test_writes_contents_with_owner_only_mode() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("kubeconfig");

        write_kubeconfig(&path, b"apiVersion: v1\n").unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"apiVersion: v1\n");
        #[cfg(unix)]
        assert_eq!(mode_of(&path), 0o600);
    }

    #[test]
    fn test_overwrites_longer_previous_contents() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("kubeconfig");

        write_kubeconfig(&path, b"a much longer first document\n").unwrap();
        write_kubeconfig(&path, b"short\n").unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"short\n");
    }

    #[cfg(unix)]
    #[test]
    fn test_tightens_loose_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let path = dir.path().join("kubeconfig");
        std::fs::write(&path, "old").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();

        write_kubeconfig(&path, b"new").unwrap();

        assert_eq!(mode_of(&path), 0o600);
    }

    #[test]
    fn test_missing_parent_directory_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("no-such-dir").join("kubeconfig");

        let err = write_kubeconfig(&path, b"x").unwrap_err();
        assert!(matches!(err, KubeconfigError::Persist { .. }));
    }
}
