use anyhow::{Context, Result};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

const MAX_NAME_ATTEMPTS: usize = 16;

/// A uniquely named directory under a root, removed on release unless `debug`
/// asks to keep it for inspection.
///
/// Release happens once: either through [`WorkingDirectory::release`], which
/// reports failures, or on drop, which only logs them.
#[derive(Debug)]
pub struct WorkingDirectory {
    path: PathBuf,
    debug: bool,
    released: bool,
}

impl WorkingDirectory {
    /// Creates `<root>/<prefix>_<random>`.
    pub fn acquire(root: &Path, prefix: &str, debug: bool) -> Result<Self> {
        for _ in 0..MAX_NAME_ATTEMPTS {
            let path = root.join(unique_name(prefix));
            match std::fs::create_dir(&path) {
                Ok(()) => {
                    tracing::debug!("Created working directory {}", path.display());
                    return Ok(Self {
                        path,
                        debug,
                        released: false,
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => {
                    return Err(e).with_context(|| {
                        format!("Failed to create working directory {}", path.display())
                    })
                }
            }
        }
        anyhow::bail!(
            "Failed to find a free working directory name with prefix '{}' in {}",
            prefix,
            root.display()
        )
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_debug(&self) -> bool {
        self.debug
    }

    pub fn release(mut self) -> Result<()> {
        self.release_inner()
    }

    fn release_inner(&mut self) -> Result<()> {
        if std::mem::replace(&mut self.released, true) {
            return Ok(());
        }
        let path = &self.path;
        if self.debug {
            tracing::info!("Keeping working directory {} (debug)", path.display());
            return Ok(());
        }
        match std::fs::remove_dir_all(path) {
            Ok(()) => {
                tracing::debug!("Removed working directory {}", path.display());
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e)
                .with_context(|| format!("Failed to remove working directory {}", path.display())),
        }
    }
}

impl Drop for WorkingDirectory {
    fn drop(&mut self) {
        if let Err(e) = self.release_inner() {
            tracing::warn!("{e:#}");
        }
    }
}

fn unique_name(prefix: &str) -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("{prefix}_{}", &id[..12])
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_acquire_creates_prefixed_directory() {
        let root = tempdir().unwrap();
        let dir = WorkingDirectory::acquire(root.path(), "job", false).unwrap();

        assert!(dir.path().is_dir());
        assert_eq!(dir.path().parent().unwrap(), root.path());
        let name = dir.path().file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("job_"));
        assert_eq!(name.len(), "job_".len() + 12);
    }

    #[test]
    fn test_names_are_unique() {
        let root = tempdir().unwrap();
        let a = WorkingDirectory::acquire(root.path(), "job", false).unwrap();
        let b = WorkingDirectory::acquire(root.path(), "job", false).unwrap();
        assert_ne!(a.path(), b.path());
    }

    #[test]
    fn test_release_removes_contents() {
        let root = tempdir().unwrap();
        let dir = WorkingDirectory::acquire(root.path(), "job", false).unwrap();
        let path = dir.path().to_path_buf();
        std::fs::create_dir(path.join("nested")).unwrap();
        std::fs::write(path.join("nested/file.txt"), b"data").unwrap();

        dir.release().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_drop_removes_directory() {
        let root = tempdir().unwrap();
        let path = {
            let dir = WorkingDirectory::acquire(root.path(), "job", false).unwrap();
            dir.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn test_debug_keeps_directory() {
        let root = tempdir().unwrap();
        let dir = WorkingDirectory::acquire(root.path(), "job", true).unwrap();
        let path = dir.path().to_path_buf();
        std::fs::write(path.join("cmd_0.out"), b"log").unwrap();

        dir.release().unwrap();
        assert!(path.join("cmd_0.out").exists());
    }

    #[test]
    fn test_release_tolerates_missing_directory() {
        let root = tempdir().unwrap();
        let dir = WorkingDirectory::acquire(root.path(), "job", false).unwrap();
        std::fs::remove_dir(dir.path()).unwrap();
        assert!(dir.release().is_ok());
    }

    #[test]
    fn test_acquire_fails_without_root() {
        let root = tempdir().unwrap();
        let missing = root.path().join("missing");
        assert!(WorkingDirectory::acquire(&missing, "job", false).is_err());
    }
}
