//! PID file written at startup and removed at exit.

use crate::error::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    /// Writes `<pid>\n` to `path`, replacing any previous content.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        fs::write(&path, format!("{}\n", std::process::id())).map_err(|source| Error::PidFile {
            path: path.clone(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "wrote pid file");
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to remove pid file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pid_file_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fs.pid");

        let pid_file = PidFile::create(&path).unwrap();
        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content, format!("{}\n", std::process::id()));
        assert_eq!(pid_file.path(), path);

        drop(pid_file);
        assert!(!path.exists());
    }

    #[test]
    fn test_unwritable_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("fs.pid");
        assert!(matches!(PidFile::create(&path), Err(Error::PidFile { .. })));
    }
}
