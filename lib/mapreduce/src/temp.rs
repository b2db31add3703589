use crate::io::remove_if_exists;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Owns a set of temporary files and deletes whatever it still owns when dropped.
///
/// Deletion failures are logged and skipped so that one stubborn path does not
/// keep the rest on disk. Nothing escapes `drop`.
#[derive(Debug, Default)]
pub struct TempFileManager {
    paths: Vec<PathBuf>,
}

impl TempFileManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&mut self, path: PathBuf) {
        self.paths.push(path);
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Gives up ownership of `path` without deleting it.
    pub fn release(&mut self, path: &Path) -> Option<PathBuf> {
        let idx = self.paths.iter().position(|p| p == path)?;
        Some(self.paths.remove(idx))
    }
}

impl Drop for TempFileManager {
    fn drop(&mut self) {
        for path in self.paths.drain(..) {
            match remove_if_exists(&path) {
                Ok(()) => debug!(path = %path.display(), "removed temporary file"),
                Err(e) => warn!(path = %path.display(), error = %e, "failed to remove temporary file"),
            }
        }
    }
}
