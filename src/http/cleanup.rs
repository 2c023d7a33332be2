//! Per-request registry of temporary files.

use std::io;
use tempfile::TempPath;
use tracing::{debug, warn};

/// Temp files owned by one request.
///
/// Files are registered the moment they are created, before a single byte is
/// written to them, and deleted exactly once: by [TempResources::release] or,
/// failing that, when the registry is dropped. Deletion failures are logged,
/// never returned.
#[derive(Debug, Default)]
pub(crate) struct TempResources {
    paths: Vec<TempPath>,
}

impl TempResources {
    pub(crate) fn register(&mut self, path: TempPath) {
        debug!(path = %path.display(), "temp file registered");
        self.paths.push(path);
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.paths.len()
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, path: &std::path::Path) -> bool {
        self.paths.iter().any(|p| &**p == path)
    }

    /// Deletes every registered file. Returns how many were deleted.
    pub(crate) fn release(&mut self) -> usize {
        let mut deleted = 0;

        for path in self.paths.drain(..) {
            let shown = path.display().to_string();
            match path.close() {
                Ok(()) => deleted += 1,
                // Removed by the handler already
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => warn!(path = %shown, error = %err, "failed to delete temp file"),
            }
        }

        deleted
    }
}

impl Drop for TempResources {
    fn drop(&mut self) {
        self.release();
    }
}
