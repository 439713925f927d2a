//! File system utils.

use std::{
    fs::File,
    path::{Path, PathBuf},
};

use anyhow::Context;
use fs2::FileExt;

/// Name of the lock file guarding a shared workspace.
pub const LOCK_FILE_NAME: &str = ".tapestry-ops.lock";

pub struct FsHandler;

impl FsHandler {
    pub fn create_dir(path: &Path) -> anyhow::Result<()> {
        std::fs::create_dir_all(path)
            .with_context(|| format!("Failed to create directory {}", path.display()))?;
        tracing::trace!(path = %path.display(), "Directory ready");
        Ok(())
    }

    /// Copy `src` into the directory `dest_dir`, keeping its file name.
    pub fn copy_into(src: &Path, dest_dir: &Path) -> anyhow::Result<PathBuf> {
        let file_name = src
            .file_name()
            .with_context(|| format!("{} has no file name", src.display()))?;
        let dest = dest_dir.join(file_name);

        std::fs::copy(src, &dest).with_context(|| {
            format!("Failed to copy {} to {}", src.display(), dest.display())
        })?;
        tracing::debug!(src = %src.display(), dest = %dest.display(), "Copied file");

        Ok(dest)
    }

    /// Take the exclusive lock of `dir`, waiting for other holders.
    ///
    /// The lock is advisory and released when the guard is dropped.
    ///
    /// Waiting for another holder happens on the blocking pool.
    pub async fn lock_dir(dir: &Path) -> anyhow::Result<WorkspaceLock> {
        Self::create_dir(dir)?;
        let path = dir.join(LOCK_FILE_NAME);
        let mut file = File::create(&path)
            .with_context(|| format!("Failed to open lock file {}", path.display()))?;

        if file.try_lock_exclusive().is_err() {
            tracing::info!(path = %path.display(), "Workspace is locked by another invocation, waiting...");
            file = tokio::task::spawn_blocking(move || file.lock_exclusive().map(|()| file))
                .await
                .context("Lock wait task panicked")?
                .with_context(|| format!("Failed to lock {}", path.display()))?;
        }
        tracing::debug!(path = %path.display(), "Workspace locked");

        Ok(WorkspaceLock { file, path })
    }
}

/// Exclusive hold on a shared workspace directory.
#[derive(Debug)]
pub struct WorkspaceLock {
    file: File,
    path: PathBuf,
}

impl WorkspaceLock {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for WorkspaceLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::warn!(err = ?e, path = %self.path.display(), "Failed to release workspace lock");
        }
    }
}
