// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Scratch space for downloads.

use std::{
    fs, io,
    path::{Path, PathBuf},
};
use tracing::{debug, warn};

/// Staging directory that removes itself once dropped.
///
/// Dropping happens on every exit path of a download, so a staging directory
/// never outlives the operation that created it.
#[derive(Debug)]
pub struct StagingDir {
    root: PathBuf,
    path: PathBuf,
}

impl StagingDir {
    /// Create fresh staging directory named `name` under `root`.
    ///
    /// Leftovers from an earlier run under the same name are wiped first.
    ///
    /// # Errors
    ///
    /// - Return [`io::Error`] if stale directory cannot be removed, or new
    ///   directory cannot be created.
    pub fn create(root: impl Into<PathBuf>, name: &str) -> io::Result<Self> {
        let root = root.into();
        let path = root.join(name);
        match fs::remove_dir_all(&path) {
            Ok(_) => debug!("wiped stale staging directory {:?}", path.display()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err),
        }

        fs::create_dir_all(&path)?;
        Ok(Self { root, path })
    }

    pub fn path(&self) -> &Path {
        self.path.as_path()
    }
}

impl Drop for StagingDir {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_dir_all(&self.path) {
            if err.kind() != io::ErrorKind::NotFound {
                warn!("failed to clean up {:?}: {err}", self.path.display());
            }
            return;
        }

        // Only succeeds if no other download is staging next to us.
        let _ = fs::remove_dir(&self.root);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_wipes_stale_content() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let root = dir.path().join("tmp");
        fs::create_dir_all(root.join("abc"))?;
        fs::write(root.join("abc").join("stale.mdc"), "old")?;

        let staging = StagingDir::create(&root, "abc")?;
        assert!(staging.path().is_dir());
        assert!(!staging.path().join("stale.mdc").exists());

        Ok(())
    }

    #[test]
    fn drop_removes_directory() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let root = dir.path().join("tmp");
        let staging = StagingDir::create(&root, "abc")?;
        fs::write(staging.path().join("rule.mdc"), "X")?;
        let path = staging.path().to_path_buf();

        drop(staging);
        assert!(!path.exists());
        assert!(!root.exists());

        Ok(())
    }

    #[test]
    fn drop_keeps_root_shared_with_others() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let root = dir.path().join("tmp");
        let first = StagingDir::create(&root, "first")?;
        let second = StagingDir::create(&root, "second")?;

        drop(first);
        assert!(root.exists());
        assert!(second.path().exists());

        Ok(())
    }
}
