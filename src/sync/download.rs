// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Staged rule set download.
//!
//! A download runs in two phases. The __staging__ phase fetches every file the
//! manifest lists into a private staging directory, and verifies each one
//! against its recorded hash. Only after every file passed does the
//! __commit__ phase move them into the rules root. A failure during staging
//! leaves the rules root exactly as it was.
//!
//! Before anything is fetched, the manifest is checked against the rules
//! root for files that already exist. Without force such conflicts stop the
//! download, and the conflicting paths are reported back.

use crate::{
    manifest::Manifest,
    remote::{RemoteRuleSet, RemoteStore},
    store::{content_hash, RuleStore},
    sync::{staging::StagingDir, Result, SyncError, Syncer},
};

use indicatif::ProgressBar;
use std::{fs, io, path::Path};
use tracing::{debug, info, instrument};

/// Rule set to download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Rule set id, works without a credential for public rule sets.
    Id(String),

    /// Title of a managed rule set of the authenticated user.
    Title(String),
}

/// Options for [`Syncer::download`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DownloadOptions {
    /// Overwrite conflicting local rule files.
    pub force: bool,

    /// Reject titles shared by more than one rule set.
    pub strict: bool,
}

/// Summary of completed download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadReport {
    pub id: String,
    pub title: String,

    /// Relative paths written into rules root.
    pub files: Vec<String>,
}

impl<R> Syncer<R>
where
    R: RemoteStore,
{
    /// Download rule set into local rule store.
    ///
    /// Progress is reported per verified file through `bar`.
    ///
    /// # Errors
    ///
    /// - Return [`SyncError::NotFound`] if target does not exist.
    /// - Return [`SyncError::NotManaged`] if rule set lacks its marker.
    /// - Return [`SyncError::MetadataParse`] if manifest is malformed.
    /// - Return [`SyncError::LocalConflict`] if local files would be
    ///   overwritten without force.
    /// - Return [`SyncError::MissingRemoteFile`] if a listed file is absent.
    /// - Return [`SyncError::Integrity`] if a file fails verification.
    /// - Return [`SyncError::Staging`] or [`SyncError::Commit`] if local
    ///   file system operations fail.
    #[instrument(skip(self, bar), level = "debug")]
    pub fn download(
        &self,
        target: &Target,
        options: DownloadOptions,
        bar: &ProgressBar,
    ) -> Result<DownloadReport> {
        let rule_set = match target {
            Target::Id(id) => self.remote.fetch_by_id(id)?,
            Target::Title(title) => {
                let found = self.find(title, options.strict)?;
                // INVARIANT: Listings carry no inline content, refetch by id.
                self.remote.fetch_by_id(&found.id)?
            }
        };

        let manifest = self.read_manifest(&rule_set)?;
        let conflicts = self.check_conflicts(&manifest)?;
        if !conflicts.is_empty() {
            if !options.force {
                return Err(SyncError::LocalConflict { paths: conflicts });
            }
            info!("overwrite {} existing rule files", conflicts.len());
        }

        let staging = StagingDir::create(&self.staging_root, &rule_set.id).map_err(|err| {
            SyncError::Staging {
                source: err,
                path: self.staging_root.join(&rule_set.id),
            }
        })?;

        self.stage(&staging, &rule_set, &manifest, bar)?;
        let files = self.commit(&staging, &manifest, options.force)?;
        bar.finish_and_clear();

        Ok(DownloadReport {
            id: rule_set.id.clone(),
            title: rule_set.title().to_string(),
            files,
        })
    }

    /// Read manifest out of rule set's metadata marker.
    ///
    /// # Errors
    ///
    /// - Return [`SyncError::NotManaged`] if rule set lacks its marker.
    /// - Return [`SyncError::MetadataParse`] if manifest is malformed.
    pub fn read_manifest(&self, rule_set: &RemoteRuleSet) -> Result<Manifest> {
        let marker = rule_set.marker().ok_or_else(|| SyncError::NotManaged {
            id: rule_set.id.clone(),
        })?;

        let data = match &marker.content {
            Some(content) => content.clone(),
            None => String::from_utf8_lossy(&self.remote.fetch_raw(&marker.raw_url)?).into_owned(),
        };

        data.parse().map_err(|err| SyncError::MetadataParse {
            source: err,
            id: rule_set.id.clone(),
        })
    }

    /// List relative paths of manifest that already exist in rules root.
    ///
    /// # Errors
    ///
    /// - Return [`SyncError::Store`] if a manifest path escapes rules root.
    pub fn check_conflicts(&self, manifest: &Manifest) -> Result<Vec<String>> {
        let mut conflicts = Vec::new();
        for entry in &manifest.files {
            if self.store.contains(&entry.path)? {
                conflicts.push(entry.path.clone());
            }
        }

        Ok(conflicts)
    }

    fn stage(
        &self,
        staging: &StagingDir,
        rule_set: &RemoteRuleSet,
        manifest: &Manifest,
        bar: &ProgressBar,
    ) -> Result<()> {
        let staged = RuleStore::open(staging.path());
        bar.set_length(manifest.files.len() as u64);
        for entry in &manifest.files {
            bar.set_message(entry.path.clone());
            let file = rule_set.files.get(&entry.remote_name).ok_or_else(|| {
                SyncError::MissingRemoteFile {
                    name: entry.remote_name.clone(),
                }
            })?;

            let bytes = self.remote.fetch_raw(&file.raw_url)?;
            staged.save(&entry.path, &bytes)?;

            let actual = content_hash(staged.read(&entry.path)?);
            if actual != entry.md5 {
                return Err(SyncError::Integrity {
                    path: entry.path.clone(),
                    expected: entry.md5.clone(),
                    actual,
                });
            }

            debug!("verified {}", entry.path);
            bar.inc(1);
        }

        Ok(())
    }

    fn commit(&self, staging: &StagingDir, manifest: &Manifest, force: bool) -> Result<Vec<String>> {
        let staged = RuleStore::open(staging.path());
        self.store.ensure_root()?;

        let mut files = Vec::with_capacity(manifest.files.len());
        for entry in &manifest.files {
            let from = staged.full_path(&entry.path)?;
            let to = self.store.full_path(&entry.path)?;
            if let Some(parent) = to.parent() {
                crate::store::create_dir_all(parent)?;
            }

            if force {
                remove_existing(&to).map_err(|err| commit_error(err, &to))?;
            }

            move_file(&from, &to).map_err(|err| commit_error(err, &to))?;
            info!("downloaded {}", entry.path);
            files.push(entry.path.clone());
        }

        Ok(files)
    }
}

fn commit_error(err: io::Error, path: &Path) -> SyncError {
    SyncError::Commit {
        source: err,
        path: path.to_path_buf(),
    }
}

fn remove_existing(path: &Path) -> io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}

/// Rename file, falling back to copy when rename is refused, e.g., across
/// file systems.
fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    if let Err(err) = fs::rename(from, to) {
        debug!("rename of {:?} failed, copy instead: {err}", from.display());
        fs::copy(from, to)?;
        fs::remove_file(from)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn remove_existing_handles_files_and_dirs() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let file = dir.path().join("rule.mdc");
        let nested = dir.path().join("nested.mdc");
        fs::write(&file, "X")?;
        fs::create_dir_all(nested.join("inner"))?;

        remove_existing(&file)?;
        remove_existing(&nested)?;
        remove_existing(&dir.path().join("missing.mdc"))?;
        assert!(!file.exists());
        assert!(!nested.exists());

        Ok(())
    }

    #[test]
    fn move_file_relocates_content() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let from = dir.path().join("staged.mdc");
        let to = dir.path().join("final.mdc");
        fs::write(&from, "X")?;

        move_file(&from, &to)?;
        assert!(!from.exists());
        assert_eq!(fs::read_to_string(&to)?, "X");

        Ok(())
    }
}
