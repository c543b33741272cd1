// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Rule set synchronization.
//!
//! The __syncer__ reconciles the local rule store with remote rule sets. It
//! never merges anything: an operation either goes through in full, or stops
//! with a conflict and leaves both sides untouched.
//!
//! # Upload
//!
//! Uploading builds a fresh manifest from the rules root, reads every rule
//! file, and ships the lot as one rule set under a title. If a managed rule
//! set with that title already exists, the upload stops with a conflict
//! unless forced, in which case the existing rule set is replaced wholesale.
//!
//! # Download
//!
//! Downloading goes through a staging directory so that nothing lands in the
//! rules root until every file has been fetched and verified against the
//! manifest. See [`download`] for the details.

pub mod download;
pub mod staging;

pub use download::{DownloadOptions, DownloadReport, Target};

use crate::{
    manifest::{Manifest, ManifestError},
    remote::{GistClient, RemoteError, RemoteRuleSet, RemoteStore, RuleSetFiles},
    store::{RuleStore, StoreError},
};

use chrono::{DateTime, Utc};
use std::{collections::BTreeMap, path::PathBuf};
use tracing::{info, instrument, warn};

/// Location of staging directories relative to working directory.
pub const STAGING_DIR: &str = ".rulegist/tmp";

/// Options for [`Syncer::upload`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct UploadOptions {
    /// Replace existing rule set of the same title.
    pub force: bool,

    /// Only build the manifest, do not touch the remote.
    pub preview: bool,

    /// Make newly created rule set public.
    pub public: bool,
}

/// Result of an upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    /// Preview requested, nothing was sent.
    Preview(Manifest),

    /// New rule set created with given id.
    Created(String),

    /// Existing rule set with given id replaced.
    Updated(String),
}

impl UploadOutcome {
    /// Id of remote rule set, if anything was sent.
    pub fn id(&self) -> Option<&str> {
        match self {
            Self::Preview(_) => None,
            Self::Created(id) | Self::Updated(id) => Some(id),
        }
    }
}

/// Entry of rule set listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedRuleSet {
    pub rule_set: RemoteRuleSet,

    /// Revision count, only filled in detail mode.
    pub revisions: Option<usize>,
}

/// Synchronize local rule store with remote store.
#[derive(Debug)]
pub struct Syncer<R = GistClient>
where
    R: RemoteStore,
{
    pub(crate) remote: R,
    pub(crate) store: RuleStore,
    pub(crate) staging_root: PathBuf,
}

impl<R> Syncer<R>
where
    R: RemoteStore,
{
    /// Construct new syncer.
    ///
    /// Staging directories for downloads are created under `staging_root`,
    /// which should share a file system with the rules root.
    pub fn new(remote: R, store: RuleStore, staging_root: impl Into<PathBuf>) -> Self {
        Self {
            remote,
            store,
            staging_root: staging_root.into(),
        }
    }

    /// Upload local rule store under a title.
    ///
    /// # Errors
    ///
    /// - Return [`SyncError::Auth`] if no credential is available.
    /// - Return [`SyncError::Manifest`] with [`ManifestError::NoRulesFound`]
    ///   if there is nothing to upload.
    /// - Return [`SyncError::TitleConflict`] if title is taken and upload is
    ///   not forced.
    /// - Return [`SyncError::NotText`] if a rule file is not valid UTF-8.
    /// - Return [`SyncError::Remote`] if the remote store fails.
    #[instrument(skip(self), level = "debug")]
    pub fn upload(&self, title: &str, options: UploadOptions) -> Result<UploadOutcome> {
        if !self.remote.has_credential() {
            return Err(SyncError::Auth(RemoteError::MissingToken));
        }

        let manifest = Manifest::build_from_directory(self.store.root())?;
        if options.preview {
            return Ok(UploadOutcome::Preview(manifest));
        }

        let files = self.collect_rules(manifest)?;
        match self.remote.find_by_title(title) {
            Ok(_) if !options.force => Err(SyncError::TitleConflict {
                title: title.to_string(),
            }),
            Ok(existing) => {
                info!("replace rule set {title:?} ({})", existing.id);
                let id = self
                    .remote
                    .update_wholesale(&existing.id, &files.replacing(&existing)?)?;
                Ok(UploadOutcome::Updated(id))
            }
            Err(RemoteError::NotFound(_)) => {
                info!("create rule set {title:?}");
                let id = self
                    .remote
                    .create(title, &files.to_wire()?, options.public)?;
                Ok(UploadOutcome::Created(id))
            }
            Err(error) => Err(error.into()),
        }
    }

    /// Find managed rule set by title.
    ///
    /// In strict mode more than one match is an error, otherwise the first
    /// match in listing order wins.
    ///
    /// # Errors
    ///
    /// - Return [`SyncError::NotFound`] if no managed rule set matches.
    /// - Return [`SyncError::AmbiguousTitle`] if strict and more than one
    ///   managed rule set matches.
    pub fn find(&self, title: &str, strict: bool) -> Result<RemoteRuleSet> {
        let rule_set = match strict {
            true => self.remote.find_unique_by_title(title)?,
            false => self.remote.find_by_title(title)?,
        };

        Ok(rule_set)
    }

    /// Delete remote rule set by id.
    ///
    /// # Errors
    ///
    /// - Return [`SyncError::Remote`] if the remote store fails.
    #[instrument(skip(self), level = "debug")]
    pub fn delete(&self, id: &str) -> Result<()> {
        self.remote.delete(id)?;
        info!("deleted rule set {id}");
        Ok(())
    }

    /// List managed rule sets, newest first.
    ///
    /// Detail mode attaches revision counts. Rule sets whose history cannot
    /// be fetched are skipped rather than failing the listing.
    ///
    /// # Errors
    ///
    /// - Return [`SyncError::Auth`] if no credential is available.
    /// - Return [`SyncError::Remote`] if the listing itself fails.
    #[instrument(skip(self), level = "debug")]
    pub fn list(&self, since: Option<DateTime<Utc>>, detail: bool) -> Result<Vec<ListedRuleSet>> {
        let mut rule_sets = self
            .remote
            .list_mine_since(since)?
            .into_iter()
            .filter(RemoteRuleSet::is_managed)
            .collect::<Vec<_>>();
        rule_sets.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));

        let mut listing = Vec::with_capacity(rule_sets.len());
        for rule_set in rule_sets {
            if !detail {
                listing.push(ListedRuleSet {
                    rule_set,
                    revisions: None,
                });
                continue;
            }

            match self.remote.fetch_with_history(&rule_set.id) {
                Ok(full) => listing.push(ListedRuleSet {
                    revisions: Some(full.revision_count()),
                    rule_set,
                }),
                Err(error) => warn!("skip rule set {}: {error}", rule_set.id),
            }
        }

        Ok(listing)
    }

    fn collect_rules(&self, manifest: Manifest) -> Result<RuleSetFiles> {
        let mut rules = BTreeMap::new();
        for entry in &manifest.files {
            let content = String::from_utf8(self.store.read(&entry.path)?).map_err(|_| {
                SyncError::NotText {
                    path: entry.path.clone(),
                }
            })?;

            if rules.insert(entry.remote_name.clone(), content).is_some() {
                warn!(
                    "{} collides with another rule under remote name {}",
                    entry.path, entry.remote_name
                );
            }
        }

        Ok(RuleSetFiles { manifest, rules })
    }
}

/// Synchronization error types.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Credential is missing or rejected.
    #[error(transparent)]
    Auth(RemoteError),

    /// Rule set does not exist.
    #[error("rule set {0:?} not found")]
    NotFound(String),

    /// Rule set needs a credential the caller lacks.
    #[error("rule set {0:?} requires authentication, run `rulegist auth` to set a token")]
    AuthRequired(String),

    /// More than one managed rule set shares a title.
    #[error("multiple rule sets titled {title:?}: {}", ids.join(", "))]
    AmbiguousTitle { title: String, ids: Vec<String> },

    /// Rule set with same title already exists.
    #[error("rule set {title:?} already exists, use --force to replace it")]
    TitleConflict { title: String },

    /// Download would overwrite local rule files.
    #[error("{} local rule files already exist, use --force to overwrite them", paths.len())]
    LocalConflict { paths: Vec<String> },

    /// Rule set lacks the metadata marker.
    #[error("rule set {id:?} is not managed by rulegist")]
    NotManaged { id: String },

    /// Metadata marker holds a malformed manifest.
    #[error("failed to parse manifest of rule set {id:?}")]
    MetadataParse {
        #[source]
        source: ManifestError,
        id: String,
    },

    /// Manifest lists a file the rule set does not have.
    #[error("rule set has no file named {name:?}")]
    MissingRemoteFile { name: String },

    /// Downloaded content does not match manifest.
    #[error("hash mismatch for {path:?}: expected {expected}, got {actual}")]
    Integrity {
        path: String,
        expected: String,
        actual: String,
    },

    /// Rule file is not valid UTF-8.
    #[error("rule file {path:?} is not valid UTF-8 text")]
    NotText { path: String },

    /// Staging directory cannot be prepared.
    #[error("failed to prepare staging directory {:?}", path.display())]
    Staging {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Verified file cannot be moved into place.
    #[error("failed to move {:?} into rules root", path.display())]
    Commit {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    #[error(transparent)]
    Remote(RemoteError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SyncError {
    /// Check if error only signals an empty rules root.
    pub fn is_no_rules_found(&self) -> bool {
        matches!(
            self,
            Self::Manifest(ManifestError::NoRulesFound { .. })
                | Self::Manifest(ManifestError::Store(StoreError::NoRulesFound { .. }))
                | Self::Store(StoreError::NoRulesFound { .. })
        )
    }
}

impl From<RemoteError> for SyncError {
    fn from(error: RemoteError) -> Self {
        match error {
            RemoteError::MissingToken | RemoteError::InvalidToken => Self::Auth(error),
            RemoteError::NotFound(subject) => Self::NotFound(subject),
            RemoteError::AuthRequired(subject) => Self::AuthRequired(subject),
            RemoteError::AmbiguousTitle { title, ids } => Self::AmbiguousTitle { title, ids },
            error => Self::Remote(error),
        }
    }
}

/// Friendly result alias :3
pub type Result<T, E = SyncError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;

    #[test]
    fn remote_errors_lift_into_sync_kinds() {
        let result = SyncError::from(RemoteError::MissingToken);
        assert!(matches!(result, SyncError::Auth(RemoteError::MissingToken)));

        let result = SyncError::from(RemoteError::InvalidToken);
        assert!(matches!(result, SyncError::Auth(RemoteError::InvalidToken)));

        let result = SyncError::from(RemoteError::NotFound("T".into()));
        assert!(matches!(result, SyncError::NotFound(title) if title == "T"));

        let result = SyncError::from(RemoteError::AuthRequired("abc".into()));
        assert!(matches!(result, SyncError::AuthRequired(id) if id == "abc"));

        let result = SyncError::from(RemoteError::Status {
            status: 500,
            body: String::new(),
        });
        assert!(matches!(result, SyncError::Remote(RemoteError::Status { status: 500, .. })));
    }

    #[test]
    fn no_rules_found_is_recognized() {
        let root = PathBuf::from("rules");
        let error = SyncError::from(ManifestError::NoRulesFound { root: root.clone() });
        assert!(error.is_no_rules_found());

        let error = SyncError::from(StoreError::NoRulesFound { root });
        assert!(error.is_no_rules_found());

        let error = SyncError::TitleConflict { title: "T".into() };
        assert!(!error.is_no_rules_found());
    }

    #[test]
    fn upload_outcome_id() {
        assert_eq!(UploadOutcome::Created("abc".into()).id(), Some("abc"));
        assert_eq!(UploadOutcome::Updated("abc".into()).id(), Some("abc"));
        assert_eq!(UploadOutcome::Preview(Manifest::new()).id(), None);
    }
}
