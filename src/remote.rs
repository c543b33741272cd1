// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Remote rule set storage.
//!
//! A __remote rule set__ is a named object in a key-value store whose entries
//! are rule files keyed by their remote names. The object title is the lookup
//! key by convention only, the store itself never enforces its uniqueness.
//!
//! # Managed Rule Sets
//!
//! Every rule set uploaded by rulegist carries one reserved entry named
//! ".rulegist.meta.json" holding the serialized manifest. Objects without this
//! __metadata marker__ are not managed by rulegist, and are never touched by
//! title lookups. Rule sets uploaded by the older `rulesctl` tool carry the
//! marker under ".rulesctl.meta.json" instead, and are read just the same.
//!
//! # Title Lookup
//!
//! Title lookup is a linear scan over the listing of the user's objects where
//! the first managed object with a matching title wins. The listing order is
//! whatever the remote hands back, so when two rule sets share a title, which
//! one gets picked is up to the remote. Use [`RemoteStore::find_unique_by_title`]
//! to turn that case into an error instead.
//!
//! # See Also
//!
//! - [`GistClient`]

pub mod gist;

pub use gist::GistClient;

use crate::manifest::{Manifest, ManifestError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Reserved name of entry holding the serialized manifest.
pub const MARKER_FILE: &str = ".rulegist.meta.json";

/// Marker name written by `rulesctl`, accepted when reading.
pub const LEGACY_MARKER_FILE: &str = ".rulesctl.meta.json";

/// File entry of remote rule set.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFile {
    #[serde(default)]
    pub filename: String,

    #[serde(default, rename = "type")]
    pub kind: String,

    /// Server supplied location of raw file content.
    #[serde(default)]
    pub raw_url: String,

    #[serde(default)]
    pub size: u64,

    /// Inline content, only present when fetching a single rule set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

/// Revision history entry of remote rule set.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revision {
    pub version: String,

    #[serde(default)]
    pub commit_id: Option<String>,

    #[serde(default, alias = "committed_at")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Remote rule set as transferred over the wire.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRuleSet {
    pub id: String,

    /// Title of rule set.
    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub public: bool,

    #[serde(default)]
    pub updated_at: DateTime<Utc>,

    #[serde(default)]
    pub files: BTreeMap<String, RemoteFile>,

    /// Revision history, most recent first.
    #[serde(default)]
    pub history: Vec<Revision>,
}

impl RemoteRuleSet {
    /// Title of rule set, empty if remote has none.
    pub fn title(&self) -> &str {
        self.description.as_deref().unwrap_or_default()
    }

    /// Check if rule set carries the metadata marker.
    pub fn is_managed(&self) -> bool {
        self.marker().is_some()
    }

    /// Entry holding the serialized manifest.
    ///
    /// Prefers the current marker over the legacy one.
    pub fn marker(&self) -> Option<&RemoteFile> {
        self.files
            .get(MARKER_FILE)
            .or_else(|| self.files.get(LEGACY_MARKER_FILE))
    }

    /// Number of revisions, where the latest counts as revision one.
    pub fn revision_count(&self) -> usize {
        self.history.len()
    }
}

/// Logical content of a managed rule set.
///
/// The manifest and the rule entries are kept apart, and are only flattened
/// into a single name to content mapping at the wire boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleSetFiles {
    pub manifest: Manifest,

    /// Rule file content keyed by remote name.
    pub rules: BTreeMap<String, String>,
}

impl RuleSetFiles {
    /// Flatten into wire mapping with metadata marker included.
    ///
    /// # Errors
    ///
    /// - Return [`ManifestError::Serialize`] if manifest cannot be serialized.
    pub fn to_wire(&self) -> Result<BTreeMap<String, String>, ManifestError> {
        let mut files = self.rules.clone();
        files.insert(MARKER_FILE.to_string(), self.manifest.to_json()?);
        Ok(files)
    }

    /// Flatten into wire mapping that replaces an existing rule set wholesale.
    ///
    /// Entries of the existing rule set that are absent from this one map to
    /// `None`, which instructs the remote to drop them.
    ///
    /// # Errors
    ///
    /// - Return [`ManifestError::Serialize`] if manifest cannot be serialized.
    pub fn replacing(
        &self,
        existing: &RemoteRuleSet,
    ) -> Result<BTreeMap<String, Option<String>>, ManifestError> {
        let mut files = self
            .to_wire()?
            .into_iter()
            .map(|(name, content)| (name, Some(content)))
            .collect::<BTreeMap<_, _>>();

        for name in existing.files.keys() {
            files.entry(name.clone()).or_insert(None);
        }

        Ok(files)
    }
}

/// Authenticated key-value store of rule sets.
pub trait RemoteStore {
    /// Check if a credential is available.
    fn has_credential(&self) -> bool;

    /// Create new rule set, returning its id.
    fn create(&self, title: &str, files: &BTreeMap<String, String>, public: bool) -> Result<String>;

    /// Replace entire file set of existing rule set, returning its id.
    ///
    /// Entries mapped to `None` are removed.
    fn update_wholesale(&self, id: &str, files: &BTreeMap<String, Option<String>>)
        -> Result<String>;

    /// Fetch rule set by id.
    fn fetch_by_id(&self, id: &str) -> Result<RemoteRuleSet>;

    /// List rule sets of authenticated user, optionally only those modified
    /// after a point in time.
    fn list_mine_since(&self, since: Option<DateTime<Utc>>) -> Result<Vec<RemoteRuleSet>>;

    /// Fetch rule set by id along with its revision history.
    fn fetch_with_history(&self, id: &str) -> Result<RemoteRuleSet>;

    /// Delete rule set by id.
    fn delete(&self, id: &str) -> Result<()>;

    /// Fetch raw content behind a server supplied URL.
    fn fetch_raw(&self, url: &str) -> Result<Vec<u8>>;

    /// Find first managed rule set with matching title.
    ///
    /// # Errors
    ///
    /// - Return [`RemoteError::NotFound`] if no managed rule set matches.
    fn find_by_title(&self, title: &str) -> Result<RemoteRuleSet> {
        self.list_mine_since(None)?
            .into_iter()
            .filter(RemoteRuleSet::is_managed)
            .find(|rule_set| rule_set.title() == title)
            .ok_or_else(|| RemoteError::NotFound(title.to_string()))
    }

    /// Find the only managed rule set with matching title.
    ///
    /// # Errors
    ///
    /// - Return [`RemoteError::NotFound`] if no managed rule set matches.
    /// - Return [`RemoteError::AmbiguousTitle`] if more than one does.
    fn find_unique_by_title(&self, title: &str) -> Result<RemoteRuleSet> {
        let mut matches = self
            .list_mine_since(None)?
            .into_iter()
            .filter(|rule_set| rule_set.is_managed() && rule_set.title() == title)
            .collect::<Vec<_>>();

        match matches.len() {
            0 => Err(RemoteError::NotFound(title.to_string())),
            1 => Ok(matches.remove(0)),
            _ => Err(RemoteError::AmbiguousTitle {
                title: title.to_string(),
                ids: matches.into_iter().map(|rule_set| rule_set.id).collect(),
            }),
        }
    }
}

/// Remote store error types.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    /// Operation needs a token but none is available.
    #[error("no GitHub token set, run `rulegist auth` to set one")]
    MissingToken,

    /// Remote rejected the token.
    #[error("GitHub token is invalid or expired")]
    InvalidToken,

    /// Rule set does not exist.
    #[error("rule set {0:?} not found")]
    NotFound(String),

    /// Rule set needs a token that the caller lacks.
    #[error("rule set {0:?} requires authentication, run `rulegist auth` to set a token")]
    AuthRequired(String),

    /// More than one managed rule set shares a title.
    #[error("multiple rule sets titled {title:?}: {}", ids.join(", "))]
    AmbiguousTitle { title: String, ids: Vec<String> },

    /// Remote answered with an unexpected status.
    #[error("remote responded with status {status}: {body}")]
    Status { status: u16, body: String },

    /// Request could not be completed.
    #[error("request to remote failed")]
    Transport(#[from] reqwest::Error),
}

/// Friendly result alias :3
pub type Result<T, E = RemoteError> = std::result::Result<T, E>;
