// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Public rule set catalog.
//!
//! The __catalog__ is a curated list of public rule sets published as a plain
//! JSON array at a fixed URL. A local copy is cached in the configuration
//! directory, and is refreshed whenever the published list differs from it.
//! When the published list cannot be fetched, the cached copy is used as is.
//! Looking up a single entry goes to the cache first, and only consults the
//! published list when the cache lacks that entry.

use crate::{remote::RemoteStore, store::content_hash};

use serde::{Deserialize, Serialize};
use std::{
    fs, io,
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::{debug, info, instrument, warn};

/// Entry of public catalog.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Id of remote rule set.
    pub gist_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

/// Public catalog of rule sets.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Catalog {
    entries: Vec<CatalogEntry>,
}

impl Catalog {
    /// Load cached catalog.
    ///
    /// Returns `None` if there is no cache yet.
    ///
    /// # Errors
    ///
    /// - Return [`CatalogError::Read`] if cache exists but cannot be read.
    /// - Return [`CatalogError::Parse`] if cache is malformed.
    pub fn load(cache: impl AsRef<Path>) -> Result<Option<Self>> {
        match read_cache(cache.as_ref())? {
            Some(data) => Ok(Some(parse(&data)?)),
            None => Ok(None),
        }
    }

    /// Refresh catalog from published list, falling back to cache.
    ///
    /// Cache is rewritten only when the published content hashes differently
    /// from what is cached.
    ///
    /// # Errors
    ///
    /// - Return [`CatalogError::Unavailable`] if published list cannot be
    ///   fetched and nothing is cached.
    /// - Return [`CatalogError::Parse`] if the catalog in use is malformed.
    /// - Return [`CatalogError::Write`] if cache cannot be updated.
    #[instrument(skip(remote, cache), level = "debug")]
    pub fn refresh(
        remote: &impl RemoteStore,
        url: &str,
        cache: impl AsRef<Path>,
    ) -> Result<Self> {
        let cache = cache.as_ref();
        let cached = read_cache(cache)?;

        let published = match remote.fetch_raw(url) {
            Ok(data) => data,
            Err(error) => {
                warn!("failed to fetch public catalog, using cached copy: {error}");
                let data = cached.ok_or(CatalogError::Unavailable)?;
                return parse(&data);
            }
        };

        let catalog = parse(&published)?;
        let stale = cached
            .as_ref()
            .is_none_or(|data| content_hash(data) != content_hash(&published));
        if stale {
            write_cache(cache, &published)?;
            info!("public catalog updated");
        } else {
            debug!("public catalog unchanged");
        }

        Ok(catalog)
    }

    /// Resolve single entry by name, preferring the cached catalog.
    ///
    /// The published list is only fetched when nothing is cached, or the
    /// cached catalog has no entry of that name.
    ///
    /// # Errors
    ///
    /// - Return [`CatalogError::UnknownEntry`] if no catalog lists the name.
    /// - Return any error of [`Catalog::load`] or [`Catalog::refresh`].
    #[instrument(skip(remote, cache), level = "debug")]
    pub fn entry(
        remote: &impl RemoteStore,
        url: &str,
        cache: impl AsRef<Path>,
        name: &str,
    ) -> Result<CatalogEntry> {
        let cache = cache.as_ref();
        if let Some(entry) = Self::load(cache)?.and_then(|catalog| catalog.find(name).cloned()) {
            debug!("found {name:?} in cached catalog");
            return Ok(entry);
        }

        Self::refresh(remote, url, cache)?
            .find(name)
            .cloned()
            .ok_or_else(|| CatalogError::UnknownEntry { name: name.into() })
    }

    /// Find entry by exact name, first match wins.
    pub fn find(&self, name: &str) -> Option<&CatalogEntry> {
        self.entries.iter().find(|entry| entry.name == name)
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        self.entries.as_slice()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromStr for Catalog {
    type Err = CatalogError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        serde_json::from_str(data).map_err(CatalogError::Parse)
    }
}

fn parse(data: &[u8]) -> Result<Catalog> {
    serde_json::from_slice(data).map_err(CatalogError::Parse)
}

fn read_cache(path: &Path) -> Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(data) => Ok(Some(data)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(CatalogError::Read {
            source: err,
            path: path.to_path_buf(),
        }),
    }
}

fn write_cache(path: &Path, data: &[u8]) -> Result<()> {
    let write_error = |err: io::Error| CatalogError::Write {
        source: err,
        path: path.to_path_buf(),
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(write_error)?;
    }
    fs::write(path, data).map_err(write_error)
}

/// Catalog error types.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    /// Nothing published is reachable and nothing is cached.
    #[error("public catalog is unavailable and no cached copy exists")]
    Unavailable,

    /// No catalog entry carries the requested name.
    #[error("no public catalog entry named {name:?}")]
    UnknownEntry { name: String },

    /// Catalog is not a valid JSON list of entries.
    #[error("failed to parse public catalog")]
    Parse(#[source] serde_json::Error),

    #[error("failed to read catalog cache {:?}", path.display())]
    Read {
        #[source]
        source: io::Error,
        path: PathBuf,
    },

    #[error("failed to write catalog cache {:?}", path.display())]
    Write {
        #[source]
        source: io::Error,
        path: PathBuf,
    },
}

/// Friendly result alias :3
type Result<T, E = CatalogError> = std::result::Result<T, E>;
