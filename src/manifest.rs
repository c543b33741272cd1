// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Manifest layout and construction.
//!
//! Every rule set that rulegist uploads is accompanied by a __manifest__. The
//! manifest lists each rule file by its relative path, its __remote name__,
//! its size, and its content hash. Downloads consult nothing but the manifest
//! to figure out what to fetch and how to verify it.
//!
//! # Remote Names
//!
//! The remote store keeps files in a flat namespace, so nested relative paths
//! must be flattened. A remote name is built by joining every directory
//! segment, the file stem, and the extension with underscores, e.g.,
//! `python/linting.mdc` becomes `python_linting_mdc`.
//!
//! Underscores already present in a path are not escaped. Thus, `a/b_c.mdc`
//! and `a_b/c.mdc` both flatten to `a_b_c_mdc` and will clobber each other in
//! the remote namespace. Previously uploaded rule sets depend on this exact
//! scheme, so it is kept as is.
//!
//! # Structure
//!
//! Next to the flat file listing, the manifest carries a nested rendering of
//! every relative path for anyone inspecting the remote object by hand. Only
//! the file listing is ever read back.

use crate::store::{content_hash, to_relative_string, walk_rule_files, StoreError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    fs,
    path::{Component, Path, PathBuf},
    str::FromStr,
};
use tracing::{debug, instrument};

/// Version of manifest layout written by this tool.
pub const SCHEMA_VERSION: &str = "1.0.0";

/// Version of this tool recorded in every manifest.
pub const TOOL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Derive remote name of a relative path.
///
/// Pure function of its input: the same relative path always produces the
/// same remote name.
pub fn remote_name(relative: &str) -> String {
    let (dir, base) = match relative.rsplit_once('/') {
        Some((dir, base)) => (Some(dir), base),
        None => (None, relative),
    };
    let (stem, ext) = base.rsplit_once('.').unwrap_or((base, ""));

    let mut parts = match dir {
        Some(dir) => dir
            .split('/')
            .filter(|segment| !segment.is_empty() && *segment != ".")
            .collect::<Vec<_>>(),
        None => Vec::new(),
    };
    parts.push(stem);
    if !ext.is_empty() {
        parts.push(ext);
    }

    parts.join("_")
}

/// Single rule file entry of manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Relative path from rules root, slash-separated.
    pub path: String,

    /// Flattened name in remote namespace.
    #[serde(alias = "gist_name")]
    pub remote_name: String,

    /// Size in bytes.
    pub size: u64,

    /// Hex encoded MD5 of file content.
    pub md5: String,
}

/// Node of directory structure tree.
///
/// Directories map to nested trees, files map to `null`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Node {
    Dir(Structure),
    File,
}

/// Nested directory rendering of all relative paths.
pub type Structure = BTreeMap<String, Node>;

/// Manifest of a rule set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub schema_version: String,

    #[serde(default, alias = "cli_version")]
    pub tool_version: String,

    #[serde(default)]
    pub updated_at: DateTime<Utc>,

    #[serde(default)]
    pub structure: Structure,

    #[serde(default)]
    pub files: Vec<FileEntry>,
}

impl Manifest {
    /// Construct new empty manifest stamped with current time.
    pub fn new() -> Self {
        Self {
            schema_version: SCHEMA_VERSION.into(),
            tool_version: TOOL_VERSION.into(),
            updated_at: Utc::now(),
            structure: Structure::new(),
            files: Vec::new(),
        }
    }

    /// Build manifest out of every rule file under root.
    ///
    /// # Errors
    ///
    /// - Return [`ManifestError::NoRulesFound`] if root is missing or has no
    ///   rule files.
    /// - Return [`ManifestError::Store`] if root cannot be traversed.
    /// - Return [`ManifestError::FileAccess`] if a rule file cannot be read.
    #[instrument(skip(root), level = "debug")]
    pub fn build_from_directory(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        let no_rules = || ManifestError::NoRulesFound {
            root: root.to_path_buf(),
        };

        if !root.is_dir() {
            return Err(no_rules());
        }

        let paths = walk_rule_files(root)?;
        if paths.is_empty() {
            return Err(no_rules());
        }

        let mut manifest = Self::new();
        for path in paths {
            let relative = path.strip_prefix(root).unwrap_or(&path);
            manifest.add_file(root, relative)?;
        }

        debug!("built manifest with {} files", manifest.files.len());
        Ok(manifest)
    }

    /// Add rule file to manifest.
    ///
    /// Path may be absolute, in which case it must fall under root, or
    /// relative to root. File content is hashed, its remote name derived, and
    /// its relative path folded into the structure tree.
    ///
    /// # Errors
    ///
    /// - Return [`ManifestError::PathOutsideRoot`] if path does not resolve
    ///   to a location under root.
    /// - Return [`ManifestError::FileAccess`] if file cannot be read.
    pub fn add_file(&mut self, root: impl AsRef<Path>, path: impl AsRef<Path>) -> Result<()> {
        let root = root.as_ref();
        let path = path.as_ref();
        let outside = || ManifestError::PathOutsideRoot {
            path: path.to_path_buf(),
            root: root.to_path_buf(),
        };

        let relative = match path.is_absolute() {
            true => path.strip_prefix(root).map_err(|_| outside())?,
            false => path,
        };

        // INVARIANT: Relative part may only descend into root.
        let descends = relative
            .components()
            .all(|part| matches!(part, Component::Normal(_) | Component::CurDir));
        let relative = to_relative_string(relative);
        if !descends || relative.is_empty() {
            return Err(outside());
        }

        let full_path = root.join(&relative);
        let bytes = fs::read(&full_path).map_err(|err| ManifestError::FileAccess {
            source: err,
            path: full_path,
        })?;

        self.files.push(FileEntry {
            remote_name: remote_name(&relative),
            size: bytes.len() as u64,
            md5: content_hash(&bytes),
            path: relative.clone(),
        });
        self.insert_structure(&relative);

        Ok(())
    }

    /// Remote name recorded for relative path.
    ///
    /// Falls back to deriving the remote name when path is not listed, so
    /// previews agree with what an upload would record.
    pub fn lookup_remote_name(&self, path: &str) -> String {
        self.files
            .iter()
            .find(|entry| entry.path == path)
            .map(|entry| entry.remote_name.clone())
            .unwrap_or_else(|| remote_name(path))
    }

    /// Sum of all file sizes.
    pub fn total_size(&self) -> u64 {
        self.files.iter().map(|entry| entry.size).sum()
    }

    /// Serialize manifest into pretty printed JSON.
    ///
    /// # Errors
    ///
    /// - Return [`ManifestError::Serialize`] if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(ManifestError::Serialize)
    }

    fn insert_structure(&mut self, relative: &str) {
        let mut parts = relative.split('/').peekable();
        let mut current = &mut self.structure;
        while let Some(part) = parts.next() {
            if parts.peek().is_none() {
                current.insert(part.to_string(), Node::File);
                break;
            }

            let node = current
                .entry(part.to_string())
                .or_insert_with(|| Node::Dir(Structure::new()));

            // INVARIANT: A directory always wins over a file of the same name.
            if matches!(node, Node::File) {
                *node = Node::Dir(Structure::new());
            }

            current = match node {
                Node::Dir(children) => children,
                Node::File => unreachable!("file node replaced by directory above"),
            };
        }
    }
}

impl Default for Manifest {
    fn default() -> Self {
        Self::new()
    }
}

impl FromStr for Manifest {
    type Err = ManifestError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        serde_json::from_str(data).map_err(ManifestError::Deserialize)
    }
}

impl Display for Manifest {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(self.to_json()?.as_str())
    }
}

/// Manifest error types.
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    /// Root holds no rule files.
    #[error("no .mdc rule files found in {:?}", root.display())]
    NoRulesFound { root: PathBuf },

    /// Path is not under rules root.
    #[error("path {:?} is not under rules root {:?}", path.display(), root.display())]
    PathOutsideRoot { path: PathBuf, root: PathBuf },

    /// Rule file cannot be opened.
    #[error("failed to access rule file {:?}", path.display())]
    FileAccess {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Rules root cannot be walked.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Manifest cannot be serialized.
    #[error("failed to serialize manifest")]
    Serialize(#[source] serde_json::Error),

    /// Manifest cannot be deserialized.
    #[error("failed to parse manifest")]
    Deserialize(#[source] serde_json::Error),
}

impl From<ManifestError> for FmtError {
    fn from(_: ManifestError) -> Self {
        FmtError
    }
}

/// Friendly result alias :3
type Result<T, E = ManifestError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::RuleStore;
    use indoc::indoc;
    use serde_json::json;
    use simple_test_case::test_case;

    #[test_case("python/linting.mdc", "python_linting_mdc"; "nested rule")]
    #[test_case("top.mdc", "top_mdc"; "top level rule")]
    #[test_case("README", "README"; "no extension")]
    #[test_case("dir/noext", "dir_noext"; "nested without extension")]
    #[test_case("a/b/c.tar.gz", "a_b_c.tar_gz"; "only last extension splits")]
    #[test_case("my_dir/x.mdc", "my_dir_x_mdc"; "underscores kept")]
    #[test_case(".hidden", "_hidden"; "dot file")]
    #[test]
    fn derive_remote_name(path: &str, expect: &str) {
        assert_eq!(remote_name(path), expect);
        assert_eq!(remote_name(path), remote_name(path));
    }

    #[test]
    fn remote_names_collide_on_underscores() {
        assert_eq!(remote_name("a/b_c.mdc"), remote_name("a_b/c.mdc"));
    }

    #[test]
    fn build_from_directory_records_every_rule() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = RuleStore::open(dir.path());
        store.save("python/linting.mdc", "X")?;
        store.save("database/postgres.mdc", "PostgreSQL rules")?;
        store.save("notes.txt", "ignored")?;

        let manifest = Manifest::build_from_directory(dir.path())?;
        let expect = vec![
            FileEntry {
                path: "database/postgres.mdc".into(),
                remote_name: "database_postgres_mdc".into(),
                size: 16,
                md5: content_hash("PostgreSQL rules"),
            },
            FileEntry {
                path: "python/linting.mdc".into(),
                remote_name: "python_linting_mdc".into(),
                size: 1,
                md5: content_hash("X"),
            },
        ];
        assert_eq!(manifest.files, expect);
        assert_eq!(manifest.schema_version, SCHEMA_VERSION);
        assert_eq!(manifest.total_size(), 17);

        let structure = serde_json::to_value(&manifest.structure)?;
        let expect = json!({
            "database": { "postgres.mdc": null },
            "python": { "linting.mdc": null },
        });
        assert_eq!(structure, expect);

        Ok(())
    }

    #[test]
    fn build_from_directory_without_rules() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let result = Manifest::build_from_directory(dir.path());
        assert!(matches!(result, Err(ManifestError::NoRulesFound { .. })));

        let result = Manifest::build_from_directory(dir.path().join("missing"));
        assert!(matches!(result, Err(ManifestError::NoRulesFound { .. })));

        Ok(())
    }

    #[test]
    fn add_file_accepts_absolute_path_under_root() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = RuleStore::open(dir.path());
        store.save("a/b.mdc", "X")?;

        let mut manifest = Manifest::new();
        manifest.add_file(dir.path(), dir.path().join("a/b.mdc"))?;
        assert_eq!(manifest.files[0].path, "a/b.mdc");
        assert_eq!(manifest.files[0].remote_name, "a_b_mdc");

        Ok(())
    }

    #[test]
    fn add_file_rejects_paths_outside_root() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let root = dir.path().join("rules");
        let mut manifest = Manifest::new();

        let result = manifest.add_file(&root, dir.path().join("elsewhere.mdc"));
        assert!(matches!(result, Err(ManifestError::PathOutsideRoot { .. })));

        let result = manifest.add_file(&root, "../elsewhere.mdc");
        assert!(matches!(result, Err(ManifestError::PathOutsideRoot { .. })));

        let result = manifest.add_file(&root, "missing.mdc");
        assert!(matches!(result, Err(ManifestError::FileAccess { .. })));
        assert!(manifest.files.is_empty());

        Ok(())
    }

    #[test]
    fn structure_prefers_directory_over_file() -> anyhow::Result<()> {
        let mut manifest = Manifest::new();
        manifest.insert_structure("a");
        manifest.insert_structure("a/b.mdc");

        let result = serde_json::to_value(&manifest.structure)?;
        assert_eq!(result, json!({ "a": { "b.mdc": null } }));

        Ok(())
    }

    #[test]
    fn serialize_round_trip_preserves_files() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = RuleStore::open(dir.path());
        store.save("python/linting.mdc", "X")?;
        store.save("top.mdc", "Y")?;

        let manifest = Manifest::build_from_directory(dir.path())?;
        let result: Manifest = manifest.to_string().parse()?;
        assert_eq!(result.files, manifest.files);
        assert_eq!(result.structure, manifest.structure);
        assert_eq!(result.tool_version, manifest.tool_version);

        Ok(())
    }

    #[test]
    fn deserialize_tolerates_missing_versions() -> anyhow::Result<()> {
        let result: Manifest = indoc! {r#"
            {
              "future_field": true,
              "files": [
                {
                  "path": "a/b.mdc",
                  "remote_name": "a_b_mdc",
                  "size": 1,
                  "md5": "02129bb861061d1a052c592e2dc6b383"
                }
              ]
            }
        "#}
        .parse()?;

        assert_eq!(result.schema_version, "");
        assert_eq!(result.files.len(), 1);
        assert!(result.structure.is_empty());

        Ok(())
    }

    #[test]
    fn deserialize_rulesctl_manifest() -> anyhow::Result<()> {
        let result: Manifest = indoc! {r#"
            {
              "schema_version": "1.0.0",
              "cli_version": "0.1.0",
              "updated_at": "2025-03-01T21:00:00.123456789+09:00",
              "structure": {
                "python": {
                  "linting.mdc": null
                }
              },
              "files": [
                {
                  "path": "python/linting.mdc",
                  "gist_name": "python_linting.mdc",
                  "size": 1,
                  "md5": "02129bb861061d1a052c592e2dc6b383"
                }
              ]
            }
        "#}
        .parse()?;

        assert_eq!(result.tool_version, "0.1.0");
        assert_eq!(result.updated_at, "2025-03-01T12:00:00.123456789Z".parse::<DateTime<Utc>>()?);
        assert_eq!(result.lookup_remote_name("python/linting.mdc"), "python_linting.mdc");
        assert_eq!(result.files[0].md5, content_hash("X"));

        Ok(())
    }

    #[test]
    fn deserialize_rejects_malformed_json() {
        let result = "{ not json".parse::<Manifest>();
        assert!(matches!(result, Err(ManifestError::Deserialize(_))));
    }

    #[test]
    fn lookup_remote_name_falls_back_to_derivation() {
        let mut manifest = Manifest::new();
        manifest.files.push(FileEntry {
            path: "test/example.txt".into(),
            remote_name: "example_txt_12345".into(),
            size: 0,
            md5: content_hash(""),
        });

        assert_eq!(manifest.lookup_remote_name("test/example.txt"), "example_txt_12345");
        assert_eq!(manifest.lookup_remote_name("new/file.txt"), "new_file_txt");
    }
}
