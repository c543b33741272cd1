// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Local rule store management.
//!
//! Rulegist keeps every rule file of a project in one place called the
//! __rules root__. The rules root always lives at `.cursor/rules` relative to
//! the working directory the tool was invoked from.
//!
//! # Rules Root Layout
//!
//! Any file with an ".mdc" extension anywhere below the rules root counts as a
//! rule file, no matter how deep it is nested. Each rule file is identified by
//! its __relative path__, i.e., its path from the rules root written with
//! forward slashes, e.g., `python/linting.mdc`.
//!
//! Relative paths are never allowed to leave the rules root. Any path that
//! contains a ".." component, or that is absolute, is rejected before the
//! file system is touched.

use ignore::WalkBuilder;
use md5::{Digest, Md5};
use std::{
    collections::BTreeMap,
    env,
    fs,
    path::{Component, Path, PathBuf},
};
use tracing::{debug, info, instrument};

/// Location of rules root relative to working directory.
pub const RULES_DIR: &str = ".cursor/rules";

/// Extension that marks a file as a rule file.
pub const RULE_EXTENSION: &str = "mdc";

/// Sample rule files written by [`RuleStore::init_samples`].
pub const SAMPLE_RULES: [(&str, &str); 3] = [
    (
        "example/hello.mdc",
        "# Example rule\n\nThis is an example rule file.\nWrite your own rules to customize how the assistant behaves.\n",
    ),
    (
        "python/linting.mdc",
        "# Python linting rules\n\nAlways follow the PEP8 style guide.\nIndent with four spaces and keep lines under 79 characters.\n",
    ),
    (
        "javascript/coding.mdc",
        "# JavaScript coding rules\n\n- Always use semicolons.\n- Declare variables with const or let, never var.\n- Prefer arrow functions.\n",
    ),
];

/// Resolve canonical working directory.
///
/// Symbolic links are followed, so the result is always a canonical absolute
/// path.
///
/// # Errors
///
/// - Return [`StoreError::WorkDir`] if working directory is inaccessible.
pub fn resolve_work_dir() -> Result<PathBuf> {
    env::current_dir()
        .and_then(|dir| dir.canonicalize())
        .map_err(StoreError::WorkDir)
}

/// Compute content hash of raw bytes.
///
/// The hash is the lowercase hex encoding of the MD5 digest, which is what
/// every previously uploaded manifest records.
pub fn content_hash(bytes: impl AsRef<[u8]>) -> String {
    hex::encode(Md5::digest(bytes.as_ref()))
}

/// Check if path names a rule file by its extension.
pub fn is_rule_file(path: impl AsRef<Path>) -> bool {
    path.as_ref()
        .extension()
        .is_some_and(|ext| ext == RULE_EXTENSION)
}

/// Convert path relative to root into slash-separated form.
pub(crate) fn to_relative_string(path: &Path) -> String {
    path.components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Walk root recursively for rule files.
///
/// Hidden files and ignore files are not special here, every rule file is
/// picked up. Results are sorted by path so that repeated walks over the
/// same tree produce the same order.
///
/// # Errors
///
/// - Return [`StoreError::Walk`] if a directory entry cannot be read.
pub fn walk_rule_files(root: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
    let root = root.as_ref();
    let mut files = Vec::new();
    let walker = WalkBuilder::new(root)
        .standard_filters(false)
        .sort_by_file_name(|a, b| a.cmp(b))
        .build();

    for entry in walker {
        let entry = entry.map_err(|err| StoreError::Walk {
            source: err,
            path: root.to_path_buf(),
        })?;

        let is_file = entry.file_type().is_some_and(|kind| kind.is_file());
        if is_file && is_rule_file(entry.path()) {
            files.push(entry.into_path());
        }
    }

    Ok(files)
}

/// Local store of rule files.
///
/// Every operation is scoped to the rules root handed over at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleStore {
    root: PathBuf,
}

impl RuleStore {
    /// Open rule store at target root.
    ///
    /// Does not check if root exists.
    pub fn open(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve rules root from current working directory.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::WorkDir`] if working directory is inaccessible.
    pub fn resolve_root() -> Result<PathBuf> {
        Ok(resolve_work_dir()?.join(RULES_DIR))
    }

    /// Open rule store at rules root of current working directory.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::WorkDir`] if working directory is inaccessible.
    pub fn from_work_dir() -> Result<Self> {
        Ok(Self::open(Self::resolve_root()?))
    }

    /// Absolute path to rules root.
    pub fn root(&self) -> &Path {
        self.root.as_path()
    }

    /// Create rules root and its parents if missing.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::CreateDir`] if directory creation fails.
    pub fn ensure_root(&self) -> Result<()> {
        create_dir_all(&self.root)
    }

    /// Resolve relative path of rule file to its absolute location.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::PathEscapesRoot`] if relative path is empty,
    ///   absolute, or contains a ".." component.
    pub fn full_path(&self, relative: impl AsRef<str>) -> Result<PathBuf> {
        Ok(self.root.join(sanitize(relative.as_ref())?))
    }

    /// Check if a rule file exists at relative path.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::PathEscapesRoot`] if relative path escapes root.
    pub fn contains(&self, relative: impl AsRef<str>) -> Result<bool> {
        Ok(self.full_path(relative)?.exists())
    }

    /// List every rule file under root with its content hash.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::NoRulesFound`] if root is missing, or has no
    ///   rule files in it.
    /// - Return [`StoreError::Walk`] if root cannot be traversed.
    /// - Return [`StoreError::Read`] if a rule file cannot be read.
    #[instrument(skip(self), level = "debug")]
    pub fn list_files(&self) -> Result<BTreeMap<String, String>> {
        if !self.root.is_dir() {
            return Err(StoreError::NoRulesFound {
                root: self.root.clone(),
            });
        }

        let mut files = BTreeMap::new();
        for path in walk_rule_files(&self.root)? {
            let bytes = fs::read(&path).map_err(|err| StoreError::Read {
                source: err,
                path: path.clone(),
            })?;

            // INVARIANT: Walked paths always start with the root.
            let relative = path.strip_prefix(&self.root).unwrap_or(&path);
            files.insert(to_relative_string(relative), content_hash(&bytes));
        }

        if files.is_empty() {
            return Err(StoreError::NoRulesFound {
                root: self.root.clone(),
            });
        }

        debug!("found {} rule files", files.len());
        Ok(files)
    }

    /// Read contents of rule file.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::PathEscapesRoot`] if relative path escapes root.
    /// - Return [`StoreError::Read`] if file cannot be read.
    pub fn read(&self, relative: impl AsRef<str>) -> Result<Vec<u8>> {
        let path = self.full_path(relative)?;
        fs::read(&path).map_err(|err| StoreError::Read { source: err, path })
    }

    /// Save rule file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::PathEscapesRoot`] if relative path escapes root.
    /// - Return [`StoreError::CreateDir`] if parent directories cannot be
    ///   created.
    /// - Return [`StoreError::Write`] if file cannot be written.
    #[instrument(skip(self, relative, contents), level = "debug")]
    pub fn save(&self, relative: impl AsRef<str>, contents: impl AsRef<[u8]>) -> Result<()> {
        let path = self.full_path(relative)?;
        if let Some(parent) = path.parent() {
            create_dir_all(parent)?;
        }

        debug!("save rule file {:?}", path.display());
        fs::write(&path, contents.as_ref()).map_err(|err| StoreError::Write { source: err, path })
    }

    /// Delete rule file.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::PathEscapesRoot`] if relative path escapes root.
    /// - Return [`StoreError::Remove`] if file cannot be removed.
    #[instrument(skip(self, relative), level = "debug")]
    pub fn delete(&self, relative: impl AsRef<str>) -> Result<()> {
        let path = self.full_path(relative)?;
        debug!("delete rule file {:?}", path.display());
        fs::remove_file(&path).map_err(|err| StoreError::Remove { source: err, path })
    }

    /// Write sample rule files into root.
    ///
    /// Existing files are left untouched. Returns each sample path along with
    /// whether it was freshly written.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::CreateDir`] if root cannot be created.
    /// - Return [`StoreError::Write`] if a sample cannot be written.
    pub fn init_samples(&self) -> Result<Vec<(String, bool)>> {
        self.ensure_root()?;
        let mut outcome = Vec::new();
        for (relative, contents) in SAMPLE_RULES {
            if self.contains(relative)? {
                info!("sample already exists: {relative}");
                outcome.push((relative.to_string(), false));
                continue;
            }

            self.save(relative, contents)?;
            info!("created sample: {relative}");
            outcome.push((relative.to_string(), true));
        }

        Ok(outcome)
    }
}

/// Validate relative path so it cannot leave rules root.
fn sanitize(relative: &str) -> Result<PathBuf> {
    let escapes = || StoreError::PathEscapesRoot {
        path: relative.to_string(),
    };

    let mut clean = PathBuf::new();
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => continue,
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(escapes())
            }
        }
    }

    if clean.as_os_str().is_empty() {
        return Err(escapes());
    }

    Ok(clean)
}

pub(crate) fn create_dir_all(path: &Path) -> Result<()> {
    fs::create_dir_all(path).map_err(|err| StoreError::CreateDir {
        source: err,
        path: path.to_path_buf(),
    })
}

/// Local rule store error types.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Working directory is inaccessible.
    #[error("failed to resolve working directory")]
    WorkDir(#[source] std::io::Error),

    /// Rules root is missing or holds no rule files.
    #[error("no .mdc rule files found in {:?}", root.display())]
    NoRulesFound { root: PathBuf },

    /// Relative path would resolve outside of rules root.
    #[error("path {path:?} escapes rules root")]
    PathEscapesRoot { path: String },

    /// Rules root cannot be traversed.
    #[error("failed to walk rule files under {:?}", path.display())]
    Walk {
        #[source]
        source: ignore::Error,
        path: PathBuf,
    },

    /// Directory cannot be created.
    #[error("failed to create directory {:?}", path.display())]
    CreateDir {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Rule file cannot be read.
    #[error("failed to read rule file {:?}", path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Rule file cannot be written.
    #[error("failed to write rule file {:?}", path.display())]
    Write {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Rule file cannot be removed.
    #[error("failed to remove rule file {:?}", path.display())]
    Remove {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
}

/// Friendly result alias :3
pub type Result<T, E = StoreError> = std::result::Result<T, E>;
