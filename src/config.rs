// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Configuration layout.
//!
//! Specify the runtime settings of rulegist, along with the layout of the
//! credential file that holds the user's GitHub token. Settings are resolved
//! once at start-up and handed to every component that needs them, so nothing
//! here is global.
//!
//! # Token Resolution
//!
//! A token is looked up in the following order:
//!
//! 1. The `GITHUB_TOKEN` environment variable.
//! 2. The credential file at `$RULEGIST_CONFIG_DIR/config.toml`, which falls
//!    back to `$HOME/.rulegist/config.toml`.
//!
//! Interactive prompting is left to the caller, because only the command line
//! layer knows whether a prompt makes sense.

use crate::path::{default_config_dir, NoWayHome, CONFIG_DIR_ENV};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    env,
    fmt::{Debug, Display, Error as FmtError, Formatter, Result as FmtResult},
    fs::{self, OpenOptions},
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};
use tracing::{debug, info, instrument};

/// Environment variable that supplies a token directly.
pub const TOKEN_ENV: &str = "GITHUB_TOKEN";

/// Environment variable that overrides the remote API base URL.
pub const API_URL_ENV: &str = "RULEGIST_API_URL";

/// Default GitHub API base URL.
pub const DEFAULT_API_URL: &str = "https://api.github.com";

/// Environment variable that overrides the public rule catalog location.
pub const CATALOG_URL_ENV: &str = "RULEGIST_CATALOG_URL";

/// Location of the public rule catalog.
pub const DEFAULT_CATALOG_URL: &str =
    "https://raw.githubusercontent.com/choigawoon/rulesctl/main/public-store.json";

/// Bound on each individual HTTP request.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Runtime settings.
///
/// Built once by the binary and passed by reference to whatever needs to
/// resolve credentials, caches, or remote endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Directory holding the credential file and catalog cache.
    pub config_dir: PathBuf,

    /// Base URL of the remote store API.
    pub api_url: String,

    /// URL of the public rule catalog.
    pub catalog_url: String,

    /// Per-request timeout.
    pub timeout: Duration,
}

impl Settings {
    /// Construct settings with defaults rooted at a given configuration
    /// directory.
    pub fn new(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
            api_url: DEFAULT_API_URL.into(),
            catalog_url: DEFAULT_CATALOG_URL.into(),
            timeout: REQUEST_TIMEOUT,
        }
    }

    /// Resolve settings from the process environment.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::ShellExpansion`] if the configuration directory
    ///   override cannot be expanded.
    /// - Return [`ConfigError::NoWayHome`] if no override is set and the home
    ///   directory cannot be determined.
    pub fn from_env() -> Result<Self> {
        let config_dir = match env::var(CONFIG_DIR_ENV) {
            Ok(dir) if !dir.is_empty() => PathBuf::from(shellexpand::full(&dir)?.into_owned()),
            _ => default_config_dir()?,
        };

        let mut settings = Self::new(config_dir);
        if let Ok(url) = env::var(API_URL_ENV) {
            if !url.is_empty() {
                settings.api_url = url.trim_end_matches('/').to_string();
            }
        }

        if let Ok(url) = env::var(CATALOG_URL_ENV) {
            if !url.is_empty() {
                settings.catalog_url = url;
            }
        }

        debug!("resolved settings: {settings:?}");
        Ok(settings)
    }

    /// Path to credential file.
    pub fn credential_file(&self) -> PathBuf {
        self.config_dir.join("config.toml")
    }

    /// Path to cached copy of public catalog.
    pub fn catalog_cache(&self) -> PathBuf {
        self.config_dir.join("public-store.json")
    }
}

/// Credential file layout.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct Credentials {
    /// Personal access token.
    pub token: String,

    /// Last time the token was stored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used: Option<DateTime<Utc>>,
}

impl FromStr for Credentials {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        toml::de::from_str(data).map_err(ConfigError::Deserialize)
    }
}

impl Display for Credentials {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            toml::ser::to_string_pretty(self)
                .map_err(ConfigError::Serialize)?
                .as_str(),
        )
    }
}

/// Where a token came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenSource {
    Environment,
    ConfigFile,
    Prompt,
}

impl Display for TokenSource {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Environment => fmt.write_str("environment variable"),
            Self::ConfigFile => fmt.write_str("config file"),
            Self::Prompt => fmt.write_str("interactive prompt"),
        }
    }
}

/// Bearer credential for the remote store.
#[derive(Clone, PartialEq, Eq)]
pub struct Token {
    secret: String,
    source: TokenSource,
}

impl Token {
    /// Construct new token.
    pub fn new(secret: impl Into<String>, source: TokenSource) -> Self {
        Self {
            secret: secret.into(),
            source,
        }
    }

    /// Raw secret for request headers.
    pub fn secret(&self) -> &str {
        &self.secret
    }

    pub fn source(&self) -> TokenSource {
        self.source
    }
}

impl Debug for Token {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.debug_struct("Token")
            .field("secret", &"<redacted>")
            .field("source", &self.source)
            .finish()
    }
}

/// Resolve token from environment, then credential file.
///
/// Returns `None` when neither source holds a non-empty token.
///
/// # Errors
///
/// - Return [`ConfigError::Read`] if credential file exists but cannot be
///   read.
/// - Return [`ConfigError::Deserialize`] if credential file is malformed.
#[instrument(skip(settings), level = "debug")]
pub fn resolve_token(settings: &Settings) -> Result<Option<Token>> {
    if let Ok(secret) = env::var(TOKEN_ENV) {
        if !secret.is_empty() {
            debug!("token loaded from {TOKEN_ENV}");
            return Ok(Some(Token::new(secret, TokenSource::Environment)));
        }
    }

    let token = load_credentials(settings)?
        .map(|creds| creds.token)
        .filter(|secret| !secret.is_empty())
        .map(|secret| Token::new(secret, TokenSource::ConfigFile));

    Ok(token)
}

/// Load credential file if it exists.
///
/// # Errors
///
/// - Return [`ConfigError::Read`] if credential file cannot be read.
/// - Return [`ConfigError::Deserialize`] if credential file is malformed.
pub fn load_credentials(settings: &Settings) -> Result<Option<Credentials>> {
    let path = settings.credential_file();
    match fs::read_to_string(&path) {
        Ok(data) => Ok(Some(data.parse()?)),
        Err(error) if error.kind() == ErrorKind::NotFound => Ok(None),
        Err(error) => Err(ConfigError::Read {
            source: error,
            path,
        }),
    }
}

/// Store token into credential file.
///
/// Creates the configuration directory if missing. Access to both directory
/// and file is restricted to the owning user.
///
/// # Errors
///
/// - Return [`ConfigError::EmptyToken`] if token is empty.
/// - Return [`ConfigError::Write`] if directory or file cannot be written.
#[instrument(skip(settings, token), level = "debug")]
pub fn save_token(settings: &Settings, token: impl AsRef<str>) -> Result<PathBuf> {
    let token = token.as_ref().trim();
    if token.is_empty() {
        return Err(ConfigError::EmptyToken);
    }

    create_private_dir(&settings.config_dir)?;
    let mut credentials = load_credentials(settings)?.unwrap_or_default();
    credentials.token = token.to_string();
    credentials.last_used = Some(Utc::now());

    let path = settings.credential_file();
    write_private_file(&path, credentials.to_string().as_bytes())?;
    info!("token saved to {}", path.display());

    Ok(path)
}

fn create_private_dir(path: &Path) -> Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);

    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }

    builder.create(path).map_err(|err| ConfigError::Write {
        source: err,
        path: path.to_path_buf(),
    })
}

fn write_private_file(path: &Path, contents: &[u8]) -> Result<()> {
    let map_err = |err| ConfigError::Write {
        source: err,
        path: path.to_path_buf(),
    };

    let mut options = OpenOptions::new();
    options.create(true).write(true).truncate(true);

    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path).map_err(map_err)?;

    // INVARIANT: Tighten permissions even if the file existed beforehand.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(fs::Permissions::from_mode(0o600))
            .map_err(map_err)?;
    }

    file.write_all(contents).map_err(map_err)?;

    Ok(())
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to deserialize configuration.
    #[error(transparent)]
    Deserialize(#[from] toml::de::Error),

    /// Failed to serialize configuration.
    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),

    /// Failed to perform shell expansion on configuration.
    #[error(transparent)]
    ShellExpansion(#[from] shellexpand::LookupError<std::env::VarError>),

    /// Home directory cannot be determined.
    #[error(transparent)]
    NoWayHome(#[from] NoWayHome),

    /// Refused to store an empty token.
    #[error("token is empty")]
    EmptyToken,

    /// Credential file cannot be read.
    #[error("failed to read credential file at {:?}", path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Credential file or its directory cannot be written.
    #[error("failed to write credentials at {:?}", path.display())]
    Write {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
}

impl From<ConfigError> for FmtError {
    fn from(_: ConfigError) -> Self {
        FmtError
    }
}

/// Friendly result alias :3
type Result<T, E = ConfigError> = std::result::Result<T, E>;
