// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Path resolution utilities.
//!
//! Determine relevent path information for external files that need to be
//! interacted with, or managed in some way.

use std::path::PathBuf;

/// Environment variable that overrides the configuration directory.
pub const CONFIG_DIR_ENV: &str = "RULEGIST_CONFIG_DIR";

/// Determine absolute path to user's home directory.
///
/// Does not check if the path returned actually exists.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
pub fn home_dir() -> Result<PathBuf> {
    dirs::home_dir().ok_or(NoWayHome)
}

/// Determine default absolute path to configuration directory.
///
/// Uses `$HOME/.rulegist` as the default absolute path for the directory
/// holding the stored credential and the cached public catalog. Does not
/// check if the path returned actually exists.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
pub fn default_config_dir() -> Result<PathBuf> {
    home_dir().map(|path| path.join(".rulegist"))
}

/// No way to determine user's home directory.
///
/// # See Also
///
/// - [`dirs::home_dir`](https://docs.rs/dirs/latest/dirs/fn.home_dir.html)
#[derive(Clone, Debug, thiserror::Error)]
#[error("cannot determine absolute path to user's home directory")]
pub struct NoWayHome;

/// Friendly result alias :3
pub type Result<T, E = NoWayHome> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn default_config_dir_lives_under_home() -> anyhow::Result<()> {
        let result = default_config_dir()?;
        let expect = home_dir()?.join(".rulegist");
        assert_eq!(result, expect);

        Ok(())
    }
}
