// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Path resolution utilities.
//!
//! Determine relevent path information for external files that need to be
//! interacted with, or managed in some way.

use std::path::PathBuf;

/// Determine default absolute path to the lock store directory.
///
/// Uses XDG Base Directory path `$XDG_DATA_HOME/sitepatch` as the default
/// absolute path for lock files. Does not check if the path returned
/// actually exists.
///
/// # Errors
///
/// - Return [`NoUserDirectory`] if the directory cannot be determined.
///
/// # See Also
///
/// - [XDG Base Directory](https://wiki.archlinux.org/title/XDG_Base_Directory)
pub fn default_lock_store_dir() -> Result<PathBuf> {
    dirs::data_dir()
        .map(|path| path.join("sitepatch"))
        .ok_or(NoUserDirectory)
}

/// Determine default absolute path to the site configuration file.
///
/// Uses `$XDG_CONFIG_HOME/sitepatch/config.toml`. Does not check if the path
/// returned actually exists.
///
/// # Errors
///
/// - Return [`NoUserDirectory`] if the directory cannot be determined.
pub fn default_config_path() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|path| path.join("sitepatch").join("config.toml"))
        .ok_or(NoUserDirectory)
}

/// No way to determine user's data or configuration directory.
///
/// # See Also
///
/// - [`dirs::data_dir`](https://docs.rs/dirs/latest/dirs/fn.data_dir.html)
#[derive(Clone, Debug, thiserror::Error)]
#[error("cannot determine absolute path to user's data or configuration directory")]
pub struct NoUserDirectory;

/// Friendly result alias :3
pub type Result<T, E = NoUserDirectory> = std::result::Result<T, E>;
