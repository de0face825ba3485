// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Configuration layout.
//!
//! Specify the layout of the site configuration file that sitepatch uses to
//! reach the remote target and the local development copy. The configuration
//! is parsed once at process start into a [`SiteConfig`] value, which is then
//! handed by reference to every component that needs it. Nothing re-reads the
//! file mid-operation.
//!
//! # General Layout
//!
//! ```toml
//! [site]
//! alias = "production"
//!
//! [remote]
//! host = "my-ssh-alias"
//! path = "/var/www/html"
//!
//! [local]
//! path = "~/sites/example/public"
//! use_ddev = true
//!
//! [security]
//! production_safety = true
//!
//! [wp_cli]
//! memory_limit = "512M"
//! ```

use crate::path::{default_lock_store_dir, NoUserDirectory};

use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    fs::read_to_string,
    path::{Path, PathBuf},
    str::FromStr,
};

/// Site configuration.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct SiteConfig {
    /// Identity of the site being managed.
    #[serde(default)]
    pub site: SiteSettings,

    /// Remote target reached over SSH.
    #[serde(default)]
    pub remote: RemoteSettings,

    /// Local development copy.
    #[serde(default)]
    pub local: LocalSettings,

    /// Production protection.
    #[serde(default)]
    pub security: SecuritySettings,

    /// WP-CLI settings used for component version probing.
    ///
    /// Version probing is disabled when this section is absent.
    pub wp_cli: Option<WpCliSettings>,

    /// Patch bookkeeping settings.
    #[serde(default)]
    pub patches: PatchSettings,
}

impl SiteConfig {
    /// Load and validate configuration file at target path.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::Read`] if the file cannot be read.
    /// - Return [`ConfigError::Deserialize`] if the file is not valid TOML.
    /// - Return [`ConfigError::Missing`] if a required setting is absent.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let data = read_to_string(path.as_ref()).map_err(|err| ConfigError::Read {
            source: err,
            path: path.as_ref().to_path_buf(),
        })?;
        let config: SiteConfig = data.parse()?;
        config.validate()?;

        Ok(config)
    }

    /// Check that every required setting is present.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::Missing`] naming the first absent setting.
    pub fn validate(&self) -> Result<()> {
        if self.remote.host.trim().is_empty() {
            return Err(ConfigError::Missing("remote.host"));
        }

        if self.remote.path.trim().is_empty() {
            return Err(ConfigError::Missing("remote.path"));
        }

        if self.local.path.as_os_str().is_empty() {
            return Err(ConfigError::Missing("local.path"));
        }

        if let Some(wp_cli) = &self.wp_cli {
            if wp_cli.memory_limit.trim().is_empty() {
                return Err(ConfigError::Missing("wp_cli.memory_limit"));
            }
        }

        Ok(())
    }

    /// Remote site root without trailing slash.
    pub fn remote_root(&self) -> &str {
        let root = self.remote.path.trim_end_matches('/');
        if root.is_empty() {
            "/"
        } else {
            root
        }
    }

    /// Absolute remote path of a site-relative file.
    pub fn remote_file(&self, relative: &str) -> String {
        match self.remote_root() {
            "/" => format!("/{relative}"),
            root => format!("{root}/{relative}"),
        }
    }

    /// Absolute local path of a site-relative file.
    pub fn local_file(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.local.path.join(relative)
    }

    /// Directory that holds the lock files.
    ///
    /// # Errors
    ///
    /// - Return [`NoUserDirectory`] if no directory was configured and the
    ///   default one cannot be determined.
    pub fn lock_dir(&self) -> Result<PathBuf, NoUserDirectory> {
        match &self.patches.lock_dir {
            Some(dir) => Ok(dir.clone()),
            None => default_lock_store_dir(),
        }
    }

    /// Site alias that scopes the lock file, if any.
    pub fn site_alias(&self) -> Option<&str> {
        self.site
            .alias
            .as_deref()
            .map(str::trim)
            .filter(|alias| !alias.is_empty())
    }
}

impl FromStr for SiteConfig {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let mut config: SiteConfig = toml::de::from_str(data).map_err(ConfigError::Deserialize)?;

        // INVARIANT: Perform shell expansion on every local path field.
        config.local.path = expand(&config.local.path)?;
        if let Some(dir) = &config.patches.lock_dir {
            config.patches.lock_dir = Some(expand(dir)?);
        }

        Ok(config)
    }
}

impl Display for SiteConfig {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            toml::ser::to_string_pretty(self)
                .map_err(ConfigError::Serialize)?
                .as_str(),
        )
    }
}

fn expand(path: &Path) -> Result<PathBuf> {
    Ok(PathBuf::from(
        shellexpand::full(path.to_string_lossy().as_ref())
            .map_err(ConfigError::ShellExpansion)?
            .into_owned(),
    ))
}

/// Site identity settings.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct SiteSettings {
    /// Alias of the active site. Scopes the lock file name.
    pub alias: Option<String>,
}

/// Remote target settings.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct RemoteSettings {
    /// SSH host alias, as configured in `~/.ssh/config`.
    #[serde(default)]
    pub host: String,

    /// Absolute path of the WordPress root on the remote host.
    #[serde(default)]
    pub path: String,
}

/// Local development copy settings.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct LocalSettings {
    /// Path of the local WordPress root.
    #[serde(default)]
    pub path: PathBuf,

    /// Run local WP-CLI through DDEV.
    #[serde(default)]
    pub use_ddev: bool,
}

/// Production protection settings.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct SecuritySettings {
    /// Remote target is a protected production environment.
    #[serde(default)]
    pub production_safety: bool,
}

/// WP-CLI settings.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct WpCliSettings {
    /// PHP memory ceiling handed to WP-CLI, e.g. "512M".
    pub memory_limit: String,
}

/// Patch bookkeeping settings.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct PatchSettings {
    /// Directory holding lock files.
    pub lock_dir: Option<PathBuf>,
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read configuration file {path:?}")]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Failed to deserialize configuration.
    #[error(transparent)]
    Deserialize(#[from] toml::de::Error),

    /// Failed to serialize configuration.
    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),

    /// Failed to perform shell expansion on configuration.
    #[error(transparent)]
    ShellExpansion(#[from] shellexpand::LookupError<std::env::VarError>),

    /// Required setting is absent.
    #[error("missing required setting '{0}'")]
    Missing(&'static str),
}

impl From<ConfigError> for FmtError {
    fn from(_: ConfigError) -> Self {
        FmtError
    }
}

/// Friendly result alias :3
type Result<T, E = ConfigError> = std::result::Result<T, E>;
