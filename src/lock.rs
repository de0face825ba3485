// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Lock store management.
//!
//! The __lock store__ is the only durable state sitepatch keeps. It maps the
//! site-relative path of every registered patch to a [`PatchRecord`] holding
//! the checksums, versions, backups and dates observed when the patch was
//! registered, applied, or rolled back. Those values are snapshots. They are
//! always compared against freshly computed checksums before being trusted for
//! a decision.
//!
//! # Lock File Layout
//!
//! One JSON file per site:
//!
//! ```json
//! {
//!   "last_updated": "2025-03-01T10:00:00Z",
//!   "patches": {
//!     "wp-content/plugins/foo/foo.php": { "description": "...", ... }
//!   }
//! }
//! ```
//!
//! Sites with an alias use `patches-<alias>.lock.json`, otherwise the generic
//! `patches.lock.json` is used. A site without its own file yet starts from
//! the generic file when one exists. The file is meant to be human diffable
//! and safe to hand edit between runs. Empty strings are read as absent
//! values, and timestamps without an offset are read as local time.
//!
//! There is no locking primitive. Treat the store as single writer per site.

use crate::{checksum::Checksum, inspect::ComponentKind};

use chrono::{DateTime, Local, NaiveDateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};
use std::{
    fs::{self, read_to_string},
    path::{Path, PathBuf},
};
use tracing::{debug, error, info, instrument};

const GENERIC_LOCK_FILE: &str = "patches.lock.json";

/// Patch metadata for one tracked file.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PatchRecord {
    /// Free text description.
    #[serde(default)]
    pub description: String,

    /// Kind of component owning the file.
    #[serde(default)]
    pub item_type: ComponentKind,

    /// Slug of component owning the file.
    #[serde(default)]
    pub item_slug: String,

    /// Last observed local component version.
    #[serde(default, deserialize_with = "non_empty", skip_serializing_if = "Option::is_none")]
    pub local_version: Option<String>,

    /// Last observed remote component version.
    #[serde(default, deserialize_with = "non_empty", skip_serializing_if = "Option::is_none")]
    pub remote_version: Option<String>,

    /// Digest of the local file at registration or last re-baseline.
    #[serde(default, deserialize_with = "non_empty", skip_serializing_if = "Option::is_none")]
    pub local_checksum: Option<Checksum>,

    /// Digest of the remote file at registration, absent for new files.
    #[serde(default, deserialize_with = "non_empty", skip_serializing_if = "Option::is_none")]
    pub original_checksum: Option<Checksum>,

    /// Digest of the remote file right after the last apply.
    #[serde(default, deserialize_with = "non_empty", skip_serializing_if = "Option::is_none")]
    pub patched_checksum: Option<Checksum>,

    /// Remote path of the latest pre-apply snapshot.
    #[serde(default, deserialize_with = "non_empty", skip_serializing_if = "Option::is_none")]
    pub backup_file: Option<String>,

    /// Local path of the downloaded baseline, relative to the local root.
    #[serde(default, deserialize_with = "non_empty", skip_serializing_if = "Option::is_none")]
    pub local_backup_file: Option<String>,

    /// Digest of the downloaded baseline.
    #[serde(default, deserialize_with = "non_empty", skip_serializing_if = "Option::is_none")]
    pub local_backup_checksum: Option<Checksum>,

    /// Earlier remote snapshots produced for this path, oldest first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub backup_history: Vec<String>,

    #[serde(default, deserialize_with = "timestamp", skip_serializing_if = "Option::is_none")]
    pub registered_date: Option<DateTime<Utc>>,

    /// Set while the patch is applied.
    #[serde(default, deserialize_with = "timestamp", skip_serializing_if = "Option::is_none")]
    pub applied_date: Option<DateTime<Utc>>,

    #[serde(default, deserialize_with = "timestamp", skip_serializing_if = "Option::is_none")]
    pub rollback_date: Option<DateTime<Utc>>,
}

impl PatchRecord {
    /// Patch is currently applied.
    pub fn is_applied(&self) -> bool {
        self.applied_date.is_some()
    }

    /// Remember current backup in history and forget it.
    pub fn retire_backup(&mut self) {
        if let Some(backup) = self.backup_file.take() {
            if !self.backup_history.contains(&backup) {
                self.backup_history.push(backup);
            }
        }
    }
}

/// Contents of a lock file.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct LockData {
    #[serde(default, deserialize_with = "timestamp", skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,

    /// Records keyed by site-relative path, in registration order.
    #[serde(default)]
    pub patches: IndexMap<String, PatchRecord>,
}

impl LockData {
    /// Look up record by exact relative path.
    pub fn get(&self, path: &str) -> Option<&PatchRecord> {
        self.patches.get(path)
    }

    /// Look up mutable record by exact relative path.
    pub fn get_mut(&mut self, path: &str) -> Option<&mut PatchRecord> {
        self.patches.get_mut(path)
    }

    /// Insert or replace record, returning the previous one.
    pub fn insert(&mut self, path: impl Into<String>, record: PatchRecord) -> Option<PatchRecord> {
        self.patches.insert(path.into(), record)
    }

    /// Remove record, keeping the order of the rest.
    pub fn remove(&mut self, path: &str) -> Option<PatchRecord> {
        self.patches.shift_remove(path)
    }

    /// Iterate records in store order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &PatchRecord)> {
        self.patches.iter()
    }

    pub fn len(&self) -> usize {
        self.patches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patches.is_empty()
    }
}

/// Site-scoped lock file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockStore {
    path: PathBuf,
    fallback: Option<PathBuf>,
    site: Option<String>,
}

impl LockStore {
    /// Locate lock file for a site inside target directory.
    ///
    /// Does not touch the file system.
    pub fn locate(dir: impl AsRef<Path>, site: Option<&str>) -> Self {
        let generic = dir.as_ref().join(GENERIC_LOCK_FILE);
        match site {
            Some(alias) => Self {
                path: dir.as_ref().join(format!("patches-{alias}.lock.json")),
                fallback: Some(generic),
                site: Some(alias.into()),
            },
            None => Self {
                path: generic,
                fallback: None,
                site: None,
            },
        }
    }

    /// Path that saves are written to.
    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// Site alias scoping this store.
    pub fn site(&self) -> Option<&str> {
        self.site.as_deref()
    }

    /// Path that loads read from.
    ///
    /// The site file when it exists, else the generic file when it exists,
    /// else the site file.
    pub fn source(&self) -> &Path {
        if self.path.exists() {
            return self.path.as_path();
        }

        match &self.fallback {
            Some(generic) if generic.exists() => generic.as_path(),
            _ => self.path.as_path(),
        }
    }

    /// Generic file is being used because the site has no file yet.
    pub fn uses_fallback(&self) -> bool {
        self.source() != self.path.as_path()
    }

    /// Load lock data.
    ///
    /// Never fails. A missing or empty file yields empty data. An unparseable
    /// file is reported, moved aside to `<name>.corrupt-<timestamp>` so that
    /// the next save cannot silently discard it, and yields empty data.
    #[instrument(skip(self), level = "debug")]
    pub fn load(&self) -> LockData {
        let source = self.source();
        let content = match read_to_string(source) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                info!("lock file {:?} not found, a new one will be created", source.display());
                return LockData::default();
            }
            Err(err) => {
                error!("cannot read lock file {:?}: {err}", source.display());
                return LockData::default();
            }
        };

        if content.trim().is_empty() {
            debug!("lock file {:?} is empty", source.display());
            return LockData::default();
        }

        match serde_json::from_str::<LockData>(&content) {
            Ok(data) => {
                info!(
                    "lock file {:?} loaded: {} registered patches",
                    source.display(),
                    data.len()
                );
                data
            }
            Err(err) => {
                error!("lock file {:?} is corrupt: {err}", source.display());
                self.quarantine(source);
                LockData::default()
            }
        }
    }

    /// Save lock data, stamping `last_updated`.
    ///
    /// # Errors
    ///
    /// - Return [`LockError::Serialize`] if data cannot be serialized.
    /// - Return [`LockError::Write`] if the file cannot be written.
    #[instrument(skip(self, data), level = "debug")]
    pub fn save(&self, data: &mut LockData) -> Result<()> {
        data.last_updated = Some(Utc::now());
        let content = serde_json::to_string_pretty(data)?;

        let write_error = |err| LockError::Write {
            source: err,
            path: self.path.clone(),
        };

        if let Some(parent) = self.path.parent() {
            mkdirp::mkdirp(parent).map_err(write_error)?;
        }

        // INVARIANT: Write through temporary file so readers never see half a file.
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, format!("{content}\n")).map_err(write_error)?;
        fs::rename(&tmp, &self.path).map_err(write_error)?;

        match &self.site {
            Some(site) => info!("lock file for site '{site}' updated: {:?}", self.path.display()),
            None => info!("lock file updated: {:?}", self.path.display()),
        }

        Ok(())
    }

    fn quarantine(&self, source: &Path) {
        let stamp = Local::now().format("%Y%m%d_%H%M%S");
        let mut name = source.as_os_str().to_owned();
        name.push(format!(".corrupt-{stamp}"));
        let target = PathBuf::from(name);

        match fs::rename(source, &target) {
            Ok(()) => error!("corrupt lock file kept as {:?}", target.display()),
            Err(err) => error!("cannot move corrupt lock file aside: {err}"),
        }
    }
}

fn non_empty<'de, D, T>(deserializer: D) -> std::result::Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: From<String>,
{
    Ok(Option::<String>::deserialize(deserializer)?
        .filter(|value| !value.trim().is_empty())
        .map(T::from))
}

fn timestamp<'de, D>(deserializer: D) -> std::result::Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(value) = Option::<String>::deserialize(deserializer)? else {
        return Ok(None);
    };
    let value = value.trim();
    if value.is_empty() {
        return Ok(None);
    }

    if let Ok(stamp) = DateTime::parse_from_rfc3339(value) {
        return Ok(Some(stamp.with_timezone(&Utc)));
    }

    // INVARIANT: Naive timestamps were written in local time.
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .and_then(|naive| naive.and_local_timezone(Local).earliest())
        .map(|local| Some(local.with_timezone(&Utc)))
        .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp {value:?}")))
}

/// Lock store error types.
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    /// Lock data cannot be serialized.
    #[error(transparent)]
    Serialize(#[from] serde_json::Error),

    /// Lock file cannot be written.
    #[error("failed to write lock file {path:?}")]
    Write {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
}

/// Friendly result alias :3
type Result<T, E = LockError> = std::result::Result<T, E>;
