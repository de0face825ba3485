// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Patch management.
//!
//! A __patch__ is a hand modification of a single third-party file, kept in
//! the local development copy of a site and deployed by overwriting the same
//! file on the remote target. The [`PatchManager`] registers patches, applies
//! them, rolls them back, and reports their status.
//!
//! # Control Flow
//!
//! Every operation follows the same order. The [`SafetyGate`] decides whether
//! the operation may mutate the remote target at all. Both copies of the file
//! are then digested fresh, and the resulting [`Observation`] is resolved into
//! a [`PatchStatus`]. The remote file is only touched when that status is
//! compatible with the requested action, or when the caller forces it. Every
//! successful mutation is written to the lock store before the operation
//! returns.
//!
//! # Backups
//!
//! Two kinds of backup exist. The __baseline__ is the untouched remote file as
//! it was downloaded during registration, and is kept next to the local copy
//! as `<file>.original.bak`. The __remote backup__ is a timestamped copy made
//! on the remote target right before every apply, `<file>.bak.<timestamp>`,
//! and is what rollback restores.
//!
//! # See Also
//!
//! 1. [`resolve`]
//! 2. [`LockStore`]

pub mod apply;
pub mod batch;
pub mod register;
pub mod rollback;
pub mod safety;

pub use apply::{ApplyOptions, ApplyOutcome, ApplyReport};
pub use batch::{BatchEntry, BatchReport, BatchResult};
pub use rollback::RollbackOutcome;
pub use safety::{RunMode, SafetyGate, Tolerance};

use crate::{
    checksum::{digest_local, digest_remote, ChecksumError},
    config::SiteConfig,
    diff::DiffReport,
    inspect::{Component, WpCli},
    lock::{LockData, LockError, LockStore, PatchRecord},
    path::NoUserDirectory,
    prompt::{ConfirmRequest, Confirmation, InquirePrompt, PromptError},
    remote::{Connector, RemoteChannel, RemoteError, SshConnector},
    status::{resolve, Observation, PatchStatus},
};

use chrono::{DateTime, Utc};
use indexmap::IndexSet;
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    fs,
    path::{Path, PathBuf},
};
use tracing::{info, instrument, warn};

/// Diff lines shown before a mutation.
pub const PREVIEW_LINES: usize = 30;

/// Patch manager for one site.
///
/// Owns the loaded lock data of the site for its whole lifetime. Lock data is
/// saved after every mutation, never lazily at the end.
#[derive(Debug)]
pub struct PatchManager<'cfg, C = SshConnector, P = InquirePrompt>
where
    C: Connector,
    P: Confirmation,
{
    pub(crate) config: &'cfg SiteConfig,
    pub(crate) store: LockStore,
    pub(crate) data: LockData,
    pub(crate) connector: C,
    pub(crate) prompt: P,
    pub(crate) gate: SafetyGate,
}

impl<'cfg> PatchManager<'cfg> {
    /// Open patch manager that reaches the site over SSH and asks the operator
    /// interactively.
    ///
    /// # Errors
    ///
    /// - Return [`PatchError::NoUserDirectory`] if the lock directory cannot be
    ///   determined.
    pub fn open(config: &'cfg SiteConfig) -> Result<Self> {
        Self::new(config, SshConnector::new(&config.remote.host), InquirePrompt)
    }
}

impl<'cfg, C, P> PatchManager<'cfg, C, P>
where
    C: Connector,
    P: Confirmation,
{
    /// Construct new patch manager, loading the lock store of the site.
    ///
    /// # Errors
    ///
    /// - Return [`PatchError::NoUserDirectory`] if the lock directory cannot be
    ///   determined.
    pub fn new(config: &'cfg SiteConfig, connector: C, prompt: P) -> Result<Self> {
        let store = LockStore::locate(config.lock_dir()?, config.site_alias());
        Ok(Self::with_store(config, store, connector, prompt))
    }

    /// Construct new patch manager on an already located lock store.
    pub fn with_store(config: &'cfg SiteConfig, store: LockStore, connector: C, prompt: P) -> Self {
        let data = store.load();
        Self {
            config,
            store,
            data,
            connector,
            prompt,
            gate: SafetyGate::new(config.security.production_safety),
        }
    }

    /// Loaded lock data.
    pub fn data(&self) -> &LockData {
        &self.data
    }

    /// Lock store backing this manager.
    pub fn store(&self) -> &LockStore {
        &self.store
    }

    /// Lookup registered patch.
    ///
    /// # Errors
    ///
    /// - Return [`PatchError::NotRegistered`] if no record exists for path.
    pub fn record(&self, path: &str) -> Result<&PatchRecord> {
        self.data
            .get(path)
            .ok_or_else(|| PatchError::NotRegistered(path.into()))
    }

    /// Resolve current status of a registered patch.
    ///
    /// # Errors
    ///
    /// - Return [`PatchError::NotRegistered`] if no record exists for path.
    /// - Return [`PatchError::Remote`] if the remote cannot be reached.
    /// - Return [`PatchError::Checksum`] if either copy cannot be digested.
    #[instrument(skip(self), level = "debug")]
    pub fn status(&self, path: &str) -> Result<PatchStatus> {
        let record = self.record(path)?;
        let channel = self.connector.connect()?;
        let observed = self.observe(&channel, path, record)?;

        Ok(resolve(record, &observed))
    }

    /// List registered patches with their current status.
    ///
    /// Only paths matching at least one glob pattern are listed, or every
    /// path when no pattern is given. When the remote target cannot be
    /// reached, status is reported from lock data alone.
    ///
    /// # Errors
    ///
    /// - Return [`PatchError::Pattern`] if a glob pattern is invalid.
    #[instrument(skip(self, patterns), level = "debug")]
    pub fn list(&self, patterns: &[impl AsRef<str>]) -> Result<Vec<PatchListing>> {
        let patterns = patterns
            .iter()
            .map(|pattern| glob::Pattern::new(pattern.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;

        let channel = match self.connector.connect() {
            Ok(channel) => Some(channel),
            Err(error) => {
                warn!("cannot reach remote target, status is unverified: {error}");
                None
            }
        };

        let listing = self
            .data
            .iter()
            .filter(|(path, _)| patterns.is_empty() || patterns.iter().any(|p| p.matches(path)))
            .map(|(path, record)| {
                let state = match &channel {
                    Some(channel) => match self.observe(channel, path, record) {
                        Ok(observed) => ListingState::Verified(resolve(record, &observed)),
                        Err(error) => ListingState::Failed(error.to_string()),
                    },
                    None => ListingState::Unverified {
                        applied: record.is_applied(),
                    },
                };

                PatchListing {
                    path: path.clone(),
                    component: Component::from_path(path),
                    record: record.clone(),
                    state,
                }
            })
            .collect();

        Ok(listing)
    }

    /// Summarize lock store state.
    pub fn info(&self) -> StoreInfo {
        StoreInfo {
            site: self.store.site().map(String::from),
            lock_file: self.store.path().to_path_buf(),
            exists: self.store.path().exists(),
            fallback: self.store.uses_fallback(),
            remote: format!("{}:{}", self.config.remote.host, self.config.remote_root()),
            local: self.config.local.path.clone(),
            production_safety: self.config.security.production_safety,
            patches: self.data.len(),
            applied: self.data.iter().filter(|(_, r)| r.is_applied()).count(),
            last_updated: self.data.last_updated,
        }
    }

    /// Paths a whole-tree sync must leave alone.
    ///
    /// Every registered patch, its local baseline, and every remote backup it
    /// produced, relative to the site root.
    pub fn sync_exclusions(&self) -> Vec<String> {
        let root = format!("{}/", self.config.remote_root().trim_end_matches('/'));
        let relative = |path: &str| path.strip_prefix(&root).unwrap_or(path).to_string();

        let mut exclusions = IndexSet::new();
        for (path, record) in self.data.iter() {
            exclusions.insert(path.clone());
            if let Some(baseline) = &record.local_backup_file {
                exclusions.insert(baseline.clone());
            }
            for backup in record.backup_file.iter().chain(record.backup_history.iter()) {
                exclusions.insert(relative(backup));
            }
        }

        exclusions.into_iter().collect()
    }

    /// Paths of patches currently applied.
    pub fn patched_files(&self) -> Vec<String> {
        self.data
            .iter()
            .filter(|(_, record)| record.is_applied())
            .map(|(path, _)| path.clone())
            .collect()
    }

    pub(crate) fn observe(
        &self,
        channel: &C::Channel,
        path: &str,
        record: &PatchRecord,
    ) -> Result<Observation> {
        let remote = digest_remote(channel, &self.config.remote_file(path))?;
        let local = digest_local(&self.config.local_file(path))?;

        // INVARIANT: Version is only consulted for applied patches whose remote copy moved.
        let remote_version = match &remote {
            Some(digest)
                if record.is_applied() && record.patched_checksum.as_ref() != Some(digest) =>
            {
                self.remote_version(channel, &Component::from_path(path))
            }
            _ => None,
        };

        Ok(Observation {
            remote,
            local,
            remote_version,
        })
    }

    pub(crate) fn remote_version(
        &self,
        channel: &C::Channel,
        component: &Component,
    ) -> Option<String> {
        if !component.is_versioned() {
            return None;
        }

        WpCli::remote(self.config)?.version(channel, component)
    }

    pub(crate) fn confirm(&self, request: ConfirmRequest) -> Result<bool> {
        Ok(self.prompt.confirm(&request)?)
    }

    pub(crate) fn save(&mut self) -> Result<()> {
        self.store.save(&mut self.data)?;
        Ok(())
    }

    pub(crate) fn preview(&self, title: &str, report: DiffReport) {
        if report.is_empty() {
            info!("{title}: no differences");
            return;
        }

        info!("{title}:\n{}", report.bounded(PREVIEW_LINES));
    }
}

/// Read remote file as text through a local scratch copy.
pub(crate) fn fetch_text(
    channel: &impl RemoteChannel,
    remote: &str,
    scratch: &Path,
) -> Result<String> {
    channel.download(remote, scratch)?;
    read_text(scratch)
}

pub(crate) fn read_text(path: &Path) -> Result<String> {
    let data = fs::read(path)?;
    Ok(String::from_utf8_lossy(&data).into_owned())
}

/// One line of a patch listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchListing {
    pub path: String,
    pub component: Component,
    pub record: PatchRecord,
    pub state: ListingState,
}

/// Status as far as it could be determined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListingState {
    /// Status resolved against fresh checksums.
    Verified(PatchStatus),

    /// Remote target unreachable, reported from lock data alone.
    Unverified { applied: bool },

    /// Status could not be determined.
    Failed(String),
}

impl Display for ListingState {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Verified(status) => write!(fmt, "{status} ({})", status.label()),
            Self::Unverified { applied: true } => fmt.write_str("applied (unverified)"),
            Self::Unverified { applied: false } => fmt.write_str("pending (unverified)"),
            Self::Failed(message) => write!(fmt, "error: {message}"),
        }
    }
}

/// Summary of a site lock store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreInfo {
    pub site: Option<String>,
    pub lock_file: PathBuf,
    pub exists: bool,

    /// Data was read from the generic lock file.
    pub fallback: bool,
    pub remote: String,
    pub local: PathBuf,
    pub production_safety: bool,
    pub patches: usize,
    pub applied: usize,
    pub last_updated: Option<DateTime<Utc>>,
}

/// Patch management error types.
#[derive(Debug, thiserror::Error)]
pub enum PatchError {
    /// No record exists for path.
    #[error("patch for {0:?} is not registered")]
    NotRegistered(String),

    /// Local copy of a patched file is missing.
    #[error("local file {0:?} does not exist")]
    LocalMissing(PathBuf),

    /// Remote site root is missing.
    #[error("remote site root {0:?} does not exist")]
    RemoteRootMissing(String),

    /// Patch has never produced a remote backup.
    #[error("patch for {0:?} has no remote backup to restore")]
    NoBackup(String),

    /// Recorded remote backup no longer exists.
    #[error("remote backup {0:?} does not exist")]
    BackupMissing(String),

    /// Remote backup could not be confirmed after creation.
    #[error("remote backup {0:?} could not be verified, apply aborted")]
    BackupNotVerified(String),

    /// Remote content after upload differs from local content.
    #[error("remote checksum of {path:?} after upload is {actual}, expected {expected}")]
    UploadMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    /// Local copy drifted from its baseline.
    #[error("local file {0:?} changed since registration, use --force to accept it")]
    LocalDrift(String),

    /// Remote copy drifted from what was deployed.
    #[error("remote file {path:?} is {status}, use --force to overwrite it")]
    RemoteDrift { path: String, status: PatchStatus },

    /// Downloaded baseline does not match the remote digest.
    #[error("downloaded baseline for {0:?} does not match the remote file")]
    BaselineMismatch(String),

    /// Operator declined.
    #[error("operation cancelled")]
    Cancelled,

    /// Protected target refused a mutation.
    #[error("production safety is enabled, disable it in the configuration to proceed")]
    Protected,

    /// Batch run found nothing to do.
    #[error("no patches are registered")]
    EmptyStore,

    /// Glob pattern is invalid.
    #[error(transparent)]
    Pattern(#[from] glob::PatternError),

    /// Style template cannot be set for progress bars.
    #[error(transparent)]
    IndicatifStyleTemplate(#[from] indicatif::style::TemplateError),

    /// Lock directory cannot be determined.
    #[error(transparent)]
    NoUserDirectory(#[from] NoUserDirectory),

    /// Lock store cannot be saved.
    #[error(transparent)]
    Lock(#[from] LockError),

    /// Remote channel fails.
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// Checksum oracle fails.
    #[error(transparent)]
    Checksum(#[from] ChecksumError),

    /// Operator prompt fails.
    #[error(transparent)]
    Prompt(#[from] PromptError),

    /// Local file system operation fails.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Friendly result alias :3
pub type Result<T, E = PatchError> = std::result::Result<T, E>;
