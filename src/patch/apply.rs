// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Patch application.

use crate::{
    checksum::{digest_remote, Checksum},
    diff::DiffReport,
    inspect::Component,
    lock::PatchRecord,
    patch::{
        batch::BatchReport, fetch_text, read_text, PatchError, PatchManager, Result, RunMode,
        Tolerance,
    },
    prompt::{ConfirmRequest, Confirmation},
    remote::{
        copy_file, file_exists, file_mode, make_dirs, remote_parent, set_file_mode, Connector,
        RemoteChannel,
    },
    status::{resolve, Observation, PatchStatus},
};

use chrono::{Local, Utc};
use std::path::Path;
use tracing::{info, instrument, warn};

/// Options of an apply run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ApplyOptions {
    /// Show what would be done without touching the remote target.
    pub dry_run: bool,

    /// Overwrite drifted remote copies and accept drifted local copies.
    pub force: bool,

    /// Continue as simulation instead of failing on a protected target.
    pub simulate_if_protected: bool,
}

impl ApplyOptions {
    pub(crate) fn tolerance(&self) -> Tolerance {
        if self.simulate_if_protected {
            Tolerance::DowngradeToDryRun
        } else {
            Tolerance::Refuse
        }
    }
}

/// Result of applying one patch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Local copy was uploaded.
    Applied {
        /// Remote backup taken before upload, `None` for new files.
        backup: Option<String>,
        checksum: Checksum,
    },

    /// Remote target already holds the patch.
    AlreadyApplied,

    /// Simulation finished without touching the remote target.
    DryRun,
}

/// Result of an apply request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyReport {
    Single(ApplyOutcome),
    Batch(BatchReport),
}

impl ApplyReport {
    /// Every requested patch is satisfied.
    pub fn is_success(&self) -> bool {
        match self {
            Self::Single(_) => true,
            Self::Batch(report) => report.is_success(),
        }
    }
}

/// Whether a patch still needs to be uploaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Readiness {
    AlreadyApplied,

    /// Upload is due, carrying the fresh local digest.
    Ready { local: Checksum },
}

/// How an apply interacts with the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Interaction {
    /// Single apply, diff is shown and operator is asked before mutation.
    Ask,

    /// Batch member, diff was shown and operator agreed to the whole batch.
    Batch,
}

impl<C, P> PatchManager<'_, C, P>
where
    C: Connector,
    P: Confirmation,
{
    /// Apply one patch, or every registered patch when no path is given.
    ///
    /// # Errors
    ///
    /// - Return [`PatchError::Protected`] if the target is protected and the
    ///   caller does not tolerate simulation.
    /// - Return any error of [`PatchManager::apply_one`] for a single patch.
    /// - Return [`PatchError::EmptyStore`] for a batch without patches.
    pub fn apply(&mut self, path: Option<&str>, options: ApplyOptions) -> Result<ApplyReport> {
        match path {
            Some(path) => Ok(ApplyReport::Single(self.apply_one(path, options)?)),
            None => Ok(ApplyReport::Batch(self.apply_all(options)?)),
        }
    }

    /// Apply one patch.
    ///
    /// # Errors
    ///
    /// - Return [`PatchError::NotRegistered`] if no record exists for path.
    /// - Return [`PatchError::LocalMissing`] if the local file is missing.
    /// - Return [`PatchError::LocalDrift`] if the local file drifted and the
    ///   operator does not accept it as new baseline.
    /// - Return [`PatchError::RemoteDrift`] if the remote file drifted and
    ///   force is not set.
    /// - Return [`PatchError::Cancelled`] if the operator declines.
    /// - Return [`PatchError::BackupNotVerified`] if the remote backup cannot
    ///   be confirmed.
    /// - Return [`PatchError::UploadMismatch`] if the uploaded file does not
    ///   match the local file.
    #[instrument(skip(self), level = "debug")]
    pub fn apply_one(&mut self, path: &str, options: ApplyOptions) -> Result<ApplyOutcome> {
        let record = self.record(path)?;
        let mode = self
            .gate
            .evaluate(RunMode::from_dry_run(options.dry_run), options.tolerance())?;
        let channel = self.connector.connect()?;
        let observed = self.observe(&channel, path, record)?;

        self.apply_on(&channel, path, observed, mode, options.force, Interaction::Ask)
    }

    pub(crate) fn apply_on(
        &mut self,
        channel: &C::Channel,
        path: &str,
        observed: Observation,
        mode: RunMode,
        force: bool,
        interaction: Interaction,
    ) -> Result<ApplyOutcome> {
        let config = self.config;
        let mut record = self.record(path)?.clone();
        let local_path = config.local_file(path);
        let remote_path = config.remote_file(path);

        let local = match readiness(path, &local_path, &record, &observed, force)? {
            Readiness::AlreadyApplied => return Ok(ApplyOutcome::AlreadyApplied),
            Readiness::Ready { local } => local,
        };

        if record.local_checksum.as_ref() != Some(&local) {
            self.rebaseline(&mut record, path, &local, mode, force, interaction)?;
        }

        if interaction == Interaction::Ask {
            let report = self.change_report(channel, path, &record, &observed)?;
            self.preview(&format!("changes to {path}"), report);

            if mode == RunMode::Live {
                let request = ConfirmRequest::default_no(format!("Apply patch to {path}?"));
                if !self.confirm(request)? {
                    return Err(PatchError::Cancelled);
                }
            }
        }

        if mode.is_dry_run() {
            info!("dry run, no changes made to {path}");
            return Ok(ApplyOutcome::DryRun);
        }

        let backup = match &observed.remote {
            Some(_) => Some(backup_remote(channel, &remote_path)?),
            None => None,
        };
        let permissions = match &backup {
            Some(backup) => file_mode(channel, backup)?,
            None => None,
        };

        if let Some(parent) = remote_parent(&remote_path) {
            make_dirs(channel, parent)?;
        }
        info!("upload {path} to {}", channel.target());
        channel.upload(&local_path, &remote_path)?;
        if let Some(bits) = &permissions {
            set_file_mode(channel, &remote_path, bits)?;
        }

        let patched = digest_remote(channel, &remote_path)?;
        let component = Component::from_path(path);
        record.retire_backup();
        record.backup_file = backup.clone();
        record.applied_date = Some(Utc::now());

        // INVARIANT: Record what was meant to be deployed, so a corrupt upload resolves as drift.
        record.patched_checksum = Some(local.clone());
        if component.is_versioned() {
            if let Some(version) = self.remote_version(channel, &component) {
                record.remote_version = Some(version);
            }
        }
        self.data.insert(path, record);

        // INVARIANT: Persist even on mismatch so the backup pointer is never lost.
        self.save()?;

        match patched {
            Some(actual) if actual == local => {
                info!("patch applied: {path}");
                Ok(ApplyOutcome::Applied {
                    backup,
                    checksum: actual,
                })
            }
            actual => Err(PatchError::UploadMismatch {
                path: path.into(),
                expected: local.to_string(),
                actual: actual.map(|sum| sum.to_string()).unwrap_or_else(|| "<missing>".into()),
            }),
        }
    }

    /// Diff between what the target holds and what would be uploaded.
    ///
    /// Compares against the baseline kept at registration when the remote
    /// file does not exist.
    pub(crate) fn change_report(
        &self,
        channel: &C::Channel,
        path: &str,
        record: &PatchRecord,
        observed: &Observation,
    ) -> Result<DiffReport> {
        let local = read_text(&self.config.local_file(path))?;
        if observed.remote.is_some() {
            let scratch = tempfile::tempdir()?;
            let remote_path = self.config.remote_file(path);
            let remote = fetch_text(channel, &remote_path, &scratch.path().join("remote"))?;
            return Ok(DiffReport::unified(&remote, &local, "remote", "local"));
        }

        let baseline = record
            .local_backup_file
            .as_ref()
            .map(|baseline| self.config.local_file(baseline))
            .filter(|baseline| baseline.is_file())
            .map(|baseline| read_text(&baseline))
            .transpose()?
            .unwrap_or_default();

        Ok(DiffReport::unified(&baseline, &local, "baseline", "local"))
    }

    fn rebaseline(
        &mut self,
        record: &mut PatchRecord,
        path: &str,
        local: &Checksum,
        mode: RunMode,
        force: bool,
        interaction: Interaction,
    ) -> Result<()> {
        warn!(
            "local copy of {path} changed since registration: {} -> {local}",
            record
                .local_checksum
                .as_ref()
                .map(Checksum::as_str)
                .unwrap_or("<none>")
        );

        let accepted = force
            || (interaction == Interaction::Ask
                && self.confirm(ConfirmRequest::default_no(
                    "Accept current local copy as new baseline?",
                ))?);
        if !accepted {
            return Err(PatchError::LocalDrift(path.into()));
        }

        record.local_checksum = Some(local.clone());
        if mode.is_dry_run() {
            info!("dry run, new baseline of {path} not saved");
            return Ok(());
        }

        if let Some(stored) = self.data.get_mut(path) {
            stored.local_checksum = Some(local.clone());
        }
        self.save()?;
        info!("baseline of {path} updated to {local}");

        Ok(())
    }
}

/// Decide whether a patch needs uploading.
///
/// # Errors
///
/// - Return [`PatchError::LocalMissing`] if the local copy is gone.
/// - Return [`PatchError::RemoteDrift`] if the remote copy drifted and force
///   is not set.
pub(crate) fn readiness(
    path: &str,
    local_path: &Path,
    record: &PatchRecord,
    observed: &Observation,
    force: bool,
) -> Result<Readiness> {
    let status = resolve(record, observed);
    info!("{path}: {status}");

    if status == PatchStatus::Applied {
        info!("patch already applied: {path}");
        return Ok(Readiness::AlreadyApplied);
    }

    let Some(local) = observed.local.clone() else {
        return Err(PatchError::LocalMissing(local_path.to_path_buf()));
    };

    if status.is_remote_drift() {
        if !force {
            warn!("remote copy of {path} changed since the patch was applied");
            return Err(PatchError::RemoteDrift {
                path: path.into(),
                status,
            });
        }
        warn!("overwriting drifted remote copy of {path}");
    }

    Ok(Readiness::Ready { local })
}

fn backup_remote(channel: &impl RemoteChannel, remote_path: &str) -> Result<String> {
    let stamp = format!("{remote_path}.bak.{}", Local::now().format("%Y%m%d_%H%M%S"));

    // INVARIANT: Never overwrite an earlier backup taken within the same second.
    let mut backup = stamp.clone();
    let mut counter = 1;
    while file_exists(channel, &backup)? {
        backup = format!("{stamp}-{counter}");
        counter += 1;
    }

    copy_file(channel, remote_path, &backup)?;

    if !file_exists(channel, &backup)? {
        return Err(PatchError::BackupNotVerified(backup));
    }

    info!("remote backup created: {backup}");
    Ok(backup)
}
