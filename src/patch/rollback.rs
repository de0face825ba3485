// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Patch rollback.

use crate::{
    diff::DiffReport,
    patch::{fetch_text, PatchError, PatchManager, Result, RunMode, Tolerance},
    prompt::{ConfirmRequest, Confirmation},
    remote::{copy_file, file_exists, Connector},
};

use chrono::Utc;
use tracing::{info, instrument, warn};

/// Result of a rollback request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RollbackOutcome {
    /// Remote file was restored from this backup.
    Restored { backup: String },

    /// Simulation finished without touching the remote target.
    DryRun,
}

impl<C, P> PatchManager<'_, C, P>
where
    C: Connector,
    P: Confirmation,
{
    /// Restore remote file from the backup taken by the last apply.
    ///
    /// A protected target always runs as simulation. Live rollbacks ask for
    /// confirmation, defaulting to no.
    ///
    /// # Errors
    ///
    /// - Return [`PatchError::NotRegistered`] if no record exists for path.
    /// - Return [`PatchError::NoBackup`] if the patch has no remote backup.
    ///   The remote target is not contacted in that case.
    /// - Return [`PatchError::BackupMissing`] if the backup is gone.
    /// - Return [`PatchError::Cancelled`] if the operator declines.
    #[instrument(skip(self), level = "debug")]
    pub fn rollback(&mut self, path: &str, dry_run: bool) -> Result<RollbackOutcome> {
        let record = self.record(path)?;
        let Some(backup) = record.backup_file.clone() else {
            warn!("no remote backup recorded for {path}");
            return Err(PatchError::NoBackup(path.into()));
        };

        let mode = self
            .gate
            .evaluate(RunMode::from_dry_run(dry_run), Tolerance::DowngradeToDryRun)?;
        let channel = self.connector.connect()?;
        if !file_exists(&channel, &backup)? {
            return Err(PatchError::BackupMissing(backup));
        }

        let remote_path = self.config.remote_file(path);
        let scratch = tempfile::tempdir()?;
        let restored = fetch_text(&channel, &backup, &scratch.path().join("backup"))?;
        let current = if file_exists(&channel, &remote_path)? {
            fetch_text(&channel, &remote_path, &scratch.path().join("current"))?
        } else {
            String::new()
        };
        self.preview(
            &format!("rollback of {path}"),
            DiffReport::unified(&current, &restored, "current", "backup"),
        );

        if mode.is_dry_run() {
            info!("dry run, {path} not restored");
            return Ok(RollbackOutcome::DryRun);
        }

        let request = ConfirmRequest::default_no(format!("Restore {path} from {backup}?"));
        if !self.confirm(request)? {
            return Err(PatchError::Cancelled);
        }

        copy_file(&channel, &backup, &remote_path)?;

        if let Some(record) = self.data.get_mut(path) {
            record.patched_checksum = None;
            record.retire_backup();
            record.applied_date = None;
            record.remote_version = None;
            record.rollback_date = Some(Utc::now());
        }
        self.save()?;
        info!("patch rolled back: {path}");

        Ok(RollbackOutcome::Restored { backup })
    }
}
