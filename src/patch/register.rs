// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Patch registration and removal.

use crate::{
    checksum::{digest_local, digest_remote},
    inspect::{Component, WpCli},
    lock::PatchRecord,
    patch::{PatchError, PatchManager, Result},
    prompt::{ConfirmRequest, Confirmation},
    remote::{dir_exists, Connector, LocalShell, RemoteChannel},
};

use chrono::Utc;
use std::path::Path;
use tracing::{info, instrument, warn};

const BASELINE_SUFFIX: &str = ".original.bak";

impl<C, P> PatchManager<'_, C, P>
where
    C: Connector,
    P: Confirmation,
{
    /// Register local modification of a file as a patch.
    ///
    /// The untouched remote file is downloaded next to the local copy as the
    /// baseline. A file that does not exist on the remote target yet is
    /// registered as a new file without baseline.
    ///
    /// Registering an applied patch again only refreshes its description and
    /// local version. Its checksums and backups are kept, so later local edits
    /// show up as drift until the patch is applied again.
    ///
    /// # Errors
    ///
    /// - Return [`PatchError::LocalMissing`] if the local file does not exist.
    /// - Return [`PatchError::RemoteRootMissing`] if the remote site root is
    ///   missing.
    /// - Return [`PatchError::Cancelled`] if the operator declines to register
    ///   a file identical to its remote copy.
    /// - Return [`PatchError::BaselineMismatch`] if the downloaded baseline
    ///   differs from the remote file and the operator does not accept it.
    /// - Return [`PatchError::Remote`] if the baseline cannot be downloaded.
    #[instrument(skip(self, description), level = "debug")]
    pub fn add(&mut self, path: &str, description: Option<&str>) -> Result<()> {
        let config = self.config;
        let local_path = config.local_file(path);
        let local = digest_local(&local_path)?
            .ok_or_else(|| PatchError::LocalMissing(local_path.clone()))?;

        let channel = self.connector.connect()?;
        let root = config.remote_root();
        if !dir_exists(&channel, root)? {
            return Err(PatchError::RemoteRootMissing(root.into()));
        }

        let component = Component::from_path(path);
        let local_version = self.local_version(&component);
        let existing = self.data.get(path).cloned();
        let description = description
            .map(String::from)
            .or_else(|| existing.as_ref().map(|record| record.description.clone()))
            .filter(|description| !description.trim().is_empty())
            .unwrap_or_else(|| default_description(path));

        if let Some(mut record) = existing.clone().filter(PatchRecord::is_applied) {
            warn!("patch for {path} is applied, keeping its checksums and backups");
            record.description = description;
            record.local_version = local_version;
            self.data.insert(path, record);
            self.save()?;
            return Ok(());
        }

        let remote_path = config.remote_file(path);
        let original = digest_remote(&channel, &remote_path)?;
        let mut record = PatchRecord {
            description,
            item_type: component.kind,
            item_slug: component.slug.clone(),
            local_version,
            local_checksum: Some(local.clone()),
            original_checksum: original.clone(),
            registered_date: Some(Utc::now()),
            ..Default::default()
        };

        match &original {
            Some(original) => {
                if *original == local {
                    warn!("local and remote copies of {path} are identical");
                    let request =
                        ConfirmRequest::default_no("No modification detected. Register anyway?");
                    if !self.confirm(request)? {
                        return Err(PatchError::Cancelled);
                    }
                }

                let baseline = format!("{path}{BASELINE_SUFFIX}");
                let baseline_path = config.local_file(&baseline);
                info!("download original {remote_path} from {}", channel.target());
                channel.download(&remote_path, &baseline_path)?;

                let downloaded = digest_local(&baseline_path)?;
                if downloaded.as_ref() != Some(original) {
                    warn!(
                        "baseline checksum {} does not match remote checksum {original}",
                        downloaded.as_ref().map(|sum| sum.as_str()).unwrap_or("<none>")
                    );
                    let request = ConfirmRequest::default_no(
                        "Downloaded baseline differs from remote. Continue anyway?",
                    );
                    if !self.confirm(request)? {
                        return Err(PatchError::BaselineMismatch(path.into()));
                    }
                }

                info!("original file kept as {baseline}");
                record.local_backup_file = Some(baseline);
                record.local_backup_checksum = downloaded;
                record.remote_version = self.remote_version(&channel, &component);
            }
            None => info!("{path} does not exist on remote target, registering as new file"),
        }

        if let Some(previous) = existing {
            info!("patch for {path} already registered, updating it");
            record.backup_history = previous.backup_history.clone();
            record.backup_file = previous.backup_file;
            record.retire_backup();
            record.rollback_date = previous.rollback_date;
        }

        self.data.insert(path, record);
        self.save()?;

        info!("patch registered: {path}");
        if component.is_versioned() {
            info!("detected {} {}", component.kind, component.slug);
        }

        Ok(())
    }

    /// Deregister a patch.
    ///
    /// Nothing is changed on the remote target. Removing an applied patch asks
    /// for confirmation first.
    ///
    /// # Errors
    ///
    /// - Return [`PatchError::NotRegistered`] if no record exists for path.
    /// - Return [`PatchError::Cancelled`] if the operator declines.
    #[instrument(skip(self), level = "debug")]
    pub fn remove(&mut self, path: &str) -> Result<()> {
        let record = self.record(path)?;
        if record.is_applied() {
            warn!("patch for {path} is applied to the remote target");
            let request = ConfirmRequest::default_no("Remove it from the lock file anyway?");
            if !self.confirm(request)? {
                return Err(PatchError::Cancelled);
            }
        }

        self.data.remove(path);
        self.save()?;
        info!("patch removed: {path}");

        Ok(())
    }

    fn local_version(&self, component: &Component) -> Option<String> {
        if !component.is_versioned() {
            return None;
        }

        let shell = LocalShell::new(&self.config.local.path);
        WpCli::local(self.config)?.version(&shell, component)
    }
}

fn default_description(path: &str) -> String {
    let name = Path::new(path)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string());

    format!("Patch for {name}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn description_defaults_to_file_name() {
        assert_eq!(
            default_description("wp-content/plugins/foo/includes/cart.php"),
            "Patch for cart.php"
        );
        assert_eq!(default_description("wp-config.php"), "Patch for wp-config.php");
    }
}
