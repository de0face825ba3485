// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use sitepatch::{
    checksum::Checksum,
    config::{LocalSettings, PatchSettings, RemoteSettings, SecuritySettings, SiteConfig},
    patch::{
        ApplyOptions, ApplyOutcome, BatchResult, ListingState, PatchError, PatchManager,
        RollbackOutcome,
    },
    prompt::{ConfirmRequest, Confirmation, Policy, PromptError},
    remote::{CommandOutput, Connector, LocalConnector, LocalShell, RemoteChannel, RemoteError},
    status::PatchStatus,
};

use anyhow::Result;
use pretty_assertions::assert_eq;
use std::{
    cell::{Cell, RefCell},
    collections::VecDeque,
    fs,
    path::{Path, PathBuf},
};
use tempfile::TempDir;

const PLUGIN_FILE: &str = "wp-content/plugins/foo/foo.php";
const THEME_FILE: &str = "wp-content/themes/bar/functions.php";
const ORIGINAL: &str = "<?php\n$total = round($sum);\nreturn $total;\n";
const PATCHED: &str = "<?php\n$total = round($sum, 2);\nreturn $total;\n";

struct Site {
    _root: TempDir,
    remote: PathBuf,
    local: PathBuf,
    config: SiteConfig,
}

impl Site {
    fn new() -> Result<Self> {
        let root = tempfile::tempdir()?;
        let remote = root.path().join("remote");
        let local = root.path().join("local");
        fs::create_dir_all(&remote)?;
        fs::create_dir_all(&local)?;

        let config = SiteConfig {
            remote: RemoteSettings {
                host: "test-host".into(),
                path: remote.display().to_string(),
            },
            local: LocalSettings {
                path: local.clone(),
                use_ddev: false,
            },
            patches: PatchSettings {
                lock_dir: Some(root.path().join("locks")),
            },
            ..Default::default()
        };

        Ok(Self {
            _root: root,
            remote,
            local,
            config,
        })
    }

    fn protected(mut self) -> Self {
        self.config.security = SecuritySettings {
            production_safety: true,
        };
        self
    }

    fn manager<P: Confirmation>(&self, prompt: P) -> Result<PatchManager<'_, LocalConnector, P>> {
        Ok(PatchManager::new(
            &self.config,
            LocalConnector::new(&self.remote),
            prompt,
        )?)
    }

    fn write(root: &Path, path: &str, content: &str) -> Result<()> {
        let path = root.join(path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;
        Ok(())
    }

    fn write_remote(&self, path: &str, content: &str) -> Result<()> {
        Self::write(&self.remote, path, content)
    }

    fn write_local(&self, path: &str, content: &str) -> Result<()> {
        Self::write(&self.local, path, content)
    }

    fn read_remote(&self, path: &str) -> Result<String> {
        Ok(fs::read_to_string(self.remote.join(path))?)
    }

    fn remote_backups(&self, path: &str) -> Result<Vec<String>> {
        let file = self.remote.join(path);
        let name = file
            .file_name()
            .map(|name| format!("{}.bak.", name.to_string_lossy()))
            .unwrap_or_default();
        let dir = file.parent().map(Path::to_path_buf).unwrap_or_default();

        let mut backups = fs::read_dir(dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .filter(|entry| entry.starts_with(&name))
            .collect::<Vec<_>>();
        backups.sort();
        Ok(backups)
    }

    /// Remote holds original, local holds patched copy.
    fn with_plugin_patch(self) -> Result<Self> {
        self.write_remote(PLUGIN_FILE, ORIGINAL)?;
        self.write_local(PLUGIN_FILE, PATCHED)?;
        Ok(self)
    }
}

/// Answers from a fixed script, then refuses.
#[derive(Default)]
struct Scripted {
    answers: RefCell<VecDeque<bool>>,
    asked: RefCell<Vec<String>>,
}

impl Scripted {
    fn new(answers: impl IntoIterator<Item = bool>) -> Self {
        Self {
            answers: RefCell::new(answers.into_iter().collect()),
            asked: RefCell::new(Vec::new()),
        }
    }
}

impl Confirmation for Scripted {
    fn confirm(&self, request: &ConfirmRequest) -> Result<bool, PromptError> {
        self.asked.borrow_mut().push(request.question.clone());
        Ok(self.answers.borrow_mut().pop_front().unwrap_or(false))
    }
}

/// Connector that can never reach the remote target.
#[derive(Default)]
struct Offline {
    attempts: Cell<usize>,
}

impl Connector for &Offline {
    type Channel = LocalShell;

    fn connect(&self) -> Result<LocalShell, RemoteError> {
        self.attempts.set(self.attempts.get() + 1);
        Err(RemoteError::Connect {
            host: "offline".into(),
            message: "unreachable".into(),
        })
    }
}

/// Failure injected by [`Faulty`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fault {
    /// Uploaded file lands truncated.
    TruncatedUpload,

    /// Remote `cp` reports success without copying.
    VanishingCopy,

    /// Every download fails.
    BrokenDownload,

    /// Downloaded files arrive garbled.
    GarbledDownload,
}

/// Local "remote" with an optional injected failure, logging every call.
struct Faulty {
    root: PathBuf,
    fault: Option<Fault>,
    calls: RefCell<Vec<String>>,
}

impl Faulty {
    fn new(site: &Site, fault: Option<Fault>) -> Self {
        Self {
            root: site.remote.clone(),
            fault,
            calls: RefCell::new(Vec::new()),
        }
    }

    fn count(&self, prefix: &str) -> usize {
        self.calls
            .borrow()
            .iter()
            .filter(|call| call.starts_with(prefix))
            .count()
    }
}

struct FaultyChannel<'a> {
    shell: LocalShell,
    faulty: &'a Faulty,
}

impl<'a> Connector for &'a Faulty {
    type Channel = FaultyChannel<'a>;

    fn connect(&self) -> Result<FaultyChannel<'a>, RemoteError> {
        Ok(FaultyChannel {
            shell: LocalShell::new(&self.root),
            faulty: *self,
        })
    }
}

impl RemoteChannel for FaultyChannel<'_> {
    fn execute(&self, command: &str) -> Result<CommandOutput, RemoteError> {
        self.faulty.calls.borrow_mut().push(command.into());
        if self.faulty.fault == Some(Fault::VanishingCopy) && command.starts_with("cp ") {
            return Ok(CommandOutput::default());
        }

        self.shell.execute(command)
    }

    fn upload(&self, local: &Path, remote: &str) -> Result<(), RemoteError> {
        self.faulty.calls.borrow_mut().push(format!("upload {remote}"));
        self.shell.upload(local, remote)?;
        if self.faulty.fault == Some(Fault::TruncatedUpload) {
            fs::write(remote, "truncated")?;
        }

        Ok(())
    }

    fn download(&self, remote: &str, local: &Path) -> Result<(), RemoteError> {
        self.faulty.calls.borrow_mut().push(format!("download {remote}"));
        match self.faulty.fault {
            Some(Fault::BrokenDownload) => Err(RemoteError::Download {
                remote: remote.into(),
                local: local.to_path_buf(),
                message: "connection reset by peer".into(),
            }),
            Some(Fault::GarbledDownload) => {
                self.shell.download(remote, local)?;
                fs::write(local, "garbled")?;
                Ok(())
            }
            _ => self.shell.download(remote, local),
        }
    }

    fn target(&self) -> String {
        "faulty".into()
    }
}

/// Declines, remembering how many downloads happened before the question.
struct Snapshot<'a> {
    faulty: &'a Faulty,
    downloads: Cell<Option<usize>>,
}

impl Confirmation for Snapshot<'_> {
    fn confirm(&self, _: &ConfirmRequest) -> Result<bool, PromptError> {
        self.downloads.set(Some(self.faulty.count("download ")));
        Ok(false)
    }
}

fn live() -> ApplyOptions {
    ApplyOptions::default()
}

fn forced() -> ApplyOptions {
    ApplyOptions {
        force: true,
        ..Default::default()
    }
}

#[test]
fn register_records_remote_baseline() -> Result<()> {
    let site = Site::new()?.with_plugin_patch()?;
    let mut manager = site.manager(Policy::AlwaysNo)?;
    manager.add(PLUGIN_FILE, Some("Fix checkout rounding"))?;

    let record = manager.record(PLUGIN_FILE)?;
    assert_eq!(record.description, "Fix checkout rounding");
    assert_eq!(record.item_slug, "foo");
    assert_eq!(record.original_checksum, Some(Checksum::of_bytes(ORIGINAL)));
    assert_eq!(record.local_checksum, Some(Checksum::of_bytes(PATCHED)));
    assert_eq!(record.local_backup_checksum, Some(Checksum::of_bytes(ORIGINAL)));
    assert_eq!(record.applied_date, None);
    assert_eq!(
        fs::read_to_string(site.local.join(format!("{PLUGIN_FILE}.original.bak")))?,
        ORIGINAL
    );
    assert_eq!(manager.status(PLUGIN_FILE)?, PatchStatus::Pending);

    let reloaded = site.manager(Policy::AlwaysNo)?;
    assert_eq!(reloaded.record(PLUGIN_FILE)?, manager.record(PLUGIN_FILE)?);

    Ok(())
}

#[test]
fn register_missing_local_file_fails() -> Result<()> {
    let site = Site::new()?;
    let mut manager = site.manager(Policy::AlwaysYes)?;

    assert!(matches!(
        manager.add(PLUGIN_FILE, None),
        Err(PatchError::LocalMissing(_))
    ));
    assert!(manager.data().is_empty());

    Ok(())
}

#[test]
fn register_identical_copy_needs_confirmation() -> Result<()> {
    let site = Site::new()?;
    site.write_remote(PLUGIN_FILE, ORIGINAL)?;
    site.write_local(PLUGIN_FILE, ORIGINAL)?;

    let prompt = Scripted::default();
    let mut manager = site.manager(&prompt)?;
    assert!(matches!(manager.add(PLUGIN_FILE, None), Err(PatchError::Cancelled)));
    assert!(manager.data().is_empty());
    assert_eq!(prompt.asked.borrow().len(), 1);

    let mut manager = site.manager(Policy::AlwaysYes)?;
    manager.add(PLUGIN_FILE, None)?;
    assert_eq!(manager.record(PLUGIN_FILE)?.description, "Patch for foo.php");

    Ok(())
}

#[test]
fn apply_uploads_and_records_backup() -> Result<()> {
    let site = Site::new()?.with_plugin_patch()?;
    let mut manager = site.manager(Policy::AlwaysYes)?;
    manager.add(PLUGIN_FILE, None)?;

    let (backup, checksum) = match manager.apply_one(PLUGIN_FILE, live())? {
        ApplyOutcome::Applied { backup, checksum } => (backup, checksum),
        other => panic!("patch was not applied: {other:?}"),
    };

    assert_eq!(site.read_remote(PLUGIN_FILE)?, PATCHED);
    assert_eq!(checksum, Checksum::of_bytes(PATCHED));

    let backup = backup.ok_or_else(|| anyhow::anyhow!("no backup recorded"))?;
    assert_eq!(fs::read_to_string(&backup)?, ORIGINAL);

    let record = manager.record(PLUGIN_FILE)?;
    assert_eq!(record.patched_checksum, Some(Checksum::of_bytes(PATCHED)));
    assert_eq!(record.backup_file.as_deref(), Some(backup.as_str()));
    assert!(record.applied_date.is_some());
    assert_eq!(manager.status(PLUGIN_FILE)?, PatchStatus::Applied);
    assert_eq!(manager.patched_files(), vec![PLUGIN_FILE.to_string()]);

    Ok(())
}

#[test]
fn second_apply_is_idempotent() -> Result<()> {
    let site = Site::new()?.with_plugin_patch()?;
    let mut manager = site.manager(Policy::AlwaysYes)?;
    manager.add(PLUGIN_FILE, None)?;
    manager.apply_one(PLUGIN_FILE, live())?;

    let backup = manager.record(PLUGIN_FILE)?.backup_file.clone();
    let backups = site.remote_backups(PLUGIN_FILE)?;

    assert_eq!(manager.apply_one(PLUGIN_FILE, live())?, ApplyOutcome::AlreadyApplied);
    assert_eq!(manager.record(PLUGIN_FILE)?.backup_file, backup);
    assert_eq!(site.remote_backups(PLUGIN_FILE)?, backups);

    Ok(())
}

#[test]
fn declined_apply_changes_nothing() -> Result<()> {
    let site = Site::new()?.with_plugin_patch()?;
    let mut manager = site.manager(Policy::AlwaysNo)?;
    manager.add(PLUGIN_FILE, None)?;

    assert!(matches!(
        manager.apply_one(PLUGIN_FILE, live()),
        Err(PatchError::Cancelled)
    ));
    assert_eq!(site.read_remote(PLUGIN_FILE)?, ORIGINAL);
    assert!(site.remote_backups(PLUGIN_FILE)?.is_empty());

    Ok(())
}

#[test]
fn dry_run_changes_nothing() -> Result<()> {
    let site = Site::new()?.with_plugin_patch()?;
    let mut manager = site.manager(Policy::AlwaysYes)?;
    manager.add(PLUGIN_FILE, None)?;

    let options = ApplyOptions {
        dry_run: true,
        ..Default::default()
    };
    assert_eq!(manager.apply_one(PLUGIN_FILE, options)?, ApplyOutcome::DryRun);
    assert_eq!(site.read_remote(PLUGIN_FILE)?, ORIGINAL);
    assert!(site.remote_backups(PLUGIN_FILE)?.is_empty());
    assert!(!manager.record(PLUGIN_FILE)?.is_applied());

    Ok(())
}

#[test]
fn local_edit_after_apply_is_obsoleted() -> Result<()> {
    let site = Site::new()?.with_plugin_patch()?;
    let mut manager = site.manager(Policy::AlwaysYes)?;
    manager.add(PLUGIN_FILE, None)?;
    manager.apply_one(PLUGIN_FILE, live())?;

    site.write_local(PLUGIN_FILE, "<?php\n$total = round($sum, 4);\n")?;
    assert_eq!(manager.status(PLUGIN_FILE)?, PatchStatus::Obsoleted);

    let mut manager = site.manager(Policy::AlwaysNo)?;
    assert!(matches!(
        manager.apply_one(PLUGIN_FILE, live()),
        Err(PatchError::LocalDrift(_))
    ));
    assert_eq!(site.read_remote(PLUGIN_FILE)?, PATCHED);

    Ok(())
}

#[test]
fn accepted_local_edit_is_rebaselined_and_applied() -> Result<()> {
    let site = Site::new()?.with_plugin_patch()?;
    let mut manager = site.manager(Policy::AlwaysYes)?;
    manager.add(PLUGIN_FILE, None)?;

    let edited = "<?php\n$total = round($sum, 4);\n";
    site.write_local(PLUGIN_FILE, edited)?;
    assert_eq!(manager.status(PLUGIN_FILE)?, PatchStatus::Orphaned);

    manager.apply_one(PLUGIN_FILE, live())?;
    assert_eq!(site.read_remote(PLUGIN_FILE)?, edited);
    assert_eq!(
        manager.record(PLUGIN_FILE)?.local_checksum,
        Some(Checksum::of_bytes(edited))
    );
    assert_eq!(manager.status(PLUGIN_FILE)?, PatchStatus::Applied);

    Ok(())
}

#[test]
fn remote_edit_after_apply_is_mismatched() -> Result<()> {
    let site = Site::new()?.with_plugin_patch()?;
    let mut manager = site.manager(Policy::AlwaysYes)?;
    manager.add(PLUGIN_FILE, None)?;
    manager.apply_one(PLUGIN_FILE, live())?;

    site.write_remote(PLUGIN_FILE, "<?php\n// hotfixed on the server\n")?;
    assert_eq!(manager.status(PLUGIN_FILE)?, PatchStatus::Mismatched);

    match manager.apply_one(PLUGIN_FILE, live()) {
        Err(PatchError::RemoteDrift { status, .. }) => assert_eq!(status, PatchStatus::Mismatched),
        other => panic!("unexpected result: {other:?}"),
    }

    assert!(matches!(
        manager.apply_one(PLUGIN_FILE, forced())?,
        ApplyOutcome::Applied { .. }
    ));
    assert_eq!(site.read_remote(PLUGIN_FILE)?, PATCHED);
    assert_eq!(manager.record(PLUGIN_FILE)?.backup_history.len(), 1);

    Ok(())
}

#[test]
fn deleted_remote_after_apply_is_mismatched() -> Result<()> {
    let site = Site::new()?.with_plugin_patch()?;
    let mut manager = site.manager(Policy::AlwaysYes)?;
    manager.add(PLUGIN_FILE, None)?;
    manager.apply_one(PLUGIN_FILE, live())?;

    fs::remove_file(site.remote.join(PLUGIN_FILE))?;
    assert_eq!(manager.status(PLUGIN_FILE)?, PatchStatus::Mismatched);

    Ok(())
}

#[test]
fn rollback_restores_pending_state() -> Result<()> {
    let site = Site::new()?.with_plugin_patch()?;
    let mut manager = site.manager(Policy::AlwaysYes)?;
    manager.add(PLUGIN_FILE, None)?;
    manager.apply_one(PLUGIN_FILE, live())?;
    let backup = manager.record(PLUGIN_FILE)?.backup_file.clone();

    let outcome = manager.rollback(PLUGIN_FILE, false)?;
    assert!(matches!(outcome, RollbackOutcome::Restored { .. }));
    assert_eq!(site.read_remote(PLUGIN_FILE)?, ORIGINAL);

    let record = manager.record(PLUGIN_FILE)?;
    assert_eq!(record.backup_file, None);
    assert_eq!(record.patched_checksum, None);
    assert_eq!(record.applied_date, None);
    assert!(record.rollback_date.is_some());
    assert_eq!(record.backup_history, backup.into_iter().collect::<Vec<_>>());
    assert_eq!(manager.status(PLUGIN_FILE)?, PatchStatus::Pending);

    Ok(())
}

#[test]
fn rollback_without_backup_never_connects() -> Result<()> {
    let site = Site::new()?.with_plugin_patch()?;
    site.manager(Policy::AlwaysYes)?.add(PLUGIN_FILE, None)?;

    let offline = Offline::default();
    let mut manager = PatchManager::new(&site.config, &offline, Policy::AlwaysYes)?;
    assert!(matches!(
        manager.rollback(PLUGIN_FILE, false),
        Err(PatchError::NoBackup(_))
    ));
    assert_eq!(offline.attempts.get(), 0);

    Ok(())
}

#[test]
fn declined_rollback_changes_nothing() -> Result<()> {
    let site = Site::new()?.with_plugin_patch()?;
    site.manager(Policy::AlwaysYes)?.add(PLUGIN_FILE, None)?;
    site.manager(Policy::AlwaysYes)?.apply_one(PLUGIN_FILE, live())?;

    let mut manager = site.manager(Policy::AlwaysNo)?;
    assert!(matches!(
        manager.rollback(PLUGIN_FILE, false),
        Err(PatchError::Cancelled)
    ));
    assert_eq!(site.read_remote(PLUGIN_FILE)?, PATCHED);
    assert!(manager.record(PLUGIN_FILE)?.is_applied());

    Ok(())
}

#[test]
fn new_file_is_created_without_backup() -> Result<()> {
    let site = Site::new()?;
    let path = "wp-content/mu-plugins/loader.php";
    site.write_local(path, "<?php\nrequire __DIR__ . '/foo/foo.php';\n")?;

    let mut manager = site.manager(Policy::AlwaysYes)?;
    manager.add(path, None)?;
    assert_eq!(manager.record(path)?.original_checksum, None);
    assert_eq!(manager.status(path)?, PatchStatus::Pending);

    let outcome = manager.apply_one(path, live())?;
    assert!(matches!(outcome, ApplyOutcome::Applied { backup: None, .. }));
    assert_eq!(
        site.read_remote(path)?,
        "<?php\nrequire __DIR__ . '/foo/foo.php';\n"
    );
    assert_eq!(manager.status(path)?, PatchStatus::Applied);
    assert!(matches!(
        manager.rollback(path, false),
        Err(PatchError::NoBackup(_))
    ));

    Ok(())
}

#[test]
fn protected_target_refuses_or_simulates() -> Result<()> {
    let site = Site::new()?.with_plugin_patch()?.protected();
    let mut manager = site.manager(Policy::AlwaysYes)?;
    manager.add(PLUGIN_FILE, None)?;

    assert!(matches!(
        manager.apply_one(PLUGIN_FILE, live()),
        Err(PatchError::Protected)
    ));

    let options = ApplyOptions {
        simulate_if_protected: true,
        ..Default::default()
    };
    assert_eq!(manager.apply_one(PLUGIN_FILE, options)?, ApplyOutcome::DryRun);
    assert_eq!(site.read_remote(PLUGIN_FILE)?, ORIGINAL);

    Ok(())
}

#[test]
fn protected_rollback_only_simulates() -> Result<()> {
    let site = Site::new()?.with_plugin_patch()?;
    site.manager(Policy::AlwaysYes)?.add(PLUGIN_FILE, None)?;
    site.manager(Policy::AlwaysYes)?.apply_one(PLUGIN_FILE, live())?;

    let site = site.protected();
    let mut manager = site.manager(Policy::AlwaysYes)?;
    assert_eq!(manager.rollback(PLUGIN_FILE, false)?, RollbackOutcome::DryRun);
    assert_eq!(site.read_remote(PLUGIN_FILE)?, PATCHED);
    assert!(manager.record(PLUGIN_FILE)?.is_applied());

    Ok(())
}

#[test]
fn batch_skips_drifted_and_applies_rest() -> Result<()> {
    let site = Site::new()?.with_plugin_patch()?;
    site.write_remote(THEME_FILE, "<?php\n// theme\n")?;
    site.write_local(THEME_FILE, "<?php\n// patched theme\n")?;

    let mut manager = site.manager(Policy::AlwaysYes)?;
    manager.add(PLUGIN_FILE, None)?;
    manager.add(THEME_FILE, None)?;
    site.write_local(PLUGIN_FILE, "<?php\n// edited after registration\n")?;

    let report = manager.apply_all(live())?;
    assert_eq!(report.total(), 2);
    assert_eq!(report.successes(), 1);
    assert!(!report.is_success());
    assert_eq!(report.entries[0].path, PLUGIN_FILE);
    assert_eq!(report.entries[0].result, BatchResult::Skipped(PatchStatus::Orphaned));
    assert_eq!(site.read_remote(PLUGIN_FILE)?, ORIGINAL);
    assert_eq!(site.read_remote(THEME_FILE)?, "<?php\n// patched theme\n");

    let report = manager.apply_all(forced())?;
    assert!(report.is_success());
    assert_eq!(
        report.entries[1].result,
        BatchResult::Done(ApplyOutcome::AlreadyApplied)
    );
    assert_eq!(
        site.read_remote(PLUGIN_FILE)?,
        "<?php\n// edited after registration\n"
    );

    Ok(())
}

#[test]
fn batch_on_empty_store_fails() -> Result<()> {
    let site = Site::new()?;
    let mut manager = site.manager(Policy::AlwaysYes)?;

    assert!(matches!(manager.apply_all(live()), Err(PatchError::EmptyStore)));

    Ok(())
}

#[test]
fn batch_asks_once() -> Result<()> {
    let site = Site::new()?.with_plugin_patch()?;
    site.write_remote(THEME_FILE, "<?php\n// theme\n")?;
    site.write_local(THEME_FILE, "<?php\n// patched theme\n")?;
    site.manager(Policy::AlwaysYes)?.add(PLUGIN_FILE, None)?;
    site.manager(Policy::AlwaysYes)?.add(THEME_FILE, None)?;

    let prompt = Scripted::new([true]);
    let mut manager = site.manager(&prompt)?;
    assert!(manager.apply_all(live())?.is_success());
    assert_eq!(prompt.asked.borrow().len(), 1);

    Ok(())
}

#[test]
fn list_falls_back_to_unverified_status() -> Result<()> {
    let site = Site::new()?.with_plugin_patch()?;
    site.manager(Policy::AlwaysYes)?.add(PLUGIN_FILE, None)?;

    let offline = Offline::default();
    let manager = PatchManager::new(&site.config, &offline, Policy::AlwaysYes)?;
    let listing = manager.list(&["wp-content/plugins/**"])?;
    assert_eq!(listing.len(), 1);
    assert_eq!(listing[0].state, ListingState::Unverified { applied: false });

    let manager = site.manager(Policy::AlwaysYes)?;
    assert_eq!(
        manager.list(&[] as &[&str])?[0].state,
        ListingState::Verified(PatchStatus::Pending)
    );
    assert!(manager.list(&["wp-content/themes/*"])?.is_empty());

    Ok(())
}

#[test]
fn removing_applied_patch_needs_confirmation() -> Result<()> {
    let site = Site::new()?.with_plugin_patch()?;
    site.manager(Policy::AlwaysYes)?.add(PLUGIN_FILE, None)?;
    site.manager(Policy::AlwaysYes)?.apply_one(PLUGIN_FILE, live())?;

    let mut manager = site.manager(Policy::AlwaysNo)?;
    assert!(matches!(manager.remove(PLUGIN_FILE), Err(PatchError::Cancelled)));
    assert!(manager.record(PLUGIN_FILE).is_ok());

    let mut manager = site.manager(Policy::AlwaysYes)?;
    manager.remove(PLUGIN_FILE)?;
    assert!(manager.data().is_empty());
    assert_eq!(site.read_remote(PLUGIN_FILE)?, PATCHED);

    Ok(())
}

#[test]
fn reregistration_keeps_backup_history() -> Result<()> {
    let site = Site::new()?.with_plugin_patch()?;
    let mut manager = site.manager(Policy::AlwaysYes)?;
    manager.add(PLUGIN_FILE, None)?;
    manager.apply_one(PLUGIN_FILE, live())?;
    manager.rollback(PLUGIN_FILE, false)?;

    let history = manager.record(PLUGIN_FILE)?.backup_history.clone();
    manager.add(PLUGIN_FILE, Some("Second attempt"))?;

    let record = manager.record(PLUGIN_FILE)?;
    assert_eq!(record.description, "Second attempt");
    assert_eq!(record.backup_history, history);
    assert!(record.rollback_date.is_some());

    Ok(())
}

#[test]
fn reregistering_applied_patch_keeps_apply_state() -> Result<()> {
    let site = Site::new()?.with_plugin_patch()?;
    let mut manager = site.manager(Policy::AlwaysYes)?;
    manager.add(PLUGIN_FILE, None)?;
    manager.apply_one(PLUGIN_FILE, live())?;
    let before = manager.record(PLUGIN_FILE)?.clone();

    site.write_local(PLUGIN_FILE, "<?php\n// newer fix\n")?;
    manager.add(PLUGIN_FILE, Some("Newer fix"))?;

    let after = manager.record(PLUGIN_FILE)?;
    assert_eq!(after.description, "Newer fix");
    assert_eq!(after.local_checksum, before.local_checksum);
    assert_eq!(after.backup_file, before.backup_file);
    assert_eq!(after.patched_checksum, before.patched_checksum);
    assert_eq!(manager.status(PLUGIN_FILE)?, PatchStatus::Obsoleted);

    Ok(())
}

#[test]
fn corrupt_upload_is_reported_as_drift() -> Result<()> {
    let site = Site::new()?.with_plugin_patch()?;
    site.manager(Policy::AlwaysYes)?.add(PLUGIN_FILE, None)?;

    let faulty = Faulty::new(&site, Some(Fault::TruncatedUpload));
    let mut manager = PatchManager::new(&site.config, &faulty, Policy::AlwaysYes)?;
    assert!(matches!(
        manager.apply_one(PLUGIN_FILE, live()),
        Err(PatchError::UploadMismatch { .. })
    ));
    assert_eq!(site.read_remote(PLUGIN_FILE)?, "truncated");

    let record = manager.record(PLUGIN_FILE)?;
    assert!(record.is_applied());
    assert!(record.backup_file.is_some());
    assert_eq!(record.patched_checksum, Some(Checksum::of_bytes(PATCHED)));
    assert_eq!(manager.status(PLUGIN_FILE)?, PatchStatus::Mismatched);
    assert!(matches!(
        manager.apply_one(PLUGIN_FILE, live()),
        Err(PatchError::RemoteDrift { .. })
    ));

    let mut manager = site.manager(Policy::AlwaysYes)?;
    assert!(matches!(
        manager.apply_one(PLUGIN_FILE, forced())?,
        ApplyOutcome::Applied { .. }
    ));
    assert_eq!(site.read_remote(PLUGIN_FILE)?, PATCHED);
    assert_eq!(manager.status(PLUGIN_FILE)?, PatchStatus::Applied);

    Ok(())
}

#[test]
fn unverified_backup_aborts_before_upload() -> Result<()> {
    let site = Site::new()?.with_plugin_patch()?;
    site.manager(Policy::AlwaysYes)?.add(PLUGIN_FILE, None)?;

    let faulty = Faulty::new(&site, Some(Fault::VanishingCopy));
    let mut manager = PatchManager::new(&site.config, &faulty, Policy::AlwaysYes)?;
    assert!(matches!(
        manager.apply_one(PLUGIN_FILE, live()),
        Err(PatchError::BackupNotVerified(_))
    ));
    assert_eq!(faulty.count("upload "), 0);
    assert_eq!(site.read_remote(PLUGIN_FILE)?, ORIGINAL);

    let record = manager.record(PLUGIN_FILE)?;
    assert!(!record.is_applied());
    assert_eq!(record.backup_file, None);

    Ok(())
}

#[test]
fn declined_baseline_mismatch_registers_nothing() -> Result<()> {
    let site = Site::new()?.with_plugin_patch()?;
    let faulty = Faulty::new(&site, Some(Fault::GarbledDownload));
    let prompt = Scripted::default();

    let mut manager = PatchManager::new(&site.config, &faulty, &prompt)?;
    assert!(matches!(
        manager.add(PLUGIN_FILE, None),
        Err(PatchError::BaselineMismatch(_))
    ));
    assert_eq!(prompt.asked.borrow().len(), 1);
    assert!(manager.data().is_empty());
    assert!(site.manager(Policy::AlwaysNo)?.data().is_empty());

    Ok(())
}

#[test]
fn failed_baseline_download_registers_nothing() -> Result<()> {
    let site = Site::new()?.with_plugin_patch()?;
    let faulty = Faulty::new(&site, Some(Fault::BrokenDownload));

    let mut manager = PatchManager::new(&site.config, &faulty, Policy::AlwaysYes)?;
    assert!(matches!(
        manager.add(PLUGIN_FILE, None),
        Err(PatchError::Remote(RemoteError::Download { .. }))
    ));
    assert!(manager.data().is_empty());
    assert!(site.manager(Policy::AlwaysNo)?.data().is_empty());

    Ok(())
}

#[test]
fn batch_shows_every_diff_before_asking() -> Result<()> {
    let site = Site::new()?.with_plugin_patch()?;
    site.write_remote(THEME_FILE, "<?php\n// theme\n")?;
    site.write_local(THEME_FILE, "<?php\n// patched theme\n")?;
    site.manager(Policy::AlwaysYes)?.add(PLUGIN_FILE, None)?;
    site.manager(Policy::AlwaysYes)?.add(THEME_FILE, None)?;

    let faulty = Faulty::new(&site, None);
    let prompt = Snapshot {
        faulty: &faulty,
        downloads: Cell::new(None),
    };
    let mut manager = PatchManager::new(&site.config, &faulty, &prompt)?;
    assert!(matches!(manager.apply_all(live()), Err(PatchError::Cancelled)));

    assert_eq!(prompt.downloads.get(), Some(2));
    assert_eq!(faulty.count("upload "), 0);
    assert_eq!(site.read_remote(PLUGIN_FILE)?, ORIGINAL);
    assert_eq!(site.read_remote(THEME_FILE)?, "<?php\n// theme\n");

    Ok(())
}

#[test]
fn batch_digests_each_remote_once_before_upload() -> Result<()> {
    let site = Site::new()?.with_plugin_patch()?;
    site.write_remote(THEME_FILE, "<?php\n// theme\n")?;
    site.write_local(THEME_FILE, "<?php\n// patched theme\n")?;
    site.manager(Policy::AlwaysYes)?.add(PLUGIN_FILE, None)?;
    site.manager(Policy::AlwaysYes)?.add(THEME_FILE, None)?;

    let faulty = Faulty::new(&site, None);
    let mut manager = PatchManager::new(&site.config, &faulty, Policy::AlwaysYes)?;
    assert!(manager.apply_all(live())?.is_success());

    // One digest while previewing, one to verify the upload.
    assert_eq!(faulty.count("md5sum "), 4);
    assert_eq!(faulty.count("upload "), 2);

    Ok(())
}
