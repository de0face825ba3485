// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Patch status resolution.
//!
//! Status is never stored. It is derived every time from a lock record and a
//! fresh [`Observation`] of both copies of the file, so that it always tells
//! the truth about the current state of the remote target.

use crate::{checksum::Checksum, lock::PatchRecord};

use std::fmt::{Display, Formatter, Result as FmtResult};

/// Derived state of a registered patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PatchStatus {
    /// Ready to apply, local copy matches registration.
    Pending,

    /// Applied and both copies still match what was deployed.
    Applied,

    /// Local copy drifted from registration before any apply.
    Orphaned,

    /// Local copy drifted after apply, remote still holds the deployed copy.
    Obsoleted,

    /// Remote copy changed after apply with no component version change.
    Mismatched,

    /// Remote copy changed after apply because the component was updated.
    Stale,
}

impl PatchStatus {
    /// Operator facing label.
    pub fn label(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Applied => "applied",
            Self::Orphaned => "local changed",
            Self::Obsoleted => "obsolete",
            Self::Mismatched => "remote changed",
            Self::Stale => "component updated",
        }
    }

    /// Remote side no longer holds what was deployed.
    pub fn is_remote_drift(self) -> bool {
        matches!(self, Self::Mismatched | Self::Stale)
    }

    /// Local side no longer matches its baseline.
    pub fn is_local_drift(self) -> bool {
        matches!(self, Self::Orphaned | Self::Obsoleted)
    }
}

impl Display for PatchStatus {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(match self {
            Self::Pending => "PENDING",
            Self::Applied => "APPLIED",
            Self::Orphaned => "ORPHANED",
            Self::Obsoleted => "OBSOLETED",
            Self::Mismatched => "MISMATCHED",
            Self::Stale => "STALE",
        })
    }
}

/// Fresh view of both copies of a patched file.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Observation {
    /// Current remote digest, `None` if the remote file is absent.
    pub remote: Option<Checksum>,

    /// Current local digest, `None` if the local file is absent.
    pub local: Option<Checksum>,

    /// Current remote component version, if known.
    pub remote_version: Option<String>,
}

/// Resolve status of a record against an observation.
///
/// Pure function of its inputs.
pub fn resolve(record: &PatchRecord, observed: &Observation) -> PatchStatus {
    // INVARIANT: Absent local file never matches recorded checksum.
    let local_unchanged =
        observed.local.is_some() && observed.local == record.local_checksum;

    let Some(remote) = &observed.remote else {
        if record.is_applied() {
            return PatchStatus::Mismatched;
        }
        return pending_or_orphaned(local_unchanged);
    };

    if !record.is_applied() {
        return pending_or_orphaned(local_unchanged);
    }

    if record.patched_checksum.as_ref() == Some(remote) {
        return if local_unchanged {
            PatchStatus::Applied
        } else {
            PatchStatus::Obsoleted
        };
    }

    if observed.remote_version != record.remote_version {
        PatchStatus::Stale
    } else {
        PatchStatus::Mismatched
    }
}

fn pending_or_orphaned(local_unchanged: bool) -> PatchStatus {
    if local_unchanged {
        PatchStatus::Pending
    } else {
        PatchStatus::Orphaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pretty_assertions::assert_eq;
    use simple_test_case::test_case;

    fn sum(value: &str) -> Option<Checksum> {
        Some(Checksum::new(value))
    }

    fn registered() -> PatchRecord {
        PatchRecord {
            local_checksum: sum("l1"),
            original_checksum: sum("r1"),
            ..Default::default()
        }
    }

    fn applied(version: Option<&str>) -> PatchRecord {
        PatchRecord {
            patched_checksum: sum("l1"),
            applied_date: Some(Utc::now()),
            remote_version: version.map(Into::into),
            backup_file: Some("/srv/foo.php.bak.20250101_000000".into()),
            ..registered()
        }
    }

    fn observe(remote: Option<&str>, local: Option<&str>, version: Option<&str>) -> Observation {
        Observation {
            remote: remote.map(Checksum::new),
            local: local.map(Checksum::new),
            remote_version: version.map(Into::into),
        }
    }

    #[test_case(registered(), observe(Some("r1"), Some("l1"), None), PatchStatus::Pending; "fresh registration")]
    #[test_case(registered(), observe(Some("r1"), Some("l2"), None), PatchStatus::Orphaned; "local edited before apply")]
    #[test_case(registered(), observe(None, Some("l1"), None), PatchStatus::Pending; "new file not yet deployed")]
    #[test_case(registered(), observe(None, Some("l2"), None), PatchStatus::Orphaned; "new file edited locally")]
    #[test_case(registered(), observe(Some("r1"), None, None), PatchStatus::Orphaned; "local file deleted")]
    #[test_case(applied(Some("1.0")), observe(Some("l1"), Some("l1"), Some("1.0")), PatchStatus::Applied; "clean apply")]
    #[test_case(applied(Some("1.0")), observe(Some("l1"), Some("l2"), Some("1.0")), PatchStatus::Obsoleted; "local edited after apply")]
    #[test_case(applied(Some("1.0")), observe(Some("l1"), None, Some("1.0")), PatchStatus::Obsoleted; "local deleted after apply")]
    #[test_case(applied(Some("1.0")), observe(Some("x9"), Some("l1"), Some("1.0")), PatchStatus::Mismatched; "remote edited in place")]
    #[test_case(applied(Some("1.0")), observe(Some("x9"), Some("l1"), Some("1.1")), PatchStatus::Stale; "component updated")]
    #[test_case(applied(None), observe(Some("x9"), Some("l1"), None), PatchStatus::Mismatched; "unversioned remote edit")]
    #[test_case(applied(Some("1.0")), observe(None, Some("l1"), Some("1.0")), PatchStatus::Mismatched; "remote deleted after apply")]
    #[test_case(applied(Some("1.0")), observe(None, Some("l2"), None), PatchStatus::Mismatched; "remote deleted and local edited")]
    #[test]
    fn resolve_decision_table(record: PatchRecord, observed: Observation, expect: PatchStatus) {
        pretty_assertions::assert_eq!(resolve(&record, &observed), expect);
    }

    #[test]
    fn resolve_is_deterministic() {
        let record = applied(Some("2.0"));
        let observed = observe(Some("x9"), Some("l1"), Some("2.1"));
        let first = resolve(&record, &observed);
        for _ in 0..10 {
            assert_eq!(resolve(&record, &observed), first);
        }
    }

    #[test]
    fn local_checksum_alone_flips_pending_and_orphaned() {
        let record = registered();
        for remote in [None, Some("r1"), Some("zz")] {
            assert_eq!(
                resolve(&record, &observe(remote, Some("l1"), None)),
                PatchStatus::Pending
            );
            assert_eq!(
                resolve(&record, &observe(remote, Some("l2"), None)),
                PatchStatus::Orphaned
            );
        }
    }

    #[test]
    fn status_labels_and_names() {
        assert_eq!(PatchStatus::Stale.to_string(), "STALE");
        assert_eq!(PatchStatus::Orphaned.label(), "local changed");
        assert!(PatchStatus::Mismatched.is_remote_drift());
        assert!(PatchStatus::Obsoleted.is_local_drift());
        assert!(!PatchStatus::Applied.is_local_drift());
    }
}
