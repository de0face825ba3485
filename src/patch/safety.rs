// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Production safety gate.

use crate::patch::{PatchError, Result};

use tracing::warn;

/// Whether an operation may mutate the remote target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Live,
    DryRun,
}

impl RunMode {
    pub fn from_dry_run(dry_run: bool) -> Self {
        if dry_run {
            Self::DryRun
        } else {
            Self::Live
        }
    }

    pub fn is_dry_run(self) -> bool {
        self == Self::DryRun
    }
}

/// What the caller accepts when the target is protected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tolerance {
    /// Continue as a simulation.
    DowngradeToDryRun,

    /// Abort the operation.
    Refuse,
}

/// Guard for protected targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SafetyGate {
    protected: bool,
}

impl SafetyGate {
    pub fn new(protected: bool) -> Self {
        Self { protected }
    }

    /// Determine effective run mode of an operation.
    ///
    /// Dry runs always pass. Live runs against a protected target are either
    /// downgraded or refused, depending on tolerance.
    ///
    /// # Errors
    ///
    /// - Return [`PatchError::Protected`] if a live run is refused.
    pub fn evaluate(&self, requested: RunMode, tolerance: Tolerance) -> Result<RunMode> {
        if !self.protected || requested.is_dry_run() {
            return Ok(requested);
        }

        match tolerance {
            Tolerance::DowngradeToDryRun => {
                warn!("production safety is enabled, running as simulation");
                Ok(RunMode::DryRun)
            }
            Tolerance::Refuse => {
                warn!("production safety is enabled, refusing to modify remote target");
                Err(PatchError::Protected)
            }
        }
    }
}
