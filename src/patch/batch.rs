// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Batch application.
//!
//! Every registered patch is applied in lock store order over one shared
//! remote session. A preview pass observes every patch and shows its diff
//! before the operator is asked once for the whole batch. Failures are
//! recorded per patch and never stop the batch, so patches applied before a
//! failure stay applied and the batch can simply be run again.

use crate::{
    patch::{
        apply::{readiness, ApplyOptions, ApplyOutcome, Interaction, Readiness},
        PatchError, PatchManager, Result, RunMode,
    },
    prompt::{ConfirmRequest, Confirmation},
    remote::Connector,
    status::{resolve, Observation, PatchStatus},
};

use indicatif::{ProgressBar, ProgressStyle};
use std::fmt::{Display, Formatter, Result as FmtResult};
use tracing::{error, info, instrument, warn};

/// What happened to one patch of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchResult {
    Done(ApplyOutcome),

    /// Left alone because its local copy drifted.
    Skipped(PatchStatus),
    Failed(String),
}

impl BatchResult {
    /// Patch is in the requested state.
    pub fn is_satisfied(&self) -> bool {
        matches!(self, Self::Done(_))
    }
}

impl Display for BatchResult {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Done(ApplyOutcome::Applied { .. }) => fmt.write_str("applied"),
            Self::Done(ApplyOutcome::AlreadyApplied) => fmt.write_str("already applied"),
            Self::Done(ApplyOutcome::DryRun) => fmt.write_str("simulated"),
            Self::Skipped(status) => write!(fmt, "skipped ({status})"),
            Self::Failed(message) => write!(fmt, "failed: {message}"),
        }
    }
}

/// Batch member after the preview pass.
#[derive(Debug)]
enum Step {
    Settled(BatchResult),

    /// Upload is due, observed state carried over to the mutation pass.
    Due(Observation),
}

/// One patch of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchEntry {
    pub path: String,
    pub result: BatchResult,
}

/// Outcome of a batch run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BatchReport {
    pub entries: Vec<BatchEntry>,
}

impl BatchReport {
    /// Number of patches in the requested state.
    pub fn successes(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.result.is_satisfied())
            .count()
    }

    pub fn total(&self) -> usize {
        self.entries.len()
    }

    /// Every patch is in the requested state.
    pub fn is_success(&self) -> bool {
        self.successes() == self.total()
    }
}

impl<C, P> PatchManager<'_, C, P>
where
    C: Connector,
    P: Confirmation,
{
    /// Apply every registered patch.
    ///
    /// Patches whose local copy drifted are skipped unless forced. Patches
    /// already applied count as successes without any transfer. The diff of
    /// every patch due for upload is shown before the operator is asked.
    ///
    /// # Errors
    ///
    /// - Return [`PatchError::EmptyStore`] if no patch is registered.
    /// - Return [`PatchError::Protected`] if the target is protected and the
    ///   caller does not tolerate simulation.
    /// - Return [`PatchError::Cancelled`] if the operator declines the batch.
    /// - Return [`PatchError::Remote`] if the remote cannot be reached.
    #[instrument(skip(self), level = "debug")]
    pub fn apply_all(&mut self, options: ApplyOptions) -> Result<BatchReport> {
        if self.data.is_empty() {
            warn!("no patches registered");
            return Err(PatchError::EmptyStore);
        }

        let mode = self
            .gate
            .evaluate(RunMode::from_dry_run(options.dry_run), options.tolerance())?;
        let channel = self.connector.connect()?;

        let steps = self
            .data
            .iter()
            .map(|(path, _)| {
                let step = self.preview_member(&channel, path, options.force);
                (path.clone(), step)
            })
            .collect::<Vec<_>>();

        let due = steps
            .iter()
            .filter(|(_, step)| matches!(step, Step::Due(_)))
            .count();
        if mode == RunMode::Live && due > 0 {
            let question = format!("Apply {due} of {} patches?", steps.len());
            if !self.confirm(ConfirmRequest::default_no(question))? {
                return Err(PatchError::Cancelled);
            }
        }

        let bar = ProgressBar::new(steps.len() as u64);
        let style = ProgressStyle::with_template(
            "{elapsed_precise:.green}  {msg:<50}  [{wide_bar:.yellow/blue}] {pos}/{len}",
        )?
        .progress_chars("-Cco.");
        bar.set_style(style);

        let mut report = BatchReport::default();
        for (path, step) in steps {
            bar.set_message(path.clone());
            let result = match step {
                Step::Settled(result) => result,
                Step::Due(observed) => bar.suspend(|| {
                    let outcome = self.apply_on(
                        &channel,
                        &path,
                        observed,
                        mode,
                        options.force,
                        Interaction::Batch,
                    );
                    match outcome {
                        Ok(outcome) => BatchResult::Done(outcome),
                        Err(error) => BatchResult::Failed(error.to_string()),
                    }
                }),
            };
            match &result {
                BatchResult::Failed(message) => error!("{path}: {message}"),
                BatchResult::Skipped(status) => warn!("{path}: skipped, {status}"),
                BatchResult::Done(_) => {}
            }
            report.entries.push(BatchEntry { path, result });
            bar.inc(1);
        }
        bar.finish_and_clear();

        info!(
            "{}/{} patches {}",
            report.successes(),
            report.total(),
            if mode.is_dry_run() { "would be applied" } else { "applied" }
        );

        Ok(report)
    }

    fn preview_member(&self, channel: &C::Channel, path: &str, force: bool) -> Step {
        let step = self.record(path).and_then(|record| {
            let observed = self.observe(channel, path, record)?;
            let status = resolve(record, &observed);
            if status.is_local_drift() && !force {
                return Ok(Step::Settled(BatchResult::Skipped(status)));
            }

            let local_path = self.config.local_file(path);
            let ready = readiness(path, &local_path, record, &observed, force)?;
            if ready == Readiness::AlreadyApplied {
                return Ok(Step::Settled(BatchResult::Done(ApplyOutcome::AlreadyApplied)));
            }

            let report = self.change_report(channel, path, record, &observed)?;
            self.preview(&format!("changes to {path}"), report);
            Ok(Step::Due(observed))
        });

        step.unwrap_or_else(|error| Step::Settled(BatchResult::Failed(error.to_string())))
    }
}
