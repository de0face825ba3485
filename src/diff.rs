// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Unified diffs for pre-flight display.

use similar::TextDiff;
use std::fmt::{Display, Formatter, Result as FmtResult};

const CONTEXT_LINES: usize = 3;

/// Unified line diff between two texts.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DiffReport {
    lines: Vec<String>,
}

impl DiffReport {
    /// Build diff from `old` to `new` with three lines of context.
    pub fn unified(old: &str, new: &str, old_label: &str, new_label: &str) -> Self {
        let diff = TextDiff::from_lines(old, new);
        let text = diff
            .unified_diff()
            .context_radius(CONTEXT_LINES)
            .header(old_label, new_label)
            .to_string();

        Self {
            lines: text.lines().map(String::from).collect(),
        }
    }

    /// Both texts are identical.
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Truncate to at most `limit` lines, noting how many were cut.
    pub fn bounded(mut self, limit: usize) -> Self {
        if self.lines.len() > limit {
            let cut = self.lines.len() - limit;
            self.lines.truncate(limit);
            self.lines.push(format!("... ({cut} more lines)"));
        }

        self
    }

    /// Iterate diff lines.
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().map(String::as_str)
    }
}

impl Display for DiffReport {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        for line in &self.lines {
            writeln!(fmt, "{line}")?;
        }

        Ok(())
    }
}
