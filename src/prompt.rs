// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Operator confirmation.
//!
//! A [`ConfirmRequest`] describes the decision being asked for and its safe
//! default. A [`Confirmation`] implementation decides how the answer is
//! obtained: interactively through [`InquirePrompt`], or by a fixed
//! [`Policy`] for non-interactive runs.

use inquire::Confirm;
use tracing::info;

const AFFIRMATIVE: &[&str] = &["y", "yes", "s", "si", "sí", "ok"];
const NEGATIVE: &[&str] = &["n", "no"];

/// Yes/no question put to the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmRequest {
    pub question: String,

    /// Answer assumed when the operator just hits enter.
    pub default: bool,
}

impl ConfirmRequest {
    /// Question whose safe answer is "no".
    pub fn default_no(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            default: false,
        }
    }
}

/// Mechanism answering confirmation requests.
pub trait Confirmation {
    /// Answer a confirmation request.
    ///
    /// # Errors
    ///
    /// - Return [`PromptError`] if an answer cannot be obtained.
    fn confirm(&self, request: &ConfirmRequest) -> Result<bool>;
}

impl<T: Confirmation + ?Sized> Confirmation for &T {
    fn confirm(&self, request: &ConfirmRequest) -> Result<bool> {
        (**self).confirm(request)
    }
}

/// Interactive terminal prompt.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct InquirePrompt;

impl Confirmation for InquirePrompt {
    fn confirm(&self, request: &ConfirmRequest) -> Result<bool> {
        let answer = Confirm::new(&request.question)
            .with_default(request.default)
            .with_parser(&parse_answer)
            .with_error_message("answer with y or n")
            .prompt()?;

        Ok(answer)
    }
}

/// Fixed answer for non-interactive runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    AlwaysYes,
    AlwaysNo,
}

impl Confirmation for Policy {
    fn confirm(&self, request: &ConfirmRequest) -> Result<bool> {
        let answer = matches!(self, Self::AlwaysYes);
        info!(
            "{} [{}]",
            request.question,
            if answer { "yes" } else { "no" }
        );

        Ok(answer)
    }
}

/// Parse an operator answer.
///
/// Accepts English and Spanish affirmatives.
pub fn parse_answer(input: &str) -> std::result::Result<bool, ()> {
    let input = input.trim().to_lowercase();
    if AFFIRMATIVE.contains(&input.as_str()) {
        Ok(true)
    } else if NEGATIVE.contains(&input.as_str()) {
        Ok(false)
    } else {
        Err(())
    }
}

/// Confirmation error types.
#[derive(Debug, thiserror::Error)]
pub enum PromptError {
    /// Terminal prompt failed or was interrupted.
    #[error(transparent)]
    Inquire(#[from] inquire::InquireError),
}

/// Friendly result alias :3
type Result<T, E = PromptError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use simple_test_case::test_case;

    #[test_case("y", Ok(true); "short yes")]
    #[test_case("YES", Ok(true); "loud yes")]
    #[test_case(" sí ", Ok(true); "spanish yes")]
    #[test_case("ok", Ok(true); "ok")]
    #[test_case("n", Ok(false); "short no")]
    #[test_case("maybe", Err(()); "unknown")]
    #[test]
    fn parse_operator_answer(input: &str, expect: std::result::Result<bool, ()>) {
        pretty_assertions::assert_eq!(parse_answer(input), expect);
    }

    #[test]
    fn fixed_policy_ignores_default() -> anyhow::Result<()> {
        let request = ConfirmRequest::default_no("Apply patch?");
        assert!(Policy::AlwaysYes.confirm(&request)?);
        assert!(!Policy::AlwaysNo.confirm(&request)?);

        Ok(())
    }
}
