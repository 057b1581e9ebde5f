//! Workflow errors.
//!
//! Every variant names the step that failed and the last known state so
//! the operator can resume or intervene by hand. Nothing here is retried
//! automatically.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use duplex_core::{ActiveEnvironment, Color, InfraError};

use crate::flipper::SwitchAction;

/// Workflow step, for error reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployStep {
    ResolveActive,
    Confirm,
    ReadCapacity,
    Deploy,
    Converge,
    ScaleDown,
    WaitForImage,
}

impl fmt::Display for DeployStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeployStep::ResolveActive => "resolve active environment",
            DeployStep::Confirm => "confirmation",
            DeployStep::ReadCapacity => "read active capacity",
            DeployStep::Deploy => "deploy",
            DeployStep::Converge => "wait for convergence",
            DeployStep::ScaleDown => "scale down",
            DeployStep::WaitForImage => "wait for image",
        };
        f.write_str(s)
    }
}

const TAIL_LINES: usize = 10;

/// Last non-blank lines of a failed action's output, indented under the
/// error message. Empty when the action printed nothing.
pub fn output_tail(output: &str) -> String {
    let lines: Vec<&str> = output
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.trim().is_empty())
        .collect();
    let skip = lines.len().saturating_sub(TAIL_LINES);
    lines[skip..]
        .iter()
        .fold(String::new(), |mut out, line| {
            out.push_str("\n    ");
            out.push_str(line);
            out
        })
}

/// Failure of a deploy or scale-down workflow.
#[derive(Debug, Error)]
pub enum DeployError {
    #[error("{step}: active environment is unknown, refusing to pick a target")]
    AmbiguousActive { step: DeployStep },

    #[error("{step} declined (active: {active}, target: {target})")]
    Declined {
        step: DeployStep,
        active: Color,
        target: Color,
    },

    #[error(
        "{step} action failed with exit code {exit_code:?} after {elapsed:?} (active: {active}, target: {target}){}",
        output_tail(.stderr)
    )]
    ActionFailed {
        step: DeployStep,
        active: Color,
        target: Color,
        exit_code: Option<i32>,
        elapsed: Duration,
        stdout: String,
        stderr: String,
    },

    #[error(
        "{target} did not converge within {elapsed:?} ({attempts} polls, active: {active}); it may still converge"
    )]
    ConvergenceTimeout {
        active: Color,
        target: Color,
        attempts: u32,
        elapsed: Duration,
    },

    #[error("cancelled during {step} after {elapsed:?} (active: {active}, target: {target})")]
    Cancelled {
        step: DeployStep,
        active: Color,
        target: Color,
        elapsed: Duration,
    },

    #[error("{step} is not configured")]
    NotConfigured { step: DeployStep },

    #[error("{step} failed after {elapsed:?} (active: {active}, target: {target}): {source}")]
    Infra {
        step: DeployStep,
        active: Color,
        target: Color,
        elapsed: Duration,
        #[source]
        source: InfraError,
    },
}

impl DeployError {
    pub fn step(&self) -> DeployStep {
        match self {
            DeployError::AmbiguousActive { step }
            | DeployError::Declined { step, .. }
            | DeployError::ActionFailed { step, .. }
            | DeployError::Cancelled { step, .. }
            | DeployError::NotConfigured { step }
            | DeployError::Infra { step, .. } => *step,
            DeployError::ConvergenceTimeout { .. } => DeployStep::Converge,
        }
    }
}

/// Failure of a traffic flip.
#[derive(Debug, Error)]
pub enum FlipError {
    #[error("active environment is unknown, refusing to pick a flip target")]
    AmbiguousActive,

    #[error("flip to {target} declined (active: {active})")]
    Declined {
        active: ActiveEnvironment,
        target: Color,
    },

    #[error(
        "{action} action failed with exit code {exit_code:?} (active: {active}, target: {target}){}",
        output_tail(.stderr)
    )]
    ActionFailed {
        action: SwitchAction,
        active: ActiveEnvironment,
        target: Color,
        exit_code: Option<i32>,
        stdout: String,
        stderr: String,
    },

    #[error("{action} action could not run (active: {active}, target: {target}): {source}")]
    Infra {
        action: SwitchAction,
        active: ActiveEnvironment,
        target: Color,
        #[source]
        source: InfraError,
    },
}

/// Failure of deploy-and-flip or deploy-when-ready.
#[derive(Debug, Error)]
pub enum DeployAndFlipError {
    #[error(transparent)]
    Deploy(#[from] DeployError),

    /// The new version is live in the inactive slot; traffic never moved.
    #[error("deployed to {target} but traffic was not flipped (still on {active}): {source}")]
    DeployedNotFlipped {
        active: Color,
        target: Color,
        #[source]
        source: FlipError,
    },

    #[error("cancelled during stabilization after {elapsed:?}; {target} deployed but not flipped (active: {active})")]
    StabilizeCancelled {
        active: Color,
        target: Color,
        elapsed: Duration,
    },

    #[error("image {repository}:{tag} not found within {elapsed:?} ({attempts} checks); nothing deployed")]
    ImageTimedOut {
        repository: String,
        tag: String,
        attempts: u32,
        elapsed: Duration,
    },

    #[error("cancelled while waiting for image {repository}:{tag} after {elapsed:?}; nothing deployed")]
    ImageWaitCancelled {
        repository: String,
        tag: String,
        elapsed: Duration,
    },
}

impl DeployAndFlipError {
    /// Deployed but not flipped: recoverable by flipping by hand.
    pub fn is_partial(&self) -> bool {
        matches!(
            self,
            DeployAndFlipError::DeployedNotFlipped { .. }
                | DeployAndFlipError::StabilizeCancelled { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_name_step_and_state() {
        let err = DeployError::Cancelled {
            step: DeployStep::Converge,
            active: Color::Blue,
            target: Color::Green,
            elapsed: Duration::from_secs(42),
        };
        let msg = err.to_string();
        assert!(msg.contains("wait for convergence"));
        assert!(msg.contains("active: blue"));
        assert!(msg.contains("target: green"));
        assert!(msg.contains("42s"));
    }

    #[test]
    fn timeout_is_distinct_from_action_failure() {
        let timeout = DeployError::ConvergenceTimeout {
            active: Color::Blue,
            target: Color::Green,
            attempts: 60,
            elapsed: Duration::from_secs(600),
        };
        assert_eq!(timeout.step(), DeployStep::Converge);
        assert!(timeout.to_string().contains("may still converge"));
    }

    #[test]
    fn failed_flip_shows_action_stderr() {
        let err = DeployAndFlipError::DeployedNotFlipped {
            active: Color::Blue,
            target: Color::Green,
            source: FlipError::ActionFailed {
                action: SwitchAction::Forward,
                active: ActiveEnvironment::Resolved(Color::Blue),
                target: Color::Green,
                exit_code: Some(1),
                stdout: "Refreshing state...\n".to_string(),
                stderr: "\nError: Error acquiring the state lock\n\n".to_string(),
            },
        };
        let msg = err.to_string();
        assert!(msg.contains("exit code Some(1)"));
        assert!(msg.ends_with("\n    Error: Error acquiring the state lock"));
        assert!(!msg.contains("Refreshing"));
    }

    #[test]
    fn failed_scale_down_keeps_only_the_last_lines() {
        let stderr: String = (1..=25).map(|i| format!("line {i}\n")).collect();
        let err = DeployError::ActionFailed {
            step: DeployStep::ScaleDown,
            active: Color::Green,
            target: Color::Blue,
            exit_code: Some(2),
            elapsed: Duration::from_secs(3),
            stdout: String::new(),
            stderr,
        };
        let msg = err.to_string();
        assert!(msg.contains("line 16"));
        assert!(msg.contains("line 25"));
        assert!(!msg.contains("line 15"));
        assert_eq!(output_tail(""), "");
        assert_eq!(output_tail("  \n\n"), "");
    }

    #[test]
    fn deployed_not_flipped_is_partial() {
        let err = DeployAndFlipError::DeployedNotFlipped {
            active: Color::Blue,
            target: Color::Green,
            source: FlipError::AmbiguousActive,
        };
        assert!(err.is_partial());
        assert!(!DeployAndFlipError::from(DeployError::AmbiguousActive {
            step: DeployStep::ResolveActive
        })
        .is_partial());
    }
}
