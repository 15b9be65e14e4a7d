//! Structured error types for proposal runs.
//!
//! Every variant aborts the current proposal's lifecycle. Nothing is retried:
//! replayed state comes from a deterministic fork, so a retry would reproduce
//! the same failure.

use std::fmt;

use crate::lifecycle::{LifecycleState, Phase};
use crate::verify::AssertionRecord;

/// Errors surfaced by the registry, runner and coordinator.
#[derive(Debug, Clone)]
pub enum SandboxError {
    /// A command or hook referenced a registry symbol that is not bound.
    UnknownSymbol {
        /// The symbol that failed to resolve
        symbol: String,
    },

    /// An underlying call reverted or was rejected while running commands.
    CommandExecution {
        /// Proposal name
        proposal: String,
        /// Index of the failing command (0-based)
        index: usize,
        /// The command's human description
        description: String,
        /// Revert reason, verbatim
        reason: String,
    },

    /// A deploy/setup/teardown/validate hook failed.
    Phase {
        phase: Phase,
        /// Proposal name
        proposal: String,
        /// Proposal title
        title: String,
        /// Rendered error chain from the hook
        message: String,
    },

    /// One or more validate-phase invariants did not hold.
    AssertionFailure {
        /// Proposal name
        proposal: String,
        /// Every failed assertion, in evaluation order
        failures: Vec<AssertionRecord>,
        /// Set when the validate hook itself errored after recording failures
        interrupted: Option<Box<SandboxError>>,
    },

    /// A historical proposal failed during environment replay.
    ///
    /// This is a broken fixture (stale or misordered proposal list), not a
    /// defect of the proposal under test.
    Replay {
        /// Name of the historical proposal
        proposal: String,
        /// Position in the ordered proposal list (0-based)
        position: usize,
        /// The underlying failure
        source: Box<SandboxError>,
    },

    /// A lifecycle transition that would move backwards or repeat a phase.
    InvalidTransition {
        from: LifecycleState,
        to: LifecycleState,
    },

    /// A request to move the fork's clock backwards.
    ClockRegression {
        /// Current block or timestamp
        current: u64,
        /// Requested block or timestamp
        requested: u64,
    },

    /// Fork backend or infrastructure failure.
    Fork { message: String },

    /// Invalid configuration or schedule.
    Config { message: String },
}

impl SandboxError {
    pub fn fork(message: impl Into<String>) -> Self {
        SandboxError::Fork {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        SandboxError::Config {
            message: message.into(),
        }
    }

    /// Convert a hook error into a lifecycle error.
    ///
    /// Structured errors raised inside a hook (e.g. an unknown symbol) keep
    /// their kind; anything else becomes a [`SandboxError::Phase`].
    pub fn from_hook(err: anyhow::Error, phase: Phase, proposal: &str, title: &str) -> Self {
        match err.downcast::<SandboxError>() {
            Ok(structured) => structured,
            Err(other) => SandboxError::Phase {
                phase,
                proposal: proposal.to_string(),
                title: title.to_string(),
                message: format!("{:#}", other),
            },
        }
    }

    /// True for failures of historical proposals during replay.
    pub fn is_fixture_error(&self) -> bool {
        matches!(self, SandboxError::Replay { .. })
    }

    /// Short machine-readable kind, used in reports and exit diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            SandboxError::UnknownSymbol { .. } => "unknown_symbol",
            SandboxError::CommandExecution { .. } => "command_execution",
            SandboxError::Phase { .. } => "phase",
            SandboxError::AssertionFailure { .. } => "assertion_failure",
            SandboxError::Replay { .. } => "replay",
            SandboxError::InvalidTransition { .. } => "invalid_transition",
            SandboxError::ClockRegression { .. } => "clock_regression",
            SandboxError::Fork { .. } => "fork",
            SandboxError::Config { .. } => "config",
        }
    }

    /// Innermost error, looking through replay wrappers.
    pub fn root(&self) -> &SandboxError {
        match self {
            SandboxError::Replay { source, .. } => source.root(),
            other => other,
        }
    }
}

impl fmt::Display for SandboxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SandboxError::UnknownSymbol { symbol } => {
                write!(f, "UNKNOWN_SYMBOL: '{}' is not bound in the address registry", symbol)
            }
            SandboxError::CommandExecution {
                proposal,
                index,
                description,
                reason,
            } => {
                write!(f, "COMMAND_FAILED: {} command #{}", proposal, index)?;
                if !description.is_empty() {
                    write!(f, " ({})", description)?;
                }
                write!(f, ": {}", reason)
            }
            SandboxError::Phase {
                phase,
                proposal,
                title,
                message,
            } => {
                write!(f, "PHASE_FAILED: {} phase of {}", phase, proposal)?;
                if !title.is_empty() && title != proposal {
                    write!(f, " \"{}\"", title)?;
                }
                write!(f, ": {}", message)
            }
            SandboxError::AssertionFailure {
                proposal,
                failures,
                interrupted,
            } => {
                write!(
                    f,
                    "ASSERTION_FAILED: {} of {} validation check(s) failed",
                    failures.len(),
                    proposal
                )?;
                for record in failures {
                    write!(f, "\n  - {}", record)?;
                }
                if let Some(err) = interrupted {
                    write!(f, "\n  validation stopped early: {}", err)?;
                }
                Ok(())
            }
            SandboxError::Replay {
                proposal,
                position,
                source,
            } => write!(
                f,
                "REPLAY_FAILED: historical proposal {} (position {}) could not be replayed; \
                 the proposal list is wrong or stale: {}",
                proposal, position, source
            ),
            SandboxError::InvalidTransition { from, to } => {
                write!(f, "INVALID_TRANSITION: cannot move from {} to {}", from, to)
            }
            SandboxError::ClockRegression { current, requested } => write!(
                f,
                "CLOCK_REGRESSION: cannot move clock from {} back to {}",
                current, requested
            ),
            SandboxError::Fork { message } => write!(f, "FORK_ERROR: {}", message),
            SandboxError::Config { message } => write!(f, "CONFIG_ERROR: {}", message),
        }
    }
}

impl std::error::Error for SandboxError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SandboxError::Replay { source, .. } => Some(source.as_ref()),
            SandboxError::AssertionFailure {
                interrupted: Some(err),
                ..
            } => Some(err.as_ref()),
            _ => None,
        }
    }
}
