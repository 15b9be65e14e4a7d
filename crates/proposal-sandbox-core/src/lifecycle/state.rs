//! Lifecycle phases and the forward-only state machine that orders them.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::SandboxError;

/// One of the five lifecycle phases of a proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Deploy,
    Setup,
    Run,
    Teardown,
    Validate,
}

impl Phase {
    pub const ALL: [Phase; 5] = [
        Phase::Deploy,
        Phase::Setup,
        Phase::Run,
        Phase::Teardown,
        Phase::Validate,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Deploy => "deploy",
            Phase::Setup => "setup",
            Phase::Run => "run",
            Phase::Teardown => "teardown",
            Phase::Validate => "validate",
        }
    }

    /// State reached once this phase completes.
    pub fn completed_state(self) -> LifecycleState {
        match self {
            Phase::Deploy => LifecycleState::Deployed,
            Phase::Setup => LifecycleState::SetUp,
            Phase::Run => LifecycleState::Executed,
            Phase::Teardown => LifecycleState::TornDown,
            Phase::Validate => LifecycleState::Validated,
        }
    }

    /// Whether the phase has real on-chain effects and therefore belongs in replay.
    pub fn is_replayed(self) -> bool {
        matches!(self, Phase::Deploy | Phase::Run)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of one proposal run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Idle,
    Deployed,
    SetUp,
    Executed,
    TornDown,
    Validated,
}

impl LifecycleState {
    /// Transitions only move forward. Replay skips states, which is still forward.
    pub fn can_transition_to(self, next: LifecycleState) -> bool {
        next > self
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Idle => "idle",
            LifecycleState::Deployed => "deployed",
            LifecycleState::SetUp => "set_up",
            LifecycleState::Executed => "executed",
            LifecycleState::TornDown => "torn_down",
            LifecycleState::Validated => "validated",
        };
        f.write_str(name)
    }
}

/// Tracks the current state of a single proposal run.
#[derive(Debug, Clone)]
pub struct LifecycleTracker {
    state: LifecycleState,
}

impl Default for LifecycleTracker {
    fn default() -> Self {
        Self {
            state: LifecycleState::Idle,
        }
    }
}

impl LifecycleTracker {
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn transition(&mut self, next: LifecycleState) -> Result<(), SandboxError> {
        if !self.state.can_transition_to(next) {
            return Err(SandboxError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }

    pub fn complete(&mut self, phase: Phase) -> Result<(), SandboxError> {
        self.transition(phase.completed_state())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_lifecycle_moves_forward() {
        let mut tracker = LifecycleTracker::default();
        for phase in Phase::ALL {
            tracker.complete(phase).unwrap();
        }
        assert_eq!(tracker.state(), LifecycleState::Validated);
    }

    #[test]
    fn test_replay_skips_test_only_states() {
        let mut tracker = LifecycleTracker::default();
        tracker.complete(Phase::Deploy).unwrap();
        tracker.complete(Phase::Run).unwrap();
        assert_eq!(tracker.state(), LifecycleState::Executed);
    }

    #[test]
    fn test_no_cycles_or_repeats() {
        let mut tracker = LifecycleTracker::default();
        tracker.complete(Phase::Run).unwrap();
        let err = tracker.complete(Phase::Setup).unwrap_err();
        assert!(matches!(
            err,
            SandboxError::InvalidTransition {
                from: LifecycleState::Executed,
                to: LifecycleState::SetUp
            }
        ));
        assert!(tracker.complete(Phase::Run).is_err());
    }

    #[test]
    fn test_only_deploy_and_run_are_replayed() {
        let replayed: Vec<_> = Phase::ALL.into_iter().filter(|p| p.is_replayed()).collect();
        assert_eq!(replayed, vec![Phase::Deploy, Phase::Run]);
    }
}
