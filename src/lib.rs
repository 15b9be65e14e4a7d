//! Proposal Sandbox
//!
//! Replay, execute and verify governance proposals against disposable forks
//! of a live system:
//!
//! - **Replay**: rebuild the exact state a new proposal will run against by
//!   re-running every earlier proposal on a fresh fork
//! - **Lifecycle**: drive the proposal under test through deploy, setup,
//!   run, teardown and validate
//! - **Verification**: exact and tolerance-based invariant checks
//!
//! The engine lives in [`proposal_sandbox_core`]; shared vocabulary types live
//! in [`proposal_sandbox_types`]. This crate re-exports both and ships the
//! `proposal-sandbox` CLI.

pub use proposal_sandbox_core as core;
pub use proposal_sandbox_types as types;

pub use proposal_sandbox_core::{
    AddressRegistry, Command, EnvironmentCoordinator, EnvironmentReport, LifecycleReport,
    Proposal, ProposalDescriptor, ProposalHooks, ProposalSchedule, SandboxError, SandboxPlan,
    Verifier,
};
pub use proposal_sandbox_types::{Address, MethodSignature, Value};
