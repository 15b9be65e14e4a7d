//! Proposal Sandbox Core
//!
//! Lifecycle orchestration and verification engine for governance proposals.
//!
//! A proposal is a titled list of commands plus optional hooks. Before a new
//! proposal is tested, every earlier proposal is replayed on a fresh fork of
//! the live system so the new one sees the exact state it will run against.
//!
//! # Features
//!
//! - **Symbolic addressing**: commands name contracts by registry symbol,
//!   resolved immediately before each dispatch
//! - **Five-phase lifecycle**: deploy, setup, run, teardown, validate
//! - **Replay**: historical proposals run `deploy` and `run` only
//! - **Two execution routes**: direct privileged calls or the full on-chain
//!   governance flow
//! - **Local fork**: in-process chain with impersonation, funding and clock
//!   control
//!
//! # Core Modules
//!
//! - [`registry`]: symbol to address map and named contract handles
//! - [`command`]: commands, argument resolution, proposal descriptors
//! - [`lifecycle`]: phases, hooks and the [`LifecycleRunner`]
//! - [`coordinator`]: environment loading and replay
//! - [`fork`]: backend traits and the local fork
//! - [`verify`]: the invariant verifier
//!
//! # Example
//!
//! ```ignore
//! use proposal_sandbox_core::config::SandboxPlan;
//! use proposal_sandbox_core::events::RecordingSink;
//!
//! let plan = SandboxPlan::load(Path::new("demos/proposals.yaml"))?;
//! let recorder = RecordingSink::default();
//! let coordinator = plan.coordinator(plan.config.event_sink(&recorder));
//! let report = coordinator.run(&plan.schedule).await?;
//! ```

#![allow(clippy::result_large_err)]
#![allow(clippy::too_many_arguments)]

pub mod actors;
pub mod command;
pub mod config;
pub mod coordinator;
pub mod declarative;
pub mod errors;
pub mod events;
pub mod fork;
pub mod governance;
pub mod lifecycle;
pub mod registry;
pub mod time;
pub mod verify;

// Re-export main types at crate root for convenience
pub use actors::{Actor, ActorProvider};
pub use command::{Arg, Arguments, Command, ProposalDescriptor, RegistryEffect, ResolvedAction};
pub use config::{ProposalsConfig, SandboxPlan};
pub use coordinator::{
    CoordinatorSettings, Environment, EnvironmentCoordinator, EnvironmentReport, ProposalPreview,
};
pub use errors::SandboxError;
pub use events::{EventSink, LifecycleEvent, NullSink, RecordingSink, TracingSink};
pub use fork::{Fork, ForkLease, ForkProvider, LocalForkProvider, ReferencePoint};
pub use governance::GovernanceSettings;
pub use lifecycle::{
    ExecutionRoute, LifecycleReport, LifecycleRunner, LifecycleState, Phase, PlannedProposal,
    Proposal, ProposalHooks, ProposalSchedule,
};
pub use registry::{AddressRegistry, NamedContracts};
pub use time::TimeController;
pub use verify::{approx_equal, AssertionRecord, Verifier};
