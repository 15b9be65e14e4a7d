//! Lifecycle runner.
//!
//! Drives one proposal through its phases against a fork:
//!
//! ```text
//! Idle -> Deployed -> SetUp -> Executed -> TornDown -> Validated
//! ```
//!
//! Historical proposals are replayed (`deploy` then `run`); the proposal
//! under test goes through all five phases. The first failure aborts the
//! proposal. Nothing is retried.

pub mod hooks;
mod state;

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use proposal_sandbox_types::{Address, MethodSignature};

use crate::command::ProposalDescriptor;
use crate::errors::SandboxError;
use crate::events::{EventSink, LifecycleEvent};
use crate::fork::Fork;
use crate::governance::{dispatch_governance, GovernanceSettings};
use crate::registry::{is_valid_symbol, AddressRegistry, NamedContracts};
use crate::verify::{AssertionRecord, Verifier};

pub use hooks::{DeployContext, Harness, NoHooks, PhaseContext, ProposalHooks, Scratch};
pub use state::{LifecycleState, LifecycleTracker, Phase};

// ============================================================================
// Proposals and schedules
// ============================================================================

/// A named proposal: descriptor plus lifecycle hooks.
#[derive(Clone)]
pub struct Proposal {
    pub name: String,
    pub descriptor: ProposalDescriptor,
    pub hooks: Arc<dyn ProposalHooks>,
}

impl Proposal {
    pub fn new(name: impl Into<String>, descriptor: ProposalDescriptor) -> Self {
        Self {
            name: name.into(),
            descriptor,
            hooks: Arc::new(NoHooks),
        }
    }

    pub fn with_hooks(mut self, hooks: impl ProposalHooks + 'static) -> Self {
        self.hooks = Arc::new(hooks);
        self
    }

    pub fn title(&self) -> &str {
        if self.descriptor.title.is_empty() {
            &self.name
        } else {
            &self.descriptor.title
        }
    }
}

impl std::fmt::Debug for Proposal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Proposal")
            .field("name", &self.name)
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

/// A proposal plus whether its `deploy` phase should run.
#[derive(Debug, Clone)]
pub struct PlannedProposal {
    pub proposal: Proposal,
    /// False when the proposal's contracts are already live on the chain.
    pub deploy: bool,
}

impl PlannedProposal {
    pub fn new(proposal: Proposal) -> Self {
        Self {
            proposal,
            deploy: true,
        }
    }

    pub fn without_deploy(mut self) -> Self {
        self.deploy = false;
        self
    }
}

impl From<Proposal> for PlannedProposal {
    fn from(proposal: Proposal) -> Self {
        PlannedProposal::new(proposal)
    }
}

/// Ordered history plus the optional proposal under test, which always
/// comes last.
#[derive(Debug, Clone, Default)]
pub struct ProposalSchedule {
    pub history: Vec<PlannedProposal>,
    pub current: Option<PlannedProposal>,
}

impl ProposalSchedule {
    pub fn new(history: Vec<PlannedProposal>) -> Self {
        Self {
            history,
            current: None,
        }
    }

    pub fn with_current(mut self, current: impl Into<PlannedProposal>) -> Self {
        self.current = Some(current.into());
        self
    }

    /// Build from a flat list where at most one entry is flagged current and
    /// it must be the last one.
    pub fn from_flagged(entries: Vec<(PlannedProposal, bool)>) -> Result<Self, SandboxError> {
        let count = entries.len();
        let mut schedule = ProposalSchedule::default();
        for (position, (planned, current)) in entries.into_iter().enumerate() {
            if current {
                if schedule.current.is_some() {
                    return Err(SandboxError::config("more than one proposal is marked current"));
                }
                if position + 1 != count {
                    return Err(SandboxError::config(format!(
                        "current proposal '{}' must be the last entry",
                        planned.proposal.name
                    )));
                }
                schedule.current = Some(planned);
            } else {
                schedule.history.push(planned);
            }
        }
        Ok(schedule)
    }

    /// Treat the current proposal as history too.
    pub fn into_history(mut self) -> Self {
        if let Some(current) = self.current.take() {
            self.history.push(current);
        }
        self
    }

    /// History up to (not including) the named proposal, and that proposal.
    pub fn split_at(&self, name: &str) -> Option<(Vec<PlannedProposal>, PlannedProposal)> {
        let all: Vec<&PlannedProposal> = self.history.iter().chain(self.current.iter()).collect();
        let position = all.iter().position(|p| p.proposal.name == name)?;
        let prefix = all[..position].iter().map(|p| (*p).clone()).collect();
        Some((prefix, all[position].clone()))
    }

    pub fn len(&self) -> usize {
        self.history.len() + usize::from(self.current.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================================
// Routes
// ============================================================================

/// How `run` reaches the contracts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ExecutionRoute {
    /// Impersonate a privileged executor and call directly.
    Direct { executor: Address },
    /// Bundle commands into an on-chain governance proposal.
    Governance(GovernanceSettings),
}

// ============================================================================
// Reports
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    Replay,
    Full,
}

impl RunMode {
    fn phases(self) -> &'static [Phase] {
        match self {
            RunMode::Replay => &[Phase::Deploy, Phase::Run],
            RunMode::Full => &Phase::ALL,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseReport {
    pub phase: Phase,
    pub elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub skipped: bool,
}

/// One included command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandReport {
    pub index: usize,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub description: String,
    pub target: String,
    pub address: Address,
    pub method: MethodSignature,
    pub block: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleReport {
    pub proposal: String,
    pub title: String,
    pub mode: RunMode,
    pub state: LifecycleState,
    pub phases: Vec<PhaseReport>,
    pub commands: Vec<CommandReport>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub assertions: Vec<AssertionRecord>,
    /// Symbols this proposal's `deploy` added to the registry.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub new_symbols: Vec<String>,
    pub elapsed_ms: u64,
}

// ============================================================================
// Runner
// ============================================================================

/// Runs proposals against one fork, threading the registry between them.
pub struct LifecycleRunner<'a> {
    fork: Arc<dyn Fork>,
    registry: &'a mut AddressRegistry,
    contracts: &'a mut NamedContracts,
    route: &'a ExecutionRoute,
    events: &'a dyn EventSink,
}

impl<'a> LifecycleRunner<'a> {
    pub fn new(
        fork: Arc<dyn Fork>,
        registry: &'a mut AddressRegistry,
        contracts: &'a mut NamedContracts,
        route: &'a ExecutionRoute,
        events: &'a dyn EventSink,
    ) -> Self {
        Self {
            fork,
            registry,
            contracts,
            route,
            events,
        }
    }

    /// Replay a historical proposal: `deploy` then `run`.
    pub async fn replay(&mut self, planned: &PlannedProposal) -> Result<LifecycleReport, SandboxError> {
        self.drive(planned, RunMode::Replay).await
    }

    /// Run the proposal under test through every phase.
    pub async fn run_full(&mut self, planned: &PlannedProposal) -> Result<LifecycleReport, SandboxError> {
        self.drive(planned, RunMode::Full).await
    }

    /// Run only `deploy`, merging its contracts into the registry. Used to
    /// preview a proposal's resolved actions without executing them.
    pub async fn deploy_only(&mut self, planned: &PlannedProposal) -> Result<NamedContracts, SandboxError> {
        if !planned.deploy {
            return Ok(NamedContracts::new());
        }
        self.deploy(&planned.proposal).await
    }

    async fn drive(
        &mut self,
        planned: &PlannedProposal,
        mode: RunMode,
    ) -> Result<LifecycleReport, SandboxError> {
        let started = Instant::now();
        let proposal = &planned.proposal;
        let mut tracker = LifecycleTracker::default();
        let harness = Harness::new(self.fork.clone());
        let scratch = Scratch::default();
        let prior_contracts = self.contracts.clone();
        let mut new_contracts = NamedContracts::new();
        let mut report = LifecycleReport {
            proposal: proposal.name.clone(),
            title: proposal.title().to_string(),
            mode,
            state: tracker.state(),
            phases: Vec::new(),
            commands: Vec::new(),
            assertions: Vec::new(),
            new_symbols: Vec::new(),
            elapsed_ms: 0,
        };

        for &phase in mode.phases() {
            let phase_started = Instant::now();
            self.events.emit(&LifecycleEvent::PhaseEntered {
                proposal: proposal.name.clone(),
                phase,
            });

            let skipped = match phase {
                Phase::Deploy => {
                    if planned.deploy {
                        new_contracts = self.deploy(proposal).await?;
                        report.new_symbols = new_contracts.symbols();
                        false
                    } else {
                        true
                    }
                }
                Phase::Run => {
                    if proposal.descriptor.commands.is_empty() {
                        true
                    } else {
                        report.commands = self.dispatch(proposal, &harness).await?;
                        false
                    }
                }
                Phase::Setup | Phase::Teardown | Phase::Validate => {
                    let ctx = PhaseContext {
                        proposal: &proposal.name,
                        descriptor: &proposal.descriptor,
                        registry: &*self.registry,
                        prior_contracts: &prior_contracts,
                        new_contracts: &new_contracts,
                        harness: &harness,
                        scratch: &scratch,
                        fork: self.fork.clone(),
                    };
                    let hooks = proposal.hooks.as_ref();
                    match phase {
                        Phase::Setup => hooks.setup(&ctx).await.map_err(|e| {
                            SandboxError::from_hook(e, phase, &proposal.name, proposal.title())
                        })?,
                        Phase::Teardown => hooks.teardown(&ctx).await.map_err(|e| {
                            SandboxError::from_hook(e, phase, &proposal.name, proposal.title())
                        })?,
                        _ => {
                            let mut verifier = Verifier::new(&proposal.name).with_sink(self.events);
                            if let Err(e) = hooks.validate(&ctx, &mut verifier).await {
                                let err = SandboxError::from_hook(
                                    e,
                                    phase,
                                    &proposal.name,
                                    proposal.title(),
                                );
                                return Err(verifier.interrupted_by(err));
                            }
                            report.assertions = verifier.finish()?;
                        }
                    }
                    false
                }
            };

            tracker.complete(phase)?;
            let elapsed_ms = phase_started.elapsed().as_millis() as u64;
            self.events.emit(&LifecycleEvent::PhaseCompleted {
                proposal: proposal.name.clone(),
                phase,
                elapsed_ms,
            });
            report.phases.push(PhaseReport {
                phase,
                elapsed_ms,
                skipped,
            });
        }

        report.state = tracker.state();
        report.elapsed_ms = started.elapsed().as_millis() as u64;
        Ok(report)
    }

    async fn deploy(&mut self, proposal: &Proposal) -> Result<NamedContracts, SandboxError> {
        let deployer = Harness::new(self.fork.clone()).actors.operator()?;
        let deployed = {
            let ctx = DeployContext {
                proposal: &proposal.name,
                descriptor: &proposal.descriptor,
                deployer,
                registry: &*self.registry,
                contracts: &*self.contracts,
                fork: self.fork.clone(),
            };
            proposal.hooks.deploy(&ctx).await.map_err(|e| {
                SandboxError::from_hook(e, Phase::Deploy, &proposal.name, proposal.title())
            })?
        };

        if let Some(bad) = deployed.symbols().into_iter().find(|s| !is_valid_symbol(s)) {
            return Err(SandboxError::Phase {
                phase: Phase::Deploy,
                proposal: proposal.name.clone(),
                title: proposal.title().to_string(),
                message: format!("deploy returned invalid symbol '{}'", bad),
            });
        }
        for (symbol, address) in deployed.bindings() {
            if let Some(previous) = self.registry.get(&symbol) {
                if previous != address {
                    tracing::debug!(
                        proposal = %proposal.name,
                        %symbol,
                        from = %previous.to_short_string(),
                        to = %address.to_short_string(),
                        "Rebinding symbol"
                    );
                }
            }
        }
        self.registry.bind_many(deployed.bindings())?;
        self.contracts.extend(deployed.clone());
        self.events.emit(&LifecycleEvent::ContractsBound {
            proposal: proposal.name.clone(),
            symbols: deployed.symbols(),
        });
        Ok(deployed)
    }

    async fn dispatch(
        &mut self,
        proposal: &Proposal,
        harness: &Harness,
    ) -> Result<Vec<CommandReport>, SandboxError> {
        match self.route {
            ExecutionRoute::Direct { executor } => {
                dispatch_direct(*executor, proposal, self.registry, harness, self.events).await
            }
            ExecutionRoute::Governance(settings) => {
                dispatch_governance(
                    settings,
                    proposal,
                    self.registry,
                    self.fork.as_ref(),
                    harness,
                    self.events,
                )
                .await
            }
        }
    }
}

/// Call each command in order as the executor.
async fn dispatch_direct(
    executor: Address,
    proposal: &Proposal,
    registry: &mut AddressRegistry,
    harness: &Harness,
    events: &dyn EventSink,
) -> Result<Vec<CommandReport>, SandboxError> {
    let actors = &harness.actors;
    let actor = actors.as_actor(executor).await?;
    let mut reports = Vec::with_capacity(proposal.descriptor.commands.len());
    let mut outcome = Ok(());

    for (index, command) in proposal.descriptor.commands.iter().enumerate() {
        let action = match command.resolve(index, registry) {
            Ok(action) => action,
            Err(err) => {
                outcome = Err(err);
                break;
            }
        };
        events.emit(&LifecycleEvent::CommandDispatched {
            proposal: proposal.name.clone(),
            index,
            target: action.target.clone(),
            address: action.address,
            method: action.method.clone(),
        });
        if let Err(err) = actors
            .ensure_funded(executor, actors.call_cost(action.value))
            .await
        {
            outcome = Err(err);
            break;
        }
        let receipt = match actor
            .call(action.address, &action.method, action.args.clone(), action.value)
            .await
        {
            Ok(receipt) => receipt,
            Err(err) => {
                outcome = Err(SandboxError::CommandExecution {
                    proposal: proposal.name.clone(),
                    index,
                    description: command.description.clone(),
                    reason: err.reason(),
                });
                break;
            }
        };
        if let Err(err) = command.effects.iter().try_for_each(|e| e.apply(registry)) {
            outcome = Err(err);
            break;
        }
        events.emit(&LifecycleEvent::CommandIncluded {
            proposal: proposal.name.clone(),
            index,
            block: receipt.block,
        });
        reports.push(CommandReport {
            index,
            description: command.description.clone(),
            target: action.target,
            address: action.address,
            method: action.method,
            block: receipt.block,
        });
    }

    actors.release(actor).await?;
    outcome.map(|()| reports)
}
