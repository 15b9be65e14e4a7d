//! Environment coordinator.
//!
//! Builds the environment a proposal is tested in: one fresh fork at the
//! reference point, every historical proposal replayed in order (`deploy`
//! then `run`), and finally the proposal under test through all five
//! phases. The fork lease lives inside [`Environment`] and is released when
//! the environment is dropped, whatever the outcome.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::command::ResolvedAction;
use crate::errors::SandboxError;
use crate::events::{EventSink, LifecycleEvent};
use crate::fork::{BlockInfo, ForkLease, ForkProvider, ReferencePoint};
use crate::lifecycle::{
    ExecutionRoute, LifecycleReport, LifecycleRunner, PlannedProposal, ProposalSchedule,
};
use crate::registry::{AddressRegistry, NamedContracts};

/// Static inputs of every run.
#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub reference: ReferencePoint,
    pub route: ExecutionRoute,
    /// Names that exist on the live chain before any replay.
    pub base_registry: AddressRegistry,
    pub base_contracts: NamedContracts,
}

/// A forked chain with history applied.
pub struct Environment {
    pub lease: ForkLease,
    pub registry: AddressRegistry,
    pub contracts: NamedContracts,
    pub history: Vec<LifecycleReport>,
}

impl Environment {
    pub fn runner<'a>(
        &'a mut self,
        route: &'a ExecutionRoute,
        events: &'a dyn EventSink,
    ) -> LifecycleRunner<'a> {
        LifecycleRunner::new(
            self.lease.handle(),
            &mut self.registry,
            &mut self.contracts,
            route,
            events,
        )
    }
}

/// Everything a run produced.
#[derive(Debug, Clone, Serialize)]
pub struct EnvironmentReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub reference_block: u64,
    pub history: Vec<LifecycleReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current: Option<LifecycleReport>,
    pub registry: AddressRegistry,
    pub head: BlockInfo,
    pub elapsed_ms: u64,
}

/// Resolved actions of one proposal, computed on a throwaway fork.
#[derive(Debug, Clone, Serialize)]
pub struct ProposalPreview {
    pub proposal: String,
    pub title: String,
    pub reference_block: u64,
    pub replayed: Vec<String>,
    pub new_symbols: Vec<String>,
    pub actions: Vec<ResolvedAction>,
    /// Problems the chain would reject the actions for.
    pub issues: Vec<String>,
}

pub struct EnvironmentCoordinator {
    provider: Arc<dyn ForkProvider>,
    settings: CoordinatorSettings,
    events: Arc<dyn EventSink>,
}

impl EnvironmentCoordinator {
    pub fn new(
        provider: Arc<dyn ForkProvider>,
        settings: CoordinatorSettings,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            provider,
            settings,
            events,
        }
    }

    pub fn settings(&self) -> &CoordinatorSettings {
        &self.settings
    }

    /// Fresh fork with every historical proposal replayed in order.
    ///
    /// A failure here means the history itself is broken, so it is wrapped in
    /// [`SandboxError::Replay`] to keep it apart from failures of the
    /// proposal under test.
    pub async fn load_environment(
        &self,
        history: &[PlannedProposal],
        has_current: bool,
    ) -> Result<Environment, SandboxError> {
        let lease = self.provider.fork(self.settings.reference).await?;
        self.events.emit(&LifecycleEvent::EnvironmentStarted {
            reference_block: self.settings.reference.block,
            history: history.len(),
            has_current,
        });

        let mut env = Environment {
            lease,
            registry: self.settings.base_registry.clone(),
            contracts: self.settings.base_contracts.clone(),
            history: Vec::with_capacity(history.len()),
        };
        for (position, planned) in history.iter().enumerate() {
            self.events.emit(&LifecycleEvent::ReplayStarted {
                proposal: planned.proposal.name.clone(),
                position,
            });
            let report = env
                .runner(&self.settings.route, self.events.as_ref())
                .replay(planned)
                .await
                .map_err(|source| SandboxError::Replay {
                    proposal: planned.proposal.name.clone(),
                    position,
                    source: Box::new(source),
                })?;
            env.history.push(report);
        }
        Ok(env)
    }

    /// Replay history, then run the current proposal (if any) in full.
    pub async fn run(&self, schedule: &ProposalSchedule) -> Result<EnvironmentReport, SandboxError> {
        let started = Instant::now();
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();
        tracing::info!(%run_id, proposals = schedule.len(), "Starting run");

        let mut env = self
            .load_environment(&schedule.history, schedule.current.is_some())
            .await?;
        let current = match &schedule.current {
            Some(planned) => Some(
                env.runner(&self.settings.route, self.events.as_ref())
                    .run_full(planned)
                    .await?,
            ),
            None => None,
        };

        let head = env.lease.block().await?;
        self.events.emit(&LifecycleEvent::EnvironmentReady {
            block: head.number,
            timestamp: head.timestamp,
            symbols: env.registry.len(),
        });
        Ok(EnvironmentReport {
            run_id,
            started_at,
            reference_block: self.settings.reference.block,
            history: std::mem::take(&mut env.history),
            current,
            registry: env.registry.clone(),
            head,
            elapsed_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// Replay every proposal, the current one included, as history.
    pub async fn replay_all(&self, schedule: &ProposalSchedule) -> Result<EnvironmentReport, SandboxError> {
        self.run(&schedule.clone().into_history()).await
    }

    /// Replay everything before `name`, deploy it, and resolve its commands
    /// without sending them.
    pub async fn preview(
        &self,
        schedule: &ProposalSchedule,
        name: &str,
    ) -> Result<ProposalPreview, SandboxError> {
        let (prefix, planned) = schedule
            .split_at(name)
            .ok_or_else(|| SandboxError::config(format!("no proposal named '{}'", name)))?;
        let mut env = self.load_environment(&prefix, true).await?;
        let deployed = env
            .runner(&self.settings.route, self.events.as_ref())
            .deploy_only(&planned)
            .await?;
        let (actions, _) = planned.proposal.descriptor.resolve_all(&env.registry)?;
        let issues = actions
            .iter()
            .filter_map(|action| {
                action
                    .check()
                    .err()
                    .map(|reason| format!("command #{}: {}", action.index, reason))
            })
            .collect();
        Ok(ProposalPreview {
            proposal: planned.proposal.name.clone(),
            title: planned.proposal.title().to_string(),
            reference_block: self.settings.reference.block,
            replayed: prefix.iter().map(|p| p.proposal.name.clone()).collect(),
            new_symbols: deployed.symbols(),
            actions,
            issues,
        })
    }
}
