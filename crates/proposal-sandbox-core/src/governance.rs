//! Governance execution route.
//!
//! Commands are resolved up front, bundled into one governor proposal and
//! pushed through the full on-chain flow:
//!
//! ```text
//! propose -> (voting delay) -> castVote x N -> (voting period) -> queue
//!         -> (timelock delay) -> execute
//! ```
//!
//! Registry effects of the commands are applied to a scratch registry while
//! resolving, and committed only after `execute` succeeds.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use proposal_sandbox_types::{Address, MethodSignature, Value};

use crate::actors::ActorProvider;
use crate::command::ResolvedAction;
use crate::errors::SandboxError;
use crate::events::{EventSink, LifecycleEvent};
use crate::fork::{CallError, CallReceipt, Fork};
use crate::lifecycle::{CommandReport, Harness, Phase, Proposal};
use crate::registry::AddressRegistry;

/// Where and how proposals are submitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GovernanceSettings {
    /// Registry symbol of the governor contract.
    pub governor: String,
    pub proposer: Address,
    pub voters: Vec<Address>,
}

const PROPOSE: &str = "propose(address[],uint256[],string[],bytes[],string)";

fn signature(raw: &str) -> Result<MethodSignature, SandboxError> {
    MethodSignature::parse(raw).map_err(|e| SandboxError::fork(e.to_string()))
}

/// Timing parameters read off the governor.
#[derive(Debug, Clone, Copy)]
struct GovernorParams {
    voting_delay: u64,
    voting_period: u64,
    timelock_delay: u64,
}

async fn read_u64(fork: &dyn Fork, governor: Address, method: &str) -> Result<u64, SandboxError> {
    let values = fork
        .view(governor, &signature(method)?, &[])
        .await
        .map_err(|e| SandboxError::fork(format!("reading governor {}: {}", method, e)))?;
    values
        .first()
        .and_then(Value::as_uint)
        .and_then(|v| u64::try_from(v).ok())
        .ok_or_else(|| SandboxError::fork(format!("governor {} returned {:?}", method, values)))
}

fn step_failed(proposal: &Proposal, step: &str, err: CallError) -> SandboxError {
    SandboxError::Phase {
        phase: Phase::Run,
        proposal: proposal.name.clone(),
        title: proposal.title().to_string(),
        message: format!("governance {} failed: {}", step, err),
    }
}

/// Build the `propose` argument list for a batch of resolved actions.
pub fn propose_args(actions: &[ResolvedAction], description: &str) -> Vec<Value> {
    vec![
        Value::List(actions.iter().map(|a| Value::Address(a.address)).collect()),
        Value::List(actions.iter().map(|a| Value::Uint(a.value)).collect()),
        Value::List(
            actions
                .iter()
                .map(|a| Value::String(a.method.to_string()))
                .collect(),
        ),
        Value::List(actions.iter().map(|a| Value::Bytes(a.calldata())).collect()),
        Value::String(description.to_string()),
    ]
}

async fn send_as(
    actors: &ActorProvider,
    who: Address,
    to: Address,
    method: &MethodSignature,
    args: Vec<Value>,
) -> Result<Result<CallReceipt, CallError>, SandboxError> {
    actors.ensure_funded(who, actors.call_cost(0)).await?;
    let actor = actors.as_actor(who).await?;
    let outcome = actor.call(to, method, args, 0).await;
    actors.release(actor).await?;
    Ok(outcome)
}

pub(crate) async fn dispatch_governance(
    settings: &GovernanceSettings,
    proposal: &Proposal,
    registry: &mut AddressRegistry,
    fork: &dyn Fork,
    harness: &Harness,
    events: &dyn EventSink,
) -> Result<Vec<CommandReport>, SandboxError> {
    let (actions, resolved_registry) = proposal.descriptor.resolve_all(registry)?;
    let governor = registry.resolve(&settings.governor)?;
    if settings.voters.is_empty() {
        return Err(SandboxError::config("governance route needs at least one voter"));
    }

    let params = GovernorParams {
        voting_delay: read_u64(fork, governor, "votingDelay()").await?,
        voting_period: read_u64(fork, governor, "votingPeriod()").await?,
        timelock_delay: read_u64(fork, governor, "timelockDelay()").await?,
    };
    // Each vote mines a block; all of them must land inside the window.
    if settings.voters.len() as u64 > params.voting_period {
        return Err(SandboxError::config(format!(
            "{} voters cannot all vote within a {} block voting period",
            settings.voters.len(),
            params.voting_period
        )));
    }

    let actors = &harness.actors;
    let step = |detail: String| {
        events.emit(&LifecycleEvent::GovernanceStep {
            proposal: proposal.name.clone(),
            detail,
        })
    };

    let total = proposal.descriptor.total_value();
    if total > 0 {
        actors.ensure_funded(governor, total).await?;
    }
    for action in &actions {
        events.emit(&LifecycleEvent::CommandDispatched {
            proposal: proposal.name.clone(),
            index: action.index,
            target: action.target.clone(),
            address: action.address,
            method: action.method.clone(),
        });
    }

    let receipt = send_as(
        actors,
        settings.proposer,
        governor,
        &signature(PROPOSE)?,
        propose_args(&actions, proposal.title()),
    )
    .await?
    .map_err(|e| step_failed(proposal, "propose", e))?;
    let id = receipt
        .returned
        .first()
        .and_then(Value::as_uint)
        .ok_or_else(|| SandboxError::fork("governor propose returned no id"))?;
    step(format!("proposed #{} with {} action(s)", id, actions.len()));

    harness.clock.advance_blocks(params.voting_delay).await?;
    let cast_vote = signature("castVote(uint256,bool)")?;
    for voter in &settings.voters {
        send_as(
            actors,
            *voter,
            governor,
            &cast_vote,
            vec![Value::Uint(id), Value::Bool(true)],
        )
        .await?
        .map_err(|e| step_failed(proposal, "castVote", e))?;
        step(format!("{} voted for #{}", voter.to_short_string(), id));
    }

    harness.clock.advance_blocks(params.voting_period).await?;
    send_as(
        actors,
        settings.proposer,
        governor,
        &signature("queue(uint256)")?,
        vec![Value::Uint(id)],
    )
    .await?
    .map_err(|e| step_failed(proposal, "queue", e))?;
    step(format!("queued #{}", id));

    harness
        .clock
        .advance(Duration::from_secs(params.timelock_delay))
        .await?;
    let executed = send_as(
        actors,
        settings.proposer,
        governor,
        &signature("execute(uint256)")?,
        vec![Value::Uint(id)],
    )
    .await?;
    let receipt = match executed {
        Ok(receipt) => receipt,
        Err(err) => {
            return Err(match err.failing_action() {
                Some(index) => SandboxError::CommandExecution {
                    proposal: proposal.name.clone(),
                    index,
                    description: actions
                        .get(index)
                        .map(|a| a.description.clone())
                        .unwrap_or_default(),
                    reason: err.reason(),
                },
                None => step_failed(proposal, "execute", err),
            })
        }
    };
    step(format!("executed #{} in block {}", id, receipt.block));

    *registry = resolved_registry;
    Ok(actions
        .into_iter()
        .map(|action| {
            events.emit(&LifecycleEvent::CommandIncluded {
                proposal: proposal.name.clone(),
                index: action.index,
                block: receipt.block,
            });
            CommandReport {
                index: action.index,
                description: action.description,
                target: action.target,
                address: action.address,
                method: action.method,
                block: receipt.block,
            }
        })
        .collect())
}
