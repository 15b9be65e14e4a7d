//! Stock contracts available on every local fork.
//!
//! - `vault`: owner-gated parameter store that holds native value
//! - `recorder`: append-only string log, handy as a test fixture
//! - `governor`: token-weighted governor with a built-in timelock

use std::collections::BTreeMap;

use proposal_sandbox_types::{decode_calldata, Address, MethodSignature, Value};

use super::runtime::{
    arg_address, arg_bool, arg_list, arg_string, arg_uint, unknown_method, ArtifactRegistry,
    CallContext, Construction, Contract, ViewContext,
};
use super::Revert;

pub const VAULT: &str = "vault";
pub const RECORDER: &str = "recorder";
pub const GOVERNOR: &str = "governor";

/// Registry with every stock artifact.
pub fn stock_artifacts() -> ArtifactRegistry {
    let mut registry = ArtifactRegistry::new();
    registry.register(VAULT, signature("constructor(address)"), |_, args| {
        Ok(Box::new(Vault::new(arg_address(args, 0)?)) as Box<dyn Contract>)
    });
    registry.register(RECORDER, signature("constructor()"), |_, _| {
        Ok(Box::new(Recorder::default()) as Box<dyn Contract>)
    });
    registry.register(
        GOVERNOR,
        signature("constructor(uint256,uint256,uint256,uint256,address[],uint256[])"),
        Governor::construct,
    );
    registry
}

fn signature(raw: &str) -> MethodSignature {
    MethodSignature::parse(raw).expect("builtin signatures are well-formed")
}

fn require(condition: bool, reason: &str) -> Result<(), Revert> {
    if condition {
        Ok(())
    } else {
        Err(Revert::new(reason))
    }
}

// ============================================================================
// Vault
// ============================================================================

#[derive(Debug, Clone)]
pub struct Vault {
    owner: Address,
    cap: u128,
    pending_beneficiary: Address,
}

impl Vault {
    pub fn new(owner: Address) -> Self {
        Self {
            owner,
            cap: 0,
            pending_beneficiary: Address::ZERO,
        }
    }

    fn only_owner(&self, ctx: &CallContext<'_>) -> Result<(), Revert> {
        require(ctx.caller() == self.owner, "only owner")
    }
}

impl Contract for Vault {
    fn artifact(&self) -> &str {
        VAULT
    }

    fn call(
        &mut self,
        ctx: &mut CallContext<'_>,
        method: &MethodSignature,
        args: &[Value],
    ) -> Result<Vec<Value>, Revert> {
        match method.to_string().as_str() {
            "setCap(uint256)" => {
                self.only_owner(ctx)?;
                self.cap = arg_uint(args, 0)?;
                ctx.emit("CapSet", vec![Value::Uint(self.cap)]);
            }
            "setOwner(address)" => {
                self.only_owner(ctx)?;
                self.owner = arg_address(args, 0)?;
                ctx.emit("OwnerSet", vec![Value::Address(self.owner)]);
            }
            "setPendingBeneficiary(address)" => {
                self.only_owner(ctx)?;
                self.pending_beneficiary = arg_address(args, 0)?;
            }
            "withdraw(address,uint256)" => {
                self.only_owner(ctx)?;
                let amount = arg_uint(args, 1)?;
                require(self.cap == 0 || amount <= self.cap, "amount exceeds cap")?;
                ctx.transfer(arg_address(args, 0)?, amount)?;
            }
            "deposit()" => {
                ctx.emit("Deposit", vec![Value::Address(ctx.caller()), Value::Uint(ctx.value())]);
            }
            _ => return Err(unknown_method(VAULT, method)),
        }
        Ok(Vec::new())
    }

    fn view(
        &self,
        ctx: &ViewContext<'_>,
        method: &MethodSignature,
        _args: &[Value],
    ) -> Result<Vec<Value>, Revert> {
        let value = match method.to_string().as_str() {
            "cap()" => Value::Uint(self.cap),
            "owner()" => Value::Address(self.owner),
            "pendingBeneficiary()" => Value::Address(self.pending_beneficiary),
            "balance()" => Value::Uint(ctx.balance(&ctx.this())),
            _ => return Err(unknown_method(VAULT, method)),
        };
        Ok(vec![value])
    }

    fn clone_box(&self) -> Box<dyn Contract> {
        Box::new(self.clone())
    }
}

// ============================================================================
// Recorder
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct Recorder {
    markers: Vec<String>,
}

impl Contract for Recorder {
    fn artifact(&self) -> &str {
        RECORDER
    }

    fn call(
        &mut self,
        ctx: &mut CallContext<'_>,
        method: &MethodSignature,
        args: &[Value],
    ) -> Result<Vec<Value>, Revert> {
        match method.to_string().as_str() {
            "record(string)" => {
                let marker = arg_string(args, 0)?;
                ctx.emit("Recorded", vec![Value::String(marker.clone())]);
                self.markers.push(marker);
                Ok(vec![Value::Uint(self.markers.len() as u128)])
            }
            _ => Err(unknown_method(RECORDER, method)),
        }
    }

    fn view(
        &self,
        _ctx: &ViewContext<'_>,
        method: &MethodSignature,
        args: &[Value],
    ) -> Result<Vec<Value>, Revert> {
        match method.to_string().as_str() {
            "markers()" => Ok(vec![Value::List(
                self.markers.iter().cloned().map(Value::String).collect(),
            )]),
            "count()" => Ok(vec![Value::Uint(self.markers.len() as u128)]),
            "markerAt(uint256)" => {
                let index = usize::try_from(arg_uint(args, 0)?)
                    .map_err(|_| Revert::new("index out of range"))?;
                self.markers
                    .get(index)
                    .map(|m| vec![Value::String(m.clone())])
                    .ok_or_else(|| Revert::new("index out of range"))
            }
            _ => Err(unknown_method(RECORDER, method)),
        }
    }

    fn clone_box(&self) -> Box<dyn Contract> {
        Box::new(self.clone())
    }
}

// ============================================================================
// Governor
// ============================================================================

/// Numeric proposal states returned by `state(uint256)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ProposalState {
    Pending = 0,
    Active = 1,
    Defeated = 2,
    Succeeded = 3,
    Queued = 4,
    Executed = 5,
}

#[derive(Debug, Clone)]
struct Action {
    target: Address,
    value: u128,
    method: MethodSignature,
    calldata: Vec<u8>,
}

#[derive(Debug, Clone)]
struct GovernorProposal {
    actions: Vec<Action>,
    start_block: u64,
    end_block: u64,
    votes_for: u128,
    votes_against: u128,
    voted: BTreeMap<Address, bool>,
    eta: Option<u64>,
    executed: bool,
}

#[derive(Debug, Clone)]
pub struct Governor {
    voting_delay: u64,
    voting_period: u64,
    quorum: u128,
    timelock_delay: u64,
    weights: BTreeMap<Address, u128>,
    proposals: Vec<GovernorProposal>,
}

impl Governor {
    fn construct(_: &Construction, args: &[Value]) -> Result<Box<dyn Contract>, Revert> {
        let as_u64 = |index: usize| {
            u64::try_from(arg_uint(args, index)?).map_err(|_| Revert::new("parameter out of range"))
        };
        let voters = arg_list(args, 4)?;
        let weights = arg_list(args, 5)?;
        require(voters.len() == weights.len(), "voters and weights differ in length")?;
        let mut table = BTreeMap::new();
        for index in 0..voters.len() {
            table.insert(arg_address(voters, index)?, arg_uint(weights, index)?);
        }
        Ok(Box::new(Governor {
            voting_delay: as_u64(0)?,
            voting_period: as_u64(1)?,
            quorum: arg_uint(args, 2)?,
            timelock_delay: as_u64(3)?,
            weights: table,
            proposals: Vec::new(),
        }))
    }

    fn proposal(&self, args: &[Value]) -> Result<(usize, &GovernorProposal), Revert> {
        let id = arg_uint(args, 0)?;
        usize::try_from(id)
            .ok()
            .and_then(|index| self.proposals.get(index).map(|p| (index, p)))
            .ok_or_else(|| Revert::new(format!("unknown proposal {}", id)))
    }

    fn state_of(&self, proposal: &GovernorProposal, block: u64) -> ProposalState {
        if proposal.executed {
            ProposalState::Executed
        } else if proposal.eta.is_some() {
            ProposalState::Queued
        } else if block <= proposal.start_block {
            ProposalState::Pending
        } else if block <= proposal.end_block {
            ProposalState::Active
        } else if proposal.votes_for >= self.quorum && proposal.votes_for > proposal.votes_against {
            ProposalState::Succeeded
        } else {
            ProposalState::Defeated
        }
    }

    fn propose(&mut self, ctx: &mut CallContext<'_>, args: &[Value]) -> Result<Vec<Value>, Revert> {
        require(
            self.weights.get(&ctx.caller()).copied().unwrap_or(0) > 0,
            "proposer has no votes",
        )?;
        let targets = arg_list(args, 0)?;
        let values = arg_list(args, 1)?;
        let signatures = arg_list(args, 2)?;
        let calldatas = arg_list(args, 3)?;
        let description = arg_string(args, 4)?;
        require(!targets.is_empty(), "empty proposal")?;
        require(
            values.len() == targets.len()
                && signatures.len() == targets.len()
                && calldatas.len() == targets.len(),
            "proposal arity mismatch",
        )?;

        let mut actions = Vec::with_capacity(targets.len());
        for index in 0..targets.len() {
            let raw = signatures[index]
                .as_str()
                .ok_or_else(|| Revert::new("signature is not a string"))?;
            let method = MethodSignature::parse(raw)
                .map_err(|e| Revert::new(format!("action {}: {}", index, e)))?;
            let calldata = calldatas[index]
                .as_bytes()
                .ok_or_else(|| Revert::new("calldata is not bytes"))?
                .to_vec();
            actions.push(Action {
                target: arg_address(targets, index)?,
                value: arg_uint(values, index)?,
                method,
                calldata,
            });
        }

        let block = ctx.block().number;
        let id = self.proposals.len();
        self.proposals.push(GovernorProposal {
            actions,
            start_block: block + self.voting_delay,
            end_block: block + self.voting_delay + self.voting_period,
            votes_for: 0,
            votes_against: 0,
            voted: BTreeMap::new(),
            eta: None,
            executed: false,
        });
        ctx.emit(
            "ProposalCreated",
            vec![Value::Uint(id as u128), Value::String(description)],
        );
        Ok(vec![Value::Uint(id as u128)])
    }

    fn cast_vote(&mut self, ctx: &mut CallContext<'_>, args: &[Value]) -> Result<Vec<Value>, Revert> {
        let (index, _) = self.proposal(args)?;
        let support = arg_bool(args, 1)?;
        let voter = ctx.caller();
        let weight = self.weights.get(&voter).copied().unwrap_or(0);
        require(weight > 0, "voter has no votes")?;
        let block = ctx.block().number;
        let state = self.state_of(&self.proposals[index], block);
        require(state == ProposalState::Active, "voting is closed")?;

        let proposal = &mut self.proposals[index];
        require(!proposal.voted.contains_key(&voter), "already voted")?;
        proposal.voted.insert(voter, support);
        if support {
            proposal.votes_for += weight;
        } else {
            proposal.votes_against += weight;
        }
        ctx.emit("VoteCast", vec![Value::Address(voter), Value::Bool(support)]);
        Ok(Vec::new())
    }

    fn queue(&mut self, ctx: &mut CallContext<'_>, args: &[Value]) -> Result<Vec<Value>, Revert> {
        let (index, proposal) = self.proposal(args)?;
        let state = self.state_of(proposal, ctx.block().number);
        require(state == ProposalState::Succeeded, "proposal has not succeeded")?;
        let eta = ctx.block().timestamp + self.timelock_delay;
        self.proposals[index].eta = Some(eta);
        ctx.emit("ProposalQueued", vec![Value::Uint(index as u128), Value::Uint(eta as u128)]);
        Ok(Vec::new())
    }

    fn execute(&mut self, ctx: &mut CallContext<'_>, args: &[Value]) -> Result<Vec<Value>, Revert> {
        let (index, proposal) = self.proposal(args)?;
        let eta = match (self.state_of(proposal, ctx.block().number), proposal.eta) {
            (ProposalState::Queued, Some(eta)) => eta,
            _ => return Err(Revert::new("proposal is not queued")),
        };
        require(ctx.block().timestamp >= eta, "timelock has not expired")?;

        self.proposals[index].executed = true;
        let actions = self.proposals[index].actions.clone();
        for (position, action) in actions.iter().enumerate() {
            let call_args = decode_calldata(&action.calldata)
                .map_err(|e| Revert::new(e.to_string()).in_action(position))?;
            ctx.call(action.target, &action.method, &call_args, action.value)
                .map_err(|revert| revert.in_action(position))?;
        }
        ctx.emit("ProposalExecuted", vec![Value::Uint(index as u128)]);
        Ok(Vec::new())
    }
}

impl Contract for Governor {
    fn artifact(&self) -> &str {
        GOVERNOR
    }

    fn call(
        &mut self,
        ctx: &mut CallContext<'_>,
        method: &MethodSignature,
        args: &[Value],
    ) -> Result<Vec<Value>, Revert> {
        match method.to_string().as_str() {
            "propose(address[],uint256[],string[],bytes[],string)" => self.propose(ctx, args),
            "castVote(uint256,bool)" => self.cast_vote(ctx, args),
            "queue(uint256)" => self.queue(ctx, args),
            "execute(uint256)" => self.execute(ctx, args),
            "deposit()" => Ok(Vec::new()),
            _ => Err(unknown_method(GOVERNOR, method)),
        }
    }

    fn view(
        &self,
        ctx: &ViewContext<'_>,
        method: &MethodSignature,
        args: &[Value],
    ) -> Result<Vec<Value>, Revert> {
        let value = match method.to_string().as_str() {
            "state(uint256)" => {
                let (_, proposal) = self.proposal(args)?;
                Value::Uint(self.state_of(proposal, ctx.block().number) as u128)
            }
            "votingDelay()" => Value::Uint(self.voting_delay as u128),
            "votingPeriod()" => Value::Uint(self.voting_period as u128),
            "timelockDelay()" => Value::Uint(self.timelock_delay as u128),
            "quorum()" => Value::Uint(self.quorum),
            "proposalCount()" => Value::Uint(self.proposals.len() as u128),
            "getVotes(address)" => {
                Value::Uint(self.weights.get(&arg_address(args, 0)?).copied().unwrap_or(0))
            }
            _ => return Err(unknown_method(GOVERNOR, method)),
        };
        Ok(vec![value])
    }

    fn clone_box(&self) -> Box<dyn Contract> {
        Box::new(self.clone())
    }
}
