//! Proposal hooks and the contexts they run in.
//!
//! `deploy` gets a [`DeployContext`]: a deployer account plus read access.
//! `setup`, `teardown` and `validate` get a [`PhaseContext`], which also
//! carries the [`Harness`] (impersonation, funding, clock control).

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use parking_lot::Mutex;

use proposal_sandbox_types::{Address, MethodSignature, Value};

use crate::actors::{Actor, ActorProvider};
use crate::command::ProposalDescriptor;
use crate::fork::Fork;
use crate::registry::{AddressRegistry, NamedContracts};
use crate::time::TimeController;
use crate::verify::Verifier;

/// Lifecycle callbacks of a proposal. Every hook defaults to a no-op.
#[async_trait::async_trait]
pub trait ProposalHooks: Send + Sync {
    /// Deploy new contracts and return them by name. Returned names are
    /// merged into the registry before `setup`.
    async fn deploy(&self, _ctx: &DeployContext<'_>) -> anyhow::Result<NamedContracts> {
        Ok(NamedContracts::new())
    }

    async fn setup(&self, _ctx: &PhaseContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    /// Undo exactly what `setup` changed.
    async fn teardown(&self, _ctx: &PhaseContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    async fn validate(
        &self,
        _ctx: &PhaseContext<'_>,
        _verifier: &mut Verifier<'_>,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Hooks for proposals that only carry commands.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHooks;

impl ProposalHooks for NoHooks {}

/// Read helpers shared by both contexts.
async fn read_symbol(
    fork: &dyn Fork,
    registry: &AddressRegistry,
    symbol: &str,
    method: &str,
    args: Vec<Value>,
) -> anyhow::Result<Vec<Value>> {
    let target = registry.resolve(symbol)?;
    let method = MethodSignature::parse(method)?;
    fork.view(target, &method, &args)
        .await
        .with_context(|| format!("reading {}.{}", symbol, method))
}

fn single_uint(values: Vec<Value>, what: &str) -> anyhow::Result<u128> {
    match values.as_slice() {
        [Value::Uint(v)] => Ok(*v),
        other => Err(anyhow!("{} returned {:?}, expected a single uint", what, other)),
    }
}

/// What a `deploy` hook can see and do.
pub struct DeployContext<'a> {
    pub proposal: &'a str,
    pub descriptor: &'a ProposalDescriptor,
    /// Account that sends the deployment transactions.
    pub deployer: Actor,
    pub registry: &'a AddressRegistry,
    pub contracts: &'a NamedContracts,
    pub(crate) fork: Arc<dyn Fork>,
}

impl<'a> DeployContext<'a> {
    pub fn resolve(&self, symbol: &str) -> anyhow::Result<Address> {
        Ok(self.registry.resolve(symbol)?)
    }

    pub async fn read(&self, symbol: &str, method: &str, args: Vec<Value>) -> anyhow::Result<Vec<Value>> {
        read_symbol(self.fork.as_ref(), self.registry, symbol, method, args).await
    }
}

/// Test-only powers over the fork.
#[derive(Clone)]
pub struct Harness {
    pub actors: ActorProvider,
    pub clock: TimeController,
}

impl Harness {
    pub fn new(fork: Arc<dyn Fork>) -> Self {
        Self {
            actors: ActorProvider::new(fork.clone()),
            clock: TimeController::new(fork),
        }
    }
}

/// Values captured in one phase for use in a later one (e.g. "before"
/// readings taken in `setup` and compared in `validate`).
#[derive(Debug, Default)]
pub struct Scratch {
    values: Mutex<BTreeMap<String, Vec<Value>>>,
}

impl Scratch {
    pub fn put(&self, name: impl Into<String>, values: Vec<Value>) {
        self.values.lock().insert(name.into(), values);
    }

    pub fn get(&self, name: &str) -> Option<Vec<Value>> {
        self.values.lock().get(name).cloned()
    }

    pub fn take(&self, name: &str) -> Option<Vec<Value>> {
        self.values.lock().remove(name)
    }
}

/// What `setup`, `teardown` and `validate` hooks can see and do.
pub struct PhaseContext<'a> {
    pub proposal: &'a str,
    pub descriptor: &'a ProposalDescriptor,
    pub registry: &'a AddressRegistry,
    /// Contracts known before this proposal's `deploy`.
    pub prior_contracts: &'a NamedContracts,
    /// Contracts this proposal's `deploy` returned.
    pub new_contracts: &'a NamedContracts,
    pub harness: &'a Harness,
    pub scratch: &'a Scratch,
    pub(crate) fork: Arc<dyn Fork>,
}

impl<'a> PhaseContext<'a> {
    pub fn resolve(&self, symbol: &str) -> anyhow::Result<Address> {
        Ok(self.registry.resolve(symbol)?)
    }

    pub async fn read(&self, symbol: &str, method: &str, args: Vec<Value>) -> anyhow::Result<Vec<Value>> {
        read_symbol(self.fork.as_ref(), self.registry, symbol, method, args).await
    }

    pub async fn read_uint(&self, symbol: &str, method: &str, args: Vec<Value>) -> anyhow::Result<u128> {
        let values = self.read(symbol, method, args).await?;
        single_uint(values, &format!("{}.{}", symbol, method))
    }

    pub async fn read_address(&self, symbol: &str, method: &str) -> anyhow::Result<Address> {
        match self.read(symbol, method, Vec::new()).await?.as_slice() {
            [Value::Address(a)] => Ok(*a),
            other => Err(anyhow!(
                "{}.{} returned {:?}, expected a single address",
                symbol,
                method,
                other
            )),
        }
    }

    /// Impersonate `who` and call `symbol.method(args)`.
    pub async fn call_as(
        &self,
        who: Address,
        symbol: &str,
        method: &str,
        args: Vec<Value>,
    ) -> anyhow::Result<Vec<Value>> {
        let target = self.registry.resolve(symbol)?;
        let method_sig = MethodSignature::parse(method)?;
        let actors = &self.harness.actors;
        actors
            .ensure_funded(who, actors.call_cost(0))
            .await?;
        let actor = actors.as_actor(who).await?;
        let outcome = actor.call(target, &method_sig, args, 0).await;
        actors.release(actor).await?;
        let receipt = outcome.with_context(|| format!("calling {}.{}", symbol, method))?;
        Ok(receipt.returned)
    }
}
