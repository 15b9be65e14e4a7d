//! In-process fork backend.
//!
//! [`LocalForkProvider`] keeps a set of recorded chain states keyed by block
//! number. A fork at block `N` starts from the newest recorded state at or
//! below `N`, fast-forwarded to `N`. Every transaction mines its own block.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use proposal_sandbox_types::{Address, MethodSignature, Value};

use super::runtime::{self, ArtifactRegistry, ChainState, Construction};
use super::{
    BlockInfo, CallError, CallReceipt, CallRequest, DeployReceipt, DeployRequest, Fork, ForkLease,
    ForkProvider, ReferencePoint,
};
use crate::errors::SandboxError;

/// Hands out [`LocalFork`]s from recorded chain states.
pub struct LocalForkProvider {
    checkpoints: BTreeMap<u64, ChainState>,
    artifacts: Arc<ArtifactRegistry>,
    operators: Vec<Address>,
    live: Arc<AtomicUsize>,
}

impl LocalForkProvider {
    pub fn new(artifacts: ArtifactRegistry) -> Self {
        Self {
            checkpoints: BTreeMap::new(),
            artifacts: Arc::new(artifacts),
            operators: Vec::new(),
            live: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Record the chain as it was at `state.head.number`.
    pub fn with_checkpoint(mut self, state: ChainState) -> Self {
        self.checkpoints.insert(state.head.number, state);
        self
    }

    pub fn with_operators(mut self, operators: Vec<Address>) -> Self {
        self.operators = operators;
        self
    }

    pub fn artifacts(&self) -> &ArtifactRegistry {
        &self.artifacts
    }

    /// Newest recorded block at or below `block`.
    pub fn checkpoint_at(&self, block: u64) -> Option<u64> {
        self.checkpoints.range(..=block).next_back().map(|(n, _)| *n)
    }

    /// Open a fork without the async wrapper, for synchronous callers.
    pub fn open(&self, reference: ReferencePoint) -> Result<ForkLease, SandboxError> {
        let (recorded, state) = self
            .checkpoints
            .range(..=reference.block)
            .next_back()
            .ok_or_else(|| {
                SandboxError::fork(format!(
                    "no recorded chain state at or below block {}",
                    reference.block
                ))
            })?;
        let mut state = state.clone();
        state.mine(reference.block - recorded);

        let fork = Arc::new(LocalFork {
            reference,
            operators: self.operators.clone(),
            artifacts: self.artifacts.clone(),
            inner: Mutex::new(ForkInner {
                state,
                impersonated: BTreeSet::new(),
            }),
            closed: AtomicBool::new(false),
        });
        let live = self.live.clone();
        let open = live.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::debug!(block = reference.block, from = recorded, open, "Fork opened");
        Ok(ForkLease::new(fork, move || {
            live.fetch_sub(1, Ordering::SeqCst);
        }))
    }
}

#[async_trait::async_trait]
impl ForkProvider for LocalForkProvider {
    async fn fork(&self, reference: ReferencePoint) -> Result<ForkLease, SandboxError> {
        self.open(reference)
    }

    fn live_forks(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

struct ForkInner {
    state: ChainState,
    impersonated: BTreeSet<Address>,
}

/// An in-process fork.
pub struct LocalFork {
    reference: ReferencePoint,
    operators: Vec<Address>,
    artifacts: Arc<ArtifactRegistry>,
    inner: Mutex<ForkInner>,
    closed: AtomicBool,
}

impl LocalFork {
    fn ensure_open(&self) -> Result<(), SandboxError> {
        if self.is_closed() {
            return Err(SandboxError::fork(format!(
                "fork at block {} has been released",
                self.reference.block
            )));
        }
        Ok(())
    }

    /// Admission checks shared by calls and deploys: unlocked sender and
    /// enough balance for gas plus value. Charges gas, bumps the nonce and
    /// mines the transaction's block. Returns the sender's previous nonce.
    fn admit(&self, inner: &mut ForkInner, from: Address, value: u128) -> Result<u64, CallError> {
        if self.is_closed() {
            return Err(CallError::Rejected("fork has been released".to_string()));
        }
        if !self.operators.contains(&from) && !inner.impersonated.contains(&from) {
            return Err(CallError::Rejected(format!(
                "sender {} is not unlocked",
                from.to_short_string()
            )));
        }
        let fee = inner.state.gas_fee;
        let available = inner.state.balance(&from);
        if available < fee.saturating_add(value) {
            return Err(CallError::Rejected(format!(
                "insufficient funds for gas + value: {} has {}, needs {}",
                from.to_short_string(),
                available,
                fee.saturating_add(value)
            )));
        }
        inner.state.balances.insert(from, available - fee);
        let nonce = inner.state.bump_nonce(from);
        inner.state.mine(1);
        Ok(nonce)
    }
}

#[async_trait::async_trait]
impl Fork for LocalFork {
    fn reference(&self) -> ReferencePoint {
        self.reference
    }

    fn operators(&self) -> Vec<Address> {
        self.operators.clone()
    }

    fn gas_fee(&self) -> u128 {
        self.inner.lock().state.gas_fee
    }

    async fn block(&self) -> Result<BlockInfo, SandboxError> {
        self.ensure_open()?;
        Ok(self.inner.lock().state.head)
    }

    async fn balance(&self, account: Address) -> Result<u128, SandboxError> {
        self.ensure_open()?;
        Ok(self.inner.lock().state.balance(&account))
    }

    async fn nonce(&self, account: Address) -> Result<u64, SandboxError> {
        self.ensure_open()?;
        Ok(self.inner.lock().state.nonce(&account))
    }

    async fn code_at(&self, address: Address) -> Result<Option<String>, SandboxError> {
        self.ensure_open()?;
        Ok(self
            .inner
            .lock()
            .state
            .contracts
            .get(&address)
            .map(|c| c.artifact().to_string()))
    }

    async fn send(&self, request: CallRequest) -> Result<CallReceipt, CallError> {
        request
            .method
            .check_args(&request.args)
            .map_err(|e| CallError::Rejected(e.to_string()))?;

        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        self.admit(inner, request.from, request.value)?;

        let checkpoint = inner.state.clone();
        let mut logs = Vec::new();
        let mut stack = Vec::new();
        let outcome = runtime::execute(
            &mut inner.state,
            &mut logs,
            &mut stack,
            request.from,
            request.to,
            request.value,
            &request.method,
            &request.args,
        );
        let block = inner.state.head.number;
        match outcome {
            Ok(returned) => Ok(CallReceipt {
                block,
                from: request.from,
                to: request.to,
                returned,
                logs,
                gas_paid: inner.state.gas_fee,
            }),
            Err(revert) => {
                inner.state = checkpoint;
                tracing::debug!(
                    to = %request.to.to_short_string(),
                    method = %request.method,
                    reason = %revert.reason,
                    "Call reverted"
                );
                Err(CallError::Reverted(revert))
            }
        }
    }

    async fn deploy(&self, request: DeployRequest) -> Result<DeployReceipt, CallError> {
        let artifact = self.artifacts.get(&request.artifact).ok_or_else(|| {
            CallError::Rejected(format!("unknown artifact '{}'", request.artifact))
        })?;
        artifact
            .constructor
            .check_args(&request.args)
            .map_err(|e| CallError::Rejected(format!("{}: {}", request.artifact, e)))?;

        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let address = Address::derive(&request.from, inner.state.nonce(&request.from));
        if inner.state.contracts.contains_key(&address) {
            return Err(CallError::Rejected(format!(
                "deploy address {} is already occupied",
                address
            )));
        }
        self.admit(inner, request.from, request.value)?;
        let construction = Construction {
            deployer: request.from,
            address,
            block: inner.state.head,
        };
        let contract = artifact.instantiate(&construction, &request.args)?;
        inner
            .state
            .move_balance(request.from, address, request.value)?;
        inner.state.contracts.insert(address, contract);
        Ok(DeployReceipt {
            block: inner.state.head.number,
            address,
            artifact: request.artifact,
        })
    }

    async fn view(
        &self,
        to: Address,
        method: &MethodSignature,
        args: &[Value],
    ) -> Result<Vec<Value>, CallError> {
        if self.is_closed() {
            return Err(CallError::Rejected("fork has been released".to_string()));
        }
        let guard = self.inner.lock();
        runtime::view(&guard.state, to, method, args).map_err(CallError::Reverted)
    }

    async fn impersonate(&self, account: Address) -> Result<(), SandboxError> {
        self.ensure_open()?;
        self.inner.lock().impersonated.insert(account);
        Ok(())
    }

    async fn stop_impersonating(&self, account: Address) -> Result<(), SandboxError> {
        self.ensure_open()?;
        self.inner.lock().impersonated.remove(&account);
        Ok(())
    }

    async fn set_balance(&self, account: Address, amount: u128) -> Result<(), SandboxError> {
        self.ensure_open()?;
        self.inner.lock().state.balances.insert(account, amount);
        Ok(())
    }

    async fn mine(&self, blocks: u64) -> Result<BlockInfo, SandboxError> {
        self.ensure_open()?;
        let mut inner = self.inner.lock();
        inner.state.mine(blocks);
        Ok(inner.state.head)
    }

    async fn increase_time(&self, seconds: u64) -> Result<BlockInfo, SandboxError> {
        self.ensure_open()?;
        let mut inner = self.inner.lock();
        inner.state.head.timestamp += seconds;
        Ok(inner.state.head)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
