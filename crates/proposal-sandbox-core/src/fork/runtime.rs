//! In-process contract runtime used by the local fork.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use proposal_sandbox_types::{Address, MethodSignature, Value};

use super::{BlockInfo, LogEntry, Revert};

/// Executable contract code plus its storage.
pub trait Contract: fmt::Debug + Send + Sync {
    /// Name of the artifact this instance was created from.
    fn artifact(&self) -> &str;

    /// State-changing entry point. Arguments already match `method`.
    fn call(
        &mut self,
        ctx: &mut CallContext<'_>,
        method: &MethodSignature,
        args: &[Value],
    ) -> Result<Vec<Value>, Revert>;

    /// Read-only entry point.
    fn view(
        &self,
        ctx: &ViewContext<'_>,
        method: &MethodSignature,
        args: &[Value],
    ) -> Result<Vec<Value>, Revert>;

    fn clone_box(&self) -> Box<dyn Contract>;
}

impl Clone for Box<dyn Contract> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// Revert for a method the contract does not implement.
pub fn unknown_method(artifact: &str, method: &MethodSignature) -> Revert {
    Revert::new(format!("{} has no method {}", artifact, method))
}

// ============================================================================
// Chain state
// ============================================================================

/// Full state of a local chain. Cloning it is a checkpoint.
#[derive(Debug, Clone)]
pub struct ChainState {
    pub head: BlockInfo,
    /// Seconds between consecutive blocks.
    pub block_time: u64,
    pub gas_fee: u128,
    pub balances: BTreeMap<Address, u128>,
    pub nonces: BTreeMap<Address, u64>,
    pub contracts: BTreeMap<Address, Box<dyn Contract>>,
}

impl ChainState {
    pub fn new(head: BlockInfo, block_time: u64, gas_fee: u128) -> Self {
        Self {
            head,
            block_time,
            gas_fee,
            balances: BTreeMap::new(),
            nonces: BTreeMap::new(),
            contracts: BTreeMap::new(),
        }
    }

    pub fn balance(&self, account: &Address) -> u128 {
        self.balances.get(account).copied().unwrap_or(0)
    }

    pub fn nonce(&self, account: &Address) -> u64 {
        self.nonces.get(account).copied().unwrap_or(0)
    }

    /// Increment and return the previous nonce.
    pub fn bump_nonce(&mut self, account: Address) -> u64 {
        let slot = self.nonces.entry(account).or_insert(0);
        let previous = *slot;
        *slot += 1;
        previous
    }

    pub fn mine(&mut self, blocks: u64) {
        self.head.number += blocks;
        self.head.timestamp += blocks.saturating_mul(self.block_time);
    }

    pub fn move_balance(&mut self, from: Address, to: Address, amount: u128) -> Result<(), Revert> {
        if amount == 0 || from == to {
            return Ok(());
        }
        let available = self.balance(&from);
        if available < amount {
            return Err(Revert::new(format!(
                "insufficient balance: {} has {}, needs {}",
                from.to_short_string(),
                available,
                amount
            )));
        }
        self.balances.insert(from, available - amount);
        *self.balances.entry(to).or_insert(0) += amount;
        Ok(())
    }
}

// ============================================================================
// Artifacts
// ============================================================================

/// What a constructor gets to see.
#[derive(Debug, Clone, Copy)]
pub struct Construction {
    pub deployer: Address,
    pub address: Address,
    pub block: BlockInfo,
}

pub type ArtifactFactory =
    dyn Fn(&Construction, &[Value]) -> Result<Box<dyn Contract>, Revert> + Send + Sync;

#[derive(Clone)]
pub struct Artifact {
    pub constructor: MethodSignature,
    factory: Arc<ArtifactFactory>,
}

impl Artifact {
    pub fn instantiate(
        &self,
        construction: &Construction,
        args: &[Value],
    ) -> Result<Box<dyn Contract>, Revert> {
        (self.factory)(construction, args)
    }
}

/// Deployable contract code by name.
#[derive(Clone, Default)]
pub struct ArtifactRegistry {
    artifacts: BTreeMap<String, Artifact>,
}

impl ArtifactRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: impl Into<String>, constructor: MethodSignature, factory: F)
    where
        F: Fn(&Construction, &[Value]) -> Result<Box<dyn Contract>, Revert> + Send + Sync + 'static,
    {
        self.artifacts.insert(
            name.into(),
            Artifact {
                constructor,
                factory: Arc::new(factory),
            },
        );
    }

    pub fn get(&self, name: &str) -> Option<&Artifact> {
        self.artifacts.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.artifacts.keys().map(|s| s.as_str())
    }
}

impl fmt::Debug for ArtifactRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.artifacts.keys()).finish()
    }
}

// ============================================================================
// Execution
// ============================================================================

/// Execution environment of one contract frame.
pub struct CallContext<'a> {
    state: &'a mut ChainState,
    logs: &'a mut Vec<LogEntry>,
    stack: &'a mut Vec<Address>,
    caller: Address,
    this: Address,
    value: u128,
}

impl<'a> CallContext<'a> {
    pub fn caller(&self) -> Address {
        self.caller
    }

    pub fn this(&self) -> Address {
        self.this
    }

    pub fn value(&self) -> u128 {
        self.value
    }

    pub fn block(&self) -> BlockInfo {
        self.state.head
    }

    pub fn balance(&self, account: &Address) -> u128 {
        self.state.balance(account)
    }

    pub fn self_balance(&self) -> u128 {
        self.state.balance(&self.this)
    }

    /// Send native value from this contract.
    pub fn transfer(&mut self, to: Address, amount: u128) -> Result<(), Revert> {
        self.state.move_balance(self.this, to, amount)
    }

    pub fn emit(&mut self, name: impl Into<String>, data: Vec<Value>) {
        self.logs.push(LogEntry {
            emitter: self.this,
            name: name.into(),
            data,
        });
    }

    /// Call another contract with this contract as the caller.
    pub fn call(
        &mut self,
        to: Address,
        method: &MethodSignature,
        args: &[Value],
        value: u128,
    ) -> Result<Vec<Value>, Revert> {
        execute(self.state, self.logs, self.stack, self.this, to, value, method, args)
    }

    pub fn view(
        &self,
        to: Address,
        method: &MethodSignature,
        args: &[Value],
    ) -> Result<Vec<Value>, Revert> {
        view(&*self.state, to, method, args)
    }
}

/// Read-only environment of a view call.
pub struct ViewContext<'a> {
    state: &'a ChainState,
    this: Address,
}

impl<'a> ViewContext<'a> {
    pub fn new(state: &'a ChainState, this: Address) -> Self {
        Self { state, this }
    }

    pub fn this(&self) -> Address {
        self.this
    }

    pub fn block(&self) -> BlockInfo {
        self.state.head
    }

    pub fn balance(&self, account: &Address) -> u128 {
        self.state.balance(account)
    }

    pub fn view_other(
        &self,
        to: Address,
        method: &MethodSignature,
        args: &[Value],
    ) -> Result<Vec<Value>, Revert> {
        view(self.state, to, method, args)
    }
}

/// Execute a state-changing call frame. The caller is responsible for
/// rolling `state` back if this returns an error.
#[allow(clippy::too_many_arguments)]
pub(crate) fn execute(
    state: &mut ChainState,
    logs: &mut Vec<LogEntry>,
    stack: &mut Vec<Address>,
    from: Address,
    to: Address,
    value: u128,
    method: &MethodSignature,
    args: &[Value],
) -> Result<Vec<Value>, Revert> {
    if stack.contains(&to) {
        return Err(Revert::new(format!(
            "reentrant call into {}",
            to.to_short_string()
        )));
    }
    method
        .check_args(args)
        .map_err(|e| Revert::new(e.to_string()))?;
    let mut contract = state.contracts.remove(&to).ok_or_else(|| {
        Revert::new(format!("call to non-contract {}", to.to_short_string()))
    })?;
    let outcome = state.move_balance(from, to, value).and_then(|()| {
        stack.push(to);
        let mut ctx = CallContext {
            state: &mut *state,
            logs: &mut *logs,
            stack: &mut *stack,
            caller: from,
            this: to,
            value,
        };
        let result = contract.call(&mut ctx, method, args);
        stack.pop();
        result
    });
    state.contracts.insert(to, contract);
    outcome
}

pub(crate) fn view(
    state: &ChainState,
    to: Address,
    method: &MethodSignature,
    args: &[Value],
) -> Result<Vec<Value>, Revert> {
    method
        .check_args(args)
        .map_err(|e| Revert::new(e.to_string()))?;
    let contract = state
        .contracts
        .get(&to)
        .ok_or_else(|| Revert::new(format!("view on non-contract {}", to.to_short_string())))?;
    contract.view(&ViewContext::new(state, to), method, args)
}

// ============================================================================
// Argument helpers for contract implementations
// ============================================================================

pub fn arg_uint(args: &[Value], index: usize) -> Result<u128, Revert> {
    args.get(index)
        .and_then(Value::as_uint)
        .ok_or_else(|| Revert::new(format!("argument {} is not a uint", index)))
}

pub fn arg_address(args: &[Value], index: usize) -> Result<Address, Revert> {
    args.get(index)
        .and_then(Value::as_address)
        .ok_or_else(|| Revert::new(format!("argument {} is not an address", index)))
}

pub fn arg_bool(args: &[Value], index: usize) -> Result<bool, Revert> {
    args.get(index)
        .and_then(Value::as_bool)
        .ok_or_else(|| Revert::new(format!("argument {} is not a bool", index)))
}

pub fn arg_string(args: &[Value], index: usize) -> Result<String, Revert> {
    args.get(index)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| Revert::new(format!("argument {} is not a string", index)))
}

pub fn arg_list(args: &[Value], index: usize) -> Result<&[Value], Revert> {
    args.get(index)
        .and_then(Value::as_list)
        .ok_or_else(|| Revert::new(format!("argument {} is not a list", index)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Default)]
    struct Echo {
        calls: u64,
        peer: Option<Address>,
    }

    impl Contract for Echo {
        fn artifact(&self) -> &str {
            "echo"
        }

        fn call(
            &mut self,
            ctx: &mut CallContext<'_>,
            method: &MethodSignature,
            args: &[Value],
        ) -> Result<Vec<Value>, Revert> {
            self.calls += 1;
            match method.name() {
                "ping" => {
                    ctx.emit("Ping", args.to_vec());
                    Ok(args.to_vec())
                }
                "bounce" => {
                    let peer = self.peer.ok_or_else(|| Revert::new("no peer"))?;
                    let sig = MethodSignature::parse("bounce()").map_err(|e| Revert::new(e.to_string()))?;
                    ctx.call(peer, &sig, &[], 0)
                }
                _ => Err(unknown_method("echo", method)),
            }
        }

        fn view(
            &self,
            _ctx: &ViewContext<'_>,
            method: &MethodSignature,
            _args: &[Value],
        ) -> Result<Vec<Value>, Revert> {
            match method.name() {
                "calls" => Ok(vec![Value::Uint(self.calls as u128)]),
                _ => Err(unknown_method("echo", method)),
            }
        }

        fn clone_box(&self) -> Box<dyn Contract> {
            Box::new(self.clone())
        }
    }

    fn state_with(contracts: Vec<(Address, Echo)>) -> ChainState {
        let mut state = ChainState::new(BlockInfo { number: 1, timestamp: 100 }, 12, 0);
        for (address, contract) in contracts {
            state.contracts.insert(address, Box::new(contract));
        }
        state
    }

    #[test]
    fn test_execute_returns_and_logs() {
        let a = Address::from_low_u64(0xa);
        let mut state = state_with(vec![(a, Echo::default())]);
        let mut logs = Vec::new();
        let mut stack = Vec::new();
        let sig = MethodSignature::parse("ping(uint256)").unwrap();
        let out = execute(&mut state, &mut logs, &mut stack, Address::from_low_u64(1), a, 0, &sig, &[Value::Uint(7)])
            .unwrap();
        assert_eq!(out, vec![Value::Uint(7)]);
        assert_eq!(logs.len(), 1);
        assert!(stack.is_empty());
        let calls = view(&state, a, &MethodSignature::parse("calls()").unwrap(), &[]).unwrap();
        assert_eq!(calls, vec![Value::Uint(1)]);
    }

    #[test]
    fn test_reentrancy_reverts_and_contract_survives() {
        let a = Address::from_low_u64(0xa);
        let b = Address::from_low_u64(0xb);
        let mut state = state_with(vec![
            (a, Echo { calls: 0, peer: Some(b) }),
            (b, Echo { calls: 0, peer: Some(a) }),
        ]);
        let sig = MethodSignature::parse("bounce()").unwrap();
        let err = execute(&mut state, &mut Vec::new(), &mut Vec::new(), Address::from_low_u64(1), a, 0, &sig, &[])
            .unwrap_err();
        assert!(err.reason.contains("reentrant"));
        assert!(state.contracts.contains_key(&a));
        assert!(state.contracts.contains_key(&b));
    }

    #[test]
    fn test_value_requires_balance() {
        let a = Address::from_low_u64(0xa);
        let sender = Address::from_low_u64(1);
        let mut state = state_with(vec![(a, Echo::default())]);
        let sig = MethodSignature::parse("ping()").unwrap();
        let err = execute(&mut state, &mut Vec::new(), &mut Vec::new(), sender, a, 5, &sig, &[]).unwrap_err();
        assert!(err.reason.contains("insufficient balance"));

        state.balances.insert(sender, 5);
        execute(&mut state, &mut Vec::new(), &mut Vec::new(), sender, a, 5, &sig, &[]).unwrap();
        assert_eq!(state.balance(&a), 5);
        assert_eq!(state.balance(&sender), 0);
    }

    #[test]
    fn test_non_contract_target_reverts() {
        let mut state = state_with(vec![]);
        let sig = MethodSignature::parse("ping()").unwrap();
        let err = execute(
            &mut state,
            &mut Vec::new(),
            &mut Vec::new(),
            Address::from_low_u64(1),
            Address::from_low_u64(2),
            0,
            &sig,
            &[],
        )
        .unwrap_err();
        assert!(err.reason.contains("non-contract"));
    }
}
