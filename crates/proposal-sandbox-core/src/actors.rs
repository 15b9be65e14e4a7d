//! Actor capability provider.
//!
//! Impersonation and balance top-ups are test-only powers of a fork. They are
//! reachable only through an [`ActorProvider`], which the lifecycle runner
//! hands to `setup`, `teardown` and `validate` hooks and to the execution
//! routes. Command argument resolvers and `deploy` hooks never see it.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;

use proposal_sandbox_types::{Address, MethodSignature, Value};

use crate::errors::SandboxError;
use crate::fork::{CallError, CallReceipt, CallRequest, DeployReceipt, DeployRequest, Fork};

/// An address that can send transactions on the fork.
#[derive(Clone)]
pub struct Actor {
    address: Address,
    fork: Arc<dyn Fork>,
}

impl std::fmt::Debug for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Actor").field(&self.address).finish()
    }
}

impl Actor {
    pub fn address(&self) -> Address {
        self.address
    }

    pub async fn call(
        &self,
        to: Address,
        method: &MethodSignature,
        args: Vec<Value>,
        value: u128,
    ) -> Result<CallReceipt, CallError> {
        self.fork
            .send(CallRequest {
                from: self.address,
                to,
                value,
                method: method.clone(),
                args,
            })
            .await
    }

    /// Parse `method` and call. Convenience for hooks.
    pub async fn call_sig(
        &self,
        to: Address,
        method: &str,
        args: Vec<Value>,
    ) -> anyhow::Result<CallReceipt> {
        let method = MethodSignature::parse(method)?;
        Ok(self.call(to, &method, args, 0).await?)
    }

    pub async fn deploy(&self, artifact: &str, args: Vec<Value>) -> Result<DeployReceipt, CallError> {
        self.fork
            .deploy(DeployRequest {
                from: self.address,
                artifact: artifact.to_string(),
                args,
                value: 0,
            })
            .await
    }
}

/// Grants actors on a single fork.
///
/// Every [`as_actor`](Self::as_actor) pairs with one [`release`](Self::release).
/// An impersonated address stays unlocked until its last actor is released;
/// clones of the provider share the count.
#[derive(Clone)]
pub struct ActorProvider {
    fork: Arc<dyn Fork>,
    held: Arc<Mutex<BTreeMap<Address, usize>>>,
}

impl ActorProvider {
    pub fn new(fork: Arc<dyn Fork>) -> Self {
        Self {
            fork,
            held: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    fn is_operator(&self, address: &Address) -> bool {
        self.fork.operators().contains(address)
    }

    /// Act as an arbitrary address, impersonating it unless the node already
    /// signs for it.
    pub async fn as_actor(&self, address: Address) -> Result<Actor, SandboxError> {
        if !self.is_operator(&address) {
            let first = {
                let mut held = self.held.lock();
                let count = held.entry(address).or_insert(0);
                *count += 1;
                *count == 1
            };
            if first {
                if let Err(err) = self.fork.impersonate(address).await {
                    self.held.lock().remove(&address);
                    return Err(err);
                }
                tracing::debug!(actor = %address.to_short_string(), "Impersonating");
            }
        }
        Ok(Actor {
            address,
            fork: self.fork.clone(),
        })
    }

    /// The node's first signing account.
    pub fn operator(&self) -> Result<Actor, SandboxError> {
        let address = self
            .fork
            .operators()
            .first()
            .copied()
            .ok_or_else(|| SandboxError::fork("fork has no operator accounts"))?;
        Ok(Actor {
            address,
            fork: self.fork.clone(),
        })
    }

    /// Raise `account`'s native balance to at least `minimum`. Returns the
    /// resulting balance.
    pub async fn ensure_funded(&self, account: Address, minimum: u128) -> Result<u128, SandboxError> {
        let balance = self.fork.balance(account).await?;
        if balance >= minimum {
            return Ok(balance);
        }
        self.fork.set_balance(account, minimum).await?;
        tracing::debug!(
            account = %account.to_short_string(),
            from = balance,
            to = minimum,
            "Topped up balance"
        );
        Ok(minimum)
    }

    /// Add `amount` to `account`'s balance.
    pub async fn fund(&self, account: Address, amount: u128) -> Result<u128, SandboxError> {
        let balance = self.fork.balance(account).await?.saturating_add(amount);
        self.fork.set_balance(account, balance).await?;
        Ok(balance)
    }

    /// Give an actor back. Impersonation stops with the address's last
    /// outstanding actor; operator accounts are left alone.
    pub async fn release(&self, actor: Actor) -> Result<(), SandboxError> {
        if self.is_operator(&actor.address) {
            return Ok(());
        }
        let last = {
            let mut held = self.held.lock();
            match held.get_mut(&actor.address) {
                Some(count) if *count > 1 => {
                    *count -= 1;
                    false
                }
                _ => {
                    held.remove(&actor.address);
                    true
                }
            }
        };
        if last {
            self.fork.stop_impersonating(actor.address).await?;
            tracing::debug!(actor = %actor.address.to_short_string(), "Stopped impersonating");
        }
        Ok(())
    }

    /// Gas fee plus `value`: what a sender needs to get one call included.
    pub fn call_cost(&self, value: u128) -> u128 {
        self.fork.gas_fee().saturating_add(value)
    }
}
