//! Chain fork abstraction.
//!
//! A [`ForkProvider`] hands out isolated copies of chain state at a reference
//! point. Each copy is wrapped in a [`ForkLease`] which tears the fork down
//! when dropped, whether the run that used it succeeded or not.
//!
//! The bundled backend is [`local::LocalForkProvider`], an in-process chain
//! that executes [`runtime::Contract`] implementations. A JSON-RPC backend
//! would implement the same two traits.

pub mod genesis;
pub mod local;
pub mod runtime;
pub mod stock;

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use proposal_sandbox_types::value::wide_uint;
use proposal_sandbox_types::{Address, MethodSignature, Value};

use crate::errors::SandboxError;

pub use genesis::LiveChainSpec;
pub use local::{LocalFork, LocalForkProvider};
pub use runtime::{ArtifactRegistry, CallContext, ChainState, Contract, ViewContext};

// ============================================================================
// Plain data
// ============================================================================

/// Pinned point on the live chain that a fork starts from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferencePoint {
    pub block: u64,
}

impl ReferencePoint {
    pub fn at_block(block: u64) -> Self {
        Self { block }
    }
}

/// Head of a fork.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockInfo {
    pub number: u64,
    /// Seconds since the epoch.
    pub timestamp: u64,
}

/// A state-changing transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallRequest {
    pub from: Address,
    pub to: Address,
    #[serde(with = "wide_uint")]
    pub value: u128,
    pub method: MethodSignature,
    pub args: Vec<Value>,
}

/// A contract creation transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployRequest {
    pub from: Address,
    pub artifact: String,
    pub args: Vec<Value>,
    #[serde(default, with = "wide_uint")]
    pub value: u128,
}

/// Event emitted by a contract during a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub emitter: Address,
    pub name: String,
    pub data: Vec<Value>,
}

/// Result of an included transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallReceipt {
    pub block: u64,
    pub from: Address,
    pub to: Address,
    pub returned: Vec<Value>,
    pub logs: Vec<LogEntry>,
    #[serde(with = "wide_uint")]
    pub gas_paid: u128,
}

/// Result of an included deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployReceipt {
    pub block: u64,
    pub address: Address,
    pub artifact: String,
}

// ============================================================================
// Errors
// ============================================================================

/// Contract-level failure. `action` is set when a batch executor knows which
/// of its inner calls failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revert {
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<usize>,
}

impl Revert {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            action: None,
        }
    }

    pub fn in_action(mut self, index: usize) -> Self {
        self.action = Some(index);
        self
    }
}

impl fmt::Display for Revert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.action {
            Some(index) => write!(f, "action {} reverted: {}", index, self.reason),
            None => write!(f, "reverted: {}", self.reason),
        }
    }
}

/// Why a transaction or view did not succeed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    /// Included and reverted; state changes were rolled back.
    Reverted(Revert),
    /// Never included (locked sender, bad arguments, insufficient funds).
    Rejected(String),
}

impl CallError {
    pub fn reason(&self) -> String {
        match self {
            CallError::Reverted(revert) => revert.reason.clone(),
            CallError::Rejected(reason) => reason.clone(),
        }
    }

    pub fn failing_action(&self) -> Option<usize> {
        match self {
            CallError::Reverted(revert) => revert.action,
            CallError::Rejected(_) => None,
        }
    }
}

impl fmt::Display for CallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallError::Reverted(revert) => write!(f, "{}", revert),
            CallError::Rejected(reason) => write!(f, "rejected: {}", reason),
        }
    }
}

impl std::error::Error for CallError {}

impl From<Revert> for CallError {
    fn from(revert: Revert) -> Self {
        CallError::Reverted(revert)
    }
}

// ============================================================================
// Traits
// ============================================================================

/// An isolated, mutable copy of chain state.
///
/// Besides ordinary transactions a fork exposes the test-only powers a local
/// node has: impersonation, balance overrides, and clock control. Only
/// [`crate::actors::ActorProvider`] and [`crate::time::TimeController`]
/// should call those directly.
#[async_trait::async_trait]
pub trait Fork: Send + Sync {
    /// Reference point this fork was created from.
    fn reference(&self) -> ReferencePoint;

    /// Accounts the node can sign for without impersonation.
    fn operators(&self) -> Vec<Address>;

    /// Flat fee charged to the sender of every included transaction.
    fn gas_fee(&self) -> u128;

    async fn block(&self) -> Result<BlockInfo, SandboxError>;

    async fn balance(&self, account: Address) -> Result<u128, SandboxError>;

    async fn nonce(&self, account: Address) -> Result<u64, SandboxError>;

    /// Artifact name of the contract at `address`, if there is one.
    async fn code_at(&self, address: Address) -> Result<Option<String>, SandboxError>;

    async fn send(&self, request: CallRequest) -> Result<CallReceipt, CallError>;

    async fn deploy(&self, request: DeployRequest) -> Result<DeployReceipt, CallError>;

    /// Read-only call against the current head.
    async fn view(
        &self,
        to: Address,
        method: &MethodSignature,
        args: &[Value],
    ) -> Result<Vec<Value>, CallError>;

    async fn impersonate(&self, account: Address) -> Result<(), SandboxError>;

    async fn stop_impersonating(&self, account: Address) -> Result<(), SandboxError>;

    async fn set_balance(&self, account: Address, amount: u128) -> Result<(), SandboxError>;

    /// Mine `blocks` empty blocks, each `block_time` seconds after the last.
    async fn mine(&self, blocks: u64) -> Result<BlockInfo, SandboxError>;

    /// Move the clock forward without mining.
    async fn increase_time(&self, seconds: u64) -> Result<BlockInfo, SandboxError>;

    /// Tear the fork down. Later calls fail.
    fn close(&self);

    fn is_closed(&self) -> bool;
}

/// Factory for forks at a reference point.
#[async_trait::async_trait]
pub trait ForkProvider: Send + Sync {
    async fn fork(&self, reference: ReferencePoint) -> Result<ForkLease, SandboxError>;

    /// Forks handed out and not yet released.
    fn live_forks(&self) -> usize;
}

// ============================================================================
// Lease
// ============================================================================

type ReleaseFn = Box<dyn FnOnce() + Send + Sync>;

/// Owning handle on a fork. Dropping it closes the fork and returns it to
/// its provider.
pub struct ForkLease {
    fork: Arc<dyn Fork>,
    release: Option<ReleaseFn>,
}

impl ForkLease {
    pub fn new(fork: Arc<dyn Fork>, release: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            fork,
            release: Some(Box::new(release)),
        }
    }

    /// Shared handle for actors and clock control. It stops working once
    /// the lease is dropped.
    pub fn handle(&self) -> Arc<dyn Fork> {
        self.fork.clone()
    }
}

impl Deref for ForkLease {
    type Target = dyn Fork;

    fn deref(&self) -> &Self::Target {
        self.fork.as_ref()
    }
}

impl fmt::Debug for ForkLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForkLease")
            .field("reference", &self.fork.reference())
            .field("closed", &self.fork.is_closed())
            .finish()
    }
}

impl Drop for ForkLease {
    fn drop(&mut self) {
        self.fork.close();
        if let Some(release) = self.release.take() {
            release();
        }
        tracing::debug!(block = self.fork.reference().block, "Fork released");
    }
}
