//! Live chain description for the local backend.
//!
//! A chain file stands in for "mainnet at block N": accounts, balances and
//! the contracts already deployed there.
//!
//! ```yaml
//! block: 19000000
//! timestamp: 1700000000
//! block_time: 12
//! gas_fee: 21000
//! operators: ["0x0e"]
//! labels:
//!   executor: "0x0e"
//! accounts:
//!   - { address: "0x0e", balance: 1000000000 }
//! contracts:
//!   - name: vault
//!     artifact: vault
//!     deployer: "0x0e"
//!     args: [{ symbol: executor }]
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use proposal_sandbox_types::value::wide_uint;
use proposal_sandbox_types::{Address, Value};

use super::local::LocalForkProvider;
use super::runtime::{ArtifactRegistry, ChainState, Construction};
use super::stock::stock_artifacts;
use super::{BlockInfo, ReferencePoint};
use crate::command::Arg;
use crate::errors::SandboxError;
use crate::registry::{AddressRegistry, ContractHandle, NamedContracts};

fn default_block_time() -> u64 {
    12
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountSpec {
    pub address: Address,
    #[serde(with = "wide_uint")]
    pub balance: u128,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractSpec {
    pub name: String,
    pub artifact: String,
    pub deployer: Address,
    /// Fixed address; derived from the deployer's nonce when absent.
    #[serde(default)]
    pub address: Option<Address>,
    #[serde(default)]
    pub args: Vec<Arg>,
    #[serde(default, with = "wide_uint")]
    pub balance: u128,
    /// First recorded block the contract exists at; absent means genesis.
    #[serde(default)]
    pub since_block: Option<u64>,
}

/// Serialized state of the live chain at its latest recorded block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveChainSpec {
    pub block: u64,
    pub timestamp: u64,
    #[serde(default = "default_block_time")]
    pub block_time: u64,
    #[serde(default, with = "wide_uint")]
    pub gas_fee: u128,
    #[serde(default)]
    pub operators: Vec<Address>,
    /// Registry names for plain accounts (proposers, voters, multisigs).
    #[serde(default)]
    pub labels: BTreeMap<String, Address>,
    #[serde(default)]
    pub accounts: Vec<AccountSpec>,
    #[serde(default)]
    pub contracts: Vec<ContractSpec>,
    /// Earlier heights to record as well, so forks can start before `block`.
    #[serde(default)]
    pub checkpoints: Vec<u64>,
}

/// A materialized live chain: fork provider plus the names it ships with.
pub struct LiveChain {
    pub provider: LocalForkProvider,
    pub registry: AddressRegistry,
    pub contracts: NamedContracts,
    /// Latest recorded block.
    pub head: ReferencePoint,
}

impl LiveChainSpec {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read chain file {}", path.display()))?;
        serde_yaml::from_str(&raw)
            .with_context(|| format!("Failed to parse chain file {}", path.display()))
    }

    /// Build with the stock artifacts.
    pub fn build(&self) -> Result<LiveChain, SandboxError> {
        self.build_with(stock_artifacts())
    }

    pub fn build_with(&self, artifacts: ArtifactRegistry) -> Result<LiveChain, SandboxError> {
        if let Some(height) = self.checkpoints.iter().find(|h| **h > self.block) {
            return Err(SandboxError::config(format!(
                "checkpoint {} is above the chain head {}",
                height, self.block
            )));
        }
        let mut registry = AddressRegistry::new();
        let mut contracts = NamedContracts::new();
        registry.bind_many(self.labels.iter().map(|(name, address)| (name.clone(), *address)))?;

        // Addresses and constructor args are fixed once, at head, so every
        // checkpoint agrees on where a contract lives.
        let mut nonces: BTreeMap<Address, u64> = BTreeMap::new();
        let mut placed = Vec::with_capacity(self.contracts.len());
        for spec in &self.contracts {
            let artifact = artifacts.get(&spec.artifact).ok_or_else(|| {
                SandboxError::config(format!(
                    "contract '{}' uses unknown artifact '{}'",
                    spec.name, spec.artifact
                ))
            })?;
            let args = spec
                .args
                .iter()
                .map(|arg| arg.resolve(&registry))
                .collect::<Result<Vec<_>, _>>()?;
            artifact.constructor.check_args(&args).map_err(|e| {
                SandboxError::config(format!("contract '{}': {}", spec.name, e))
            })?;
            let address = match spec.address {
                Some(address) => address,
                None => {
                    let nonce = nonces.entry(spec.deployer).or_insert(0);
                    *nonce += 1;
                    Address::derive(&spec.deployer, *nonce - 1)
                }
            };
            if placed.iter().any(|(_, a, _)| *a == address) {
                return Err(SandboxError::config(format!(
                    "contract '{}' collides with an existing contract at {}",
                    spec.name, address
                )));
            }
            registry.bind_many([(spec.name.clone(), address)])?;
            contracts.insert(
                spec.name.clone(),
                ContractHandle::new(address, Some(spec.artifact.clone())),
            );
            placed.push((spec, address, args));
        }

        let mut provider = LocalForkProvider::new(artifacts.clone())
            .with_operators(self.operators.clone());
        let mut heights = self.checkpoints.clone();
        heights.push(self.block);
        for height in heights {
            provider = provider.with_checkpoint(self.state_at(height, &artifacts, &placed)?);
        }
        Ok(LiveChain {
            provider,
            registry,
            contracts,
            head: ReferencePoint::at_block(self.block),
        })
    }

    fn state_at(
        &self,
        height: u64,
        artifacts: &ArtifactRegistry,
        placed: &[(&ContractSpec, Address, Vec<Value>)],
    ) -> Result<ChainState, SandboxError> {
        let head = BlockInfo {
            number: height,
            timestamp: self
                .timestamp
                .saturating_sub((self.block - height).saturating_mul(self.block_time)),
        };
        let mut state = ChainState::new(head, self.block_time, self.gas_fee);
        for account in &self.accounts {
            state.balances.insert(account.address, account.balance);
        }
        for (spec, address, args) in placed {
            // A derived address consumes the deployer's nonce even at heights
            // where the contract does not exist yet.
            if spec.address.is_none() {
                state.bump_nonce(spec.deployer);
            }
            if spec.since_block.is_some_and(|since| since > height) {
                continue;
            }
            let artifact = artifacts.get(&spec.artifact).ok_or_else(|| {
                SandboxError::config(format!("unknown artifact '{}'", spec.artifact))
            })?;
            let construction = Construction {
                deployer: spec.deployer,
                address: *address,
                block: head,
            };
            let contract = artifact.instantiate(&construction, args).map_err(|revert| {
                SandboxError::config(format!("constructing '{}': {}", spec.name, revert))
            })?;
            state.contracts.insert(*address, contract);
            if spec.balance > 0 {
                state.balances.insert(*address, spec.balance);
            }
        }
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fork::{Fork, ForkProvider};
    use proposal_sandbox_types::MethodSignature;

    const CHAIN: &str = r#"
block: 500
timestamp: 1700000000
gas_fee: 3
operators: ["0x0e"]
labels:
  executor: "0x0e"
accounts:
  - { address: "0x0e", balance: "1_000_000" }
contracts:
  - name: vault
    artifact: vault
    deployer: "0x0e"
    args: [{ symbol: executor }]
    balance: 77
  - name: log
    artifact: recorder
    deployer: "0x0e"
"#;

    #[tokio::test]
    async fn test_chain_file_builds_registry_and_state() {
        let spec: LiveChainSpec = serde_yaml::from_str(CHAIN).unwrap();
        let chain = spec.build().unwrap();
        assert_eq!(chain.head.block, 500);
        let executor = Address::from_low_u64(0x0e);
        assert_eq!(chain.registry.resolve("executor").unwrap(), executor);
        let vault = chain.registry.resolve("vault").unwrap();
        assert_ne!(vault, chain.registry.resolve("log").unwrap());
        assert_eq!(chain.contracts.get("vault").unwrap().artifact.as_deref(), Some("vault"));

        let lease = chain.provider.fork(chain.head).await.unwrap();
        let owner = lease
            .view(vault, &MethodSignature::parse("owner()").unwrap(), &[])
            .await
            .unwrap();
        assert_eq!(owner, vec![Value::Address(executor)]);
        assert_eq!(lease.balance(vault).await.unwrap(), 77);
        assert_eq!(lease.gas_fee(), 3);
    }

    #[test]
    fn test_unknown_artifact_is_config_error() {
        let spec: LiveChainSpec = serde_yaml::from_str(
            "block: 1\ntimestamp: 1\ncontracts:\n  - { name: x, artifact: nope, deployer: \"0x01\" }\n",
        )
        .unwrap();
        assert!(matches!(spec.build(), Err(SandboxError::Config { .. })));
    }

    #[test]
    fn test_forward_reference_in_chain_file_fails() {
        let spec: LiveChainSpec = serde_yaml::from_str(
            "block: 1\ntimestamp: 1\ncontracts:\n  - { name: v, artifact: vault, deployer: \"0x01\", args: [{ symbol: later }] }\n",
        )
        .unwrap();
        assert!(matches!(spec.build(), Err(SandboxError::UnknownSymbol { .. })));
    }

    #[tokio::test]
    async fn test_earlier_checkpoint_predates_later_contracts() {
        let spec: LiveChainSpec = serde_yaml::from_str(
            r#"
block: 200
timestamp: 2400
checkpoints: [100]
contracts:
  - { name: old, artifact: recorder, deployer: "0x01" }
  - { name: new, artifact: recorder, deployer: "0x01", since_block: 150 }
"#,
        )
        .unwrap();
        let chain = spec.build().unwrap();
        let new = chain.registry.resolve("new").unwrap();

        let early = chain.provider.fork(ReferencePoint::at_block(120)).await.unwrap();
        assert_eq!(early.code_at(new).await.unwrap(), None);
        assert_eq!(early.block().await.unwrap().timestamp, 1200 + 20 * 12);

        let late = chain.provider.fork(ReferencePoint::at_block(200)).await.unwrap();
        assert_eq!(late.code_at(new).await.unwrap().as_deref(), Some("recorder"));
    }

    #[tokio::test]
    async fn test_deploy_on_early_fork_skips_genesis_addresses() {
        let spec: LiveChainSpec = serde_yaml::from_str(
            r#"
block: 100
timestamp: 1200
operators: ["0xd0"]
accounts:
  - { address: "0xd0", balance: 1000 }
checkpoints: [90]
contracts:
  - { name: late, artifact: recorder, deployer: "0xd0", since_block: 95 }
  - { name: early, artifact: vault, deployer: "0xd0", args: [{ address: "0xd0" }] }
"#,
        )
        .unwrap();
        let chain = spec.build().unwrap();
        let late = chain.registry.resolve("late").unwrap();
        let early = chain.registry.resolve("early").unwrap();

        let lease = chain.provider.fork(ReferencePoint::at_block(90)).await.unwrap();
        assert_eq!(lease.code_at(late).await.unwrap(), None);
        let deployed = lease
            .deploy(crate::fork::DeployRequest {
                from: Address::from_low_u64(0xd0),
                artifact: "recorder".into(),
                args: vec![],
                value: 0,
            })
            .await
            .unwrap()
            .address;
        assert_ne!(deployed, early);
        assert_ne!(deployed, late);
        assert_eq!(lease.code_at(early).await.unwrap().as_deref(), Some("vault"));
    }
}
