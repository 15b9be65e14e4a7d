//! Address registry and named contract handles.
//!
//! The registry is the symbol table threaded through every lifecycle stage:
//! `deploy` phases add symbols, commands may explicitly rebind or unbind
//! them, and argument resolvers read it just in time.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use proposal_sandbox_types::Address;

use crate::errors::SandboxError;

/// Mapping from human-readable symbol to contract address.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AddressRegistry {
    bindings: BTreeMap<String, Address>,
}

impl AddressRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve a symbol, failing with [`SandboxError::UnknownSymbol`] if unbound.
    pub fn resolve(&self, symbol: &str) -> Result<Address, SandboxError> {
        self.bindings
            .get(symbol)
            .copied()
            .ok_or_else(|| SandboxError::UnknownSymbol {
                symbol: symbol.to_string(),
            })
    }

    pub fn get(&self, symbol: &str) -> Option<Address> {
        self.bindings.get(symbol).copied()
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.bindings.contains_key(symbol)
    }

    /// Insert or overwrite a binding, returning the previous address.
    pub fn bind(&mut self, symbol: impl Into<String>, address: Address) -> Option<Address> {
        self.bindings.insert(symbol.into(), address)
    }

    /// Bind many symbols at once.
    ///
    /// Every entry is validated before any is applied, so a rejected batch
    /// leaves the registry untouched.
    pub fn bind_many<I, S>(&mut self, entries: I) -> Result<(), SandboxError>
    where
        I: IntoIterator<Item = (S, Address)>,
        S: Into<String>,
    {
        let staged: Vec<(String, Address)> = entries
            .into_iter()
            .map(|(symbol, address)| (symbol.into(), address))
            .collect();
        if let Some((symbol, _)) = staged.iter().find(|(symbol, _)| !is_valid_symbol(symbol)) {
            return Err(SandboxError::config(format!(
                "invalid registry symbol '{}'",
                symbol
            )));
        }
        self.bindings.extend(staged);
        Ok(())
    }

    /// Explicitly remove a binding.
    pub fn unbind(&mut self, symbol: &str) -> Option<Address> {
        self.bindings.remove(symbol)
    }

    /// Reverse lookup, returning the first symbol bound to `address`.
    pub fn symbol_for(&self, address: &Address) -> Option<&str> {
        self.bindings
            .iter()
            .find(|(_, bound)| *bound == address)
            .map(|(symbol, _)| symbol.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Address)> {
        self.bindings.iter().map(|(s, a)| (s.as_str(), *a))
    }

    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.bindings.keys().map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

/// Symbols are non-empty and free of whitespace.
pub fn is_valid_symbol(symbol: &str) -> bool {
    !symbol.is_empty() && !symbol.chars().any(char::is_whitespace)
}

/// A live contract known to the environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractHandle {
    pub address: Address,
    /// Artifact the contract was instantiated from, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<String>,
}

impl ContractHandle {
    pub fn new(address: Address, artifact: Option<String>) -> Self {
        Self { address, artifact }
    }
}

/// Symbol -> live contract handle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NamedContracts {
    contracts: BTreeMap<String, ContractHandle>,
}

impl NamedContracts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, symbol: impl Into<String>, handle: ContractHandle) -> Option<ContractHandle> {
        self.contracts.insert(symbol.into(), handle)
    }

    /// Convenience for hooks: record a freshly deployed contract.
    pub fn with(mut self, symbol: impl Into<String>, address: Address, artifact: &str) -> Self {
        self.insert(symbol, ContractHandle::new(address, Some(artifact.to_string())));
        self
    }

    pub fn get(&self, symbol: &str) -> Option<&ContractHandle> {
        self.contracts.get(symbol)
    }

    pub fn address(&self, symbol: &str) -> Result<Address, SandboxError> {
        self.get(symbol)
            .map(|handle| handle.address)
            .ok_or_else(|| SandboxError::UnknownSymbol {
                symbol: symbol.to_string(),
            })
    }

    pub fn extend(&mut self, other: NamedContracts) {
        self.contracts.extend(other.contracts);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ContractHandle)> {
        self.contracts.iter().map(|(s, h)| (s.as_str(), h))
    }

    pub fn symbols(&self) -> Vec<String> {
        self.contracts.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.contracts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contracts.is_empty()
    }

    /// Registry entries for every handle, in symbol order.
    pub fn bindings(&self) -> impl Iterator<Item = (String, Address)> + '_ {
        self.contracts
            .iter()
            .map(|(symbol, handle)| (symbol.clone(), handle.address))
    }
}
