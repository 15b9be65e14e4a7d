//! Account and contract addresses.
//!
//! This module is the canonical source for address parsing in the workspace.
//! Other crates should import from here rather than defining their own logic.
//!
//! Addresses are 20-byte values, but they're often written in different formats:
//! - Short form: "0xdead"
//! - Full form: "0x000000000000000000000000000000000000dead"
//! - Without prefix: "dead"

use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, bail, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

/// Length of an address in bytes.
pub const ADDRESS_LENGTH: usize = 20;

/// A 20-byte account or contract address.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address([u8; ADDRESS_LENGTH]);

impl Address {
    /// The all-zero address. Never a valid call target.
    pub const ZERO: Address = Address([0u8; ADDRESS_LENGTH]);

    pub const fn new(bytes: [u8; ADDRESS_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Build an address from a small integer, e.g. `Address::from_low_u64(0xdead)`.
    pub fn from_low_u64(value: u64) -> Self {
        let mut bytes = [0u8; ADDRESS_LENGTH];
        bytes[ADDRESS_LENGTH - 8..].copy_from_slice(&value.to_be_bytes());
        Self(bytes)
    }

    /// Parse a hex address, accepting short forms and a missing `0x` prefix.
    ///
    /// # Examples
    ///
    /// ```
    /// use proposal_sandbox_types::Address;
    ///
    /// let addr = Address::parse("0xdead").unwrap();
    /// assert_eq!(addr.to_string(), "0x000000000000000000000000000000000000dead");
    /// assert!(Address::parse("not-hex").is_err());
    /// ```
    pub fn parse(addr: &str) -> Result<Self> {
        let addr = addr.trim();
        let hex_part = addr
            .strip_prefix("0x")
            .or_else(|| addr.strip_prefix("0X"))
            .unwrap_or(addr);
        if hex_part.is_empty() {
            bail!("empty address");
        }
        if hex_part.len() > ADDRESS_LENGTH * 2 {
            bail!(
                "address '{}' is longer than {} bytes",
                addr,
                ADDRESS_LENGTH
            );
        }
        let padded = format!("{:0>40}", hex_part.to_ascii_lowercase());
        let decoded =
            hex::decode(&padded).map_err(|e| anyhow!("invalid address '{}': {}", addr, e))?;
        let mut bytes = [0u8; ADDRESS_LENGTH];
        bytes.copy_from_slice(&decoded);
        Ok(Self(bytes))
    }

    /// Deterministically derive a contract address from its deployer and nonce.
    pub fn derive(deployer: &Address, nonce: u64) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(deployer.0);
        hasher.update(nonce.to_be_bytes());
        let digest = hasher.finalize();
        let mut bytes = [0u8; ADDRESS_LENGTH];
        bytes.copy_from_slice(&digest[..ADDRESS_LENGTH]);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; ADDRESS_LENGTH] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    /// Minimal hex form, useful for display.
    ///
    /// ```
    /// use proposal_sandbox_types::Address;
    ///
    /// assert_eq!(Address::from_low_u64(0xabc).to_short_string(), "0xabc");
    /// assert_eq!(Address::ZERO.to_short_string(), "0x0");
    /// ```
    pub fn to_short_string(&self) -> String {
        let full = hex::encode(self.0);
        let trimmed = full.trim_start_matches('0');
        if trimmed.is_empty() {
            "0x0".to_string()
        } else {
            format!("0x{}", trimmed)
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.to_short_string())
    }
}

impl FromStr for Address {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Address::parse(&raw).map_err(serde::de::Error::custom)
    }
}
