//! Calldata encoding.
//!
//! When commands are bundled into a governance proposal their arguments travel
//! as opaque `bytes`, exactly like ABI calldata on a real chain. The encoding
//! is the JSON form of the tagged [`Value`] list, which keeps the bytes
//! inspectable in previews and reports.

use anyhow::{anyhow, Result};

use crate::value::Value;

/// Encode an argument list into calldata bytes.
pub fn encode_calldata(args: &[Value]) -> Vec<u8> {
    // Serializing a Vec of plain enums cannot fail.
    serde_json::to_vec(args).unwrap_or_default()
}

/// Decode calldata produced by [`encode_calldata`].
pub fn decode_calldata(bytes: &[u8]) -> Result<Vec<Value>> {
    serde_json::from_slice(bytes).map_err(|e| anyhow!("malformed calldata: {}", e))
}
