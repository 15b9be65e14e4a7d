//! Shared types for the proposal-sandbox workspace.
//!
//! This crate provides the foundational vocabulary used by the core engine and
//! the CLI: addresses, call values, method signatures and the calldata codec
//! used when commands are bundled into governance proposals.

pub mod address;
pub mod encoding;
pub mod env_utils;
pub mod signature;
pub mod value;

pub use address::{Address, ADDRESS_LENGTH};
pub use encoding::{decode_calldata, encode_calldata};
pub use env_utils::{env_flag, env_var};
pub use signature::{MethodSignature, ParamType};
pub use value::{format_values, TaggedValueSeed, Value};
